//! Configuration loading using Figment
//!
//! Configuration is loaded from:
//! 1. A TOML file (base configuration)
//! 2. Environment variables (prefixed with `MS2000_`, nested keys split on `__`)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! MS2000_CONTROLLER__PORT=/dev/ttyUSB1
//! MS2000_CONTROLLER__USE_PWM=true
//! MS2000_LOGGING__LEVEL=debug
//! ```
//!
//! # Example
//!
//! ```no_run
//! use asi_stage::config::StageConfig;
//!
//! let config = StageConfig::load("ms2000.toml")?;
//! let controller = config.open()?;
//! println!("{} on {}", controller.name(), config.controller.port);
//! # Ok::<(), asi_stage::StageError>(())
//! ```

use crate::adapters::SerialAdapter;
use crate::axis::StageSetup;
use crate::controller::{Controller, ControllerOptions, DEFAULT_NAME};
use crate::error::{StageError, StageResult};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "MS2000_";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageConfig {
    /// Serial link and controller behaviour
    #[serde(default)]
    pub controller: ControllerSection,
    /// Stage axes; absent for an illumination-only controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageSetup>,
    /// Log output
    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[controller]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerSection {
    /// Name used as the log prefix
    #[serde(default = "default_name")]
    pub name: String,
    /// Serial port (e.g., "/dev/ttyUSB0")
    #[serde(default = "default_port")]
    pub port: String,
    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-line read timeout in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Put the LED output in a known state at open
    #[serde(default)]
    pub use_pwm: bool,
    /// Bound on the move completion wait; unset waits indefinitely
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_timeout_ms: Option<u64>,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            port: default_port(),
            baud_rate: default_baud_rate(),
            read_timeout_ms: default_read_timeout_ms(),
            use_pwm: false,
            motion_timeout_ms: None,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Default filter level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================================================
// Default value functions
// ============================================================================

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_baud_rate() -> u32 {
    crate::adapters::serial_adapter::DEFAULT_BAUD_RATE
}

fn default_read_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl StageConfig {
    /// Load from a TOML file with environment overrides, then validate.
    ///
    /// A missing file is not an error; every field has a default except the
    /// stage description.
    pub fn load<P: AsRef<Path>>(path: P) -> StageResult<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Extract and validate from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> StageResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    ///
    /// The stage description is fully checked by building its geometry.
    pub fn validate(&self) -> StageResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(StageError::Configuration(format!(
                "invalid log level '{}', must be one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            )));
        }
        if self.controller.baud_rate == 0 {
            return Err(StageError::Configuration("baud_rate must be positive".to_string()));
        }
        if let Some(stage) = &self.stage {
            stage.build()?;
        }
        Ok(())
    }

    /// Per-line read timeout.
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.controller.read_timeout_ms)
    }

    /// Construction options for a [`Controller`].
    pub fn controller_options(&self) -> ControllerOptions {
        ControllerOptions {
            name: self.controller.name.clone(),
            stage: self.stage.clone(),
            use_pwm: self.controller.use_pwm,
            motion_timeout: self.controller.motion_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> StageResult<String> {
        toml::to_string_pretty(self).map_err(|e| StageError::Configuration(e.to_string()))
    }

    /// Open the configured serial port and initialize the controller.
    pub fn open(&self) -> StageResult<Controller<SerialAdapter>> {
        let options = self.controller_options();
        let transport = SerialAdapter::open_with_timeout(
            &self.controller.port,
            self.controller.baud_rate,
            self.read_timeout(),
        )?;
        Controller::with_transport(transport, options)
    }
}
