//! ASI MS-2000 stage and LED controller
//!
//! [`Controller`] owns the transport and every piece of session state. It is
//! strictly synchronous: each operation writes one line and blocks on one
//! response line before returning. Motion, parameter and illumination
//! operations are implemented in their own modules as further `impl` blocks
//! on this type.
//!
//! ## Configuration Example
//!
//! ```toml
//! [controller]
//! name = "MS-2000-500-CP"
//! port = "/dev/ttyUSB0"
//! baud_rate = 9600
//! use_pwm = true
//!
//! [stage]
//! axes = ["X", "Y"]
//! lead_screws = ["S", "S"]
//! min_mm = [-50.0, -25.0]
//! max_mm = [50.0, 25.0]
//! ```
//!
//! # Example Usage
//!
//! ```
//! use asi_stage::adapters::MockDevice;
//! use asi_stage::axis::{AxisId, LeadScrew, StageSetup};
//! use asi_stage::controller::{Controller, ControllerOptions};
//! use asi_stage::Setpoint;
//!
//! let options = ControllerOptions {
//!     stage: Some(StageSetup::new(
//!         vec![AxisId::X, AxisId::Y],
//!         vec![LeadScrew::Standard, LeadScrew::Standard],
//!         vec![-50.0, -25.0],
//!         vec![50.0, 25.0],
//!     )),
//!     ..Default::default()
//! };
//! let mut stage = Controller::with_transport(MockDevice::new(), options)?;
//! stage.move_um(&[Setpoint::Value(2000.0), Setpoint::Keep], true, true)?;
//! assert_eq!(stage.position_um(), &[2000.0, 0.0]);
//! stage.close()?;
//! # Ok::<(), asi_stage::StageError>(())
//! ```

use crate::adapters::serial_adapter::DEFAULT_BAUD_RATE;
use crate::adapters::{SerialAdapter, Transport};
use crate::axis::{AxisId, StageGeometry, StageSetup};
use crate::error::{ProtocolError, StageError, StageResult};
use crate::illumination::{IlluminationState, TtlInMode, TtlOutMode};
use crate::motion::MotionState;
use crate::parameters::ParameterKind;
use crate::protocol::{self, Command, SUPPORTED_VERSION, TERMINATOR};
use std::time::Duration;
use tracing::{debug, info};

/// Name used in logs when none is configured.
pub const DEFAULT_NAME: &str = "MS-2000-500-CP";

/// Construction options for a [`Controller`].
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerOptions {
    /// Device name used as the log prefix
    pub name: String,
    /// Stage axes; `None` opens the controller for illumination only
    pub stage: Option<StageSetup>,
    /// Put the LED output in a known state (off, intensity 1) at open
    pub use_pwm: bool,
    /// Upper bound on the completion wait; `None` waits indefinitely
    pub motion_timeout: Option<Duration>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            stage: None,
            use_pwm: false,
            motion_timeout: None,
        }
    }
}

/// Session state, rebuilt from the device every time a controller is opened.
///
/// Every per-axis vector is aligned with the configured axis order and is
/// empty when no stage is configured.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ControllerState {
    /// Move velocity per axis (mm/s)
    pub velocity_mmps: Vec<f64>,
    /// Acceleration ramp per axis (ms)
    pub acceleration_ms: Vec<f64>,
    /// Settle time per axis (ms)
    pub settle_time_ms: Vec<f64>,
    /// Precision window per axis (um)
    pub precision_um: Vec<f64>,
    /// Last read position per axis (um)
    pub position_um: Vec<f64>,
    /// Idle, or moving towards a target
    pub motion: MotionState,
    /// TTL input register
    pub ttl_in_mode: TtlInMode,
    /// TTL output register
    pub ttl_out_mode: TtlOutMode,
    /// Last verified LED intensity (%)
    pub pwm_intensity: Option<u32>,
    /// Named illumination state; `None` after manual register changes
    pub illumination: Option<IlluminationState>,
}

impl ControllerState {
    fn with_axes(n: usize) -> Self {
        Self {
            velocity_mmps: vec![0.0; n],
            acceleration_ms: vec![0.0; n],
            settle_time_ms: vec![0.0; n],
            precision_um: vec![0.0; n],
            position_um: vec![0.0; n],
            ..Default::default()
        }
    }

    /// Current values of a tunable parameter.
    pub fn parameter(&self, kind: ParameterKind) -> &[f64] {
        match kind {
            ParameterKind::Velocity => &self.velocity_mmps,
            ParameterKind::Acceleration => &self.acceleration_ms,
            ParameterKind::SettleTime => &self.settle_time_ms,
            ParameterKind::Precision => &self.precision_um,
        }
    }

    pub(crate) fn parameter_mut(&mut self, kind: ParameterKind) -> &mut Vec<f64> {
        match kind {
            ParameterKind::Velocity => &mut self.velocity_mmps,
            ParameterKind::Acceleration => &mut self.acceleration_ms,
            ParameterKind::SettleTime => &mut self.settle_time_ms,
            ParameterKind::Precision => &mut self.precision_um,
        }
    }
}

/// Driver for one MS-2000 controller.
pub struct Controller<T: Transport> {
    pub(crate) name: String,
    transport: T,
    version: String,
    geometry: Option<StageGeometry>,
    pub(crate) state: ControllerState,
    pub(crate) motion_timeout: Option<Duration>,
}

impl Controller<SerialAdapter> {
    /// Open the controller on a serial port at 9600 baud.
    pub fn open(port: &str, options: ControllerOptions) -> StageResult<Self> {
        info!("{}: Opening {}...", options.name, port);
        let transport = SerialAdapter::open(port, DEFAULT_BAUD_RATE)?;
        Self::with_transport(transport, options)
    }
}

impl<T: Transport> Controller<T> {
    /// Initialize a controller over an already open transport.
    ///
    /// The stage description is validated before anything is sent. The
    /// firmware version is checked, both TTL registers are reset, and when a
    /// stage is configured its parameters are written to their defaults and
    /// the position is read.
    pub fn with_transport(transport: T, options: ControllerOptions) -> StageResult<Self> {
        let geometry = options.stage.as_ref().map(StageSetup::build).transpose()?;
        let axis_count = geometry.as_ref().map_or(0, StageGeometry::len);

        let mut controller = Self {
            name: options.name,
            transport,
            version: String::new(),
            geometry,
            state: ControllerState::with_axes(axis_count),
            motion_timeout: options.motion_timeout,
        };

        let version = controller.query(&Command::bare("V"))?;
        if version != SUPPORTED_VERSION {
            return Err(StageError::UnsupportedFirmware {
                expected: SUPPORTED_VERSION.to_string(),
                found: version,
            });
        }
        controller.version = version;

        controller.apply_ttl_in_mode(TtlInMode::Disabled)?;
        controller.apply_ttl_out_mode(TtlOutMode::Low)?;

        if controller.geometry.is_some() {
            controller.apply_stage_defaults()?;
            controller.get_position_um()?;
        }

        if options.use_pwm {
            controller.set_illumination(IlluminationState::Off)?;
            controller.set_intensity(1)?;
        }

        info!("{}: open ({})", controller.name, controller.version);
        Ok(controller)
    }

    /// Device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Firmware version reported at open.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Stage geometry, if axes were configured.
    pub fn geometry(&self) -> Option<&StageGeometry> {
        self.geometry.as_ref()
    }

    /// Configured axis order (empty without a stage).
    pub fn axes(&self) -> Vec<AxisId> {
        self.geometry.as_ref().map(StageGeometry::ids).unwrap_or_default()
    }

    /// Session state as last read from or written to the device.
    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    /// Underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Bound the completion wait of future moves.
    pub fn set_motion_timeout(&mut self, timeout: Option<Duration>) {
        self.motion_timeout = timeout;
    }

    /// Turn the light off if needed and release the transport.
    pub fn close(mut self) -> StageResult<()> {
        info!("{}: closing...", self.name);
        if self.state.illumination != Some(IlluminationState::Off) {
            self.set_illumination(IlluminationState::Off)?;
        }
        info!("{}: closed.", self.name);
        Ok(())
    }

    pub(crate) fn stage_geometry(&self) -> StageResult<StageGeometry> {
        self.geometry
            .clone()
            .ok_or_else(|| StageError::Configuration("no stage axes configured".to_string()))
    }

    /// Send a command whose reply carries no data.
    pub(crate) fn send(&mut self, command: &Command) -> StageResult<()> {
        self.exchange(command, false).map(|_| ())
    }

    /// Send a command and return its non-empty, trimmed reply.
    pub(crate) fn query(&mut self, command: &Command) -> StageResult<String> {
        self.exchange(command, true)
    }

    /// Query an axis-keyed tuple in configured axis order.
    pub(crate) fn query_axes(&mut self, keyword: &'static str) -> StageResult<Vec<f64>> {
        let axes = self.axes();
        let command = Command::query(keyword, &axes);
        let response = self.query(&command)?;
        protocol::parse_axis_values(&command.encode(), &response, &axes)
    }

    fn exchange(&mut self, command: &Command, expect_reply: bool) -> StageResult<String> {
        let line = command.encode();
        debug!("{}: sending cmd = {:?}", self.name, line);
        self.transport.write_line(&format!("{}{}", line, TERMINATOR))?;
        let raw = self.transport.read_line()?;
        let response = protocol::decode(&raw).to_string();
        debug!("{}: -> response = {:?}", self.name, response);

        let pending = self.transport.bytes_pending()?;
        if pending != 0 {
            return Err(ProtocolError::Framing {
                command: line,
                pending,
            }
            .into());
        }
        if expect_reply && response.is_empty() {
            return Err(ProtocolError::NoResponse { command: line }.into());
        }
        Ok(response)
    }
}
