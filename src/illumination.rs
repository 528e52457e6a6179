//! TTL and PWM control of the LED output.
//!
//! Two device registers drive the light: the TTL input mode (`TTL X`) and
//! the TTL output mode (`TTL Y`). Four named states fix both:
//!
//! | State      | TTL in           | TTL out |
//! |------------|------------------|---------|
//! | `off`      | `disabled`       | `low`   |
//! | `on`       | `disabled`       | `high`  |
//! | `pwm`      | `disabled`       | `pwm`   |
//! | `external` | `toggle_ttl_out` | `low`   |
//!
//! Writing a register directly leaves the named state unset. Intensity
//! (`LED X`) applies in `pwm` state and is a duty cycle of 1-99 %.

use crate::adapters::Transport;
use crate::axis::AxisId;
use crate::controller::Controller;
use crate::error::{ProtocolError, StageError, StageResult};
use crate::protocol::{self, Arg, Command};
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// Lowest accepted LED intensity (%).
pub const MIN_INTENSITY: u32 = 1;
/// Highest accepted LED intensity (%).
pub const MAX_INTENSITY: u32 = 99;

/// TTL input behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtlInMode {
    /// Input ignored (code 0)
    #[default]
    Disabled,
    /// Each input pulse toggles the output (code 10)
    ToggleTtlOut,
}

impl TtlInMode {
    /// Register code.
    pub fn code(self) -> i64 {
        match self {
            TtlInMode::Disabled => 0,
            TtlInMode::ToggleTtlOut => 10,
        }
    }

    /// Mode for a register code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TtlInMode::Disabled),
            10 => Some(TtlInMode::ToggleTtlOut),
            _ => None,
        }
    }
}

/// TTL output behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtlOutMode {
    /// Held low (code 0)
    #[default]
    Low,
    /// Held high (code 1)
    High,
    /// PWM at the LED intensity (code 9)
    Pwm,
}

impl TtlOutMode {
    /// Register code.
    pub fn code(self) -> i64 {
        match self {
            TtlOutMode::Low => 0,
            TtlOutMode::High => 1,
            TtlOutMode::Pwm => 9,
        }
    }

    /// Mode for a register code.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(TtlOutMode::Low),
            1 => Some(TtlOutMode::High),
            9 => Some(TtlOutMode::Pwm),
            _ => None,
        }
    }
}

/// Named illumination states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IlluminationState {
    /// Light off
    Off,
    /// Light fully on
    On,
    /// Light at the PWM intensity
    Pwm,
    /// Light toggled by an external TTL input
    External,
}

impl IlluminationState {
    /// All named states.
    pub const ALL: [IlluminationState; 4] = [
        IlluminationState::Off,
        IlluminationState::On,
        IlluminationState::Pwm,
        IlluminationState::External,
    ];

    /// Register values for this state.
    pub fn modes(self) -> (TtlInMode, TtlOutMode) {
        match self {
            IlluminationState::Off => (TtlInMode::Disabled, TtlOutMode::Low),
            IlluminationState::On => (TtlInMode::Disabled, TtlOutMode::High),
            IlluminationState::Pwm => (TtlInMode::Disabled, TtlOutMode::Pwm),
            IlluminationState::External => (TtlInMode::ToggleTtlOut, TtlOutMode::Low),
        }
    }

    /// Lower-case name.
    pub fn as_str(self) -> &'static str {
        match self {
            IlluminationState::Off => "off",
            IlluminationState::On => "on",
            IlluminationState::Pwm => "pwm",
            IlluminationState::External => "external",
        }
    }
}

impl fmt::Display for IlluminationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IlluminationState {
    type Err = StageError;

    fn from_str(s: &str) -> StageResult<Self> {
        IlluminationState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                StageError::InvalidArgument(format!(
                    "unknown illumination state '{}' (expected off, on, pwm or external)",
                    s
                ))
            })
    }
}

fn unknown_code(command: &Command, code: i64) -> StageError {
    ProtocolError::Malformed {
        command: command.encode(),
        response: format!("unknown code {}", code),
    }
    .into()
}

impl<T: Transport> Controller<T> {
    /// Read the TTL input register.
    pub fn get_ttl_in_mode(&mut self) -> StageResult<TtlInMode> {
        let command = Command::new("TTL", vec![Arg::Query(AxisId::X)]);
        let code = self.read_code(&command, AxisId::X)?;
        let mode = TtlInMode::from_code(code).ok_or_else(|| unknown_code(&command, code))?;
        self.state.ttl_in_mode = mode;
        info!("{}: -> ttl in mode = {:?}", self.name, mode);
        Ok(mode)
    }

    /// Read the TTL output register.
    pub fn get_ttl_out_mode(&mut self) -> StageResult<TtlOutMode> {
        let command = Command::new("TTL", vec![Arg::Query(AxisId::Y)]);
        let code = self.read_code(&command, AxisId::Y)?;
        let mode = TtlOutMode::from_code(code).ok_or_else(|| unknown_code(&command, code))?;
        self.state.ttl_out_mode = mode;
        info!("{}: -> ttl out mode = {:?}", self.name, mode);
        Ok(mode)
    }

    /// Write the TTL input register directly. Clears the named state.
    pub fn set_ttl_in_mode(&mut self, mode: TtlInMode) -> StageResult<()> {
        self.state.illumination = None;
        self.apply_ttl_in_mode(mode)
    }

    /// Write the TTL output register directly. Clears the named state.
    pub fn set_ttl_out_mode(&mut self, mode: TtlOutMode) -> StageResult<()> {
        self.state.illumination = None;
        self.apply_ttl_out_mode(mode)
    }

    /// Named illumination state; `None` when unset.
    pub fn illumination(&self) -> Option<IlluminationState> {
        self.state.illumination
    }

    /// Switch to a named state, input register first, each one verified.
    pub fn set_illumination(&mut self, state: IlluminationState) -> StageResult<()> {
        info!("{}: setting illumination = {}", self.name, state);
        self.state.illumination = None;
        let (ttl_in, ttl_out) = state.modes();
        self.apply_ttl_in_mode(ttl_in)?;
        self.apply_ttl_out_mode(ttl_out)?;
        self.state.illumination = Some(state);
        Ok(())
    }

    /// Read the LED intensity (%).
    pub fn get_intensity(&mut self) -> StageResult<u32> {
        let command = Command::new("LED", vec![Arg::Query(AxisId::X)]);
        let code = self.read_code(&command, AxisId::X)?;
        let intensity = u32::try_from(code).map_err(|_| unknown_code(&command, code))?;
        self.state.pwm_intensity = Some(intensity);
        info!("{}: -> pwm intensity (%) = {}", self.name, intensity);
        Ok(intensity)
    }

    /// Set the LED intensity (%), 1 to 99 inclusive.
    pub fn set_intensity(&mut self, intensity: u32) -> StageResult<()> {
        if !(MIN_INTENSITY..=MAX_INTENSITY).contains(&intensity) {
            return Err(StageError::Range {
                what: "pwm intensity (%)".to_string(),
                value: f64::from(intensity),
                min: f64::from(MIN_INTENSITY),
                max: f64::from(MAX_INTENSITY),
            });
        }
        info!("{}: setting pwm intensity = {}", self.name, intensity);
        self.send(&Command::new(
            "LED",
            vec![Arg::Code(AxisId::X, i64::from(intensity))],
        ))?;
        let reported = self.get_intensity()?;
        if reported != intensity {
            return Err(StageError::Verification {
                parameter: "pwm intensity (%)",
                requested: intensity.to_string(),
                reported: reported.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn apply_ttl_in_mode(&mut self, mode: TtlInMode) -> StageResult<()> {
        info!("{}: setting ttl in mode = {:?}", self.name, mode);
        self.send(&Command::new("TTL", vec![Arg::Code(AxisId::X, mode.code())]))?;
        let reported = self.get_ttl_in_mode()?;
        if reported != mode {
            return Err(StageError::Verification {
                parameter: "ttl in mode",
                requested: format!("{:?}", mode),
                reported: format!("{:?}", reported),
            });
        }
        Ok(())
    }

    pub(crate) fn apply_ttl_out_mode(&mut self, mode: TtlOutMode) -> StageResult<()> {
        info!("{}: setting ttl out mode = {:?}", self.name, mode);
        self.send(&Command::new("TTL", vec![Arg::Code(AxisId::Y, mode.code())]))?;
        let reported = self.get_ttl_out_mode()?;
        if reported != mode {
            return Err(StageError::Verification {
                parameter: "ttl out mode",
                requested: format!("{:?}", mode),
                reported: format!("{:?}", reported),
            });
        }
        Ok(())
    }

    fn read_code(&mut self, command: &Command, key: AxisId) -> StageResult<i64> {
        let response = self.query(command)?;
        protocol::parse_code(&command.encode(), &response, key)
    }
}
