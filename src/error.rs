//! Error types for the stage driver.
//!
//! `StageError` is the single error type returned by every public operation.
//! Each variant corresponds to one failure category and none of them are
//! retried internally:
//!
//! - **`Transport`** / **`Timeout`**: the serial channel failed to open, read or
//!   write. Raised immediately.
//! - **`Protocol`**: the device answered with something we cannot frame or
//!   parse (empty line, wrong axis keys, stray bytes left in the input buffer).
//! - **`UnsupportedFirmware`**: the version string did not match at open.
//! - **`Configuration`**: invalid axis / lead screw / range setup, or a stage
//!   operation on a controller opened without axes.
//! - **`InvalidArgument`**: a call was made with the wrong number of entries.
//! - **`Range`**: a requested value lies outside its axis bounds. Nothing has
//!   been sent to the device when this is returned.
//! - **`Verification`**: the device reported a different value than the one
//!   just written.
//! - **`MotionTolerance`** / **`MotionTimeout`**: a move finished outside its
//!   precision window, or did not finish within the configured wait.

use crate::axis::AxisId;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type StageResult<T> = std::result::Result<T, StageError>;

#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum StageError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serial read timeout after {0:?}")]
    Timeout(Duration),

    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Unsupported controller firmware: expected '{expected}', found '{found}'")]
    UnsupportedFirmware { expected: String, found: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration load error: {0}")]
    Config(#[from] figment::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{what} = {value} out of range [{min}, {max}]")]
    Range {
        what: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{parameter} not applied: requested {requested}, device reports {reported}")]
    Verification {
        parameter: &'static str,
        requested: String,
        reported: String,
    },

    #[error(
        "Axis {axis} finished at {position_um} um, outside {target_um} +/- {precision_um} um"
    )]
    MotionTolerance {
        axis: AxisId,
        target_um: f64,
        position_um: f64,
        precision_um: f64,
    },

    #[error("Move did not complete within {0:?}")]
    MotionTimeout(Duration),
}

/// Framing and parsing failures on the ASCII link.
#[derive(Error, Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum ProtocolError {
    #[error("no response to '{command}'")]
    NoResponse { command: String },

    #[error("malformed response to '{command}': '{response}'")]
    Malformed { command: String, response: String },

    #[error("axis mismatch: expected {expected:?}, got {actual:?}")]
    AxisMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("{pending} unread byte(s) left after '{command}'")]
    Framing { command: String, pending: usize },
}

impl StageError {
    /// True for failures of the serial channel itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            StageError::Transport(_)
                | StageError::Io(_)
                | StageError::Timeout(_)
                | StageError::SerialFeatureDisabled
        )
    }

    /// True when the device silently rejected or altered a write.
    pub fn is_verification(&self) -> bool {
        matches!(self, StageError::Verification { .. })
    }
}
