//! Driver for the ASI MS-2000 stage and LED controller.
//!
//! The MS-2000 speaks a line-oriented ASCII protocol over a 9600 baud serial
//! link. This library wraps that protocol in a synchronous [`Controller`]
//! that moves up to three linear axes, tunes their motion parameters with
//! set-then-verify semantics, and drives the LED output through its TTL and
//! PWM registers.
//!
//! - [`protocol`] builds command lines and parses replies.
//! - [`adapters`] holds the [`adapters::Transport`] seam with a serial port
//!   implementation and a simulated device for tests.
//! - [`config`] loads a TOML file with environment overrides.

pub mod adapters;
pub mod axis;
pub mod config;
pub mod controller;
pub mod error;
pub mod illumination;
pub mod motion;
pub mod parameters;
pub mod protocol;

pub use axis::{AxisId, LeadScrew, StageGeometry, StageSetup};
pub use controller::{Controller, ControllerOptions, ControllerState};
pub use error::{ProtocolError, StageError, StageResult};
pub use illumination::{IlluminationState, TtlInMode, TtlOutMode};
pub use motion::MotionState;
pub use parameters::{ParameterKind, Setpoint};
