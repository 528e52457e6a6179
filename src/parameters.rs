//! Per-axis motion tuning parameters with set-then-verify semantics.
//!
//! Velocity, acceleration ramp, settle time and precision all follow the same
//! protocol, so they share one implementation parameterized by
//! [`ParameterKind`]:
//!
//! 1. Resolve [`Setpoint::Keep`] entries from the last known values.
//! 2. Range-check every value against its axis bounds, then round it.
//! 3. Send one combined multi-axis command.
//! 4. Query the device again and compare with what was requested.
//!
//! | Parameter     | Keyword | Rounding   | Bounds                          |
//! |---------------|---------|------------|---------------------------------|
//! | velocity      | `S`     | 6 decimals | `[0, max_velocity_mmps]`        |
//! | acceleration  | `AC`    | integer    | `[min, max]_acceleration_ms`    |
//! | settle time   | `WT`    | integer    | `[0, max_settle_time_ms]`       |
//! | precision     | `PC`    | integer um | `[min, max]_precision_um` (wire unit mm) |

use crate::adapters::Transport;
use crate::axis::{AxisConfig, StageGeometry};
use crate::controller::Controller;
use crate::error::{StageError, StageResult};
use crate::protocol::Command;
use std::fmt;
use std::str::FromStr;
use tracing::info;

/// One entry of a per-axis request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Setpoint {
    /// Keep the axis at its current value
    Keep,
    /// Use this value
    Value(f64),
}

impl Setpoint {
    /// The requested value, or `current` for [`Setpoint::Keep`].
    pub fn resolve(self, current: f64) -> f64 {
        match self {
            Setpoint::Keep => current,
            Setpoint::Value(v) => v,
        }
    }

    /// Wrap plain values.
    pub fn values(values: &[f64]) -> Vec<Setpoint> {
        values.iter().copied().map(Setpoint::Value).collect()
    }
}

impl From<f64> for Setpoint {
    fn from(value: f64) -> Self {
        Setpoint::Value(value)
    }
}

impl From<Option<f64>> for Setpoint {
    fn from(value: Option<f64>) -> Self {
        value.map_or(Setpoint::Keep, Setpoint::Value)
    }
}

impl FromStr for Setpoint {
    type Err = StageError;

    /// `_` or `keep` for [`Setpoint::Keep`], otherwise a number.
    fn from_str(s: &str) -> StageResult<Self> {
        match s.trim() {
            "_" | "keep" => Ok(Setpoint::Keep),
            other => other
                .parse::<f64>()
                .map(Setpoint::Value)
                .map_err(|_| StageError::InvalidArgument(format!("'{}' is not a number", other))),
        }
    }
}

/// The tunable per-axis parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParameterKind {
    /// Move velocity (mm/s)
    Velocity,
    /// Acceleration / deceleration ramp time (ms)
    Acceleration,
    /// Pause at the end of a move before reporting idle (ms)
    SettleTime,
    /// Accepted error between target and final position (um)
    Precision,
}

impl ParameterKind {
    /// All parameters, in the order they are initialized.
    pub const ALL: [ParameterKind; 4] = [
        ParameterKind::Velocity,
        ParameterKind::Acceleration,
        ParameterKind::SettleTime,
        ParameterKind::Precision,
    ];

    /// Command keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            ParameterKind::Velocity => "S",
            ParameterKind::Acceleration => "AC",
            ParameterKind::SettleTime => "WT",
            ParameterKind::Precision => "PC",
        }
    }

    /// Human-readable name with unit.
    pub fn label(self) -> &'static str {
        match self {
            ParameterKind::Velocity => "velocity (mm/s)",
            ParameterKind::Acceleration => "acceleration (ms)",
            ParameterKind::SettleTime => "settle time (ms)",
            ParameterKind::Precision => "precision (um)",
        }
    }

    /// Inclusive bounds for one axis.
    pub fn bounds(self, axis: &AxisConfig) -> (f64, f64) {
        match self {
            ParameterKind::Velocity => (0.0, axis.max_velocity_mmps),
            ParameterKind::Acceleration => (axis.min_acceleration_ms, axis.max_acceleration_ms),
            ParameterKind::SettleTime => (0.0, axis.max_settle_time_ms),
            ParameterKind::Precision => (axis.min_precision_um, axis.max_precision_um),
        }
    }

    /// Value written at open.
    pub fn default_value(self, axis: &AxisConfig) -> f64 {
        match self {
            ParameterKind::Velocity => 0.67 * axis.max_velocity_mmps,
            ParameterKind::Acceleration => axis.min_acceleration_ms,
            ParameterKind::SettleTime => 0.0,
            ParameterKind::Precision => axis.min_precision_um,
        }
    }

    fn round(self, value: f64) -> f64 {
        match self {
            ParameterKind::Velocity => (value * 1e6).round() / 1e6,
            _ => value.round(),
        }
    }

    fn tolerance(self, axis: &AxisConfig) -> f64 {
        match self {
            ParameterKind::SettleTime => axis.settle_tolerance_ms,
            _ => 0.0,
        }
    }

    fn to_device(self, value: f64) -> f64 {
        match self {
            ParameterKind::Precision => value / 1e6,
            _ => value,
        }
    }

    fn from_device(self, value: f64) -> f64 {
        match self {
            ParameterKind::Precision => (1e6 * value).round(),
            _ => value,
        }
    }

    /// Resolve, range-check and round a request. Nothing is sent.
    pub fn resolve(
        self,
        geometry: &StageGeometry,
        current: &[f64],
        requested: &[Setpoint],
    ) -> StageResult<Vec<f64>> {
        if requested.len() != geometry.len() {
            return Err(StageError::InvalidArgument(format!(
                "{} needs {} values, got {}",
                self.label(),
                geometry.len(),
                requested.len()
            )));
        }
        geometry
            .iter()
            .zip(requested)
            .zip(current)
            .map(|((axis, setpoint), &current)| {
                let value = setpoint.resolve(current);
                let (min, max) = self.bounds(axis);
                if !(min..=max).contains(&value) {
                    return Err(StageError::Range {
                        what: format!("{} {}", axis.id, self.label()),
                        value,
                        min,
                        max,
                    });
                }
                Ok(self.round(value))
            })
            .collect()
    }

    /// Compare what the device reports with what was written.
    pub fn verify(
        self,
        geometry: &StageGeometry,
        requested: &[f64],
        reported: &[f64],
    ) -> StageResult<()> {
        let applied = requested.len() == reported.len()
            && geometry
                .iter()
                .zip(requested.iter().zip(reported))
                .all(|(axis, (want, got))| (got - want).abs() <= self.tolerance(axis));
        if !applied {
            return Err(StageError::Verification {
                parameter: self.label(),
                requested: format!("{:?}", requested),
                reported: format!("{:?}", reported),
            });
        }
        Ok(())
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl<T: Transport> Controller<T> {
    /// Query a parameter from the device and update the session state.
    pub fn get_parameter(&mut self, kind: ParameterKind) -> StageResult<Vec<f64>> {
        self.stage_geometry()?;
        let values: Vec<f64> = self
            .query_axes(kind.keyword())?
            .into_iter()
            .map(|v| kind.from_device(v))
            .collect();
        *self.state.parameter_mut(kind) = values.clone();
        info!("{}: -> {} = {:?}", self.name, kind, values);
        Ok(values)
    }

    /// Write a parameter for all axes and verify the device applied it.
    ///
    /// On a verification failure the session state holds what the device
    /// actually reported.
    pub fn set_parameter(
        &mut self,
        kind: ParameterKind,
        requested: &[Setpoint],
    ) -> StageResult<()> {
        let geometry = self.stage_geometry()?;
        let target = kind.resolve(&geometry, self.state.parameter(kind), requested)?;
        info!("{}: setting {} = {:?}", self.name, kind, target);

        let wire: Vec<f64> = target.iter().map(|v| kind.to_device(*v)).collect();
        self.send(&Command::assign(kind.keyword(), &geometry.ids(), &wire))?;

        let reported = self.get_parameter(kind)?;
        kind.verify(&geometry, &target, &reported)
    }

    /// Velocity per axis (mm/s) from the device.
    pub fn get_velocity_mmps(&mut self) -> StageResult<Vec<f64>> {
        self.get_parameter(ParameterKind::Velocity)
    }

    /// Set velocity per axis (mm/s).
    pub fn set_velocity_mmps(&mut self, velocity: &[Setpoint]) -> StageResult<()> {
        self.set_parameter(ParameterKind::Velocity, velocity)
    }

    /// Acceleration ramp per axis (ms) from the device.
    pub fn get_acceleration_ms(&mut self) -> StageResult<Vec<f64>> {
        self.get_parameter(ParameterKind::Acceleration)
    }

    /// Set acceleration ramp per axis (ms).
    pub fn set_acceleration_ms(&mut self, acceleration: &[Setpoint]) -> StageResult<()> {
        self.set_parameter(ParameterKind::Acceleration, acceleration)
    }

    /// Settle time per axis (ms) from the device.
    pub fn get_settle_time_ms(&mut self) -> StageResult<Vec<f64>> {
        self.get_parameter(ParameterKind::SettleTime)
    }

    /// Set settle time per axis (ms).
    pub fn set_settle_time_ms(&mut self, settle_time: &[Setpoint]) -> StageResult<()> {
        self.set_parameter(ParameterKind::SettleTime, settle_time)
    }

    /// Precision per axis (um) from the device.
    pub fn get_precision_um(&mut self) -> StageResult<Vec<f64>> {
        self.get_parameter(ParameterKind::Precision)
    }

    /// Set precision per axis (um).
    pub fn set_precision_um(&mut self, precision: &[Setpoint]) -> StageResult<()> {
        self.set_parameter(ParameterKind::Precision, precision)
    }

    pub(crate) fn apply_stage_defaults(&mut self) -> StageResult<()> {
        let geometry = self.stage_geometry()?;
        for kind in ParameterKind::ALL {
            let defaults: Vec<f64> = geometry.iter().map(|a| kind.default_value(a)).collect();
            self.set_parameter(kind, &Setpoint::values(&defaults))?;
        }
        Ok(())
    }
}
