//! Absolute and relative stage moves.
//!
//! A move is sent as one multi-axis `M` command in encoder counts. The
//! controller then is [`MotionState::Moving`] until [`Controller::finish_moving`]
//! has polled the status query (`/`) to idle, re-read the position and checked
//! every axis landed within its precision window. A new move always finishes
//! the previous one first, so commands never overlap.

use crate::adapters::Transport;
use crate::axis::StageGeometry;
use crate::controller::Controller;
use crate::error::{StageError, StageResult};
use crate::parameters::Setpoint;
use crate::protocol::{self, Arg, Command, STATUS_IDLE};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Whether a move is outstanding.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MotionState {
    /// No move outstanding
    #[default]
    Idle,
    /// Move sent, completion not yet confirmed
    Moving {
        /// Absolute target per axis (um)
        target_um: Vec<f64>,
    },
}

/// Round a position to whole nanometers.
pub fn round_to_nm(position_um: f64) -> f64 {
    (position_um * 1e3).round() / 1e3
}

/// Compute absolute targets for a move request. Nothing is sent.
///
/// `Keep` entries stay at `current`; numeric entries are deltas from
/// `current` when `relative` is set. Every target must lie inside the travel
/// range.
pub fn plan_move(
    geometry: &StageGeometry,
    current_um: &[f64],
    request: &[Setpoint],
    relative: bool,
) -> StageResult<Vec<f64>> {
    if request.len() != geometry.len() {
        return Err(StageError::InvalidArgument(format!(
            "move needs {} values, got {}",
            geometry.len(),
            request.len()
        )));
    }
    geometry
        .iter()
        .zip(request)
        .zip(current_um)
        .map(|((axis, setpoint), &current)| {
            let target = match setpoint {
                Setpoint::Keep => current,
                Setpoint::Value(delta) if relative => current + delta,
                Setpoint::Value(absolute) => *absolute,
            };
            if !axis.contains_um(target) {
                return Err(StageError::Range {
                    what: format!("{} target position (um)", axis.id),
                    value: target,
                    min: axis.min_position_um,
                    max: axis.max_position_um,
                });
            }
            Ok(round_to_nm(target))
        })
        .collect()
}

impl<T: Transport> Controller<T> {
    /// Last known position per axis (um).
    pub fn position_um(&self) -> &[f64] {
        &self.state.position_um
    }

    /// True while a move has not been confirmed complete.
    pub fn is_moving(&self) -> bool {
        matches!(self.state.motion, MotionState::Moving { .. })
    }

    /// Read the position from the device.
    pub fn get_position_um(&mut self) -> StageResult<Vec<f64>> {
        let geometry = self.stage_geometry()?;
        let axes = geometry.ids();
        let command = Command::new("W", axes.iter().map(|a| Arg::Axis(*a)).collect());
        let response = self.query(&command)?;
        let counts = protocol::parse_counts(&command.encode(), &response, &axes)?;
        let position: Vec<f64> = geometry
            .iter()
            .zip(counts)
            .map(|(axis, c)| axis.counts_to_um(c))
            .collect();
        info!("{}: -> position (um) = {:?}", self.name, position);
        self.state.position_um = position.clone();
        Ok(position)
    }

    /// Move the stage.
    ///
    /// With `block` the call returns once the move is complete and verified;
    /// otherwise it returns straight after the move command and the next
    /// `move_um` (or an explicit [`finish_moving`](Self::finish_moving))
    /// completes it.
    pub fn move_um(
        &mut self,
        request: &[Setpoint],
        relative: bool,
        block: bool,
    ) -> StageResult<()> {
        self.finish_moving()?;
        let geometry = self.stage_geometry()?;
        let target = plan_move(&geometry, &self.state.position_um, request, relative)?;
        info!("{}: moving to (um) = {:?}", self.name, target);

        let counts: Vec<f64> = geometry
            .iter()
            .zip(&target)
            .map(|(axis, t)| axis.um_to_counts(*t) as f64)
            .collect();
        self.send(&Command::assign("M", &geometry.ids(), &counts))?;
        self.state.motion = MotionState::Moving { target_um: target };

        if block {
            self.finish_moving()?;
        }
        Ok(())
    }

    /// Wait for an outstanding move and check where it ended.
    ///
    /// Does nothing when idle. On [`StageError::MotionTimeout`] the move is
    /// still outstanding and a later call resumes waiting.
    pub fn finish_moving(&mut self) -> StageResult<()> {
        let target = match &self.state.motion {
            MotionState::Idle => return Ok(()),
            MotionState::Moving { target_um } => target_um.clone(),
        };
        self.wait_until_idle()?;
        self.state.motion = MotionState::Idle;

        let geometry = self.stage_geometry()?;
        let position = self.get_position_um()?;
        for (i, axis) in geometry.iter().enumerate() {
            let precision = self.state.precision_um[i];
            if (position[i] - target[i]).abs() > precision {
                return Err(StageError::MotionTolerance {
                    axis: axis.id,
                    target_um: target[i],
                    position_um: position[i],
                    precision_um: precision,
                });
            }
        }
        info!("{}: -> finished moving", self.name);
        Ok(())
    }

    fn wait_until_idle(&mut self) -> StageResult<()> {
        let start = Instant::now();
        let status = Command::bare("/");
        let mut polls = 0u64;
        loop {
            polls += 1;
            if self.query(&status)? == STATUS_IDLE {
                debug!("{}: idle after {} polls", self.name, polls);
                return Ok(());
            }
            if let Some(timeout) = self.motion_timeout {
                if start.elapsed() >= timeout {
                    return Err(StageError::MotionTimeout(timeout));
                }
            }
        }
    }

    /// Current completion wait bound.
    pub fn motion_timeout(&self) -> Option<Duration> {
        self.motion_timeout
    }
}
