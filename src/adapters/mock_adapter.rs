//! Simulated MS-2000 controller for testing
//!
//! `MockDevice` answers the command subset this driver uses the way the
//! firmware does, so controllers can be exercised without hardware. It
//! provides:
//! - Register storage per axis (velocity, ramp, settle time, precision, position)
//! - TTL and LED registers
//! - Controllable fault injection (clamping, position error, stray bytes, ...)
//! - A command log for test verification

use crate::adapters::Transport;
use crate::axis::AxisId;
use crate::error::{StageError, StageResult};
use crate::protocol::SUPPORTED_VERSION;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
struct AxisRegisters {
    velocity_mmps: f64,
    acceleration_ms: f64,
    settle_time_ms: f64,
    precision_mm: f64,
    position_counts: f64,
}

#[derive(Debug)]
struct DeviceState {
    version: String,
    axes: [AxisRegisters; 3],
    ttl_in: i64,
    ttl_out: i64,
    led: i64,
    busy_polls: u32,
    remaining_busy: u32,
    velocity_clamp: Option<f64>,
    settle_offset_ms: f64,
    position_error_counts: f64,
    stray_bytes: usize,
    ignored: HashSet<String>,
    scripted: VecDeque<String>,
    pending: Option<String>,
    log: Vec<String>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            version: SUPPORTED_VERSION.to_string(),
            axes: Default::default(),
            ttl_in: 0,
            ttl_out: 0,
            led: 1,
            busy_polls: 0,
            remaining_busy: 0,
            velocity_clamp: None,
            settle_offset_ms: 0.0,
            position_error_counts: 0.0,
            stray_bytes: 0,
            ignored: HashSet::new(),
            scripted: VecDeque::new(),
            pending: None,
            log: Vec::new(),
        }
    }
}

/// Simulated controller implementing [`Transport`]
///
/// Clones share the same device, so a test can keep a handle after moving
/// one into a controller.
///
/// # Example
///
/// ```
/// use asi_stage::adapters::{MockDevice, Transport};
///
/// let mut device = MockDevice::new();
/// device.write_line("V\r").unwrap();
/// assert_eq!(device.read_line().unwrap(), ":A Version: USB-9.2k \r\n");
/// assert_eq!(device.commands(), vec!["V".to_string()]);
/// ```
#[derive(Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<DeviceState>>,
}

fn slot(axis: AxisId) -> usize {
    match axis {
        AxisId::X => 0,
        AxisId::Y => 1,
        AxisId::Z => 2,
    }
}

impl MockDevice {
    /// Create a device reporting the supported firmware version
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a different firmware version string
    pub fn with_version(self, version: &str) -> Self {
        self.state.lock().version = version.to_string();
        self
    }

    /// Number of busy status replies after each move
    pub fn set_busy_polls(&self, polls: u32) {
        self.state.lock().busy_polls = polls;
    }

    /// Silently clamp velocity writes to `max_mmps`
    pub fn clamp_velocity(&self, max_mmps: f64) {
        self.state.lock().velocity_clamp = Some(max_mmps);
    }

    /// Add an offset to every settle time written
    pub fn set_settle_offset_ms(&self, offset_ms: f64) {
        self.state.lock().settle_offset_ms = offset_ms;
    }

    /// Land every move `counts` away from its target
    pub fn set_position_error_counts(&self, counts: f64) {
        self.state.lock().position_error_counts = counts;
    }

    /// Leave `bytes` unread after the next exchange
    pub fn inject_stray_bytes(&self, bytes: usize) {
        self.state.lock().stray_bytes = bytes;
    }

    /// Acknowledge writes for `keyword` without applying them
    pub fn ignore_writes(&self, keyword: &str) {
        self.state.lock().ignored.insert(keyword.to_string());
    }

    /// Replace the next reply with `raw`
    pub fn script_response(&self, raw: &str) {
        self.state.lock().scripted.push_back(raw.to_string());
    }

    /// Commands received so far, without terminators
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().log.clone()
    }

    /// Forget the command log
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Raw encoder position of an axis
    pub fn position_counts(&self, axis: AxisId) -> f64 {
        self.state.lock().axes[slot(axis)].position_counts
    }

    /// Place an axis without a move command
    pub fn set_position_counts(&self, axis: AxisId, counts: f64) {
        self.state.lock().axes[slot(axis)].position_counts = counts;
    }

    /// Current (input, output) TTL codes
    pub fn ttl_codes(&self) -> (i64, i64) {
        let state = self.state.lock();
        (state.ttl_in, state.ttl_out)
    }

    /// Current LED intensity register
    pub fn led(&self) -> i64 {
        self.state.lock().led
    }
}

impl DeviceState {
    fn handle(&mut self, line: &str) -> String {
        let mut tokens = line.split_whitespace();
        let keyword = tokens.next().unwrap_or_default().to_string();
        let args: Vec<&str> = tokens.collect();
        let apply = !self.ignored.contains(&keyword);

        match keyword.as_str() {
            "V" => format!(":A {} \r\n", self.version),
            "/" => {
                if self.remaining_busy > 0 {
                    self.remaining_busy -= 1;
                    "B\r\n".to_string()
                } else {
                    "N\r\n".to_string()
                }
            }
            "S" | "AC" | "WT" | "PC" => self.axis_register(&keyword, &args, apply),
            "W" => {
                let counts: Vec<String> = args
                    .iter()
                    .filter_map(|a| a.parse::<AxisId>().ok())
                    .map(|axis| format!("{}", self.axes[slot(axis)].position_counts))
                    .collect();
                format!(":A {} \r\n", counts.join(" "))
            }
            "M" => {
                for (axis, value) in args.iter().filter_map(|a| assignment(a)) {
                    if apply {
                        self.axes[slot(axis)].position_counts =
                            value.round() + self.position_error_counts;
                    }
                }
                self.remaining_busy = self.busy_polls;
                ":A \r\n".to_string()
            }
            "TTL" => match args.first().copied() {
                Some("X?") => format!(":A X={} \r\n", self.ttl_in),
                Some("Y?") => format!(":A Y={} \r\n", self.ttl_out),
                Some(arg) => {
                    match assignment(arg) {
                        Some((AxisId::X, code)) if apply => self.ttl_in = code as i64,
                        Some((AxisId::Y, code)) if apply => self.ttl_out = code as i64,
                        _ => {}
                    }
                    ":A \r\n".to_string()
                }
                None => ":N-1\r\n".to_string(),
            },
            "LED" => match args.first().copied() {
                Some("X?") => format!("X={} :A\r\n", self.led),
                Some(arg) => {
                    if let Some((AxisId::X, pct)) = assignment(arg) {
                        if apply {
                            self.led = pct as i64;
                        }
                    }
                    ":A \r\n".to_string()
                }
                None => ":N-1\r\n".to_string(),
            },
            _ => ":N-1\r\n".to_string(),
        }
    }

    fn axis_register(&mut self, keyword: &str, args: &[&str], apply: bool) -> String {
        let mut replies = Vec::new();
        for arg in args {
            if let Some(axis) = arg.strip_suffix('?').and_then(|a| a.parse::<AxisId>().ok()) {
                let regs = &self.axes[slot(axis)];
                let value = match keyword {
                    "S" => regs.velocity_mmps,
                    "AC" => regs.acceleration_ms,
                    "WT" => regs.settle_time_ms,
                    _ => regs.precision_mm,
                };
                replies.push(format!("{}={:.6}", axis, value));
            } else if let Some((axis, value)) = assignment(arg) {
                if !apply {
                    continue;
                }
                let clamp = self.velocity_clamp;
                let offset = self.settle_offset_ms;
                let regs = &mut self.axes[slot(axis)];
                match keyword {
                    "S" => regs.velocity_mmps = clamp.map_or(value, |max| value.min(max)),
                    "AC" => regs.acceleration_ms = value.round(),
                    "WT" => regs.settle_time_ms = value.round() + offset,
                    _ => regs.precision_mm = value,
                }
            }
        }
        format!(":A {} \r\n", replies.join(" "))
    }
}

fn assignment(arg: &str) -> Option<(AxisId, f64)> {
    let (axis, value) = arg.split_once('=')?;
    Some((axis.parse().ok()?, value.parse().ok()?))
}

impl Transport for MockDevice {
    fn write_line(&mut self, line: &str) -> StageResult<()> {
        let mut state = self.state.lock();
        if state.pending.is_some() {
            return Err(StageError::Transport(
                "write before previous response was read".to_string(),
            ));
        }
        let command = line.trim_end_matches('\r').to_string();
        state.log.push(command.clone());
        let reply = match state.scripted.pop_front() {
            Some(scripted) => scripted,
            None => state.handle(&command),
        };
        state.pending = Some(reply);
        Ok(())
    }

    fn read_line(&mut self) -> StageResult<String> {
        self.state
            .lock()
            .pending
            .take()
            .ok_or_else(|| StageError::Transport("read with no command outstanding".to_string()))
    }

    fn bytes_pending(&mut self) -> StageResult<usize> {
        Ok(std::mem::take(&mut self.state.lock().stray_bytes))
    }
}
