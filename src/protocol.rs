//! ASCII command codec for the MS-2000 serial protocol.
//!
//! Protocol Overview:
//! - Request: `KEYWORD [ARG ...]` terminated by a single carriage return
//! - Arguments: `X=1.000000` (assignment), `X?` (query) or bare `X`
//! - Response: one line, framed by `:A`, spaces and CR/LF which are stripped
//! - Axis-keyed replies: `X=1.000000 Y=2.000000`, in the requested axis order
//!
//! Encoding and decoding are pure; the exchange itself (write, read, check the
//! input buffer is drained) lives in [`crate::controller`].

use crate::axis::AxisId;
use crate::error::{ProtocolError, StageResult};
use std::fmt;

/// Line terminator appended to every command.
pub const TERMINATOR: &str = "\r";

/// Characters stripped from both ends of a response line.
pub const RESPONSE_TRIM: &[char] = &[':', 'A', ' ', '\r', '\n'];

/// Firmware version string this driver was written against.
pub const SUPPORTED_VERSION: &str = "Version: USB-9.2k";

/// Status reply meaning "not busy".
pub const STATUS_IDLE: &str = "N";

/// One argument token of a command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// `AXIS?`
    Query(AxisId),
    /// `AXIS=value` with six decimals
    Set(AxisId, f64),
    /// `AXIS=value` as a bare integer code
    Code(AxisId, i64),
    /// `AXIS`
    Axis(AxisId),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Query(axis) => write!(f, "{}?", axis),
            Arg::Set(axis, value) => write!(f, "{}={:.6}", axis, value),
            Arg::Code(axis, code) => write!(f, "{}={}", axis, code),
            Arg::Axis(axis) => write!(f, "{}", axis),
        }
    }
}

/// A typed request ready to be encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    keyword: &'static str,
    args: Vec<Arg>,
}

impl Command {
    /// Command without arguments (`V`, `/`).
    pub fn bare(keyword: &'static str) -> Self {
        Self {
            keyword,
            args: Vec::new(),
        }
    }

    /// Command with the given arguments.
    pub fn new(keyword: &'static str, args: Vec<Arg>) -> Self {
        Self { keyword, args }
    }

    /// `KEYWORD X? Y? ...`
    pub fn query(keyword: &'static str, axes: &[AxisId]) -> Self {
        Self::new(keyword, axes.iter().map(|a| Arg::Query(*a)).collect())
    }

    /// `KEYWORD X=v Y=v ...`
    pub fn assign(keyword: &'static str, axes: &[AxisId], values: &[f64]) -> Self {
        Self::new(
            keyword,
            axes.iter()
                .zip(values)
                .map(|(a, v)| Arg::Set(*a, *v))
                .collect(),
        )
    }

    /// Command keyword.
    pub fn keyword(&self) -> &str {
        self.keyword
    }

    /// Encode to the wire line, without terminator.
    pub fn encode(&self) -> String {
        let mut line = self.keyword.to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string());
        }
        line
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Strip the response framing.
pub fn decode(raw: &str) -> &str {
    raw.trim_matches(RESPONSE_TRIM)
}

/// Parse `X=1.0 Y=2.0` into values, requiring the exact axis sequence.
pub fn parse_axis_values(command: &str, line: &str, axes: &[AxisId]) -> StageResult<Vec<f64>> {
    let mut keys = Vec::new();
    let mut values = Vec::new();
    for token in line.split_whitespace() {
        let (key, value) = split_pair(command, line, token)?;
        keys.push(key.to_string());
        values.push(parse_number(command, line, value)?);
    }
    check_axes(&keys, axes)?;
    Ok(values)
}

/// Parse a position reply.
///
/// The controller answers `W` with bare counts (`12345 -67`); keyed tokens
/// (`X=12345`) are accepted too, and then the axis order is checked.
pub fn parse_counts(command: &str, line: &str, axes: &[AxisId]) -> StageResult<Vec<f64>> {
    if line.contains('=') {
        return parse_axis_values(command, line, axes);
    }
    let counts = line
        .split_whitespace()
        .map(|token| parse_number(command, line, token))
        .collect::<StageResult<Vec<f64>>>()?;
    if counts.len() != axes.len() {
        return Err(malformed(command, line).into());
    }
    Ok(counts)
}

/// Parse a single `KEY=value` reply and return the value text.
///
/// Used for the TTL and LED registers, whose replies carry one key only.
pub fn parse_keyed<'a>(command: &str, line: &'a str, key: AxisId) -> StageResult<&'a str> {
    let mut tokens = line.split_whitespace();
    let token = tokens.next().ok_or_else(|| malformed(command, line))?;
    if tokens.next().is_some() {
        return Err(malformed(command, line).into());
    }
    let (found, value) = split_pair(command, line, token)?;
    check_axes(&[found.to_string()], &[key])?;
    Ok(value)
}

/// Parse an integer register value such as a TTL code or LED percentage.
pub fn parse_code(command: &str, line: &str, key: AxisId) -> StageResult<i64> {
    let value = parse_keyed(command, line, key)?;
    value.parse::<i64>().map_err(|_| malformed(command, line).into())
}

fn split_pair<'a>(command: &str, line: &str, token: &'a str) -> StageResult<(&'a str, &'a str)> {
    match token.split_once('=') {
        Some((key, value)) if !key.is_empty() && !value.contains('=') => Ok((key, value)),
        _ => Err(malformed(command, line).into()),
    }
}

fn parse_number(command: &str, line: &str, value: &str) -> StageResult<f64> {
    value.parse::<f64>().map_err(|_| malformed(command, line).into())
}

fn check_axes(found: &[String], expected: &[AxisId]) -> StageResult<()> {
    let matches = found.len() == expected.len()
        && found.iter().zip(expected).all(|(f, e)| f == e.as_str());
    if !matches {
        return Err(ProtocolError::AxisMismatch {
            expected: expected.iter().map(|a| a.to_string()).collect(),
            actual: found.to_vec(),
        }
        .into());
    }
    Ok(())
}

fn malformed(command: &str, line: &str) -> ProtocolError {
    ProtocolError::Malformed {
        command: command.to_string(),
        response: line.to_string(),
    }
}
