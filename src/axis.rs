//! Stage axes and their physical limits.
//!
//! The MS-2000 drives up to three linear axes. Each axis carries a lead screw
//! whose pitch class fixes the encoder resolution and top speed; the user
//! supplies the travel range. [`StageSetup::build`] validates the whole
//! description at once and produces an immutable [`StageGeometry`]; there is
//! no partially valid geometry.
//!
//! ```
//! use asi_stage::axis::{AxisId, LeadScrew, StageSetup};
//!
//! let geometry = StageSetup::new(
//!     vec![AxisId::X, AxisId::Y],
//!     vec![LeadScrew::Standard, LeadScrew::Standard],
//!     vec![-50.0, -25.0],
//!     vec![50.0, 25.0],
//! )
//! .build()?;
//! assert_eq!(geometry.axis(0).max_position_um, 50_000.0);
//! # Ok::<(), asi_stage::StageError>(())
//! ```

use crate::error::{StageError, StageResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One linear degree of freedom of the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AxisId {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z (focus) axis
    Z,
}

impl AxisId {
    /// Wire name of the axis.
    pub fn as_str(self) -> &'static str {
        match self {
            AxisId::X => "X",
            AxisId::Y => "Y",
            AxisId::Z => "Z",
        }
    }
}

impl fmt::Display for AxisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AxisId {
    type Err = StageError;

    fn from_str(s: &str) -> StageResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "X" => Ok(AxisId::X),
            "Y" => Ok(AxisId::Y),
            "Z" => Ok(AxisId::Z),
            other => Err(StageError::Configuration(format!(
                "unknown axis '{}' (expected X, Y or Z)",
                other
            ))),
        }
    }
}

/// Axis layouts the controller firmware supports.
pub const SUPPORTED_LAYOUTS: [&[AxisId]; 3] = [
    &[AxisId::X, AxisId::Y],
    &[AxisId::Z],
    &[AxisId::X, AxisId::Y, AxisId::Z],
];

/// Lead screw pitch class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadScrew {
    /// "UC": 25.40 mm pitch
    #[serde(rename = "UC")]
    UltraCourse,
    /// "SC": 12.70 mm pitch
    #[serde(rename = "SC")]
    SuperCourse,
    /// "S": 6.35 mm pitch
    #[serde(rename = "S")]
    Standard,
    /// "F": 1.59 mm pitch
    #[serde(rename = "F")]
    Fine,
    /// "XF": 0.653 mm pitch
    #[serde(rename = "XF")]
    ExtraFine,
}

impl LeadScrew {
    /// Short code used in configuration files.
    pub fn code(self) -> &'static str {
        match self {
            LeadScrew::UltraCourse => "UC",
            LeadScrew::SuperCourse => "SC",
            LeadScrew::Standard => "S",
            LeadScrew::Fine => "F",
            LeadScrew::ExtraFine => "XF",
        }
    }

    /// (pitch mm, encoder resolution nm, max velocity mm/s)
    fn constants(self) -> (f64, f64, f64) {
        match self {
            LeadScrew::UltraCourse => (25.40, 88.0, 28.0),
            LeadScrew::SuperCourse => (12.70, 44.0, 14.0),
            LeadScrew::Standard => (6.350, 22.0, 7.00),
            LeadScrew::Fine => (1.590, 5.50, 1.75),
            LeadScrew::ExtraFine => (0.653, 2.20, 0.70),
        }
    }

    /// Distance travelled per screw revolution.
    pub fn pitch_mm(self) -> f64 {
        self.constants().0
    }

    /// Encoder resolution.
    pub fn resolution_nm(self) -> f64 {
        self.constants().1
    }

    /// Top speed for this pitch.
    pub fn max_velocity_mmps(self) -> f64 {
        self.constants().2
    }
}

impl FromStr for LeadScrew {
    type Err = StageError;

    fn from_str(s: &str) -> StageResult<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "UC" => Ok(LeadScrew::UltraCourse),
            "SC" => Ok(LeadScrew::SuperCourse),
            "S" => Ok(LeadScrew::Standard),
            "F" => Ok(LeadScrew::Fine),
            "XF" => Ok(LeadScrew::ExtraFine),
            other => Err(StageError::Configuration(format!(
                "unknown lead screw '{}' (expected UC, SC, S, F or XF)",
                other
            ))),
        }
    }
}

/// Default encoder scale.
pub const DEFAULT_ENCODER_COUNTS_PER_UM: f64 = 10.0;

/// Immutable constants for one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisConfig {
    /// Axis identifier
    pub id: AxisId,
    /// Lead screw fitted to this axis
    pub lead_screw: LeadScrew,
    /// Screw pitch (mm)
    pub pitch_mm: f64,
    /// Encoder resolution (nm)
    pub resolution_nm: f64,
    /// Velocity ceiling (mm/s)
    pub max_velocity_mmps: f64,
    /// Lower travel limit (um)
    pub min_position_um: f64,
    /// Upper travel limit (um)
    pub max_position_um: f64,
    /// Encoder counts per micrometer
    pub encoder_counts_per_um: f64,
    /// Shortest acceleration ramp (ms)
    pub min_acceleration_ms: f64,
    /// Longest acceleration ramp (ms)
    pub max_acceleration_ms: f64,
    /// Longest settle time (ms)
    pub max_settle_time_ms: f64,
    /// Allowed deviation when reading back settle time (ms)
    pub settle_tolerance_ms: f64,
    /// Tightest precision window (um)
    pub min_precision_um: f64,
    /// Loosest precision window (um)
    pub max_precision_um: f64,
}

impl AxisConfig {
    fn new(id: AxisId, lead_screw: LeadScrew, min_mm: f64, max_mm: f64, counts: f64) -> Self {
        Self {
            id,
            lead_screw,
            pitch_mm: lead_screw.pitch_mm(),
            resolution_nm: lead_screw.resolution_nm(),
            max_velocity_mmps: lead_screw.max_velocity_mmps(),
            min_position_um: 1e3 * min_mm,
            max_position_um: 1e3 * max_mm,
            encoder_counts_per_um: counts,
            min_acceleration_ms: 25.0,
            max_acceleration_ms: 1e3,
            max_settle_time_ms: 1e3,
            settle_tolerance_ms: 1.0,
            min_precision_um: 1.0,
            max_precision_um: 1e6,
        }
    }

    /// Encoder counts for a position, rounded to the nearest count.
    pub fn um_to_counts(&self, position_um: f64) -> i64 {
        (position_um * self.encoder_counts_per_um).round() as i64
    }

    /// Position for a raw encoder reading.
    pub fn counts_to_um(&self, counts: f64) -> f64 {
        counts / self.encoder_counts_per_um
    }

    /// Whether a position lies inside the travel range.
    pub fn contains_um(&self, position_um: f64) -> bool {
        (self.min_position_um..=self.max_position_um).contains(&position_um)
    }
}

/// Construction-time description of the stage.
///
/// This is also the `[stage]` section of the configuration file, with axes
/// and lead screws written as their codes (`"X"`, `"S"`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSetup {
    /// Ordered axis sequence
    pub axes: Vec<AxisId>,
    /// Lead screw per axis
    pub lead_screws: Vec<LeadScrew>,
    /// Lower travel limit per axis (mm)
    pub min_mm: Vec<f64>,
    /// Upper travel limit per axis (mm)
    pub max_mm: Vec<f64>,
    /// Encoder scale override per axis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder_counts_per_um: Option<Vec<u32>>,
}

impl StageSetup {
    /// Create a setup with the default encoder scale.
    pub fn new(
        axes: Vec<AxisId>,
        lead_screws: Vec<LeadScrew>,
        min_mm: Vec<f64>,
        max_mm: Vec<f64>,
    ) -> Self {
        Self {
            axes,
            lead_screws,
            min_mm,
            max_mm,
            encoder_counts_per_um: None,
        }
    }

    /// Override the encoder scale (expert use).
    pub fn with_encoder_counts(mut self, counts_per_um: Vec<u32>) -> Self {
        self.encoder_counts_per_um = Some(counts_per_um);
        self
    }

    /// Validate the description and derive per-axis constants.
    pub fn build(&self) -> StageResult<StageGeometry> {
        if !SUPPORTED_LAYOUTS.iter().any(|layout| *layout == self.axes.as_slice()) {
            return Err(StageError::Configuration(format!(
                "unsupported axis layout {:?} (expected [X, Y], [Z] or [X, Y, Z])",
                self.axes
            )));
        }
        let n = self.axes.len();
        check_len("lead_screws", self.lead_screws.len(), n)?;
        check_len("min_mm", self.min_mm.len(), n)?;
        check_len("max_mm", self.max_mm.len(), n)?;

        for (i, (&lo, &hi)) in self.min_mm.iter().zip(&self.max_mm).enumerate() {
            if !lo.is_finite() || !hi.is_finite() {
                return Err(StageError::Configuration(format!(
                    "range of axis {} is not numeric: [{}, {}]",
                    self.axes[i], lo, hi
                )));
            }
            if lo > hi {
                return Err(StageError::Configuration(format!(
                    "range of axis {} is inverted: [{}, {}] mm",
                    self.axes[i], lo, hi
                )));
            }
        }

        let counts = match &self.encoder_counts_per_um {
            None => vec![DEFAULT_ENCODER_COUNTS_PER_UM; n],
            Some(counts) => {
                check_len("encoder_counts_per_um", counts.len(), n)?;
                if counts.contains(&0) {
                    return Err(StageError::Configuration(
                        "encoder_counts_per_um must be positive".to_string(),
                    ));
                }
                counts.iter().map(|&c| f64::from(c)).collect()
            }
        };

        let axes = (0..n)
            .map(|i| {
                AxisConfig::new(
                    self.axes[i],
                    self.lead_screws[i],
                    self.min_mm[i],
                    self.max_mm[i],
                    counts[i],
                )
            })
            .collect();
        Ok(StageGeometry { axes })
    }
}

fn check_len(field: &str, len: usize, expected: usize) -> StageResult<()> {
    if len != expected {
        return Err(StageError::Configuration(format!(
            "{} has {} entries but {} axes are configured",
            field, len, expected
        )));
    }
    Ok(())
}

/// Validated, immutable per-axis constants in axis order.
#[derive(Debug, Clone, PartialEq)]
pub struct StageGeometry {
    axes: Vec<AxisConfig>,
}

impl StageGeometry {
    /// Number of axes.
    pub fn len(&self) -> usize {
        self.axes.len()
    }

    /// Always false for a built geometry.
    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    /// Axis ids in order.
    pub fn ids(&self) -> Vec<AxisId> {
        self.axes.iter().map(|a| a.id).collect()
    }

    /// Constants for the axis at `index`.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    pub fn axis(&self, index: usize) -> &AxisConfig {
        &self.axes[index]
    }

    /// Iterate over axes in order.
    pub fn iter(&self) -> std::slice::Iter<'_, AxisConfig> {
        self.axes.iter()
    }
}
