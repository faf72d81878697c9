//! Focus calibration table: normalised focus position to subject distance.
//!
//! On disk:
//!
//! ```json
//! {
//!   "lut": [{ "normalised": 0.0123, "distance_meters": 0.1 }, ...],
//!   "version": "1.0",
//!   "camera_model": "Micro-Studio-Camera-4K-G2"
//! }
//! ```
//!
//! Entries are kept sorted ascending by `normalised`, and after generation
//! no two entries share a `normalised` value.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use tracing::warn;

use super::write_json_atomic;
use crate::error::Result;

/// Schema version written into new tables.
pub const TABLE_VERSION: &str = "1.0";

/// One sampled (position, distance) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub normalised: f64,
    pub distance_meters: f64,
}

impl CalibrationPoint {
    /// Point for a sample taken at `distance_cm`.
    pub fn from_sample(distance_cm: u32, normalised: f64) -> Self {
        Self {
            normalised,
            distance_meters: f64::from(distance_cm) / 100.0,
        }
    }

    /// Distance rounded back to whole centimetres.
    pub fn distance_cm(&self) -> u32 {
        (self.distance_meters * 100.0).round().max(0.0) as u32
    }
}

fn default_version() -> String {
    TABLE_VERSION.to_string()
}

/// Sorted lookup table built by [`CalibrationBuilder`](super::CalibrationBuilder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationTable {
    pub lut: Vec<CalibrationPoint>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub camera_model: String,
}

/// Ranges covered by a table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TableSummary {
    pub entries: usize,
    pub normalised: (f64, f64),
    pub distance_meters: (f64, f64),
}

impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries, normalised {:.6}..{:.6}, distance {:.2}m..{:.2}m",
            self.entries,
            self.normalised.0,
            self.normalised.1,
            self.distance_meters.0,
            self.distance_meters.1
        )
    }
}

impl CalibrationTable {
    /// Empty table tagged with `camera_model`.
    pub fn new(camera_model: impl Into<String>) -> Self {
        Self {
            lut: Vec::new(),
            version: default_version(),
            camera_model: camera_model.into(),
        }
    }

    /// Load a table, returning `Ok(None)` when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&text)?))
    }

    /// Load a table to resume from.
    ///
    /// Unreadable or unparseable files are logged and treated as empty;
    /// generation then starts from scratch.
    pub fn load_or_new(path: impl AsRef<Path>, camera_model: &str) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(Some(table)) => table,
            Ok(None) => Self::new(camera_model),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable calibration table");
                Self::new(camera_model)
            }
        }
    }

    /// Persist with write-to-temp-then-rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        write_json_atomic(path.as_ref(), self)
    }

    pub fn len(&self) -> usize {
        self.lut.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lut.is_empty()
    }

    pub fn last(&self) -> Option<&CalibrationPoint> {
        self.lut.last()
    }

    /// Sort ascending by `normalised` and drop later entries that repeat a
    /// `normalised` value.
    ///
    /// The sort is stable, so among duplicates the entry sampled first wins.
    pub fn sort_and_dedupe(&mut self) {
        self.lut.sort_by(|a, b| a.normalised.total_cmp(&b.normalised));
        self.lut.dedup_by(|later, kept| later.normalised == kept.normalised);
    }

    /// Whether `normalised` strictly increases through the table.
    pub fn is_strictly_ascending(&self) -> bool {
        self.lut
            .windows(2)
            .all(|pair| pair[0].normalised < pair[1].normalised)
    }

    /// Every sampled distance, in whole centimetres.
    pub fn covered_distances_cm(&self) -> HashSet<u32> {
        self.lut.iter().map(CalibrationPoint::distance_cm).collect()
    }

    /// Entry count and value ranges, or `None` for an empty table.
    pub fn summary(&self) -> Option<TableSummary> {
        let first = self.lut.first()?;
        let (mut n_min, mut n_max) = (first.normalised, first.normalised);
        let (mut d_min, mut d_max) = (first.distance_meters, first.distance_meters);
        for p in &self.lut {
            n_min = n_min.min(p.normalised);
            n_max = n_max.max(p.normalised);
            d_min = d_min.min(p.distance_meters);
            d_max = d_max.max(p.distance_meters);
        }
        Some(TableSummary {
            entries: self.lut.len(),
            normalised: (n_min, n_max),
            distance_meters: (d_min, d_max),
        })
    }

    /// Subject distance in metres for a normalised focus position.
    ///
    /// Linear interpolation between neighbouring entries; positions outside
    /// the table clamp to the first or last distance. Assumes a sorted table.
    pub fn distance_at(&self, normalised: f64) -> Option<f64> {
        let first = self.lut.first()?;
        let last = self.lut.last()?;
        let n = normalised.clamp(0.0, 1.0);
        if n <= first.normalised {
            return Some(first.distance_meters);
        }
        if n >= last.normalised {
            return Some(last.distance_meters);
        }
        let upper = self.lut.partition_point(|p| p.normalised <= n);
        let (a, b) = (self.lut[upper - 1], self.lut[upper]);
        Some(lerp(
            n,
            (a.normalised, a.distance_meters),
            (b.normalised, b.distance_meters),
        ))
    }

    /// Normalised focus position for a subject distance in metres.
    ///
    /// Inverse of [`distance_at`](Self::distance_at), clamped to `[0, 1]`.
    pub fn normalised_for(&self, distance_meters: f64) -> Option<f64> {
        let first = self.lut.first()?;
        let last = self.lut.last()?;
        if distance_meters <= first.distance_meters {
            return Some(first.normalised);
        }
        if distance_meters >= last.distance_meters {
            return Some(last.normalised);
        }
        let n = self
            .lut
            .windows(2)
            .find(|pair| {
                let (lo, hi) = ordered(pair[0].distance_meters, pair[1].distance_meters);
                lo <= distance_meters && distance_meters <= hi
            })
            .map(|pair| {
                lerp(
                    distance_meters,
                    (pair[0].distance_meters, pair[0].normalised),
                    (pair[1].distance_meters, pair[1].normalised),
                )
            })
            .unwrap_or(last.normalised);
        Some(n.clamp(0.0, 1.0))
    }
}

fn ordered(a: f64, b: f64) -> (f64, f64) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn lerp(x: f64, (x0, y0): (f64, f64), (x1, y1): (f64, f64)) -> f64 {
    if (x1 - x0).abs() < f64::EPSILON {
        return y0;
    }
    y0 + (x - x0) * (y1 - y0) / (x1 - x0)
}
