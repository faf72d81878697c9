//! Zoom-conditioned focus calibration.
//!
//! Focus breathing makes the distance behind a normalised focus position
//! depend on the zoom setting. [`ZoomLutBuilder`] repeats the per-distance
//! sampling routine of the 1D builder once per zoom position and stores
//! `(zoom, focus) -> distance` triples:
//!
//! ```json
//! {
//!   "lut_3d": [{ "zoom_normalised": 0.0, "focus_normalised": 0.1, "distance_cm": 50 }],
//!   "generated_at": "2026-10-18 14:02:11"
//! }
//! ```
//!
//! Zoom is moved by an external actuator behind the [`ZoomDrive`] trait; the
//! builder waits for the camera's reported focal length to stop changing
//! before sampling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::table::{CalibrationPoint, CalibrationTable};
use super::{sample_distance, write_json_atomic};
use crate::camera::{CameraControl, Normalised};
use crate::config::ZoomCalibrationConfig;
use crate::error::{LensError, Result};

/// Focal-length reads made while waiting for the zoom to settle.
pub const STABILIZE_ATTEMPTS: usize = 5;
/// Two consecutive reads closer than this (mm) count as settled.
pub const STABLE_FOCAL_DELTA_MM: f64 = 1.0;
/// Entries between intermediate saves.
pub const CHECKPOINT_EVERY: usize = 100;

/// Rounding applied to zoom and focus values when comparing entries.
const KEY_SCALE: f64 = 1e6;

fn key(value: f64) -> i64 {
    (value * KEY_SCALE).round() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoomConditionedEntry {
    pub zoom_normalised: f64,
    pub focus_normalised: f64,
    pub distance_cm: u32,
}

/// All entries sampled at one zoom position, ascending by distance.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoomGroup {
    pub zoom_normalised: f64,
    pub entries: Vec<ZoomConditionedEntry>,
}

/// Ranges covered by one zoom group.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoomGroupStats {
    pub zoom_normalised: f64,
    pub entries: usize,
    pub focus: (f64, f64),
    pub distance_cm: (u32, u32),
}

impl fmt::Display for ZoomGroupStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "zoom {:.4}: {} entries, focus {:.4}..{:.4}, distance {}..{} cm",
            self.zoom_normalised,
            self.entries,
            self.focus.0,
            self.focus.1,
            self.distance_cm.0,
            self.distance_cm.1
        )
    }
}

impl ZoomGroup {
    pub fn stats(&self) -> Option<ZoomGroupStats> {
        let first = self.entries.first()?;
        let mut stats = ZoomGroupStats {
            zoom_normalised: self.zoom_normalised,
            entries: self.entries.len(),
            focus: (first.focus_normalised, first.focus_normalised),
            distance_cm: (first.distance_cm, first.distance_cm),
        };
        for e in &self.entries {
            stats.focus.0 = stats.focus.0.min(e.focus_normalised);
            stats.focus.1 = stats.focus.1.max(e.focus_normalised);
            stats.distance_cm.0 = stats.distance_cm.0.min(e.distance_cm);
            stats.distance_cm.1 = stats.distance_cm.1.max(e.distance_cm);
        }
        Some(stats)
    }

    /// This zoom slice as a 1D focus table.
    pub fn to_table(&self) -> CalibrationTable {
        let mut table = CalibrationTable::new("");
        table.lut = self
            .entries
            .iter()
            .map(|e| CalibrationPoint::from_sample(e.distance_cm, e.focus_normalised))
            .collect();
        table.sort_and_dedupe();
        table
    }
}

/// Zoom-conditioned lookup table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZoomLut {
    pub lut_3d: Vec<ZoomConditionedEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
}

impl ZoomLut {
    /// Load a table, returning `Ok(None)` when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        match std::fs::read_to_string(path.as_ref()) {
            Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Stamp `generated_at` and persist atomically.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.generated_at = Some(chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string());
        write_json_atomic(path.as_ref(), self)
    }

    pub fn len(&self) -> usize {
        self.lut_3d.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lut_3d.is_empty()
    }

    /// Entries grouped by zoom position, ascending by zoom then distance.
    pub fn groups(&self) -> Vec<ZoomGroup> {
        let mut by_zoom: BTreeMap<i64, ZoomGroup> = BTreeMap::new();
        for entry in &self.lut_3d {
            by_zoom
                .entry(key(entry.zoom_normalised))
                .or_insert_with(|| ZoomGroup {
                    zoom_normalised: entry.zoom_normalised,
                    entries: Vec::new(),
                })
                .entries
                .push(*entry);
        }
        by_zoom
            .into_values()
            .map(|mut group| {
                group.entries.sort_by_key(|e| e.distance_cm);
                group
            })
            .collect()
    }

    /// Subject distance (cm) for a zoom and focus position.
    ///
    /// Interpolates along focus within the two zoom slices that bracket
    /// `zoom`, then linearly between them. Outside the sampled zoom range the
    /// nearest slice is used.
    pub fn distance_cm_at(&self, zoom: f64, focus: f64) -> Option<f64> {
        let slices: Vec<(f64, f64)> = self
            .groups()
            .iter()
            .filter_map(|g| {
                g.to_table()
                    .distance_at(focus)
                    .map(|m| (g.zoom_normalised, m * 100.0))
            })
            .collect();
        let first = *slices.first()?;
        let last = *slices.last()?;
        if zoom <= first.0 {
            return Some(first.1);
        }
        if zoom >= last.0 {
            return Some(last.1);
        }
        slices
            .windows(2)
            .find(|pair| pair[0].0 <= zoom && zoom <= pair[1].0)
            .map(|pair| {
                let (z0, d0) = pair[0];
                let (z1, d1) = pair[1];
                if (z1 - z0).abs() < f64::EPSILON {
                    d0
                } else {
                    d0 + (zoom - z0) * (d1 - d0) / (z1 - z0)
                }
            })
    }
}

/// External actuator that moves the zoom ring.
#[async_trait]
pub trait ZoomDrive: Send + Sync {
    /// Start moving the zoom to `target`; may return before motion ends.
    async fn move_zoom(&self, target: Normalised) -> Result<()>;
}

/// Zoom driven through the camera's own lens servo.
pub struct CameraZoomDrive {
    camera: Arc<dyn CameraControl>,
}

impl CameraZoomDrive {
    pub fn new(camera: Arc<dyn CameraControl>) -> Self {
        Self { camera }
    }
}

#[async_trait]
impl ZoomDrive for CameraZoomDrive {
    async fn move_zoom(&self, target: Normalised) -> Result<()> {
        self.camera.set_zoom(target).await
    }
}

/// Grid sampled by [`ZoomLutBuilder`].
#[derive(Debug, Clone)]
pub struct ZoomSweepOptions {
    /// Evenly spaced zoom positions from 0 to 1 inclusive
    pub zoom_positions: u32,
    pub min_cm: u32,
    pub max_cm: u32,
    pub step_cm: u32,
    pub settle_delay: Duration,
    /// Wait before the first focal-length check; later checks wait half
    pub zoom_settle: Duration,
    pub output: PathBuf,
}

impl Default for ZoomSweepOptions {
    fn default() -> Self {
        Self::from(&ZoomCalibrationConfig::default())
    }
}

impl From<&ZoomCalibrationConfig> for ZoomSweepOptions {
    fn from(config: &ZoomCalibrationConfig) -> Self {
        Self {
            zoom_positions: config.zoom_positions,
            min_cm: config.min_cm,
            max_cm: config.max_cm,
            step_cm: config.step_cm,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            zoom_settle: Duration::from_millis(config.zoom_settle_ms),
            output: config.output.clone(),
        }
    }
}

impl ZoomSweepOptions {
    /// Zoom targets `i / (n - 1)`.
    pub fn zoom_values(&self) -> Vec<f64> {
        let n = self.zoom_positions.max(2);
        (0..n).map(|i| f64::from(i) / f64::from(n - 1)).collect()
    }

    pub fn distances_cm(&self) -> Vec<u32> {
        (self.min_cm..=self.max_cm)
            .step_by(self.step_cm.max(1) as usize)
            .collect()
    }
}

/// Samples the focus sweep at every zoom position.
pub struct ZoomLutBuilder {
    camera: Arc<dyn CameraControl>,
    drive: Arc<dyn ZoomDrive>,
    options: ZoomSweepOptions,
    cancel: CancellationToken,
}

impl ZoomLutBuilder {
    pub fn new(
        camera: Arc<dyn CameraControl>,
        drive: Arc<dyn ZoomDrive>,
        options: ZoomSweepOptions,
    ) -> Self {
        Self {
            camera,
            drive,
            options,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the grid, resuming from the output file, and persist the result.
    pub async fn build(&self) -> Result<ZoomLut> {
        let opts = &self.options;
        self.camera.focus().await.map_err(|e| {
            LensError::Connectivity(format!("initial focus read failed: {e}"))
        })?;

        let mut lut = match ZoomLut::load(&opts.output) {
            Ok(Some(lut)) => lut,
            Ok(None) => ZoomLut::default(),
            Err(e) => {
                warn!(path = %opts.output.display(), error = %e, "ignoring unreadable zoom table");
                ZoomLut::default()
            }
        };
        let mut sampled: HashSet<(i64, u32)> = lut
            .lut_3d
            .iter()
            .map(|e| (key(e.zoom_normalised), e.distance_cm))
            .collect();
        let mut readings: HashSet<(i64, i64)> = lut
            .lut_3d
            .iter()
            .map(|e| (key(e.zoom_normalised), key(e.focus_normalised)))
            .collect();
        info!(entries = lut.len(), "starting zoom-conditioned calibration");

        let distances = opts.distances_cm();
        let zooms = opts.zoom_values();
        let mut since_checkpoint = 0usize;

        for (index, zoom) in zooms.iter().copied().enumerate() {
            if self.cancel.is_cancelled() {
                break;
            }
            let pending: Vec<u32> = distances
                .iter()
                .copied()
                .filter(|cm| !sampled.contains(&(key(zoom), *cm)))
                .collect();
            if pending.is_empty() {
                info!(zoom, "zoom position already complete");
                continue;
            }

            info!(zoom, position = index + 1, of = zooms.len(), "moving zoom");
            if let Err(e) = self.drive.move_zoom(Normalised::new(zoom)?).await {
                warn!(zoom, error = %e, "zoom move failed, skipping position");
                continue;
            }
            let Some(focal_mm) = self.wait_for_zoom().await else {
                warn!(zoom, "focal length never readable, skipping position");
                continue;
            };
            info!(zoom, focal_mm, pending = pending.len(), "zoom settled");

            for cm in pending {
                if self.cancel.is_cancelled() {
                    break;
                }
                match sample_distance(self.camera.as_ref(), cm, opts.settle_delay).await {
                    Ok(focus) => {
                        sampled.insert((key(zoom), cm));
                        if !readings.insert((key(zoom), key(focus))) {
                            debug!(zoom, cm, focus, "duplicate reading, not stored");
                            continue;
                        }
                        lut.lut_3d.push(ZoomConditionedEntry {
                            zoom_normalised: zoom,
                            focus_normalised: focus,
                            distance_cm: cm,
                        });
                        info!(zoom, distance_cm = cm, focus, total = lut.len(), "sampled");
                        since_checkpoint += 1;
                        if since_checkpoint >= CHECKPOINT_EVERY {
                            lut.save(&opts.output)?;
                            since_checkpoint = 0;
                        }
                    }
                    Err(e) => warn!(error = %e, "skipping distance"),
                }
            }
            lut.save(&opts.output)?;
            since_checkpoint = 0;
        }

        lut.save(&opts.output)?;
        info!(entries = lut.len(), output = %opts.output.display(), "zoom table saved");
        Ok(lut)
    }

    /// Poll the focal length until two reads agree within 1 mm.
    ///
    /// Returns the last focal length read, or `None` if none could be read.
    async fn wait_for_zoom(&self) -> Option<f64> {
        let mut previous: Option<f64> = None;
        let mut last_read = None;
        for attempt in 0..STABILIZE_ATTEMPTS {
            let wait = if attempt == 0 {
                self.options.zoom_settle
            } else {
                self.options.zoom_settle / 2
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
            let focal = match self.camera.zoom().await {
                Ok(state) => state.focal_length,
                Err(e) => {
                    debug!(attempt, error = %e, "zoom read failed");
                    None
                }
            };
            let Some(focal) = focal else { continue };
            last_read = Some(focal);
            if let Some(prev) = previous {
                if (focal - prev).abs() < STABLE_FOCAL_DELTA_MM {
                    return Some(focal);
                }
            }
            previous = Some(focal);
        }
        last_read
    }
}
