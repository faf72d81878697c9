//! Focus calibration
//!
//! Builds lookup tables that map the lens's normalised focus position to a
//! physical subject distance by commanding absolute focus distances and
//! reading back where the lens ended up.
//!
//! - [`table`]: the 1D table, its file format and interpolation
//! - [`builder`]: the phased distance sweep that fills a 1D table
//! - [`zoom`]: the zoom-conditioned table, sampled once per zoom position

pub mod builder;
pub mod table;
pub mod zoom;

pub use builder::{BuildOptions, BuildReport, CalibrationBuilder, ResumePlan};
pub use table::{CalibrationPoint, CalibrationTable, TableSummary};
pub use zoom::{ZoomConditionedEntry, ZoomDrive, ZoomLut, ZoomLutBuilder, ZoomSweepOptions};

use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use crate::camera::CameraControl;
use crate::error::{LensError, Result};

/// Command `distance_cm`, wait for the lens to settle, read the position.
///
/// Failures come back as [`LensError::TransientSample`] so callers can log
/// and move on to the next distance.
pub(crate) async fn sample_distance(
    camera: &dyn CameraControl,
    distance_cm: u32,
    settle: Duration,
) -> Result<f64> {
    camera
        .set_focus_distance(distance_cm)
        .await
        .map_err(|e| LensError::transient_sample(distance_cm, e))?;
    if !settle.is_zero() {
        tokio::time::sleep(settle).await;
    }
    let focus = camera
        .focus()
        .await
        .map_err(|e| LensError::transient_sample(distance_cm, e))?;
    Ok(focus.normalised)
}

/// Serialize `value` as pretty JSON next to `path`, then rename over it.
///
/// Readers never observe a half-written file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| LensError::Io(e.error))?;
    Ok(())
}
