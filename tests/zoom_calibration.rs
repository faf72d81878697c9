//! Zoom-conditioned calibration against `MockCamera`.

use async_trait::async_trait;
use lens_control::calibration::zoom::CameraZoomDrive;
use lens_control::calibration::{ZoomDrive, ZoomLut, ZoomLutBuilder, ZoomSweepOptions};
use lens_control::camera::mock::MockCamera;
use lens_control::camera::{CameraControl, Normalised};
use lens_control::{LensError, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn small_grid(output: &Path) -> ZoomSweepOptions {
    ZoomSweepOptions {
        zoom_positions: 3,
        min_cm: 100,
        max_cm: 200,
        step_cm: 50,
        settle_delay: Duration::from_millis(500),
        zoom_settle: Duration::from_secs(3),
        output: output.to_path_buf(),
    }
}

/// Drive that refuses one zoom position.
struct JammedDrive {
    camera: Arc<MockCamera>,
    jammed_at: f64,
}

#[async_trait]
impl ZoomDrive for JammedDrive {
    async fn move_zoom(&self, target: Normalised) -> Result<()> {
        if target.get() == self.jammed_at {
            return Err(LensError::Connection("slider not responding".into()));
        }
        self.camera.set_zoom(target).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_samples_every_zoom_position() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focus_zoom_lut_3d.json");
    let camera = Arc::new(MockCamera::new());
    let drive = Arc::new(CameraZoomDrive::new(camera.clone()));

    let lut = ZoomLutBuilder::new(camera.clone(), drive, small_grid(&output))
        .build()
        .await
        .unwrap();

    assert_eq!(lut.len(), 9);
    assert_eq!(camera.distance_writes(), 9);
    let groups = lut.groups();
    assert_eq!(groups.len(), 3);
    assert!(groups.iter().all(|g| g.entries.len() == 3));

    let saved = ZoomLut::load(&output).unwrap().unwrap();
    assert_eq!(saved.len(), 9);
    assert!(saved.generated_at.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_rerun_resumes_without_sampling() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focus_zoom_lut_3d.json");
    let camera = Arc::new(MockCamera::new());
    let drive = Arc::new(CameraZoomDrive::new(camera.clone()));

    ZoomLutBuilder::new(camera.clone(), drive.clone(), small_grid(&output))
        .build()
        .await
        .unwrap();
    let writes = camera.distance_writes();

    let lut = ZoomLutBuilder::new(camera.clone(), drive, small_grid(&output))
        .build()
        .await
        .unwrap();

    assert_eq!(lut.len(), 9);
    assert_eq!(camera.distance_writes(), writes);
}

#[tokio::test(start_paused = true)]
async fn test_failed_zoom_move_skips_position() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focus_zoom_lut_3d.json");
    let camera = Arc::new(MockCamera::new());
    let drive = Arc::new(JammedDrive {
        camera: camera.clone(),
        jammed_at: 0.5,
    });

    let lut = ZoomLutBuilder::new(camera.clone(), drive, small_grid(&output))
        .build()
        .await
        .unwrap();

    assert_eq!(lut.len(), 6);
    assert!(lut.lut_3d.iter().all(|e| e.zoom_normalised != 0.5));
}
