//! Integration tests for the focus calibration builder
//!
//! Runs complete calibration passes against `MockCamera` with a paused clock
//! and checks the persisted table.

use lens_control::calibration::{
    BuildOptions, CalibrationBuilder, CalibrationPoint, CalibrationTable, ResumePlan,
};
use lens_control::camera::mock::{LensModel, MockCamera};
use lens_control::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn options(output: &Path) -> BuildOptions {
    BuildOptions {
        output: output.to_path_buf(),
        camera_model: "test-body".into(),
        ..BuildOptions::default()
    }
}

// =============================================================================
// Fresh runs
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_fresh_run_stops_at_target() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let camera = Arc::new(MockCamera::new());

    let report = CalibrationBuilder::new(camera.clone(), options(&output))
        .run()
        .await
        .unwrap();

    assert_eq!(report.plan, ResumePlan::Initial);
    assert!(report.target_reached);
    assert!(!report.cancelled);
    assert_eq!(report.samples_skipped, 0);

    // The default lens crosses 0.98 at 456 cm, inside the fine phase
    let table = CalibrationTable::load(&output).unwrap().unwrap();
    assert_eq!(table.len(), 456 - 10 + 1);
    assert_eq!(camera.distance_writes(), table.len());
    assert!(table.last().unwrap().normalised >= 0.98);
    assert_eq!(table.camera_model, "test-body");
    assert_eq!(table.version, "1.0");
    assert_eq!(table.len(), report.table.len());
}

#[tokio::test(start_paused = true)]
async fn test_distance_meters_is_centimetres_over_100() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let camera = Arc::new(MockCamera::new());

    let table = CalibrationBuilder::new(camera, options(&output))
        .build()
        .await
        .unwrap();

    for point in &table.lut {
        let cm = point.distance_cm();
        assert!((10..=456).contains(&cm));
        assert_eq!(point.distance_meters, f64::from(cm) / 100.0);
    }
}

#[tokio::test(start_paused = true)]
async fn test_quantized_readback_is_deduplicated() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let camera = Arc::new(MockCamera::new().quantized(2));

    let table = CalibrationBuilder::new(camera.clone(), options(&output))
        .build()
        .await
        .unwrap();

    assert!(table.is_strictly_ascending());
    assert!(table.len() < camera.distance_writes());
    // First sample of each plateau survives
    assert_eq!(table.lut[0], CalibrationPoint::from_sample(10, 0.0));
}

#[tokio::test(start_paused = true)]
async fn test_failed_write_is_skipped() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let camera = Arc::new(MockCamera::new().fail_at_distance(100));

    let report = CalibrationBuilder::new(camera.clone(), options(&output))
        .run()
        .await
        .unwrap();

    assert_eq!(report.samples_skipped, 1);
    assert!(report.target_reached);
    assert!(report.table.lut.iter().all(|p| p.distance_cm() != 100));
    assert!(report.table.lut.iter().any(|p| p.distance_cm() == 101));
    assert_eq!(camera.distance_writes(), report.samples_taken + 1);
}

#[tokio::test(start_paused = true)]
async fn test_extended_phase_runs_past_medium_range() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let camera = Arc::new(MockCamera::with_lens(LensModel::Linear {
        near_cm: 10.0,
        far_cm: 3000.0,
    }));
    let mut opts = options(&output);
    opts.settle_delay = Duration::ZERO;

    let report = CalibrationBuilder::new(camera, opts).run().await.unwrap();

    assert!(report.target_reached);
    let last = report.table.last().unwrap();
    // (2960 - 10) / 2990 is the first 20 cm step at or above 0.98
    assert_eq!(last.distance_cm(), 2960);
    assert!(report.table.lut.iter().any(|p| p.distance_cm() == 2020));
    assert!(report.table.lut.iter().all(|p| p.distance_cm() != 2010));
    assert!(report.table.is_strictly_ascending());
}

#[tokio::test(start_paused = true)]
async fn test_extended_phase_coarsens_then_stops_at_ceiling() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let camera = Arc::new(MockCamera::with_lens(LensModel::Linear {
        near_cm: 10.0,
        far_cm: 30000.0,
    }));
    let mut opts = options(&output);
    opts.settle_delay = Duration::ZERO;
    opts.extended_ceiling_cm = 20_000;

    let report = CalibrationBuilder::new(camera.clone(), opts).run().await.unwrap();

    assert!(!report.target_reached);
    assert!(!report.cancelled);

    let extended: Vec<u32> = report
        .table
        .lut
        .iter()
        .map(|p| p.distance_cm())
        .filter(|cm| *cm > 2000)
        .collect();

    // 201 samples 20 cm apart: 2020 ..= 6020
    assert_eq!(extended[0], 2020);
    assert_eq!(extended[200], 6020);
    assert!(extended[..=200].windows(2).all(|w| w[1] - w[0] == 20));

    // Then 50 cm apart up to the last step under the ceiling
    assert_eq!(extended[201], 6070);
    assert!(extended[200..].windows(2).all(|w| w[1] - w[0] == 50));
    assert_eq!(extended.last(), Some(&19970));
    assert_eq!(extended.len(), 201 + 279);

    assert_eq!(report.samples_taken, 491 + 150 + extended.len());
    assert_eq!(camera.distance_writes(), report.samples_taken);
}

#[tokio::test(start_paused = true)]
async fn test_absurd_resume_distance_does_not_overflow() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let mut existing = CalibrationTable::new("test-body");
    existing.lut = vec![CalibrationPoint {
        normalised: 0.001,
        distance_meters: 1e12,
    }];
    existing.save(&output).unwrap();

    let camera = Arc::new(MockCamera::with_lens(LensModel::Linear {
        near_cm: 10.0,
        far_cm: 1e12,
    }));
    let mut opts = options(&output);
    opts.settle_delay = Duration::ZERO;
    opts.extended_ceiling_cm = u32::MAX;

    let report = CalibrationBuilder::new(camera.clone(), opts).run().await.unwrap();

    assert_eq!(report.plan, ResumePlan::Extended { from_cm: u32::MAX });
    assert_eq!(camera.distance_writes(), 1);
    assert!(!report.target_reached);
}

// =============================================================================
// Resume
// =============================================================================

#[tokio::test]
async fn test_complete_table_needs_no_writes() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let mut existing = CalibrationTable::new("test-body");
    existing.lut = vec![
        CalibrationPoint::from_sample(10, 0.0),
        CalibrationPoint::from_sample(500, 0.6),
        CalibrationPoint::from_sample(3000, 0.99),
    ];
    existing.save(&output).unwrap();

    let camera = Arc::new(MockCamera::new());
    let report = CalibrationBuilder::new(camera.clone(), options(&output))
        .run()
        .await
        .unwrap();

    assert_eq!(report.plan, ResumePlan::Complete);
    assert_eq!(camera.distance_writes(), 0);
    assert_eq!(report.table, existing);
    assert_eq!(CalibrationTable::load(&output).unwrap().unwrap(), existing);
}

#[tokio::test(start_paused = true)]
async fn test_resume_near_medium_end_continues_extended() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let mut existing = CalibrationTable::new("test-body");
    existing.lut = vec![
        CalibrationPoint::from_sample(10, 0.0),
        CalibrationPoint::from_sample(1995, 0.5),
    ];
    existing.save(&output).unwrap();

    let camera = Arc::new(MockCamera::with_lens(LensModel::Linear {
        near_cm: 10.0,
        far_cm: 3000.0,
    }));
    let report = CalibrationBuilder::new(camera, options(&output))
        .run()
        .await
        .unwrap();

    assert_eq!(report.plan, ResumePlan::Extended { from_cm: 2015 });
    assert_eq!(report.resumed_entries, 2);
    assert!(report.table.lut.iter().any(|p| p.distance_cm() == 2015));
    assert!(report.target_reached);
}

// =============================================================================
// Failures and cancellation
// =============================================================================

#[tokio::test]
async fn test_unreachable_camera_is_fatal() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let camera = Arc::new(MockCamera::new());
    camera.set_offline(true);

    let err = CalibrationBuilder::new(camera.clone(), options(&output))
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Connectivity);
    assert_eq!(camera.distance_writes(), 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn test_cancelled_run_still_saves() {
    let dir = TempDir::new().unwrap();
    let output = dir.path().join("focuslut.json");
    let camera = Arc::new(MockCamera::new());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = CalibrationBuilder::new(camera.clone(), options(&output))
        .with_cancel(cancel)
        .run()
        .await
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.samples_taken, 0);
    assert_eq!(camera.distance_writes(), 0);
    assert!(CalibrationTable::load(&output).unwrap().unwrap().is_empty());
}
