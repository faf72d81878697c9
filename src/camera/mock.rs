//! Mock camera for tests and offline runs
//!
//! `MockCamera` keeps lens and monitoring state in memory and converts
//! absolute focus distances to normalised positions through a [`LensModel`].
//! All delays use `tokio::time::sleep`, so tests running with a paused clock
//! stay deterministic.
//!
//! # Failure injection
//!
//! - [`MockCamera::fail_at_distance`]: distance writes at the given
//!   centimetre values answer HTTP 500
//! - [`MockCamera::fail_normalised_after`]: normalised writes fail once `n`
//!   have succeeded
//! - [`MockCamera::set_offline`]: every request fails with a connection error
//!
//! # Example
//!
//! ```rust,ignore
//! let camera = MockCamera::with_lens(LensModel::Linear { near_cm: 10.0, far_cm: 3000.0 })
//!     .fail_at_distance(250);
//! camera.set_focus_distance(500).await?;
//! assert!(camera.focus().await?.normalised > 0.16);
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::time::{sleep, Duration};

use super::types::{
    FocusState, GainState, IrisState, MonitoringToggle, Normalised, Parameter, ShutterSetting,
    ShutterState, SupportedShutters, ToggleState, ZoomState,
};
use super::CameraControl;
use crate::error::{LensError, Result};

/// Shortest and longest focal length of the simulated zoom, in mm.
const FOCAL_RANGE_MM: (f64, f64) = (12.0, 60.0);

/// Mapping from subject distance to normalised focus position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LensModel {
    /// Position proportional to `1/near - 1/d`, like a real focus barrel.
    /// Reaches 1.0 at `far_cm`.
    Hyperbolic { near_cm: f64, far_cm: f64 },
    /// Position proportional to distance. Useful for exercising long sweeps.
    Linear { near_cm: f64, far_cm: f64 },
}

impl Default for LensModel {
    fn default() -> Self {
        LensModel::Hyperbolic {
            near_cm: 10.0,
            far_cm: 5000.0,
        }
    }
}

impl LensModel {
    /// Normalised focus position for a subject at `distance_cm`.
    pub fn normalised_at(&self, distance_cm: f64) -> f64 {
        let n = match *self {
            LensModel::Hyperbolic { near_cm, far_cm } => {
                let d = distance_cm.max(near_cm);
                (1.0 / near_cm - 1.0 / d) / (1.0 / near_cm - 1.0 / far_cm)
            }
            LensModel::Linear { near_cm, far_cm } => (distance_cm - near_cm) / (far_cm - near_cm),
        };
        n.clamp(0.0, 1.0)
    }
}

#[derive(Debug)]
struct MockState {
    focus: f64,
    iris: f64,
    zoom: f64,
    gain: i32,
    shutter: ShutterState,
    toggles: HashMap<MonitoringToggle, bool>,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            focus: 0.5,
            iris: 0.5,
            zoom: 0.0,
            gain: 0,
            shutter: ShutterState {
                shutter_speed: Some(50),
                shutter_angle: None,
                continuous_shutter_auto_exposure: Some(false),
            },
            toggles: HashMap::new(),
        }
    }
}

/// In-memory camera with a simulated lens.
#[derive(Debug, Default)]
pub struct MockCamera {
    state: Mutex<MockState>,
    lens: LensModel,
    quantize_decimals: Option<i32>,
    latency: Duration,
    failing_distances: Mutex<HashSet<u32>>,
    fail_normalised_after: Option<usize>,
    offline: AtomicBool,
    distance_writes: AtomicUsize,
    normalised_writes: AtomicUsize,
    reads: AtomicUsize,
    setpoints: Mutex<Vec<(Parameter, f64)>>,
}

impl MockCamera {
    /// Mock with the default hyperbolic lens, focus at 0.5
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock with a specific lens model
    pub fn with_lens(lens: LensModel) -> Self {
        Self {
            lens,
            ..Self::default()
        }
    }

    /// Round focus readback to `decimals` places, as real bodies do
    pub fn quantized(mut self, decimals: i32) -> Self {
        self.quantize_decimals = Some(decimals);
        self
    }

    /// Delay every request by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Make distance writes at `distance_cm` fail with HTTP 500
    pub fn fail_at_distance(self, distance_cm: u32) -> Self {
        self.failing_distances.lock().insert(distance_cm);
        self
    }

    /// Fail every normalised write after the first `n`
    pub fn fail_normalised_after(mut self, n: usize) -> Self {
        self.fail_normalised_after = Some(n);
        self
    }

    /// Simulate the camera dropping off the network
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of absolute focus-distance writes received
    pub fn distance_writes(&self) -> usize {
        self.distance_writes.load(Ordering::SeqCst)
    }

    /// Number of normalised writes received (focus, iris, zoom)
    pub fn normalised_writes(&self) -> usize {
        self.normalised_writes.load(Ordering::SeqCst)
    }

    /// Number of reads of any parameter
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Every normalised value written, in order
    pub fn setpoints(&self) -> Vec<(Parameter, f64)> {
        self.setpoints.lock().clone()
    }

    /// Normalised values written to one parameter, in order
    pub fn setpoints_for(&self, parameter: Parameter) -> Vec<f64> {
        self.setpoints
            .lock()
            .iter()
            .filter(|(p, _)| *p == parameter)
            .map(|(_, v)| *v)
            .collect()
    }

    /// Current simulated focal length
    pub fn focal_length_mm(&self) -> f64 {
        let zoom = self.state.lock().zoom;
        FOCAL_RANGE_MM.0 + zoom * (FOCAL_RANGE_MM.1 - FOCAL_RANGE_MM.0)
    }

    async fn request(&self) -> Result<()> {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(LensError::Connection("mock camera offline".into()));
        }
        Ok(())
    }

    async fn read_request(&self) -> Result<()> {
        self.request().await?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn quantize(&self, value: f64) -> f64 {
        match self.quantize_decimals {
            Some(decimals) => {
                let scale = 10f64.powi(decimals);
                (value * scale).round() / scale
            }
            None => value,
        }
    }

    async fn write_normalised(&self, parameter: Parameter, value: Normalised) -> Result<()> {
        self.request().await?;
        let accepted = self.normalised_writes.load(Ordering::SeqCst);
        if matches!(self.fail_normalised_after, Some(n) if accepted >= n) {
            return Err(LensError::Status {
                status: 500,
                operation: format!("PUT {}", parameter.property_path("HDMI")),
            });
        }
        self.normalised_writes.fetch_add(1, Ordering::SeqCst);
        self.setpoints.lock().push((parameter, value.get()));

        let mut state = self.state.lock();
        match parameter {
            Parameter::Focus => state.focus = value.get(),
            Parameter::Iris => state.iris = value.get(),
            Parameter::Zoom => state.zoom = value.get(),
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl CameraControl for MockCamera {
    async fn focus(&self) -> Result<FocusState> {
        self.read_request().await?;
        let focus = self.state.lock().focus;
        Ok(FocusState {
            normalised: self.quantize(focus),
        })
    }

    async fn set_focus(&self, value: Normalised) -> Result<()> {
        self.write_normalised(Parameter::Focus, value).await
    }

    async fn set_focus_distance(&self, distance_cm: u32) -> Result<()> {
        self.request().await?;
        self.distance_writes.fetch_add(1, Ordering::SeqCst);
        if self.failing_distances.lock().contains(&distance_cm) {
            return Err(LensError::Status {
                status: 500,
                operation: "PUT /lens/focus".into(),
            });
        }
        self.state.lock().focus = self.lens.normalised_at(f64::from(distance_cm));
        Ok(())
    }

    async fn do_autofocus(&self, _x: Normalised, _y: Normalised) -> Result<()> {
        self.request().await?;
        // Pretend the subject sits at 3 m
        self.state.lock().focus = self.lens.normalised_at(300.0);
        Ok(())
    }

    async fn iris(&self) -> Result<IrisState> {
        self.read_request().await?;
        let iris = self.state.lock().iris;
        Ok(IrisState {
            normalised: Some(iris),
            // f/1.8 wide open to f/16 closed
            aperture_stop: Some(((1.8 + (16.0 - 1.8) * (1.0 - iris)) * 10.0).round() / 10.0),
            aperture_number: None,
            continuous_aperture_auto_exposure: Some(false),
        })
    }

    async fn set_iris(&self, value: Normalised) -> Result<()> {
        self.write_normalised(Parameter::Iris, value).await
    }

    async fn zoom(&self) -> Result<ZoomState> {
        self.read_request().await?;
        let zoom = self.state.lock().zoom;
        Ok(ZoomState {
            focal_length: Some(self.focal_length_mm().round()),
            normalised: Some(zoom),
        })
    }

    async fn set_zoom(&self, value: Normalised) -> Result<()> {
        self.write_normalised(Parameter::Zoom, value).await
    }

    async fn gain(&self) -> Result<GainState> {
        self.read_request().await?;
        Ok(GainState {
            gain: self.state.lock().gain,
        })
    }

    async fn set_gain(&self, gain_db: i32) -> Result<()> {
        self.request().await?;
        if !(-12..=36).contains(&gain_db) {
            return Err(LensError::Status {
                status: 400,
                operation: "PUT /video/gain".into(),
            });
        }
        self.state.lock().gain = gain_db;
        Ok(())
    }

    async fn supported_gains(&self) -> Result<Vec<i32>> {
        self.read_request().await?;
        Ok((-12..=36).step_by(6).collect())
    }

    async fn shutter(&self) -> Result<ShutterState> {
        self.read_request().await?;
        Ok(self.state.lock().shutter.clone())
    }

    async fn set_shutter(&self, setting: ShutterSetting) -> Result<()> {
        let setting = setting.validate()?;
        self.request().await?;
        let mut state = self.state.lock();
        match setting {
            ShutterSetting::Speed(speed) => {
                state.shutter.shutter_speed = Some(speed);
                state.shutter.shutter_angle = None;
            }
            ShutterSetting::Angle(angle) => {
                state.shutter.shutter_angle = Some(angle);
                state.shutter.shutter_speed = None;
            }
        }
        Ok(())
    }

    async fn supported_shutters(&self) -> Result<SupportedShutters> {
        self.read_request().await?;
        Ok(SupportedShutters {
            shutter_speeds: vec![24, 25, 30, 50, 60, 100, 120, 250, 500, 1000],
            shutter_angles: vec![45.0, 90.0, 172.8, 180.0, 270.0, 360.0],
        })
    }

    async fn monitoring(&self, toggle: MonitoringToggle) -> Result<ToggleState> {
        self.read_request().await?;
        let enabled = self
            .state
            .lock()
            .toggles
            .get(&toggle)
            .copied()
            .unwrap_or(false);
        Ok(ToggleState { enabled })
    }

    async fn set_monitoring(&self, toggle: MonitoringToggle, enabled: bool) -> Result<()> {
        self.request().await?;
        self.state.lock().toggles.insert(toggle, enabled);
        Ok(())
    }
}
