//! Configuration loading using Figment
//!
//! Configuration is layered from:
//! 1. Built-in defaults
//! 2. `config/lens_control.toml` (optional)
//! 3. Environment variables prefixed with `LENS_CONTROL_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use lens_control::config::LensConfig;
//!
//! let config = LensConfig::load()?;
//! println!("Camera: {}", config.camera.base_url);
//! # Ok::<(), lens_control::error::LensError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LensError, Result};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "config/lens_control.toml";

/// Fastest allowed polling fallback interval (5 Hz).
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LensConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Camera REST endpoint
    pub camera: CameraConfig,
    /// Push-event WebSocket settings
    pub live_view: LiveViewConfig,
    /// Polling fallback settings
    pub polling: PollingConfig,
    /// Focus distance calibration
    pub calibration: CalibrationConfig,
    /// Zoom-conditioned calibration
    pub zoom_calibration: ZoomCalibrationConfig,
    /// Focus sweep defaults
    pub sweep: SweepConfig,
    /// JSON file holding the externally controlled focus target
    pub target_file: PathBuf,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    pub log_format: String,
}

/// Camera REST API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Base URL, e.g. `http://studio-camera.local`
    pub base_url: String,
    /// Basic auth user
    pub username: String,
    /// Basic auth password
    pub password: String,
    /// Monitoring display the overlay toggles apply to
    pub display_name: String,
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveViewConfig {
    /// Whether to open the event WebSocket at all
    pub enabled: bool,
    /// Delay between reconnection attempts in milliseconds
    pub reconnect_delay_ms: u64,
    /// Connection handshake timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Upper bound on waiting for the transport task to exit
    pub join_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval between full reads in milliseconds (clamped to >= 200)
    pub interval_ms: u64,
    /// Grace period before polling starts if no event has arrived
    pub start_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Calibration table file
    pub output: PathBuf,
    /// Model tag written into new tables
    pub camera_model: String,
    /// Shortest distance sampled (cm)
    pub min_cm: u32,
    /// Longest distance of the fine and medium phases (cm)
    pub max_cm: u32,
    /// Medium phase resolution (cm)
    pub step_cm: u32,
    /// Wait after each distance write
    pub settle_delay_ms: u64,
    /// Normalised readback at which generation stops
    pub target_normalised: f64,
    /// Hard stop for the extended phase (cm)
    pub extended_ceiling_cm: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ZoomCalibrationConfig {
    /// Zoom-conditioned table file
    pub output: PathBuf,
    /// Number of evenly spaced zoom positions
    pub zoom_positions: u32,
    pub min_cm: u32,
    pub max_cm: u32,
    pub step_cm: u32,
    pub settle_delay_ms: u64,
    /// Wait after each zoom move before checking the focal length
    pub zoom_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Default number of intervals
    pub steps: u32,
    /// Default delay between setpoints in milliseconds
    pub delay_ms: u64,
}

impl Default for LensConfig {
    fn default() -> Self {
        Self {
            application: ApplicationConfig::default(),
            camera: CameraConfig::default(),
            live_view: LiveViewConfig::default(),
            polling: PollingConfig::default(),
            calibration: CalibrationConfig::default(),
            zoom_calibration: ZoomCalibrationConfig::default(),
            sweep: SweepConfig::default(),
            target_file: PathBuf::from("focus_config.json"),
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "lens-control".into(),
            log_level: "info".into(),
            log_format: "pretty".into(),
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            base_url: "http://studio-camera.local".into(),
            username: String::new(),
            password: String::new(),
            display_name: "HDMI".into(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for LiveViewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reconnect_delay_ms: 5_000,
            connect_timeout_ms: 10_000,
            join_timeout_ms: 2_000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            start_delay_ms: 2_000,
        }
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("focuslut.json"),
            camera_model: "Micro-Studio-Camera-4K-G2".into(),
            min_cm: 10,
            max_cm: 2000,
            step_cm: 10,
            settle_delay_ms: 500,
            target_normalised: 0.98,
            extended_ceiling_cm: 20_000,
        }
    }
}

impl Default for ZoomCalibrationConfig {
    fn default() -> Self {
        Self {
            output: PathBuf::from("focus_zoom_lut_3d.json"),
            zoom_positions: 10,
            min_cm: 50,
            max_cm: 1500,
            step_cm: 5,
            settle_delay_ms: 500,
            zoom_settle_ms: 3_000,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            steps: 100,
            delay_ms: 100,
        }
    }
}

impl PollingConfig {
    /// Effective polling interval, never faster than 5 Hz.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms).max(MIN_POLL_INTERVAL)
    }
}

impl LensConfig {
    /// Load configuration from the default file and environment variables
    ///
    /// Environment variables override the file with prefix `LENS_CONTROL_`.
    /// Example: `LENS_CONTROL_CAMERA__BASE_URL=http://10.0.0.12`
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: LensConfig = Figment::from(Serialized::defaults(LensConfig::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("LENS_CONTROL_").split("__"))
            .extract()?;
        config.validate().map_err(LensError::Configuration)?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| LensError::Configuration(e.to_string()))
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> std::result::Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if let Err(e) = url::Url::parse(&self.camera.base_url) {
            return Err(format!(
                "Invalid camera base_url '{}': {}",
                self.camera.base_url, e
            ));
        }

        if self.camera.request_timeout_ms == 0 {
            return Err("camera.request_timeout_ms must be > 0".into());
        }

        let cal = &self.calibration;
        if cal.min_cm == 0 || cal.min_cm > cal.max_cm {
            return Err(format!(
                "Invalid calibration range {}..={} cm",
                cal.min_cm, cal.max_cm
            ));
        }
        if cal.step_cm == 0 {
            return Err("calibration.step_cm must be > 0".into());
        }
        if !(0.0..=1.0).contains(&cal.target_normalised) {
            return Err(format!(
                "calibration.target_normalised {} must be within [0, 1]",
                cal.target_normalised
            ));
        }

        let zoom = &self.zoom_calibration;
        if zoom.zoom_positions < 2 {
            return Err("zoom_calibration.zoom_positions must be >= 2".into());
        }
        if zoom.step_cm == 0 || zoom.min_cm == 0 || zoom.min_cm > zoom.max_cm {
            return Err(format!(
                "Invalid zoom calibration grid {}..={} step {} cm",
                zoom.min_cm, zoom.max_cm, zoom.step_cm
            ));
        }

        if self.sweep.steps == 0 {
            return Err("sweep.steps must be > 0".into());
        }

        Ok(())
    }
}
