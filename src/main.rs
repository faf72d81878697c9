//! CLI entry point for lens-control
//!
//! ```bash
//! lens-control status
//! lens-control set focus 0.42
//! lens-control sweep --start 0.2 --end 0.8 --steps 60 --duration-secs 6 --infinite
//! lens-control calibrate --output focuslut.json
//! lens-control lookup --normalised 0.5
//! lens-control monitor --watch-target
//! ```
//!
//! Every command accepts `--mock` to run against the in-process lens model.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use lens_control::calibration::zoom::CameraZoomDrive;
use lens_control::calibration::{
    BuildOptions, CalibrationBuilder, CalibrationTable, ZoomLut, ZoomLutBuilder, ZoomSweepOptions,
};
use lens_control::camera::http::RestCamera;
use lens_control::camera::mock::MockCamera;
use lens_control::camera::{CameraControl, Normalised, Parameter, ShutterSetting};
use lens_control::config::{LensConfig, DEFAULT_CONFIG_PATH};
use lens_control::sweep::{SweepDriver, SweepOutcome, SweepSpec};
use lens_control::sync::{spawn_observer, StateObserver};
use lens_control::{logging, watch, LensSession};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lens-control")]
#[command(about = "Remote lens control and focus calibration", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use the simulated camera instead of the network
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read and print every tracked parameter
    Status,

    /// Write one parameter
    Set {
        /// focus, iris, zoom, gain, shutter, zebra, focusAssist, falseColor, cleanfeed
        parameter: String,
        /// Normalised value, gain in dB, shutter as `1/50` or `180deg`, or on/off
        value: String,
    },

    /// Trigger one-shot autofocus
    Autofocus {
        #[arg(default_value_t = 0.5)]
        x: f64,
        #[arg(default_value_t = 0.5)]
        y: f64,
    },

    /// Sweep a normalised parameter between two positions
    Sweep {
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        #[arg(long, default_value_t = 1.0)]
        end: f64,
        #[arg(long)]
        steps: Option<u32>,
        /// Delay between setpoints
        #[arg(long, conflicts_with = "duration_secs")]
        delay_ms: Option<u64>,
        /// Spread one pass over this many seconds
        #[arg(long)]
        duration_secs: Option<f64>,
        /// Ping-pong until interrupted
        #[arg(long)]
        infinite: bool,
        #[arg(long, default_value = "focus")]
        parameter: String,
    },

    /// Build or extend the focus calibration table
    Calibrate {
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        min_cm: Option<u32>,
        #[arg(long)]
        max_cm: Option<u32>,
        #[arg(long)]
        step_cm: Option<u32>,
    },

    /// Build the zoom-conditioned calibration table
    CalibrateZoom {
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Summarize a calibration table
    Inspect {
        /// Table file; defaults to the configured output
        file: Option<PathBuf>,
        /// Treat the file as a zoom-conditioned table
        #[arg(long)]
        zoom: bool,
    },

    /// Convert between normalised focus and distance
    Lookup {
        #[arg(long, conflicts_with = "meters", required_unless_present = "meters")]
        normalised: Option<f64>,
        #[arg(long)]
        meters: Option<f64>,
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Write the focus target file
    Target { value: f64 },

    /// Follow parameter changes until interrupted
    Monitor {
        /// Also apply the focus target file whenever it changes
        #[arg(long)]
        watch_target: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        LensConfig::load_from(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        LensConfig::default()
    };
    if cli.mock {
        config.live_view.enabled = false;
    }
    logging::init_from_config(&config).map_err(anyhow::Error::msg)?;

    let camera: Arc<dyn CameraControl> = if cli.mock {
        info!("using simulated camera");
        Arc::new(MockCamera::new())
    } else {
        Arc::new(RestCamera::new(&config.camera)?)
    };

    match cli.command {
        Commands::Status => status(camera).await,
        Commands::Set { parameter, value } => set(camera, &parameter, &value).await,
        Commands::Autofocus { x, y } => {
            camera.do_autofocus(Normalised::new(x)?, Normalised::new(y)?).await?;
            println!("autofocus triggered at ({x}, {y})");
            Ok(())
        }
        Commands::Sweep {
            start,
            end,
            steps,
            delay_ms,
            duration_secs,
            infinite,
            parameter,
        } => {
            let mut spec = SweepSpec::new(start, end, steps.unwrap_or(config.sweep.steps))?
                .with_delay(Duration::from_millis(delay_ms.unwrap_or(config.sweep.delay_ms)))
                .infinite(infinite);
            if let Some(secs) = duration_secs {
                if !(secs.is_finite() && secs > 0.0) {
                    bail!("duration must be positive");
                }
                spec = spec.with_duration(Duration::from_secs_f64(secs));
            }
            sweep(camera, parameter.parse()?, spec).await
        }
        Commands::Calibrate {
            output,
            min_cm,
            max_cm,
            step_cm,
        } => {
            let mut options = BuildOptions::from(&config.calibration);
            if let Some(output) = output {
                options.output = output;
            }
            options.min_distance_cm = min_cm.unwrap_or(options.min_distance_cm);
            options.max_distance_cm = max_cm.unwrap_or(options.max_distance_cm);
            options.step_cm = step_cm.unwrap_or(options.step_cm);
            calibrate(camera, options).await
        }
        Commands::CalibrateZoom { output } => {
            let mut options = ZoomSweepOptions::from(&config.zoom_calibration);
            if let Some(output) = output {
                options.output = output;
            }
            calibrate_zoom(camera, options).await
        }
        Commands::Inspect { file, zoom } => {
            if zoom {
                inspect_zoom(file.unwrap_or(config.zoom_calibration.output))
            } else {
                inspect(file.unwrap_or(config.calibration.output))
            }
        }
        Commands::Lookup {
            normalised,
            meters,
            file,
        } => lookup(file.unwrap_or(config.calibration.output), normalised, meters),
        Commands::Target { value } => {
            watch::save_target(&config.target_file, Normalised::new(value)?)?;
            println!("target_focus = {value} -> {}", config.target_file.display());
            Ok(())
        }
        Commands::Monitor { watch_target } => monitor(camera, &config, watch_target).await,
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

async fn status(camera: Arc<dyn CameraControl>) -> Result<()> {
    let session = LensSession::new(camera);
    let read = session.refresh().await;
    if read == 0 {
        bail!("camera did not answer any read");
    }
    for (parameter, entry) in session.sync().snapshot().iter() {
        println!("{:<12} {}", parameter.name(), entry.value);
    }
    Ok(())
}

async fn set(camera: Arc<dyn CameraControl>, parameter: &str, value: &str) -> Result<()> {
    let parameter: Parameter = parameter.parse()?;
    match parameter {
        Parameter::Gain => {
            let gain: i32 = value.parse().context("gain must be an integer dB value")?;
            camera.set_gain(gain).await?;
        }
        Parameter::Shutter => camera.set_shutter(parse_shutter(value)?).await?,
        Parameter::Monitoring(toggle) => {
            camera.set_monitoring(toggle, parse_switch(value)?).await?;
        }
        normalised => {
            let value: f64 = value.parse().context("expected a normalised value")?;
            camera.set_normalised(normalised, value).await?;
        }
    }
    let now = camera.read(parameter).await?;
    println!("{} = {}", parameter.name(), now);
    Ok(())
}

fn parse_shutter(value: &str) -> Result<ShutterSetting> {
    let setting = if let Some(angle) = value.strip_suffix("deg") {
        ShutterSetting::Angle(angle.trim().parse().context("invalid shutter angle")?)
    } else {
        let speed = value.strip_prefix("1/").unwrap_or(value);
        ShutterSetting::Speed(speed.parse().context("invalid shutter speed")?)
    };
    Ok(setting.validate()?)
}

fn parse_switch(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => bail!("expected on/off, got '{other}'"),
    }
}

/// Cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted");
            token.cancel();
        }
    });
    cancel
}

async fn sweep(camera: Arc<dyn CameraControl>, parameter: Parameter, spec: SweepSpec) -> Result<()> {
    let driver = SweepDriver::for_parameter(camera, parameter);
    match driver.run(&spec, interrupt_token()).await? {
        SweepOutcome::Completed { setpoints } => println!("sweep complete, {setpoints} setpoints"),
        SweepOutcome::Cancelled {
            setpoints,
            last_value,
        } => match last_value {
            Some(v) => println!("sweep stopped after {setpoints} setpoints at {v:.4}"),
            None => println!("sweep stopped before the first setpoint"),
        },
    }
    Ok(())
}

async fn calibrate(camera: Arc<dyn CameraControl>, options: BuildOptions) -> Result<()> {
    let output = options.output.clone();
    let report = CalibrationBuilder::new(camera, options)
        .with_cancel(interrupt_token())
        .run()
        .await?;
    println!(
        "{} samples taken, {} skipped, {} resumed",
        report.samples_taken, report.samples_skipped, report.resumed_entries
    );
    if let Some(summary) = report.table.summary() {
        println!("{summary}");
    }
    if !report.target_reached {
        warn!("calibration ended before reaching the far end of the lens");
    }
    println!("saved to {}", output.display());
    Ok(())
}

async fn calibrate_zoom(camera: Arc<dyn CameraControl>, options: ZoomSweepOptions) -> Result<()> {
    let output = options.output.clone();
    let drive = Arc::new(CameraZoomDrive::new(camera.clone()));
    let lut = ZoomLutBuilder::new(camera, drive, options)
        .with_cancel(interrupt_token())
        .build()
        .await?;
    for group in lut.groups() {
        if let Some(stats) = group.stats() {
            println!("{stats}");
        }
    }
    println!("{} entries saved to {}", lut.len(), output.display());
    Ok(())
}

fn load_table(path: &Path) -> Result<CalibrationTable> {
    CalibrationTable::load(path)?.with_context(|| format!("{} does not exist", path.display()))
}

fn inspect(path: PathBuf) -> Result<()> {
    let table = load_table(&path)?;
    println!("{} ({}, version {})", path.display(), table.camera_model, table.version);
    match table.summary() {
        Some(summary) => println!("{summary}"),
        None => println!("empty table"),
    }
    if !table.is_strictly_ascending() {
        warn!("table is not strictly ascending by normalised value");
    }
    Ok(())
}

fn inspect_zoom(path: PathBuf) -> Result<()> {
    let lut = ZoomLut::load(&path)?.with_context(|| format!("{} does not exist", path.display()))?;
    println!(
        "{}: {} entries, generated {}",
        path.display(),
        lut.len(),
        lut.generated_at.as_deref().unwrap_or("unknown")
    );
    for group in lut.groups() {
        if let Some(stats) = group.stats() {
            println!("  {stats}");
        }
    }
    Ok(())
}

fn lookup(path: PathBuf, normalised: Option<f64>, meters: Option<f64>) -> Result<()> {
    let table = load_table(&path)?;
    match (normalised, meters) {
        (Some(n), _) => match table.distance_at(n) {
            Some(m) => println!("normalised {n:.4} -> {m:.3} m"),
            None => bail!("table is empty"),
        },
        (None, Some(m)) => match table.normalised_for(m) {
            Some(n) => println!("{m:.3} m -> normalised {n:.4}"),
            None => bail!("table is empty"),
        },
        (None, None) => bail!("pass --normalised or --meters"),
    }
    Ok(())
}

struct PrintObserver;

impl StateObserver for PrintObserver {
    fn on_parameter(&self, name: &str, value: &Value) {
        println!("{name:<12} {value}");
    }

    fn on_connection(&self, connected: bool, message: &str) {
        println!("[{}] {message}", if connected { "online" } else { "offline" });
    }
}

async fn monitor(camera: Arc<dyn CameraControl>, config: &LensConfig, watch_target: bool) -> Result<()> {
    let session = LensSession::new(camera);
    let monitor = session.start_monitoring(config, watch_target)?;
    let observer = spawn_observer(&session.sync(), Arc::new(PrintObserver), monitor.cancel_token());

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");
    monitor.shutdown().await;
    let _ = observer.await;
    Ok(())
}
