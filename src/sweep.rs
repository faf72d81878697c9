//! Focus sweeps
//!
//! A sweep walks a normalised parameter (usually focus) from `start` to `end`
//! in `steps` equal intervals, pausing `delay` between setpoints. In infinite
//! mode the direction flips after every pass until cancelled.
//!
//! [`SweepTrajectory`] generates setpoints lazily and can be reset, so the
//! same trajectory can be inspected in tests and replayed by the driver.
//! [`SweepDriver`] issues them against a camera.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::camera::{CameraControl, Parameter};
use crate::error::{LensError, Result};

/// Parameters of one sweep.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepSpec {
    pub start: f64,
    pub end: f64,
    /// Number of intervals; a pass visits `steps + 1` points
    pub steps: u32,
    pub delay: Duration,
    pub infinite: bool,
}

impl SweepSpec {
    /// Finite sweep with the default 100 ms delay.
    pub fn new(start: f64, end: f64, steps: u32) -> Result<Self> {
        let spec = Self {
            start,
            end,
            steps,
            delay: Duration::from_millis(100),
            infinite: false,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Spread one pass over `total`, i.e. `delay = total / steps`.
    pub fn with_duration(mut self, total: Duration) -> Self {
        self.delay = total / self.steps.max(1);
        self
    }

    pub fn infinite(mut self, infinite: bool) -> Self {
        self.infinite = infinite;
        self
    }

    /// Check bounds and step count.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("start", self.start), ("end", self.end)] {
            if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
                return Err(LensError::Validation(format!(
                    "sweep {name} {value} outside [0.0, 1.0]"
                )));
            }
        }
        if self.steps == 0 {
            return Err(LensError::Validation("sweep steps must be > 0".into()));
        }
        Ok(())
    }

    /// Setpoints between progress log lines, about 50 per pass.
    pub fn display_interval(&self) -> u32 {
        (self.steps / 50).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

impl Direction {
    fn flipped(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }
}

/// One point of a trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub value: f64,
    /// Position within the pass, `0..=steps`
    pub index: u32,
    /// Pass number, starting at 0
    pub pass: u64,
    pub direction: Direction,
    /// Last point of a finite sweep
    pub is_final: bool,
}

/// Lazy setpoint generator for a [`SweepSpec`].
#[derive(Debug, Clone)]
pub struct SweepTrajectory {
    spec: SweepSpec,
    index: u32,
    pass: u64,
    direction: Direction,
    done: bool,
}

impl SweepTrajectory {
    pub fn new(spec: SweepSpec) -> Self {
        Self {
            spec,
            index: 0,
            pass: 0,
            direction: Direction::Forward,
            done: false,
        }
    }

    pub fn spec(&self) -> &SweepSpec {
        &self.spec
    }

    /// Points in a finite sweep, `None` when infinite.
    pub fn num_points(&self) -> Option<usize> {
        (!self.spec.infinite).then(|| self.spec.steps as usize + 1)
    }

    /// Value at position `i` of a pass in `direction`.
    pub fn value_at(&self, i: u32, direction: Direction) -> f64 {
        let (start, end) = (self.spec.start, self.spec.end);
        let fraction = f64::from(i) / f64::from(self.spec.steps);
        match direction {
            Direction::Forward => start + (end - start) * fraction,
            Direction::Reverse => end - (end - start) * fraction,
        }
    }

    /// Produce the next setpoint, or `None` once a finite sweep is done.
    pub fn next_setpoint(&mut self) -> Option<Setpoint> {
        if self.done {
            return None;
        }
        let steps = self.spec.steps;
        let setpoint = Setpoint {
            value: self.value_at(self.index, self.direction),
            index: self.index,
            pass: self.pass,
            direction: self.direction,
            is_final: !self.spec.infinite && self.index == steps,
        };

        if self.index < steps {
            self.index += 1;
        } else if self.spec.infinite {
            self.index = 0;
            self.pass += 1;
            self.direction = self.direction.flipped();
        } else {
            self.done = true;
        }
        Some(setpoint)
    }

    /// Rewind to the first forward point.
    pub fn reset(&mut self) {
        self.index = 0;
        self.pass = 0;
        self.direction = Direction::Forward;
        self.done = false;
    }
}

impl Iterator for SweepTrajectory {
    type Item = Setpoint;

    fn next(&mut self) -> Option<Setpoint> {
        self.next_setpoint()
    }
}

/// How a sweep ended, when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepOutcome {
    /// Every setpoint of a finite sweep was issued.
    Completed { setpoints: u64 },
    /// Stopped by the cancellation token; the parameter stays at `last_value`.
    Cancelled {
        setpoints: u64,
        last_value: Option<f64>,
    },
}

/// Issues a trajectory against one normalised parameter.
pub struct SweepDriver {
    camera: Arc<dyn CameraControl>,
    parameter: Parameter,
}

impl SweepDriver {
    /// Driver for the focus position
    pub fn new(camera: Arc<dyn CameraControl>) -> Self {
        Self::for_parameter(camera, Parameter::Focus)
    }

    /// Driver for any normalised parameter (focus, iris, zoom)
    pub fn for_parameter(camera: Arc<dyn CameraControl>, parameter: Parameter) -> Self {
        Self { camera, parameter }
    }

    /// Run `spec` until it completes, fails, or `cancel` fires.
    ///
    /// The first failed write aborts the sweep with
    /// [`LensError::SweepAborted`].
    pub async fn run(&self, spec: &SweepSpec, cancel: CancellationToken) -> Result<SweepOutcome> {
        spec.validate()?;
        if !self.parameter.is_normalised() {
            return Err(LensError::Validation(format!(
                "cannot sweep {}",
                self.parameter
            )));
        }

        let display_interval = spec.display_interval();
        info!(
            parameter = %self.parameter,
            start = spec.start,
            end = spec.end,
            steps = spec.steps,
            delay_ms = spec.delay.as_millis() as u64,
            infinite = spec.infinite,
            "sweep started"
        );

        let mut trajectory = SweepTrajectory::new(spec.clone());
        let mut issued = 0u64;
        let mut last_value = None;

        while let Some(setpoint) = trajectory.next_setpoint() {
            if cancel.is_cancelled() {
                info!(issued, ?last_value, "sweep cancelled");
                return Ok(SweepOutcome::Cancelled {
                    setpoints: issued,
                    last_value,
                });
            }

            self.camera
                .set_normalised(self.parameter, setpoint.value)
                .await
                .map_err(|e| LensError::SweepAborted {
                    step: issued,
                    source: Box::new(e),
                })?;
            issued += 1;
            last_value = Some(setpoint.value);

            if setpoint.index % display_interval == 0 || setpoint.index == spec.steps {
                info!(
                    pass = setpoint.pass,
                    step = setpoint.index,
                    of = spec.steps,
                    value = setpoint.value,
                    "sweep progress"
                );
            } else {
                debug!(value = setpoint.value, "setpoint");
            }

            if setpoint.is_final {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(issued, ?last_value, "sweep cancelled");
                    return Ok(SweepOutcome::Cancelled { setpoints: issued, last_value });
                }
                _ = tokio::time::sleep(spec.delay) => {}
            }
        }

        info!(issued, "sweep completed");
        Ok(SweepOutcome::Completed { setpoints: issued })
    }
}
