//! Phased focus-distance sweep that fills a [`CalibrationTable`].
//!
//! The sweep runs in three phases of decreasing resolution:
//!
//! | Phase    | Range               | Resolution                     |
//! |----------|---------------------|--------------------------------|
//! | fine     | 10 cm ..= 500 cm    | 1 cm                           |
//! | medium   | 500 cm <.. 2000 cm  | `step_cm` (10 cm)              |
//! | extended | > 2000 cm           | 20 cm, 50 cm after 200 samples |
//!
//! Generation stops as soon as a sample reads back at or above the target
//! normalised position (0.98), in any phase. An existing table at the output
//! path is the resume point; see [`plan_resume`].
//!
//! Only the initial connectivity check and file I/O are fatal. A failed
//! sample is logged and its distance skipped.

use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::sample_distance;
use super::table::{CalibrationPoint, CalibrationTable};
use crate::camera::CameraControl;
use crate::config::CalibrationConfig;
use crate::error::{LensError, Result};

/// No focus distance below this is ever commanded.
pub const MIN_SAMPLE_CM: u32 = 10;
/// Last distance of the fine phase.
pub const FINE_END_CM: u32 = 500;
/// Last distance of the medium phase.
pub const MEDIUM_END_CM: u32 = 2000;
/// A table whose last sample is this close to [`MEDIUM_END_CM`] resumes in
/// the extended phase.
pub const RESUME_MARGIN_CM: u32 = 10;
/// Initial extended-phase resolution.
pub const EXTENDED_STEP_CM: u32 = 20;
/// Extended-phase resolution once escalated.
pub const EXTENDED_COARSE_STEP_CM: u32 = 50;
/// Extended-phase samples taken before switching to the coarse step.
pub const EXTENDED_ESCALATE_AFTER: usize = 200;

/// Parameters of one calibration run.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub min_distance_cm: u32,
    /// Upper bound of the fine and medium phases. The extended phase only
    /// runs when this reaches [`MEDIUM_END_CM`].
    pub max_distance_cm: u32,
    /// Medium-phase resolution
    pub step_cm: u32,
    pub settle_delay: Duration,
    pub output: PathBuf,
    /// Model tag for a freshly created table
    pub camera_model: String,
    pub target_normalised: f64,
    /// The extended phase gives up past this distance
    pub extended_ceiling_cm: u32,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&CalibrationConfig::default())
    }
}

impl From<&CalibrationConfig> for BuildOptions {
    fn from(config: &CalibrationConfig) -> Self {
        Self {
            min_distance_cm: config.min_cm,
            max_distance_cm: config.max_cm,
            step_cm: config.step_cm.max(1),
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            output: config.output.clone(),
            camera_model: config.camera_model.clone(),
            target_normalised: config.target_normalised,
            extended_ceiling_cm: config.extended_ceiling_cm,
        }
    }
}

/// Where a run picks up, decided from the loaded table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumePlan {
    /// The table already reaches the target; nothing to sample.
    Complete,
    /// Skip straight to the extended phase.
    Extended { from_cm: u32 },
    /// Sample the fine and medium phases, skipping covered distances.
    Initial,
}

/// Decide how to continue from `table`.
///
/// Looks only at the last entry: at or above `target` the table is
/// complete; within [`RESUME_MARGIN_CM`] of [`MEDIUM_END_CM`] the sweep
/// continues 20 cm past it; anything else regenerates the first two phases.
pub fn plan_resume(table: &CalibrationTable, target: f64) -> ResumePlan {
    match table.last() {
        None => ResumePlan::Initial,
        Some(last) if last.normalised >= target => ResumePlan::Complete,
        Some(last) if last.distance_cm().saturating_add(RESUME_MARGIN_CM) >= MEDIUM_END_CM => {
            ResumePlan::Extended {
                from_cm: last.distance_cm().saturating_add(EXTENDED_STEP_CM),
            }
        }
        Some(_) => ResumePlan::Initial,
    }
}

/// Fine and medium distances in `[min_cm, max_cm]`, ascending, minus those
/// already covered.
pub fn initial_candidates(
    min_cm: u32,
    max_cm: u32,
    step_cm: u32,
    covered: &HashSet<u32>,
) -> Vec<u32> {
    let start = min_cm.max(MIN_SAMPLE_CM);
    let fine = start..=FINE_END_CM.min(max_cm);
    let medium = (FINE_END_CM + step_cm..=MEDIUM_END_CM.min(max_cm))
        .step_by(step_cm.max(1) as usize)
        .filter(|cm| *cm >= start);

    fine.chain(medium)
        .filter(|cm| !covered.contains(cm))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// What a run did, alongside the resulting table.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub table: CalibrationTable,
    pub plan: ResumePlan,
    /// Entries present before this run
    pub resumed_entries: usize,
    pub samples_taken: usize,
    pub samples_skipped: usize,
    pub target_reached: bool,
    pub cancelled: bool,
}

/// Drives the camera through the distance phases and persists the table.
pub struct CalibrationBuilder {
    camera: Arc<dyn CameraControl>,
    options: BuildOptions,
    cancel: CancellationToken,
}

#[derive(Default)]
struct Progress {
    taken: usize,
    skipped: usize,
    reached: bool,
}

impl CalibrationBuilder {
    pub fn new(camera: Arc<dyn CameraControl>, options: BuildOptions) -> Self {
        Self {
            camera,
            options,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop sampling when `cancel` fires; the partial table is still saved.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Run the sweep and return the persisted table.
    pub async fn build(&self) -> Result<CalibrationTable> {
        Ok(self.run().await?.table)
    }

    /// Run the sweep and return the table together with run statistics.
    pub async fn run(&self) -> Result<BuildReport> {
        let opts = &self.options;

        // Fail before touching the lens if the camera is not answering
        let start = self.camera.focus().await.map_err(|e| {
            LensError::Connectivity(format!("initial focus read failed: {e}"))
        })?;
        info!(normalised = start.normalised, "camera reachable");

        let mut table = CalibrationTable::load_or_new(&opts.output, &opts.camera_model);
        let resumed_entries = table.len();
        let plan = plan_resume(&table, opts.target_normalised);
        info!(
            entries = resumed_entries,
            ?plan,
            output = %opts.output.display(),
            "starting calibration"
        );

        let mut progress = Progress::default();
        match plan {
            ResumePlan::Complete => {
                info!("table already reaches target, nothing to sample");
                progress.reached = true;
            }
            ResumePlan::Extended { from_cm } => {
                self.extended_phase(from_cm, &mut table, &mut progress).await;
            }
            ResumePlan::Initial => {
                let candidates = initial_candidates(
                    opts.min_distance_cm,
                    opts.max_distance_cm,
                    opts.step_cm,
                    &table.covered_distances_cm(),
                );
                info!(distances = candidates.len(), "fine and medium phases");
                for cm in candidates {
                    if self.cancel.is_cancelled() || progress.reached {
                        break;
                    }
                    self.sample(cm, &mut table, &mut progress).await;
                }
                if !progress.reached
                    && !self.cancel.is_cancelled()
                    && opts.max_distance_cm >= MEDIUM_END_CM
                {
                    self.extended_phase(MEDIUM_END_CM + EXTENDED_STEP_CM, &mut table, &mut progress)
                        .await;
                }
            }
        }

        table.sort_and_dedupe();
        table.save(&opts.output)?;

        let cancelled = self.cancel.is_cancelled();
        if let Some(summary) = table.summary() {
            info!(%summary, taken = progress.taken, skipped = progress.skipped, cancelled, "calibration saved");
        } else {
            warn!("calibration produced no entries");
        }

        Ok(BuildReport {
            table,
            plan,
            resumed_entries,
            samples_taken: progress.taken,
            samples_skipped: progress.skipped,
            target_reached: progress.reached,
            cancelled,
        })
    }

    async fn extended_phase(
        &self,
        from_cm: u32,
        table: &mut CalibrationTable,
        progress: &mut Progress,
    ) {
        let ceiling = self.options.extended_ceiling_cm;
        info!(from_cm, ceiling, "extended phase");

        let mut cm = from_cm;
        let mut extended_samples = 0usize;
        let mut coarse = false;
        while cm <= ceiling && !progress.reached && !self.cancel.is_cancelled() {
            if self.sample(cm, table, progress).await {
                extended_samples += 1;
            }
            // Steps widen only once more than EXTENDED_ESCALATE_AFTER samples are in
            if !coarse && extended_samples > EXTENDED_ESCALATE_AFTER {
                coarse = true;
                info!(
                    cm,
                    step_cm = EXTENDED_COARSE_STEP_CM,
                    "target not reached yet, coarsening extended step"
                );
            }
            let step = if coarse {
                EXTENDED_COARSE_STEP_CM
            } else {
                EXTENDED_STEP_CM
            };
            match cm.checked_add(step) {
                Some(next) => cm = next,
                None => break,
            }
        }

        if !progress.reached && !self.cancel.is_cancelled() {
            warn!(ceiling, last_cm = cm, "extended phase hit its ceiling without reaching target");
        }
    }

    /// Take one sample; returns whether it succeeded.
    async fn sample(&self, cm: u32, table: &mut CalibrationTable, progress: &mut Progress) -> bool {
        match sample_distance(self.camera.as_ref(), cm, self.options.settle_delay).await {
            Ok(normalised) => {
                table.lut.push(CalibrationPoint::from_sample(cm, normalised));
                progress.taken += 1;
                info!(distance_cm = cm, normalised, "sampled");
                if normalised >= self.options.target_normalised {
                    info!(distance_cm = cm, normalised, "target reached");
                    progress.reached = true;
                }
                true
            }
            Err(e) => {
                progress.skipped += 1;
                warn!(error = %e, "skipping distance");
                false
            }
        }
    }
}
