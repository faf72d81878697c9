//! Polling fallback for cameras whose event socket is silent.
//!
//! After a grace period the poller reads every tracked parameter on a fixed
//! interval and feeds the results through the synchronizer. It exits for good
//! as soon as `events_active` is set, or when cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::UpdateSource;
use super::synchronizer::ParameterSynchronizer;
use crate::camera::{CameraControl, Parameter};
use crate::config::{PollingConfig, MIN_POLL_INTERVAL};

/// Why the poller stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollingExit {
    EventsActive,
    Cancelled,
}

pub struct PollingFallback {
    camera: Arc<dyn CameraControl>,
    sync: Arc<ParameterSynchronizer>,
    interval: Duration,
    start_delay: Duration,
    ticks: Arc<AtomicU64>,
}

impl PollingFallback {
    /// `interval` is clamped to at least 200 ms.
    pub fn new(
        camera: Arc<dyn CameraControl>,
        sync: Arc<ParameterSynchronizer>,
        interval: Duration,
    ) -> Self {
        Self {
            camera,
            sync,
            interval: interval.max(MIN_POLL_INTERVAL),
            start_delay: Duration::ZERO,
            ticks: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(
        camera: Arc<dyn CameraControl>,
        sync: Arc<ParameterSynchronizer>,
        config: &PollingConfig,
    ) -> Self {
        Self::new(camera, sync, config.interval())
            .with_start_delay(Duration::from_millis(config.start_delay_ms))
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Shared counter of completed poll rounds.
    pub fn tick_counter(&self) -> Arc<AtomicU64> {
        self.ticks.clone()
    }

    pub async fn run(self, cancel: CancellationToken) -> PollingExit {
        let mut events = self.sync.events_active_watch();

        if !self.start_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => return PollingExit::Cancelled,
                _ = tokio::time::sleep(self.start_delay) => {}
            }
        }
        if *events.borrow_and_update() {
            debug!("events already active, polling not started");
            return PollingExit::EventsActive;
        }

        info!(interval_ms = self.interval.as_millis() as u64, "polling fallback started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("polling cancelled");
                    return PollingExit::Cancelled;
                }
                changed = events.changed() => {
                    if changed.is_err() || *events.borrow_and_update() {
                        info!(ticks = self.ticks.load(Ordering::Relaxed), "live events active, polling stopped");
                        return PollingExit::EventsActive;
                    }
                }
                _ = ticker.tick() => {
                    if self.poll_once().await {
                        self.ticks.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
    }

    /// One round over every tracked parameter.
    ///
    /// Returns false if the round was abandoned because events became active.
    async fn poll_once(&self) -> bool {
        for parameter in Parameter::ALL {
            if self.sync.events_active() {
                return false;
            }
            match self.camera.read(parameter).await {
                Ok(value) => {
                    // An event may have landed while the read was in flight
                    if self.sync.events_active() {
                        return false;
                    }
                    self.sync.apply(parameter, value, UpdateSource::Poll);
                }
                Err(e) => warn!(parameter = parameter.name(), error = %e, "poll read failed"),
            }
        }
        true
    }
}
