//! Session wiring
//!
//! A [`LensSession`] bundles the camera and the parameter synchronizer that
//! every front end works against. [`LensSession::start_monitoring`] brings up
//! the background tasks that keep the synchronizer current:
//!
//! - the live view transport and its event pump
//! - the polling fallback, until live events arrive
//! - the focus target file watcher, when enabled
//!
//! All of them stop together through one cancellation token.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::camera::{CameraControl, Parameter};
use crate::config::LensConfig;
use crate::error::Result;
use crate::live_view::{self, TransportConfig, TransportHandle};
use crate::sync::{ParameterSynchronizer, PollingFallback, UpdateSource};
use crate::watch::TargetWatcher;

/// Camera plus its synchronized state.
#[derive(Clone)]
pub struct LensSession {
    camera: Arc<dyn CameraControl>,
    sync: Arc<ParameterSynchronizer>,
}

impl LensSession {
    pub fn new(camera: Arc<dyn CameraControl>) -> Self {
        Self::with_synchronizer(camera, Arc::new(ParameterSynchronizer::new()))
    }

    pub fn with_synchronizer(
        camera: Arc<dyn CameraControl>,
        sync: Arc<ParameterSynchronizer>,
    ) -> Self {
        Self { camera, sync }
    }

    pub fn camera(&self) -> Arc<dyn CameraControl> {
        self.camera.clone()
    }

    pub fn sync(&self) -> Arc<ParameterSynchronizer> {
        self.sync.clone()
    }

    /// Read every tracked parameter once and record the results.
    ///
    /// Returns how many reads succeeded; failures are logged.
    pub async fn refresh(&self) -> usize {
        let mut ok = 0;
        for parameter in Parameter::ALL {
            match self.camera.read(parameter).await {
                Ok(value) => {
                    self.sync.apply(parameter, value, UpdateSource::Poll);
                    ok += 1;
                }
                Err(e) => warn!(parameter = parameter.name(), error = %e, "read failed"),
            }
        }
        ok
    }

    /// Start the background tasks described by `config`.
    pub fn start_monitoring(&self, config: &LensConfig, watch_target: bool) -> Result<Monitor> {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let transport = if config.live_view.enabled {
            let transport_config = TransportConfig::from_config(&config.camera, &config.live_view)?;
            let (handle, events) = live_view::spawn(transport_config, cancel.clone());
            tasks.push(tokio::spawn(self.sync.clone().run_event_pump(events)));
            Some(handle)
        } else {
            info!("live view disabled, relying on polling");
            None
        };

        let poller = PollingFallback::from_config(self.camera.clone(), self.sync.clone(), &config.polling);
        let poll_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            let exit = poller.run(poll_cancel).await;
            debug!(?exit, "polling fallback exited");
        }));

        if watch_target {
            let watcher = TargetWatcher::new(self.camera.clone(), &config.target_file);
            let watch_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = watcher.run(watch_cancel).await {
                    warn!(error = %e, "focus target watcher failed");
                }
            }));
        }

        Ok(Monitor {
            cancel,
            transport,
            tasks,
        })
    }
}

/// Running background tasks of a session.
pub struct Monitor {
    cancel: CancellationToken,
    transport: Option<TransportHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl Monitor {
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every task and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Some(transport) = self.transport {
            transport.shutdown().await;
        }
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "monitor task panicked");
            }
        }
        debug!("monitoring stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::mock::MockCamera;
    use std::time::Duration;

    #[tokio::test]
    async fn test_refresh_populates_every_parameter() {
        let session = LensSession::new(Arc::new(MockCamera::new()));
        assert_eq!(session.refresh().await, Parameter::ALL.len());
        assert_eq!(session.sync().snapshot().len(), Parameter::ALL.len());
        assert!(!session.sync().events_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_without_live_view_polls() {
        let camera = Arc::new(MockCamera::new());
        let session = LensSession::new(camera.clone());
        let mut config = LensConfig::default();
        config.live_view.enabled = false;
        config.polling.start_delay_ms = 0;

        let monitor = session.start_monitoring(&config, false).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(camera.reads() >= Parameter::ALL.len());

        monitor.shutdown().await;
    }
}
