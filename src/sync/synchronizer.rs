//! Merges pushed events and polled reads into one parameter state.
//!
//! # Update path
//!
//! ```text
//!  transport ──TransportEvent──> run_event_pump ──┐
//!                                                  ├──> apply() ──> ParameterState
//!  PollingFallback ──────────────────────────────-┘         │
//!                                                            └──> broadcast StateChange
//! ```
//!
//! Every writer goes through [`ParameterSynchronizer::apply`], which holds one
//! lock for the write and the broadcast, so observers see changes in the
//! order the state saw them. The first event-sourced update latches
//! `events_active`, which stops the polling fallback for good.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use super::state::{ParameterEntry, ParameterState, UpdateSource};
use crate::camera::{Parameter, ParameterValue};
use crate::live_view::{ConnectionStatus, TransportEvent};

const BROADCAST_CAPACITY: usize = 1024;

/// A parameter change, as handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub parameter: Parameter,
    /// Observer-facing name, e.g. `focus` or `focusAssist`
    pub name: &'static str,
    pub value: Value,
    pub source: UpdateSource,
    pub timestamp: DateTime<Utc>,
}

/// A transport status change, as handed to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub connected: bool,
    pub message: String,
}

impl From<&ConnectionStatus> for StatusChange {
    fn from(status: &ConnectionStatus) -> Self {
        Self {
            connected: status.is_connected(),
            message: status.message(),
        }
    }
}

/// Shared parameter state with change notification.
pub struct ParameterSynchronizer {
    state: Mutex<ParameterState>,
    events_active: AtomicBool,
    events_active_tx: watch::Sender<bool>,
    changes: broadcast::Sender<StateChange>,
    status_tx: broadcast::Sender<StatusChange>,
    connection: Mutex<ConnectionStatus>,
}

impl Default for ParameterSynchronizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ParameterSynchronizer {
    pub fn new() -> Self {
        let (events_active_tx, _) = watch::channel(false);
        let (changes, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            state: Mutex::new(ParameterState::new()),
            events_active: AtomicBool::new(false),
            events_active_tx,
            changes,
            status_tx,
            connection: Mutex::new(ConnectionStatus::Disconnected {
                reason: "not started".into(),
            }),
        }
    }

    /// Record a new value for `parameter` and notify observers.
    ///
    /// Always overwrites; there is no ordering between sources.
    pub fn apply(
        &self,
        parameter: Parameter,
        value: ParameterValue,
        source: UpdateSource,
    ) -> ParameterEntry {
        let mut state = self.state.lock();
        let entry = state.update(parameter, value, source);

        if source == UpdateSource::Event && !self.events_active.swap(true, Ordering::SeqCst) {
            info!(parameter = parameter.name(), "live events active, polling no longer needed");
            self.events_active_tx.send_replace(true);
        }

        debug!(parameter = parameter.name(), value = %entry.value, %source, "parameter updated");
        // No receivers is fine
        let _ = self.changes.send(StateChange {
            parameter,
            name: parameter.name(),
            value: entry.value.to_json(),
            source,
            timestamp: entry.updated_at,
        });
        drop(state);
        entry
    }

    /// Latest entry for `parameter`, if known.
    pub fn get(&self, parameter: Parameter) -> Option<ParameterEntry> {
        self.state.lock().get(parameter).cloned()
    }

    /// Copy of the whole state.
    pub fn snapshot(&self) -> ParameterState {
        self.state.lock().clone()
    }

    pub fn events_active(&self) -> bool {
        self.events_active.load(Ordering::SeqCst)
    }

    /// Watch that flips to `true` on the first event-sourced update.
    pub fn events_active_watch(&self) -> watch::Receiver<bool> {
        self.events_active_tx.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusChange> {
        self.status_tx.subscribe()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connection.lock().clone()
    }

    /// Record a transport status change. Does not touch parameter state.
    pub fn set_connection_status(&self, status: ConnectionStatus) {
        let mut current = self.connection.lock();
        if *current == status {
            return;
        }
        info!(status = %status.message(), "transport status changed");
        let _ = self.status_tx.send(StatusChange::from(&status));
        *current = status;
    }

    /// Drain transport events into the state until the channel closes.
    pub async fn run_event_pump(self: Arc<Self>, mut rx: mpsc::Receiver<TransportEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                TransportEvent::Parameter(update) => {
                    self.apply(update.parameter, update.value, UpdateSource::Event);
                }
                TransportEvent::Status(status) => self.set_connection_status(status),
            }
        }
        debug!("event pump finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::FocusState;
    use crate::live_view::ParameterUpdate;

    fn focus(n: f64) -> ParameterValue {
        ParameterValue::Focus(FocusState { normalised: n })
    }

    #[test]
    fn test_poll_updates_leave_events_inactive() {
        let sync = ParameterSynchronizer::new();
        sync.apply(Parameter::Focus, focus(0.3), UpdateSource::Poll);
        assert!(!sync.events_active());
        assert!(!*sync.events_active_watch().borrow());
    }

    #[test]
    fn test_first_event_latches_events_active() {
        let sync = ParameterSynchronizer::new();
        let watch = sync.events_active_watch();
        sync.apply(Parameter::Focus, focus(0.3), UpdateSource::Event);
        assert!(sync.events_active());
        assert!(*watch.borrow());

        sync.apply(Parameter::Focus, focus(0.4), UpdateSource::Poll);
        assert!(sync.events_active());
        assert_eq!(sync.get(Parameter::Focus).unwrap().value, focus(0.4));
    }

    #[test]
    fn test_every_update_is_broadcast() {
        let sync = ParameterSynchronizer::new();
        let mut rx = sync.subscribe();
        sync.apply(Parameter::Focus, focus(0.5), UpdateSource::Poll);
        sync.apply(Parameter::Focus, focus(0.5), UpdateSource::Poll);

        let first = rx.try_recv().unwrap();
        assert_eq!(first.name, "focus");
        assert_eq!(first.value, serde_json::json!({"normalised": 0.5}));
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_status_does_not_touch_parameters() {
        let sync = ParameterSynchronizer::new();
        let mut rx = sync.subscribe_status();
        sync.set_connection_status(ConnectionStatus::Connected);
        sync.set_connection_status(ConnectionStatus::Connected);

        assert_eq!(
            rx.try_recv().unwrap(),
            StatusChange {
                connected: true,
                message: "connected".into()
            }
        );
        assert!(rx.try_recv().is_err());
        assert!(!sync.events_active());
        assert!(sync.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_event_pump_applies_transport_events() {
        let sync = Arc::new(ParameterSynchronizer::new());
        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(sync.clone().run_event_pump(rx));

        tx.send(TransportEvent::Status(ConnectionStatus::Connected))
            .await
            .unwrap();
        tx.send(TransportEvent::Parameter(ParameterUpdate {
            parameter: Parameter::Focus,
            value: focus(0.8),
        }))
        .await
        .unwrap();
        drop(tx);
        pump.await.unwrap();

        assert!(sync.connection_status().is_connected());
        assert!(sync.events_active());
        let entry = sync.get(Parameter::Focus).unwrap();
        assert_eq!(entry.value, focus(0.8));
        assert_eq!(entry.source, UpdateSource::Event);
        assert!(sync.get(Parameter::Zoom).is_none());
    }
}
