//! Observer callbacks for parameter and connection changes.
//!
//! Observers receive every change in order but must tolerate duplicates, since
//! the same value may arrive from both the event socket and the poller.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::synchronizer::ParameterSynchronizer;

/// Receives state and connection changes.
pub trait StateObserver: Send + Sync + 'static {
    fn on_parameter(&self, name: &str, value: &Value);

    fn on_connection(&self, _connected: bool, _message: &str) {}
}

/// Forward synchronizer broadcasts to `observer` until cancelled.
///
/// A lagging observer skips the missed changes and keeps going.
pub fn spawn_observer(
    sync: &ParameterSynchronizer,
    observer: Arc<dyn StateObserver>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut changes = sync.subscribe();
    let mut status = sync.subscribe_status();
    tokio::spawn(async move {
        let mut status_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Ok(change) => observer.on_parameter(change.name, &change.value),
                    Err(RecvError::Lagged(missed)) => warn!(missed, "observer lagged, changes skipped"),
                    Err(RecvError::Closed) => break,
                },
                update = status.recv(), if status_open => match update {
                    Ok(update) => observer.on_connection(update.connected, &update.message),
                    Err(RecvError::Lagged(missed)) => warn!(missed, "observer lagged, status skipped"),
                    Err(RecvError::Closed) => status_open = false,
                },
            }
        }
    })
}
