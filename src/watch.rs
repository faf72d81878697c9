//! Focus target file
//!
//! External tools steer focus by writing `{"target_focus": x}` to a small JSON
//! file. [`TargetWatcher`] watches that file and moves the lens whenever the
//! file is written. Unreadable or out-of-range content is logged and ignored.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::calibration::write_json_atomic;
use crate::camera::{CameraControl, Normalised};
use crate::error::{LensError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct TargetFile {
    target_focus: f64,
}

/// Read the focus target; `Ok(None)` if the file does not exist.
pub fn load_target(path: impl AsRef<Path>) -> Result<Option<Normalised>> {
    let path = path.as_ref();
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let target: TargetFile = serde_json::from_str(&text)?;
    Normalised::new(target.target_focus).map(Some)
}

/// Write the focus target atomically.
pub fn save_target(path: impl AsRef<Path>, target: Normalised) -> Result<()> {
    write_json_atomic(
        path.as_ref(),
        &TargetFile {
            target_focus: target.get(),
        },
    )
}

/// Applies the focus target whenever its file changes.
///
/// Changes are detected by modification time, so rewriting the same target
/// moves the lens back after it was refocused by other means.
pub struct TargetWatcher {
    camera: Arc<dyn CameraControl>,
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl TargetWatcher {
    pub fn new(camera: Arc<dyn CameraControl>, path: impl Into<PathBuf>) -> Self {
        Self {
            camera,
            path: path.into(),
            last_modified: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file and move focus to its target.
    ///
    /// Returns the value written, or `None` if the file does not exist.
    pub async fn apply_current(&self) -> Result<Option<Normalised>> {
        let Some(target) = load_target(&self.path)? else {
            return Ok(None);
        };
        self.camera.set_focus(target).await?;
        info!(target = %target, "focus target applied");
        Ok(Some(target))
    }

    /// Apply the target if the file was written since it was last seen.
    pub async fn apply_if_changed(&mut self) -> Result<Option<Normalised>> {
        let modified = self.modified();
        if modified.is_none() || modified == self.last_modified {
            debug!(path = %self.path.display(), "focus target file unchanged");
            return Ok(None);
        }
        // Recorded first so invalid content is not retried until rewritten
        self.last_modified = modified;
        self.apply_current().await
    }

    /// Take the file as it is now as already applied.
    fn mark_seen(&mut self) {
        self.last_modified = self.modified();
    }

    fn modified(&self) -> Option<SystemTime> {
        std::fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
    }

    /// Watch the file until cancelled.
    ///
    /// The target present at startup is left alone; only later writes move
    /// the lens.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<notify::Result<Event>>(64);
        let mut watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
            let _ = tx.blocking_send(res);
        })?;

        let directory = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        self.mark_seen();
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;
        info!(path = %self.path.display(), "watching focus target file");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(Ok(event)) => {
                        if self.is_relevant(&event) {
                            self.apply_logged().await;
                        }
                    }
                    Some(Err(e)) => warn!(error = %e, "file watcher error"),
                    None => break,
                }
            }
        }
        debug!("target watcher stopped");
        Ok(())
    }

    fn is_relevant(&self, event: &Event) -> bool {
        if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
            return false;
        }
        let Some(name) = self.path.file_name() else {
            return false;
        };
        event.paths.iter().any(|p| p.file_name() == Some(name))
    }

    async fn apply_logged(&mut self) {
        match self.apply_if_changed().await {
            Ok(_) => {}
            Err(e @ (LensError::Json(_) | LensError::Validation(_))) => {
                warn!(path = %self.path.display(), error = %e, "ignoring invalid focus target")
            }
            Err(e) => warn!(error = %e, "failed to apply focus target"),
        }
    }
}
