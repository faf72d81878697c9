//! Supervised event socket connection.
//!
//! [`spawn`] starts a background task that connects to the camera's event
//! socket, subscribes to every tracked parameter and forwards decoded
//! changes as [`TransportEvent`]s. When the session drops, the task reports
//! [`ConnectionStatus::Disconnected`], waits out the reconnect delay and
//! tries again until cancelled.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::protocol::{self, LiveMessage, ParameterUpdate};
use super::reconnect::{ConnectionStatus, ReconnectConfig};
use crate::config::{CameraConfig, LiveViewConfig};
use crate::error::{LensError, Result};

const EVENT_PATH: &str = "control/api/v1/event/websocket";
const CHANNEL_CAPACITY: usize = 256;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Something the transport has to report.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Parameter(ParameterUpdate),
    Status(ConnectionStatus),
}

/// Connection settings for the event socket.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub url: Url,
    pub username: String,
    pub password: String,
    pub display: String,
    pub reconnect: ReconnectConfig,
    pub connect_timeout: Duration,
    /// Upper bound on [`TransportHandle::shutdown`].
    pub join_timeout: Duration,
}

impl TransportConfig {
    pub fn from_config(camera: &CameraConfig, live: &LiveViewConfig) -> Result<Self> {
        Ok(Self {
            url: event_url(&camera.base_url)?,
            username: camera.username.clone(),
            password: camera.password.clone(),
            display: camera.display_name.clone(),
            reconnect: ReconnectConfig::fixed(Duration::from_millis(live.reconnect_delay_ms)),
            connect_timeout: Duration::from_millis(live.connect_timeout_ms),
            join_timeout: Duration::from_millis(live.join_timeout_ms),
        })
    }
}

/// Event socket URL for a camera base URL (`http` maps to `ws`, `https` to `wss`).
pub fn event_url(base_url: &str) -> Result<Url> {
    let mut url = Url::parse(base_url)
        .map_err(|e| LensError::Configuration(format!("invalid camera url '{base_url}': {e}")))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(LensError::Configuration(format!(
                "unsupported camera url scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|()| LensError::Configuration(format!("cannot use scheme {scheme} for {base_url}")))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.join(EVENT_PATH)
        .map_err(|e| LensError::Configuration(format!("invalid event url: {e}")))
}

/// Handle to a running transport task.
pub struct TransportHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    join_timeout: Duration,
}

impl TransportHandle {
    /// Stop the transport and wait for the task to finish.
    ///
    /// Returns false if the task had to be aborted after `join_timeout`.
    pub async fn shutdown(self) -> bool {
        self.cancel.cancel();
        let abort = self.task.abort_handle();
        match tokio::time::timeout(self.join_timeout, self.task).await {
            Ok(_) => true,
            Err(_) => {
                warn!(timeout_ms = self.join_timeout.as_millis() as u64, "transport did not stop in time, aborting");
                abort.abort();
                false
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start the transport. It stops when `cancel` fires or the receiver is dropped.
pub fn spawn(
    config: TransportConfig,
    cancel: CancellationToken,
) -> (TransportHandle, mpsc::Receiver<TransportEvent>) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let cancel = cancel.child_token();
    let join_timeout = config.join_timeout;
    let transport = Transport {
        config,
        tx,
        cancel: cancel.clone(),
    };
    let task = tokio::spawn(transport.supervise());
    (
        TransportHandle {
            cancel,
            task,
            join_timeout,
        },
        rx,
    )
}

struct Transport {
    config: TransportConfig,
    tx: mpsc::Sender<TransportEvent>,
    cancel: CancellationToken,
}

impl Transport {
    async fn supervise(self) {
        let mut failures = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            self.emit(ConnectionStatus::Connecting).await;
            info!(url = %self.config.url, "connecting to event socket");

            let result = self.run_session(&mut failures).await;
            if self.cancel.is_cancelled() {
                self.emit(ConnectionStatus::Disconnected {
                    reason: "shutdown".into(),
                })
                .await;
                break;
            }

            let reason = match result {
                Ok(()) => "closed by camera".to_string(),
                Err(e) => e.to_string(),
            };
            warn!(%reason, "event socket disconnected");
            self.emit(ConnectionStatus::Disconnected { reason }).await;

            failures = failures.saturating_add(1);
            let delay = self.config.reconnect.delay;
            debug!(failures, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        debug!("transport stopped");
    }

    async fn run_session(&self, failures: &mut u32) -> Result<()> {
        let request = self.build_request()?;
        let connect = tokio_tungstenite::connect_async(request);
        let (stream, _response) = tokio::select! {
            _ = self.cancel.cancelled() => return Ok(()),
            connected = tokio::time::timeout(self.config.connect_timeout, connect) => connected
                .map_err(|_| LensError::Timeout { operation: "event socket connect".into() })?
                .map_err(|e| LensError::Connection(e.to_string()))?,
        };

        *failures = 0;
        self.emit(ConnectionStatus::Connected).await;
        info!("event socket connected");

        let (mut write, mut read) = stream.split();
        let subscribe = protocol::subscribe_request(&self.config.display);
        write
            .send(Message::Text(subscribe.into()))
            .await
            .map_err(|e| LensError::Connection(format!("subscribe failed: {e}")))?;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = tokio::time::timeout(CLOSE_GRACE, write.close()).await;
                    return Ok(());
                }
                frame = read.next() => match frame {
                    None | Some(Ok(Message::Close(_))) => return Ok(()),
                    Some(Err(e)) => return Err(LensError::Connection(e.to_string())),
                    Some(Ok(Message::Text(text))) => {
                        if !self.handle_text(text.as_str()).await {
                            debug!("event receiver dropped");
                            self.cancel.cancel();
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    fn build_request(
        &self,
    ) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| LensError::Configuration(format!("invalid event url: {e}")))?;
        if !self.config.username.is_empty() {
            let token = STANDARD.encode(format!(
                "{}:{}",
                self.config.username, self.config.password
            ));
            let value = HeaderValue::from_str(&format!("Basic {token}"))
                .map_err(|e| LensError::Configuration(format!("invalid credentials: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }

    /// Returns false once the receiver is gone.
    async fn handle_text(&self, text: &str) -> bool {
        match protocol::decode(text) {
            Ok(LiveMessage::PropertyChanged { property, value }) => {
                match protocol::to_update(&property, value) {
                    Ok(Some(update)) => {
                        return self.tx.send(TransportEvent::Parameter(update)).await.is_ok();
                    }
                    Ok(None) => debug!(%property, "untracked property"),
                    Err(e) => warn!(%property, error = %e, "dropping undecodable value"),
                }
            }
            Ok(LiveMessage::Opened) => debug!("event socket opened"),
            Ok(LiveMessage::Response) => debug!("request acknowledged"),
            Ok(LiveMessage::OtherEvent(action)) => debug!(%action, "ignoring event"),
            Err(e) => warn!(error = %e, "dropping malformed frame"),
        }
        true
    }

    async fn emit(&self, status: ConnectionStatus) {
        let _ = self.tx.send(TransportEvent::Status(status)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_url_schemes() {
        assert_eq!(
            event_url("http://camera.local").unwrap().as_str(),
            "ws://camera.local/control/api/v1/event/websocket"
        );
        assert_eq!(
            event_url("https://10.0.0.5:8443/").unwrap().as_str(),
            "wss://10.0.0.5:8443/control/api/v1/event/websocket"
        );
        assert!(event_url("ftp://camera.local").is_err());
        assert!(event_url("not a url").is_err());
    }

    #[test]
    fn test_config_from_sections() {
        let camera = CameraConfig::default();
        let live = LiveViewConfig::default();
        let config = TransportConfig::from_config(&camera, &live).unwrap();
        assert_eq!(config.url.scheme(), "ws");
        assert_eq!(config.reconnect.delay, Duration::from_secs(5));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));

        let live = LiveViewConfig {
            reconnect_delay_ms: 250,
            ..LiveViewConfig::default()
        };
        let config = TransportConfig::from_config(&camera, &live).unwrap();
        assert_eq!(config.reconnect, ReconnectConfig::fixed(Duration::from_millis(250)));
    }
}
