//! Connection status and reconnect policy for the event socket.
//!
//! # State Machine
//!
//! ```text
//!   Connecting ──handshake ok──> Connected
//!       ▲                            │
//!       │                   socket error / close
//!       │                            ▼
//!       └───── delay elapsed ─── Disconnected(reason)
//! ```

use std::time::Duration;

/// Transport connection status, reported to the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// Handshake in progress.
    Connecting,

    /// Socket open and subscribed.
    Connected,

    /// Socket closed or never opened.
    Disconnected {
        /// Why the session ended
        reason: String,
    },
}

impl ConnectionStatus {
    /// Returns true if connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Human-readable message handed to observers.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Connecting => "connecting".to_string(),
            Self::Connected => "connected".to_string(),
            Self::Disconnected { reason } => format!("disconnected: {reason}"),
        }
    }
}

/// Reconnect policy: a fixed pause between sessions, retried until the
/// transport is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Pause after a session ends before the next attempt.
    pub delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(5))
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn fixed(delay: Duration) -> Self {
        Self { delay }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_delay() {
        assert_eq!(ReconnectConfig::default().delay, Duration::from_secs(5));
        assert_eq!(
            ReconnectConfig::fixed(Duration::from_millis(250)).delay,
            Duration::from_millis(250)
        );
    }

    #[test]
    fn test_status_messages() {
        assert!(ConnectionStatus::Connected.is_connected());
        let down = ConnectionStatus::Disconnected {
            reason: "connection reset".into(),
        };
        assert!(!down.is_connected());
        assert_eq!(down.message(), "disconnected: connection reset");
    }
}
