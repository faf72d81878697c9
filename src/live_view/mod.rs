//! Live view transport
//!
//! Push channel from the camera: a WebSocket subscription delivering
//! parameter changes as they happen. The transport owns the socket and the
//! reconnect loop; consumers only see the typed [`TransportEvent`] stream.

pub mod client;
pub mod protocol;
pub mod reconnect;

pub use client::{event_url, spawn, TransportConfig, TransportEvent, TransportHandle};
pub use protocol::{LiveMessage, ParameterUpdate};
pub use reconnect::{ConnectionStatus, ReconnectConfig};
