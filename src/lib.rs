//! # Lens Control Library
//!
//! Remote control, live parameter synchronization and focus calibration for
//! networked cinema cameras that expose the `/control/api/v1` REST API and its
//! event WebSocket.
//!
//! ## Crate Structure
//!
//! - **`camera`**: the [`CameraControl`](camera::CameraControl) seam, the REST
//!   client and an in-process mock lens.
//! - **`calibration`**: builds and queries focus lookup tables, both the 1D
//!   normalised→distance table and the zoom-conditioned variant.
//! - **`sync`**: the parameter state synchronizer, fed by pushed events and a
//!   polling fallback, with observer fan-out.
//! - **`live_view`**: the event socket transport with reconnect supervision.
//! - **`sweep`**: timed focus sweeps, finite or ping-pong.
//! - **`watch`**: the focus target file and its watcher.
//! - **`session`**: wires a camera and a synchronizer together and runs the
//!   background tasks.
//! - **`config`**, **`logging`**, **`error`**: ambient configuration, tracing
//!   setup and the crate error type.

pub mod calibration;
pub mod camera;
pub mod config;
pub mod error;
pub mod live_view;
pub mod logging;
pub mod session;
pub mod sweep;
pub mod sync;
pub mod watch;

pub use error::{ErrorKind, LensError, Result};
pub use session::LensSession;
