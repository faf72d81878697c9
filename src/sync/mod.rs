//! Parameter state synchronization
//!
//! Keeps one authoritative view of the camera's parameters, fed by two
//! channels: pushed events from the live view transport and a polling
//! fallback that runs only until the first event arrives.

pub mod observer;
pub mod polling;
pub mod state;
pub mod synchronizer;

pub use observer::{spawn_observer, StateObserver};
pub use polling::{PollingExit, PollingFallback};
pub use state::{ParameterEntry, ParameterState, UpdateSource};
pub use synchronizer::{ParameterSynchronizer, StateChange, StatusChange};
