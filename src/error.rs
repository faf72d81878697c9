//! Error types for lens control, calibration and state synchronization.
//!
//! `LensError` is the single error type returned by the library. Built with
//! `thiserror`, it wraps the underlying I/O, JSON, configuration and file-watch
//! errors via `#[from]` so callers can use `?` throughout.
//!
//! ## Error Classification
//!
//! Every error maps to an [`ErrorKind`], which decides how long-running loops
//! react to it:
//!
//! - **`Connectivity`**: the camera could not be reached at the start of a run.
//!   Fatal; the run aborts before any write is issued.
//! - **`TransientSample`**: one calibration sample failed. Logged and skipped.
//! - **`Protocol`**: a response or event was malformed. Logged; no state update.
//! - **`Validation`**: an input was outside its domain (e.g. a normalised value
//!   outside `[0, 1]`). Rejected before any network call.
//! - **`Timeout`** / **`Connection`** / **`Status`**: per-request transport
//!   failures. Retriable.
//! - **`Io`** / **`Config`**: local filesystem and configuration failures.
//!   Terminal for the operation that hit them.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type Result<T> = std::result::Result<T, LensError>;

/// Coarse classification of a [`LensError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connectivity,
    TransientSample,
    Protocol,
    Validation,
    Timeout,
    Connection,
    Status,
    Io,
    Config,
    Aborted,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::TransientSample => "transient_sample",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Validation => "validation",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connection => "connection",
            ErrorKind::Status => "status",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::Aborted => "aborted",
        };
        write!(f, "{}", label)
    }
}

/// Primary error type for the lens control library.
#[derive(Error, Debug)]
pub enum LensError {
    #[error("Camera unreachable: {0}")]
    Connectivity(String),

    #[error("Sample at {distance_cm} cm failed: {source}")]
    TransientSample {
        distance_cm: u32,
        #[source]
        source: Box<LensError>,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid value: {0}")]
    Validation(String),

    #[error("Operation '{operation}' timed out")]
    Timeout { operation: String },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Camera returned HTTP {status} for {operation}")]
    Status { status: u16, operation: String },

    #[error("Sweep aborted at step {step}: {source}")]
    SweepAborted {
        step: u64,
        #[source]
        source: Box<LensError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),
}

impl From<figment::Error> for LensError {
    fn from(err: figment::Error) -> Self {
        LensError::Config(Box::new(err))
    }
}

impl From<reqwest::Error> for LensError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LensError::Timeout {
                operation: err
                    .url()
                    .map(|u| u.path().to_string())
                    .unwrap_or_else(|| "request".into()),
            }
        } else if err.is_decode() {
            LensError::Protocol(err.to_string())
        } else {
            LensError::Connection(err.to_string())
        }
    }
}

impl LensError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LensError::Connectivity(_) => ErrorKind::Connectivity,
            LensError::TransientSample { .. } => ErrorKind::TransientSample,
            LensError::Protocol(_) | LensError::Json(_) => ErrorKind::Protocol,
            LensError::Validation(_) => ErrorKind::Validation,
            LensError::Timeout { .. } => ErrorKind::Timeout,
            LensError::Connection(_) => ErrorKind::Connection,
            LensError::Status { .. } => ErrorKind::Status,
            LensError::SweepAborted { .. } => ErrorKind::Aborted,
            LensError::Io(_) | LensError::Watch(_) => ErrorKind::Io,
            LensError::Config(_) | LensError::Configuration(_) => ErrorKind::Config,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Timeout | ErrorKind::Connection | ErrorKind::Status
        )
    }

    /// Wrap a per-sample failure so it can be logged with its distance.
    pub fn transient_sample(distance_cm: u32, source: LensError) -> Self {
        LensError::TransientSample {
            distance_cm,
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::TransientSample.to_string(), "transient_sample");
        assert_eq!(
            LensError::Validation("focus 1.2".into()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_transient_sample_wraps_source() {
        let err = LensError::transient_sample(
            250,
            LensError::Status {
                status: 500,
                operation: "PUT /lens/focus".into(),
            },
        );
        assert_eq!(err.kind(), ErrorKind::TransientSample);
        assert!(err.to_string().contains("250 cm"));
        assert!(err.to_string().contains("HTTP 500"));
    }

    #[test]
    fn test_retriable_classification() {
        assert!(LensError::Connection("refused".into()).is_retriable());
        assert!(LensError::Timeout {
            operation: "GET /lens/focus".into()
        }
        .is_retriable());
        assert!(!LensError::Validation("bad".into()).is_retriable());
        assert!(!LensError::Connectivity("down".into()).is_retriable());
    }
}
