//! Error types for the transfer engine.
//!
//! The primary error type is `EngineError`. Job-level failures travel through
//! the scheduler and are aggregated; invocation-level failures (bad arguments,
//! unusable configuration) abort before any scheduling begins and are never
//! retried.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by planning, scheduling, reconciliation and the collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Source or destination path is missing
    #[error("path not found: {path}")]
    NotFound { path: String },

    /// Destination exists and the caller has to decide what happens to it
    #[error("destination already exists: {path}")]
    Conflict { path: String },

    /// Local or remote read/write failure
    #[error("{op} failed for {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Checksum of the copied bytes does not match the declared one
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// A resumable transfer stopped before completion; its marker is left behind
    #[error("transfer of {path} interrupted at byte {offset}")]
    TransferInterrupted { path: String, offset: u64 },

    /// Malformed command input
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// A job's callback panicked; the scheduler contained it
    #[error("job {key} panicked")]
    Panicked { key: String },

    /// A worker or aggregator thread could not be started
    #[error("failed to start thread: {0}")]
    Spawn(#[source] io::Error),

    /// Configuration could not be loaded or is incomplete
    #[error("configuration error: {0}")]
    Config(String),

    /// Several jobs failed; `first` is the earliest failure observed
    #[error("{failed} job(s) failed, first error: {first}")]
    Aggregate {
        first: Box<EngineError>,
        failed: usize,
    },
}

impl EngineError {
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Maps a local io error onto `NotFound` when the path is simply absent.
    pub fn from_io(op: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                path: path.display().to_string(),
            }
        } else {
            Self::io(op, path, source)
        }
    }

    /// Invocation-level errors are deterministic; re-running cannot fix them.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidArguments(_) | Self::Config(_) => false,
            Self::Aggregate { first, .. } => first.is_retryable(),
            _ => true,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io { source, .. } => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Extract the OS error code from this error, if available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Self::Io { source, .. } | Self::Spawn(source) => source.raw_os_error(),
            Self::Aggregate { first, .. } => first.raw_os_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_arguments_not_retryable() {
        assert!(!EngineError::InvalidArguments("x".into()).is_retryable());
        assert!(!EngineError::Config("x".into()).is_retryable());
        assert!(EngineError::not_found("/a").is_retryable());
    }

    #[test]
    fn test_aggregate_inherits_retryability() {
        let err = EngineError::Aggregate {
            first: Box::new(EngineError::InvalidArguments("bad".into())),
            failed: 3,
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "3 job(s) failed, first error: invalid arguments: bad"
        );
    }

    #[test]
    fn test_from_io_maps_not_found() {
        let err = EngineError::from_io(
            "stat",
            "/nope",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, EngineError::NotFound { .. }));

        let err = EngineError::from_io(
            "stat",
            "/nope",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(matches!(err, EngineError::Io { op: "stat", .. }));
        assert!(!err.is_not_found());
    }
}
