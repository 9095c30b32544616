//! Error types for twsync
//!
//! All errors use thiserror for structured error handling.
//! `CollaboratorError` describes a single failed call into the task manager
//! or the reminders service; `AppError` is what a sync pass can fail with.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of one call into a collaborator (task manager or reminders service)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authorization denied: {0}")]
    Unauthorized(String),

    #[error("Invalid response: {0}")]
    Invalid(String),

    #[error("{0}")]
    Fatal(String),
}

impl CollaboratorError {
    /// Worth retrying at the single-operation level
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transient(_))
    }

    /// Aborts the whole pass
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized(_) | Self::Fatal(_))
    }
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Collaborator error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Sync state at {path:?} is locked by another pass (waited {waited:?})")]
    LockContention { path: PathBuf, waited: Duration },

    #[error("Sync state at {path:?} is unreadable: {reason}")]
    CorruptState { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Errors that abort a pass without persisting anything.
    pub fn is_fatal(&self) -> bool {
        match self {
            AppError::Collaborator(e) => e.is_fatal(),
            AppError::LockContention { .. } => false,
            _ => true,
        }
    }

    /// The pass can simply be attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::LockContention { .. } => true,
            AppError::Collaborator(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_contention_is_retryable_not_fatal() {
        let err = AppError::LockContention {
            path: PathBuf::from("/tmp/sync_state.json"),
            waited: Duration::from_millis(50),
        };
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_collaborator_taxonomy() {
        assert!(CollaboratorError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(CollaboratorError::Unauthorized("denied".into()).is_fatal());
        assert!(!CollaboratorError::NotFound("x".into()).is_fatal());
        assert!(!CollaboratorError::NotFound("x".into()).is_transient());

        let corrupt = AppError::CorruptState {
            path: PathBuf::from("state.json"),
            reason: "bad json".into(),
        };
        assert!(corrupt.is_fatal());
        assert!(!corrupt.is_retryable());
    }

    #[test]
    fn test_serializes_as_message() {
        let err = AppError::Config("max_retries must be a number".into());
        assert_eq!(
            serde_json::to_string(&err).unwrap(),
            "\"Configuration error: max_retries must be a number\""
        );
    }
}
