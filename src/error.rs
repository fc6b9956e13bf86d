//! Error types for Cadence
//!
//! Defines a comprehensive error enum covering all failure modes across the system.
//! Uses thiserror for ergonomic error handling.

use crate::store::retry::{RetryDecision, RetryableError};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, CadenceError>;

/// Comprehensive error type for Cadence operations
#[derive(Error, Debug)]
pub enum CadenceError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File missing from the mission directory
    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Another writer holds the file lock
    #[error("File lock conflict: {} locked by {holder} until {expires_at}", .path.display())]
    LockConflict {
        path: PathBuf,
        holder: String,
        expires_at: String,
    },

    /// Edit tool reported failure
    #[error("Edit failed: {0}")]
    Edit(String),

    /// Team lifecycle errors
    #[error("Team error: {0}")]
    Team(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Invalid glob in an agent's watch list
    #[error("Glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),

    /// File watcher errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Aider wrapper errors
    #[error("Aider error: {0}")]
    Aider(#[from] aider::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl CadenceError {
    /// Whether the failure is expected to clear up on its own
    ///
    /// Transient errors are folded into an agent's backoff counters; nothing in
    /// the scheduling core treats any error as fatal, so this only shapes logging
    /// and the store's write retries.
    pub fn is_transient(&self) -> bool {
        !matches!(self.retry_decision(), RetryDecision::NoRetry)
    }
}

impl RetryableError for CadenceError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            CadenceError::LockConflict { .. } => RetryDecision::Retry,
            CadenceError::Edit(_) => RetryDecision::Retry,
            CadenceError::Io(e) => match e.kind() {
                ErrorKind::Interrupted
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
                | ErrorKind::PermissionDenied => RetryDecision::Retry,
                _ => RetryDecision::NoRetry,
            },
            CadenceError::Aider(aider::Error::CommandFailed(msg)) => {
                if msg.contains("rate limit") || msg.contains("RateLimit") {
                    RetryDecision::RetryAfter(Duration::from_secs(60))
                } else {
                    RetryDecision::Retry
                }
            }
            CadenceError::Aider(aider::Error::Io(_)) => RetryDecision::Retry,
            CadenceError::Watch(_) => RetryDecision::Retry,
            // Non-retryable errors
            CadenceError::Aider(_) => RetryDecision::NoRetry,
            CadenceError::Config(_) => RetryDecision::NoRetry,
            CadenceError::NotFound(_) => RetryDecision::NoRetry,
            CadenceError::Team(_) => RetryDecision::NoRetry,
            CadenceError::Json(_) => RetryDecision::NoRetry,
            CadenceError::Yaml(_) => RetryDecision::NoRetry,
            CadenceError::Pattern(_) => RetryDecision::NoRetry,
            CadenceError::Other(_) => RetryDecision::NoRetry,
        }
    }
}
