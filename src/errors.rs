//! Error types for engine operations

use thiserror::Error;

/// Errors that can occur in engine operations
///
/// The taxonomy follows the recovery contract: `Network` is retried
/// locally by the sync managers, everything else propagates to the
/// caller. `Storage` and `Integrity` are fatal for the current
/// operation and are never retried automatically.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A form submission failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// No applier is registered for the submission's event type
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// A conflicting write was detected
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A sync-level downgrade was requested
    #[error("Invalid sync level transition from {from} to {to}")]
    InvalidTransition { from: u8, to: u8 },

    /// Missing or expired token during sync
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Transient transport failure, subject to retry
    #[error("Network error: {0}")]
    Network(String),

    /// Persistence failure, fatal for the current operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Merkle recomputation mismatch on verification
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EngineError::Timeout(err.to_string())
        } else {
            EngineError::Network(err.to_string())
        }
    }
}

impl EngineError {
    /// Whether the sync retry loop may retry after this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Network(_) | EngineError::Timeout(_))
    }
}
