//! Error types for sqlpilot
//!
//! Centralized error handling using thiserror. Failures inside a conversation
//! turn never surface here; the agent loop classifies them into an
//! [`ErrorKind`](crate::domain::ErrorKind) instead.

use thiserror::Error;

/// Errors raised outside the agent loop (persistence, session bookkeeping)
#[derive(Debug, Error)]
pub enum SqlPilotError {
    /// History persistence error
    #[error("Storage error: {0}")]
    Storage(String),

    /// A turn is already running for this session
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for sqlpilot operations
pub type Result<T> = std::result::Result<T, SqlPilotError>;
