//! Sync error handling
//!
//! Typed errors for the transport, REST and engine layers, with a
//! classification of which failures are worth retrying.

use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::models::ResourceKey;

/// Errors that can occur while mirroring resources
#[derive(Error, Debug)]
pub enum SyncError {
    /// WebSocket connection or protocol failure
    #[error("Realtime connection error: {0}")]
    Transport(#[from] tungstenite::Error),

    /// HTTP request failed before a response was received
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status code
    #[error("Server returned {status} for '{url}'")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// Response or message body was not the expected JSON
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Server has no such resource
    #[error("Resource not found: {key}")]
    NotFound { key: ResourceKey },

    /// A configured URL could not be used
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// Operation did not complete in time
    #[error("Operation timed out")]
    Timeout,

    /// The transport task is no longer running
    #[error("Realtime transport has stopped")]
    TransportStopped,

    /// The engine task is no longer running
    #[error("Sync engine has stopped")]
    EngineStopped,
}

impl SyncError {
    /// Check if retrying the failed operation may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport(_) | SyncError::Timeout => true,
            SyncError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SyncError::Status { status, .. } => status.is_server_error(),
            SyncError::Json(_)
            | SyncError::NotFound { .. }
            | SyncError::InvalidUrl { .. }
            | SyncError::TransportStopped
            | SyncError::EngineStopped => false,
        }
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = SyncError::Status {
            url: "http://localhost:5001/power/".to_string(),
            status: reqwest::StatusCode::BAD_GATEWAY,
        };
        assert!(err.is_retryable());

        let err = SyncError::Status {
            url: "http://localhost:5001/power/".to_string(),
            status: reqwest::StatusCode::NOT_FOUND,
        };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_non_retryable() {
        assert!(SyncError::Timeout.is_retryable());
        assert!(!SyncError::EngineStopped.is_retryable());

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(!SyncError::from(json_err).is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::Status {
            url: "http://localhost:5001/todo_list/".to_string(),
            status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
        };
        let msg = err.to_string();
        assert!(msg.contains("500"));
        assert!(msg.contains("/todo_list/"));

        let err = SyncError::InvalidUrl {
            url: "ftp://x".to_string(),
            reason: "unsupported scheme".to_string(),
        };
        assert!(err.to_string().contains("unsupported scheme"));
    }
}
