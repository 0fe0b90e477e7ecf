//! Gateway and client errors.

use ferry_core::TransferId;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Gateway errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Socket or file I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// Event could not be encoded or decoded
    #[error("event codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Connection closed by the other side
    #[error("connection closed")]
    Closed,

    /// No reply within the configured timeout
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Client has not sent `join` yet
    #[error("client has not joined")]
    NotJoined,

    /// Relay answered with `upload-error`
    #[error("transfer {file_id} rejected: {message}")]
    Rejected {
        /// Transfer id
        file_id: TransferId,
        /// Relay-provided reason
        message: String,
    },
}

/// Result alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
