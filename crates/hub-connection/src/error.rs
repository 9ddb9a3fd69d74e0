//! Error types for the relay link and the command correlator.

use std::time::Duration;

use tokio_tungstenite::tungstenite;

/// Low-level errors from a single WebSocket session.
#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid session request: {0}")]
    Request(String),

    #[error("connection closed")]
    Closed,
}

/// Errors surfaced by [`ConnectionManager`](crate::ConnectionManager).
///
/// Cloneable so that every caller awaiting a shared connect attempt gets
/// the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("could not reach hub relay: {0}")]
    Transport(String),

    #[error("no active hub relay session")]
    NotConnected,

    #[error("connection manager has been disposed")]
    Disposed,

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

impl From<WsError> for ConnectionError {
    fn from(e: WsError) -> Self {
        match e {
            WsError::Closed => ConnectionError::NotConnected,
            WsError::Json(e) => ConnectionError::Encode(e.to_string()),
            other => ConnectionError::Transport(other.to_string()),
        }
    }
}

/// Errors from a correlated command.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("no reply to {request_id} within {after:?}")]
    Timeout { request_id: String, after: Duration },

    #[error("request {request_id} was abandoned")]
    Abandoned { request_id: String },
}

impl CommandError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout { .. })
    }
}
