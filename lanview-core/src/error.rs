//! Domain-specific error types for the lanview control plane.
//!
//! Every fallible operation returns `Result<T, RemoteError>`. Which
//! variants are fatal depends on where they surface: a transport error
//! ends one session, a collaborator error only skips a tick or an
//! input action, and a bind error is the only thing that stops the
//! process.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for lanview.
#[derive(Debug, Error)]
pub enum RemoteError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// An inbound message could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Encoding of an outbound message failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    // ── Transport Errors ─────────────────────────────────────────
    /// The socket layer reported an error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The WebSocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer went away or the outbound channel was dropped.
    #[error("transport closed")]
    TransportClosed,

    /// An outbound message did not drain within the send deadline.
    #[error("send stalled for {0:?}")]
    SendTimeout(Duration),

    /// A listening socket could not be bound at startup.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // ── Collaborator Errors ──────────────────────────────────────
    /// The capture provider could not produce a bitmap.
    #[error("capture failed: {0}")]
    Capture(String),

    /// The encoder rejected the bitmap.
    #[error("encode failed: {0}")]
    Encode(String),

    /// The input actuator could not perform the action.
    #[error("input injection failed: {0}")]
    Input(String),

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Registry Errors ──────────────────────────────────────────
    /// A session with the same id is already registered.
    #[error("duplicate session id: {0}")]
    DuplicateSession(String),

    /// The server is shutting down and accepts no new sessions.
    #[error("server shutting down")]
    ShuttingDown,

    /// The configured connection ceiling has been reached.
    #[error("session limit reached ({limit})")]
    CapacityReached { limit: usize },

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

impl RemoteError {
    /// Whether this error ends the session it happened in.
    ///
    /// Only transport-level failures are fatal; everything a
    /// collaborator or a client payload can produce is contained.
    pub fn is_fatal_for_session(&self) -> bool {
        matches!(
            self,
            RemoteError::Io(_)
                | RemoteError::WebSocket(_)
                | RemoteError::TransportClosed
                | RemoteError::SendTimeout(_)
        )
    }
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RemoteError {
    fn from(s: String) -> Self {
        RemoteError::Other(s)
    }
}

impl From<&str> for RemoteError {
    fn from(s: &str) -> Self {
        RemoteError::Other(s.to_string())
    }
}

impl From<serde_json::Error> for RemoteError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            RemoteError::Malformed(e.to_string())
        } else {
            RemoteError::Encoding(e.to_string())
        }
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RemoteError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RemoteError::TransportClosed
    }
}
