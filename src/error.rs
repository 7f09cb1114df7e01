//! Realtime error types
//!
//! Every failure the connection manager can observe, normalized into the
//! short messages surfaced through `connection_error`.

use std::time::Duration;
use thiserror::Error;

use crate::transport::DisconnectReason;

/// Errors observed by the realtime client
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealtimeError {
    /// No token, or the session is not authenticated. Never surfaced to users.
    #[error("Not authenticated")]
    AuthMissing,

    /// The handshake did not complete within the connect timeout
    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The transport reported a failure while connecting
    #[error("Connection failed: {0}")]
    ConnectError(String),

    /// The connection dropped for a reason other than a deliberate disconnect
    #[error("Connection lost: {0}")]
    UnexpectedDisconnect(DisconnectReason),

    /// The server sent an `error` event on a live connection
    #[error("Server error: {0}")]
    ServerReported(String),

    /// Automatic reconnection gave up
    #[error("Unable to connect after multiple attempts")]
    ReconnectExhausted,
}
