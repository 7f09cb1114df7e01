//! Connection state as observed by consumers

use std::fmt;
use std::time::Duration;

/// Lifecycle state of the realtime connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Transport dial in flight
    Connecting,
    /// Transport open, waiting for the server to accept the token
    Authenticating,
    Connected,
    /// Waiting on a backoff timer
    Reconnecting,
    /// Automatic reconnection gave up; only a manual reconnect leaves this state
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Snapshot published on every state change
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Normalized, user-presentable error message
    pub last_error: Option<String>,
    /// Consecutive failed connection attempts; zero once connected
    pub attempts: u32,
    /// Delay of the pending reconnect timer, if any
    pub next_delay: Option<Duration>,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// What a status badge should show
    pub fn indicator(&self) -> ConnectionIndicator {
        match self.state {
            ConnectionState::Connected => ConnectionIndicator::Connected,
            ConnectionState::Failed => ConnectionIndicator::RetryAvailable,
            ConnectionState::Disconnected if self.last_error.is_some() => {
                ConnectionIndicator::RetryAvailable
            }
            _ => ConnectionIndicator::Disconnected,
        }
    }
}

/// User-visible connection badge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionIndicator {
    Connected,
    Disconnected,
    /// Disconnected and waiting for the user to retry
    RetryAvailable,
}
