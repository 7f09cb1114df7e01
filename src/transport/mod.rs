//! Realtime Transport
//!
//! The bidirectional connection primitive the connection manager drives.
//!
//! ## Architecture
//!
//! - **Connector**: opens a [`Transport`] for a URL and bearer token without blocking
//! - **Transport**: outbound [`ClientFrame`] sender + inbound [`TransportEvent`] receiver
//! - **Messages**: JSON wire frames exchanged with the server
//!
//! A transport is closed by dropping its outbound sender. The connection
//! manager is the only owner of a live transport.
//!
//! ## Lifecycle events
//!
//! ```text
//! open() ──► Opened ──► Connect ──► Message* ──► Disconnect(reason)
//!    │           │
//!    └───────────┴──► ConnectError(message)
//! ```

mod memory;
mod messages;
mod websocket;

use std::fmt;
use tokio::sync::mpsc;
use uuid::Uuid;

pub use memory::{MemoryConnector, MemoryPeer};
pub use messages::{ClientFrame, ServerFrame};
pub use websocket::{TransportError, WebSocketConnector};

/// Parameters for opening a transport
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    /// Server endpoint (e.g. `ws://localhost:5000/ws`)
    pub url: String,
    /// Bearer token presented at connect time
    pub token: String,
    /// Identifies the owning connection manager in logs and headers
    pub client_id: Uuid,
}

/// Opens transports. Implementations must not block; every outcome,
/// including failure to dial, is reported through the transport's events.
pub trait Connector: Send + Sync + 'static {
    fn open(&self, request: ConnectRequest) -> Transport;
}

/// A single transport-level connection
#[derive(Debug)]
pub struct Transport {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Transport {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientFrame>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { outbound, events }
    }

    pub fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<ClientFrame>,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        (self.outbound, self.events)
    }
}

/// Events a transport reports to its owner, in server emission order
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Transport is open and the connect-time auth payload has been sent
    Opened,
    /// Server accepted the connection
    Connect,
    /// Connection could not be established
    ConnectError(String),
    /// Connection closed
    Disconnect(DisconnectReason),
    /// Server-reported `error` event
    Error(String),
    /// Domain event, payload passed through untouched
    Message {
        event: String,
        payload: serde_json::Value,
    },
}

/// Why a connection closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// This client asked to disconnect
    ClientInitiated,
    /// The server closed the session on purpose
    ServerInitiated,
    /// The underlying connection closed
    TransportClose,
    /// The underlying connection failed
    TransportError,
    /// Server stopped answering heartbeats
    PingTimeout,
    /// Any other reason string reported by the server
    Other(String),
}

impl DisconnectReason {
    /// Parse a reason string as sent on the wire
    pub fn from_wire(reason: &str) -> Self {
        match reason {
            "io client disconnect" => DisconnectReason::ClientInitiated,
            "io server disconnect" => DisconnectReason::ServerInitiated,
            "transport close" => DisconnectReason::TransportClose,
            "transport error" => DisconnectReason::TransportError,
            "ping timeout" => DisconnectReason::PingTimeout,
            other => DisconnectReason::Other(other.to_string()),
        }
    }

    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            DisconnectReason::ClientInitiated => "io client disconnect",
            DisconnectReason::ServerInitiated => "io server disconnect",
            DisconnectReason::TransportClose => "transport close",
            DisconnectReason::TransportError => "transport error",
            DisconnectReason::PingTimeout => "ping timeout",
            DisconnectReason::Other(reason) => reason.as_str(),
        }
    }

    /// Only a disconnect this client asked for skips automatic reconnection
    pub fn is_deliberate(&self) -> bool {
        matches!(self, DisconnectReason::ClientInitiated)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
