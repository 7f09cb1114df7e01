//! Wire Frames
//!
//! JSON text frames exchanged with the realtime server. Every frame carries
//! a `type` tag; domain events travel inside `event` frames with an opaque
//! `data` payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DisconnectReason, TransportEvent};

/// Frames sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Connect-time authentication payload
    Auth {
        /// Bearer token
        token: String,
    },
    /// Named request, e.g. `join_queue_room`
    Emit {
        /// Server-side endpoint name
        event: String,
        /// Request body
        #[serde(default)]
        data: Value,
    },
}

impl ClientFrame {
    pub fn emit(event: impl Into<String>, data: Value) -> Self {
        ClientFrame::Emit {
            event: event.into(),
            data,
        }
    }
}

/// Frames sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Authentication accepted
    Connect {
        /// Server-assigned session id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sid: Option<String>,
    },
    /// Authentication or handshake rejected
    ConnectError {
        /// Error description
        message: String,
    },
    /// Server is closing the session
    Disconnect {
        /// Reason string, e.g. `io server disconnect`
        reason: String,
    },
    /// Pushed event
    Event {
        /// Event name, e.g. `queue_updated`
        event: String,
        /// Opaque payload
        #[serde(default)]
        data: Value,
    },
}

/// Server-side event name carrying post-connect errors
const ERROR_EVENT: &str = "error";

impl ServerFrame {
    /// Map a decoded frame onto the transport lifecycle
    pub fn into_transport_event(self) -> TransportEvent {
        match self {
            ServerFrame::Connect { .. } => TransportEvent::Connect,
            ServerFrame::ConnectError { message } => TransportEvent::ConnectError(message),
            ServerFrame::Disconnect { reason } => {
                TransportEvent::Disconnect(DisconnectReason::from_wire(&reason))
            }
            ServerFrame::Event { event, data } if event == ERROR_EVENT => {
                TransportEvent::Error(error_message(&data))
            }
            ServerFrame::Event { event, data } => TransportEvent::Message {
                event,
                payload: data,
            },
        }
    }
}

/// Best-effort human message out of an `error` payload
fn error_message(data: &Value) -> String {
    match data {
        Value::String(message) => message.clone(),
        Value::Object(fields) => fields
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| data.to_string()),
        Value::Null => "unknown error".to_string(),
        other => other.to_string(),
    }
}
