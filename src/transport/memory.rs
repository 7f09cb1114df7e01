//! In-process connector
//!
//! Every [`Connector::open`] call hands the server side of the new transport
//! to whoever holds the [`MemoryConnector`], as a [`MemoryPeer`]. The peer
//! drives the lifecycle explicitly (accept, reject, drop, push events), which
//! makes reconnect and dispatch behaviour observable without a network.

use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{mpsc, Mutex};

use super::{ClientFrame, ConnectRequest, Connector, DisconnectReason, Transport, TransportEvent};

/// Connector whose transports are driven by in-process peers
pub struct MemoryConnector {
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
    opened: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            peers_tx,
            peers_rx: Mutex::new(peers_rx),
            opened: AtomicUsize::new(0),
        }
    }

    /// Wait for the next transport the client opens
    pub async fn next_peer(&self) -> Option<MemoryPeer> {
        self.peers_rx.lock().await.recv().await
    }

    /// Number of transports opened so far
    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl Connector for MemoryConnector {
    fn open(&self, request: ConnectRequest) -> Transport {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        self.opened.fetch_add(1, Ordering::SeqCst);
        let peer = MemoryPeer {
            request,
            events: events_tx,
            frames: outbound_rx,
        };
        if self.peers_tx.send(peer).is_err() {
            tracing::trace!("MemoryConnector peer receiver dropped");
        }

        Transport::new(outbound_tx, events_rx)
    }
}

/// Server side of one in-memory transport
pub struct MemoryPeer {
    request: ConnectRequest,
    events: mpsc::UnboundedSender<TransportEvent>,
    frames: mpsc::UnboundedReceiver<ClientFrame>,
}

impl MemoryPeer {
    /// The request the client opened this transport with
    pub fn request(&self) -> &ConnectRequest {
        &self.request
    }

    /// Token presented at connect time
    pub fn token(&self) -> &str {
        &self.request.token
    }

    /// Report the transport open without acknowledging authentication yet
    pub fn open(&self) {
        self.send(TransportEvent::Opened);
    }

    /// Open and acknowledge the connection
    pub fn accept(&self) {
        self.send(TransportEvent::Opened);
        self.send(TransportEvent::Connect);
    }

    /// Fail the connection attempt
    pub fn reject(&self, message: impl Into<String>) {
        self.send(TransportEvent::ConnectError(message.into()));
    }

    /// Close the connection with the given reason
    pub fn disconnect(&self, reason: DisconnectReason) {
        self.send(TransportEvent::Disconnect(reason));
    }

    /// Push a domain event
    pub fn emit(&self, event: impl Into<String>, payload: serde_json::Value) {
        self.send(TransportEvent::Message {
            event: event.into(),
            payload,
        });
    }

    /// Push a server `error` event
    pub fn server_error(&self, message: impl Into<String>) {
        self.send(TransportEvent::Error(message.into()));
    }

    /// Next frame the client sent; `None` once the client closed the transport
    pub async fn next_frame(&mut self) -> Option<ClientFrame> {
        self.frames.recv().await
    }

    /// Frame already sent by the client, without waiting
    pub fn try_next_frame(&mut self) -> Option<ClientFrame> {
        self.frames.try_recv().ok()
    }

    fn send(&self, event: TransportEvent) {
        if self.events.send(event).is_err() {
            tracing::trace!("MemoryPeer event dropped, client side closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn request() -> ConnectRequest {
        ConnectRequest {
            url: "memory://clinic".to_string(),
            token: "tok".to_string(),
            client_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_open_hands_peer_to_holder() {
        let connector = MemoryConnector::new();
        let transport = connector.open(request());
        assert_eq!(connector.open_count(), 1);

        let mut peer = connector.next_peer().await.unwrap();
        assert_eq!(peer.token(), "tok");

        let (outbound, mut events) = transport.into_parts();
        peer.accept();
        peer.emit("queue_updated", json!({"clinic_id": 1}));
        assert_eq!(events.recv().await, Some(TransportEvent::Opened));
        assert_eq!(events.recv().await, Some(TransportEvent::Connect));
        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Message { .. })
        ));

        outbound
            .send(ClientFrame::emit("leave_queue_room", json!({})))
            .unwrap();
        assert!(peer.next_frame().await.is_some());

        drop(outbound);
        assert!(peer.next_frame().await.is_none());
    }
}
