//! WebSocket Connector
//!
//! Opens transports over `tokio-tungstenite`. The bearer token travels in the
//! upgrade request's `Authorization` header and again as the first `auth`
//! frame once the socket is open.

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::Message;

use super::messages::{ClientFrame, ServerFrame};
use super::{ConnectRequest, Connector, DisconnectReason, Transport, TransportEvent};

/// Header carrying the client id on the upgrade request
const CLIENT_ID_HEADER: &str = "x-client-id";

/// Errors building the upgrade request
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Invalid server URL {url}: {error}")]
    InvalidUrl { url: String, error: String },

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

/// Connector for `ws://` and `wss://` endpoints
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, request: ConnectRequest) -> Transport {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_socket(request, outbound_rx, events_tx));

        Transport::new(outbound_tx, events_rx)
    }
}

/// Build the HTTP upgrade request for a connect attempt
fn upgrade_request(request: &ConnectRequest) -> Result<Request<()>, TransportError> {
    let mut upgrade =
        request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::InvalidUrl {
                url: request.url.clone(),
                error: e.to_string(),
            })?;

    let bearer = HeaderValue::from_str(&format!("Bearer {}", request.token))
        .map_err(|e| TransportError::InvalidHeader(e.to_string()))?;
    let client_id = HeaderValue::from_str(&request.client_id.to_string())
        .map_err(|e| TransportError::InvalidHeader(e.to_string()))?;

    let headers = upgrade.headers_mut();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CLIENT_ID_HEADER, client_id);

    Ok(upgrade)
}

/// Dial, authenticate, then pump frames until either side closes
async fn run_socket(
    request: ConnectRequest,
    mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    let upgrade = match upgrade_request(&request) {
        Ok(upgrade) => upgrade,
        Err(e) => {
            let _ = events.send(TransportEvent::ConnectError(e.to_string()));
            return;
        }
    };

    let stream = match tokio_tungstenite::connect_async(upgrade).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            tracing::debug!(url = %request.url, error = %e, "WebSocket dial failed");
            let _ = events.send(TransportEvent::ConnectError(e.to_string()));
            return;
        }
    };

    let (mut sink, mut source) = stream.split();

    let auth = ClientFrame::Auth {
        token: request.token.clone(),
    };
    let sent = match serde_json::to_string(&auth) {
        Ok(text) => sink.send(Message::text(text)).await,
        Err(e) => {
            let _ = events.send(TransportEvent::ConnectError(e.to_string()));
            return;
        }
    };
    if let Err(e) = sent {
        let _ = events.send(TransportEvent::ConnectError(e.to_string()));
        return;
    }
    let _ = events.send(TransportEvent::Opened);

    let client_id = request.client_id;

    // Writer: forward outbound frames; a closed channel means the owner hung up
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to serialize client frame");
                    continue;
                }
            };
            if sink.send(Message::text(text)).await.is_err() {
                tracing::debug!(client_id = %client_id, "WebSocket send failed");
                return;
            }
        }
        let _ = sink.send(Message::Close(None)).await;
    });

    // Reader: decode server frames into lifecycle events
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = source.next().await {
            let event = match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ServerFrame>(text.as_str()) {
                    Ok(frame) => frame.into_transport_event(),
                    Err(e) => {
                        tracing::debug!(
                            client_id = %client_id,
                            error = %e,
                            "Ignoring undecodable server frame"
                        );
                        continue;
                    }
                },
                Ok(Message::Close(_)) => TransportEvent::Disconnect(DisconnectReason::TransportClose),
                Ok(_) => continue,
                Err(e) => {
                    tracing::debug!(client_id = %client_id, error = %e, "WebSocket receive error");
                    TransportEvent::Disconnect(DisconnectReason::TransportError)
                }
            };

            let closing = matches!(event, TransportEvent::Disconnect(_));
            if events.send(event).is_err() || closing {
                return;
            }
        }
        let _ = events.send(TransportEvent::Disconnect(DisconnectReason::TransportClose));
    });

    tokio::select! {
        _ = &mut send_task => {
            recv_task.abort();
        }
        _ = &mut recv_task => {
            send_task.abort();
        }
    }
}
