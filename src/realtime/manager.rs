//! Connection Manager
//!
//! Owns the single realtime connection of a session: connect, authenticate,
//! detect drops, reconnect with exponential backoff up to a ceiling, and
//! publish [`ConnectionStatus`] to observers.
//!
//! ## Lifecycle
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──Opened──► Authenticating ──Connect──► Connected
//!       ▲                          │                      │                        │
//!       │                          └──────────┬───────────┴────────────────────────┘
//!       │                                     │ connect_error / timeout / unexpected drop
//!       │                                     ▼
//!       │                          Reconnecting ──timer──► Connecting ...
//!       │                                     │ attempts == ceiling
//!       │                                     ▼
//!       └───────────reconnect()──────────── Failed
//! ```
//!
//! Every transport gets a generation number. Events and timers belonging to
//! a superseded generation are ignored, so at most one transport and one
//! reconnect timer are ever live.

use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::backoff::ReconnectPolicy;
use super::state::{ConnectionIndicator, ConnectionState, ConnectionStatus};
use crate::config::RealtimeConfig;
use crate::error::RealtimeError;
use crate::events::{EventDispatcher, EventName, Subscription};
use crate::session::Session;
use crate::transport::{
    ClientFrame, ConnectRequest, Connector, DisconnectReason, TransportEvent, WebSocketConnector,
};

/// Greeting the server pushes after a successful connect
const GREETING_EVENT: &str = "connected";

/// Cloneable handle to one realtime connection
///
/// All methods are non-blocking. Methods that may open a transport or arm a
/// timer (`connect`, `reconnect`, `bind_session`) must be called from within
/// a tokio runtime.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    policy: ReconnectPolicy,
    connect_timeout: Duration,
    session: Session,
    connector: Arc<dyn Connector>,
    dispatcher: EventDispatcher,
    client_id: Uuid,
    shared: Mutex<Shared>,
    status: watch::Sender<ConnectionStatus>,
}

#[derive(Default)]
struct Shared {
    generation: u64,
    link: Option<Link>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.link
            .as_ref()
            .is_some_and(|link| link.generation == generation)
    }

    fn cancel_timer(&mut self) -> bool {
        match self.reconnect_timer.take() {
            Some(timer) => {
                timer.abort();
                true
            }
            None => false,
        }
    }

    fn close_link(&mut self) -> bool {
        match self.link.take() {
            Some(link) => {
                link.close();
                true
            }
            None => false,
        }
    }
}

/// The live transport: outbound half plus the task pumping its events
struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    driver: JoinHandle<()>,
}

impl Link {
    /// Close from outside the driver task
    fn close(self) {
        self.driver.abort();
    }
}

impl ConnectionManager {
    /// Create a manager; nothing is opened until [`connect`](Self::connect)
    pub fn new(config: &RealtimeConfig, session: Session, connector: Arc<dyn Connector>) -> Self {
        let client_id = Uuid::new_v4();
        let (status, _) = watch::channel(ConnectionStatus::default());

        tracing::debug!(
            client_id = %client_id,
            url = %config.url,
            max_attempts = config.max_reconnect_attempts,
            "Realtime client created"
        );

        Self {
            inner: Arc::new(Inner {
                url: config.url.clone(),
                policy: ReconnectPolicy::from_config(config),
                connect_timeout: Duration::from_millis(config.connect_timeout_ms),
                session,
                connector,
                dispatcher: EventDispatcher::new(),
                client_id,
                shared: Mutex::new(Shared::default()),
                status,
            }),
        }
    }

    /// Create a manager dialing real WebSocket transports
    pub fn websocket(config: &RealtimeConfig, session: Session) -> Self {
        Self::new(config, session, Arc::new(WebSocketConnector::new()))
    }

    /// Open a connection if the session is authenticated and none is held.
    /// Without a usable token this is a silent no-op.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the connection and cancel any pending retry. Idempotent;
    /// never schedules a reconnect.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Manual retry: reset the attempt counter and connect from scratch
    pub fn reconnect(&self) {
        self.inner.reconnect();
    }

    /// Follow the session: connect on login, disconnect on logout.
    /// The task ends once the manager is dropped.
    pub fn bind_session(&self) -> JoinHandle<()> {
        let weak = Arc::downgrade(&self.inner);
        let mut credentials = self.inner.session.subscribe();

        tokio::spawn(async move {
            loop {
                let usable = credentials.borrow_and_update().is_usable();
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                if usable {
                    inner.connect();
                } else {
                    inner.disconnect();
                }
                drop(inner);

                if credentials.changed().await.is_err() {
                    break;
                }
            }
        })
    }

    /// Register a handler for a domain event. The registration survives
    /// reconnects; drop the returned [`Subscription`] to detach it.
    pub fn on<F>(&self, event: EventName, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.dispatcher.on(event, handler)
    }

    /// Detach every registered handler
    pub fn remove_all_listeners(&self) -> usize {
        self.inner.dispatcher.remove_all_listeners()
    }

    pub fn listener_count(&self) -> usize {
        self.inner.dispatcher.listener_count()
    }

    /// Current status snapshot
    pub fn status(&self) -> ConnectionStatus {
        self.inner.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.status.borrow().state
    }

    pub fn is_connected(&self) -> bool {
        self.inner.status.borrow().is_connected()
    }

    /// Latest normalized error message, if any
    pub fn connection_error(&self) -> Option<String> {
        self.inner.status.borrow().last_error.clone()
    }

    pub fn indicator(&self) -> ConnectionIndicator {
        self.inner.status.borrow().indicator()
    }

    /// Receiver notified on every status change
    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn client_id(&self) -> Uuid {
        self.inner.client_id
    }

    pub(super) fn session(&self) -> &Session {
        &self.inner.session
    }

    /// Send a frame over the live connection. Dropped unless Connected.
    pub(super) fn send_when_connected(&self, frame: ClientFrame) -> bool {
        self.inner.send_when_connected(frame)
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("client_id", &self.inner.client_id)
            .field("url", &self.inner.url)
            .field("status", &*self.inner.status.borrow())
            .finish()
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionStatus)) {
        self.status.send_modify(f);
    }

    fn usable_token(&self) -> Option<String> {
        self.session.credential().usable_token().map(str::to_owned)
    }

    fn connect(self: &Arc<Self>) {
        let Some(token) = self.usable_token() else {
            tracing::debug!(
                client_id = %self.client_id,
                reason = %RealtimeError::AuthMissing,
                "Skipping connect"
            );
            return;
        };

        let mut shared = self.lock();
        if shared.link.is_some() {
            tracing::trace!(client_id = %self.client_id, "Connection already held");
            return;
        }
        self.open_link(&mut shared, token);
    }

    fn disconnect(&self) {
        let mut shared = self.lock();
        shared.generation += 1;
        let had_timer = shared.cancel_timer();
        let had_link = shared.close_link();
        self.update(|status| *status = ConnectionStatus::default());
        drop(shared);

        if had_link || had_timer {
            tracing::info!(client_id = %self.client_id, "Realtime connection closed");
        }
    }

    fn reconnect(self: &Arc<Self>) {
        let mut shared = self.lock();
        shared.generation += 1;
        shared.cancel_timer();
        shared.close_link();
        self.update(|status| *status = ConnectionStatus::default());

        tracing::info!(client_id = %self.client_id, "Manual reconnect requested");
        match self.usable_token() {
            Some(token) => self.open_link(&mut shared, token),
            None => tracing::debug!(
                client_id = %self.client_id,
                reason = %RealtimeError::AuthMissing,
                "Skipping reconnect"
            ),
        }
    }

    /// Open a new transport generation; the caller holds the lock
    fn open_link(self: &Arc<Self>, shared: &mut Shared, token: String) {
        shared.cancel_timer();
        shared.generation += 1;
        let generation = shared.generation;

        let transport = self.connector.open(ConnectRequest {
            url: self.url.clone(),
            token,
            client_id: self.client_id,
        });
        let (outbound, events) = transport.into_parts();
        let driver = tokio::spawn(drive(
            Arc::downgrade(self),
            generation,
            events,
            self.connect_timeout,
        ));
        shared.link = Some(Link {
            generation,
            outbound,
            driver,
        });

        self.update(|status| {
            status.state = ConnectionState::Connecting;
            status.next_delay = None;
        });
        tracing::debug!(
            client_id = %self.client_id,
            generation,
            url = %self.url,
            "Opening realtime connection"
        );
    }

    fn on_opened(&self, generation: u64) {
        let shared = self.lock();
        if !shared.is_current(generation) {
            return;
        }
        self.update(|status| {
            if status.state == ConnectionState::Connecting {
                status.state = ConnectionState::Authenticating;
            }
        });
    }

    fn on_connected(&self, generation: u64) {
        let shared = self.lock();
        if !shared.is_current(generation) {
            return;
        }
        self.update(|status| {
            status.state = ConnectionState::Connected;
            status.attempts = 0;
            status.last_error = None;
            status.next_delay = None;
        });
        tracing::info!(client_id = %self.client_id, generation, "Realtime connection established");
    }

    fn on_server_error(&self, generation: u64, message: String) {
        let shared = self.lock();
        if !shared.is_current(generation) {
            return;
        }
        let error = RealtimeError::ServerReported(message);
        tracing::warn!(client_id = %self.client_id, error = %error, "Server reported an error");
        self.update(|status| status.last_error = Some(error.to_string()));
    }

    fn on_disconnect(self: &Arc<Self>, generation: u64, reason: DisconnectReason) {
        if !reason.is_deliberate() {
            self.on_link_end(generation, RealtimeError::UnexpectedDisconnect(reason));
            return;
        }

        let mut shared = self.lock();
        if !shared.is_current(generation) {
            return;
        }
        shared.link = None;
        shared.cancel_timer();
        self.update(|status| *status = ConnectionStatus::default());
        tracing::info!(client_id = %self.client_id, generation, reason = %reason, "Disconnected");
    }

    /// The transport of `generation` failed or dropped; feed the backoff
    fn on_link_end(self: &Arc<Self>, generation: u64, cause: RealtimeError) {
        let mut shared = self.lock();
        if !shared.is_current(generation) {
            tracing::trace!(generation, "Ignoring end of superseded transport");
            return;
        }
        // Runs on the driver task itself, so the handle is detached, not aborted
        shared.link = None;
        tracing::warn!(client_id = %self.client_id, generation, error = %cause, "Realtime connection failed");
        self.schedule_reconnect(&mut shared, cause);
    }

    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared, cause: RealtimeError) {
        shared.cancel_timer();

        let attempts = self.status.borrow().attempts;
        if self.policy.is_exhausted(attempts) {
            let error = RealtimeError::ReconnectExhausted;
            tracing::error!(client_id = %self.client_id, attempts, "{}", error);
            self.update(|status| {
                status.state = ConnectionState::Failed;
                status.last_error = Some(error.to_string());
                status.next_delay = None;
            });
            return;
        }

        let delay = self.policy.delay_for(attempts);
        self.update(|status| {
            status.state = ConnectionState::Reconnecting;
            status.attempts = attempts.saturating_add(1);
            status.last_error = Some(cause.to_string());
            status.next_delay = Some(delay);
        });
        tracing::info!(
            client_id = %self.client_id,
            attempt = attempts + 1,
            delay_ms = delay.as_millis() as u64,
            "Scheduling reconnect"
        );

        let weak = Arc::downgrade(self);
        let generation = shared.generation;
        shared.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_timer(generation);
            }
        }));
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let mut shared = self.lock();
        if shared.generation != generation {
            return;
        }
        // This task is the timer; forget the handle rather than abort it
        shared.reconnect_timer = None;
        shared.close_link();

        match self.usable_token() {
            Some(token) => self.open_link(&mut shared, token),
            None => {
                tracing::debug!(
                    client_id = %self.client_id,
                    reason = %RealtimeError::AuthMissing,
                    "Reconnect abandoned"
                );
                self.update(|status| *status = ConnectionStatus::default());
            }
        }
    }

    fn send_when_connected(&self, frame: ClientFrame) -> bool {
        if self.status.borrow().state != ConnectionState::Connected {
            return false;
        }
        let shared = self.lock();
        match &shared.link {
            Some(link) => link.outbound.send(frame).is_ok(),
            None => false,
        }
    }

    /// Hand an inbound event to its handlers; payloads are never inspected
    fn deliver(&self, event: &str, payload: &Value) {
        match event.parse::<EventName>() {
            Ok(name) => {
                let handlers = self.dispatcher.dispatch(name, payload);
                tracing::trace!(client_id = %self.client_id, event = %name, handlers, "Event dispatched");
            }
            Err(_) if event == GREETING_EVENT => {
                tracing::info!(client_id = %self.client_id, payload = %payload, "Server greeting received");
            }
            Err(_) => {
                tracing::trace!(client_id = %self.client_id, event, "Ignoring unknown event");
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = self.shared.get_mut().unwrap_or_else(|e| e.into_inner());
        shared.cancel_timer();
        shared.close_link();
    }
}

/// Pump one transport: handshake under the connect timeout, then events
/// until it ends. Holds only a weak reference to the manager.
async fn drive(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    connect_timeout: Duration,
) {
    let handshake = tokio::time::timeout(connect_timeout, handshake(&inner, generation, &mut events))
        .await
        .unwrap_or(Err(Handshake::Failed(RealtimeError::ConnectTimeout(connect_timeout))));

    match handshake {
        Ok(()) => {}
        Err(Handshake::Failed(cause)) => {
            if let Some(inner) = inner.upgrade() {
                inner.on_link_end(generation, cause);
            }
            return;
        }
        Err(Handshake::Disconnected(reason)) => {
            if let Some(inner) = inner.upgrade() {
                inner.on_disconnect(generation, reason);
            }
            return;
        }
        Err(Handshake::Abandoned) => return,
    }

    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Message { event, payload } => inner.deliver(&event, &payload),
            TransportEvent::Error(message) => inner.on_server_error(generation, message),
            TransportEvent::Disconnect(reason) => {
                inner.on_disconnect(generation, reason);
                return;
            }
            TransportEvent::ConnectError(message) => {
                inner.on_link_end(generation, RealtimeError::ConnectError(message));
                return;
            }
            TransportEvent::Opened | TransportEvent::Connect => {
                tracing::trace!(generation, "Duplicate handshake event ignored");
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.on_disconnect(generation, DisconnectReason::TransportClose);
    }
}

enum Handshake {
    Failed(RealtimeError),
    Disconnected(DisconnectReason),
    /// The manager was dropped mid-handshake
    Abandoned,
}

async fn handshake(
    inner: &Weak<Inner>,
    generation: u64,
    events: &mut mpsc::UnboundedReceiver<TransportEvent>,
) -> Result<(), Handshake> {
    loop {
        let Some(event) = events.recv().await else {
            return Err(Handshake::Failed(RealtimeError::ConnectError(
                "transport closed during handshake".to_string(),
            )));
        };
        let Some(inner) = inner.upgrade() else {
            return Err(Handshake::Abandoned);
        };
        match event {
            TransportEvent::Opened => inner.on_opened(generation),
            TransportEvent::Connect => {
                inner.on_connected(generation);
                return Ok(());
            }
            TransportEvent::ConnectError(message) => {
                return Err(Handshake::Failed(RealtimeError::ConnectError(message)));
            }
            TransportEvent::Disconnect(reason) => return Err(Handshake::Disconnected(reason)),
            TransportEvent::Error(message) => inner.on_server_error(generation, message),
            TransportEvent::Message { event, payload } => inner.deliver(&event, &payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryConnector, MemoryPeer};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{timeout, Instant};

    const EXHAUSTED: &str = "Unable to connect after multiple attempts";

    fn setup(session: Session) -> (ConnectionManager, Arc<MemoryConnector>) {
        let connector = Arc::new(MemoryConnector::new());
        let manager = ConnectionManager::new(
            &RealtimeConfig::default(),
            session,
            Arc::clone(&connector) as Arc<dyn Connector>,
        );
        (manager, connector)
    }

    fn logged_in() -> Session {
        let session = Session::new();
        session.login("token-1");
        session
    }

    async fn wait_until(
        manager: &ConnectionManager,
        predicate: impl FnMut(&ConnectionStatus) -> bool,
    ) -> ConnectionStatus {
        let mut rx = manager.watch_status();
        let status = timeout(Duration::from_secs(300), rx.wait_for(predicate))
            .await
            .expect("status never reached")
            .expect("status channel closed");
        status.clone()
    }

    async fn wait_for_state(manager: &ConnectionManager, state: ConnectionState) -> ConnectionStatus {
        wait_until(manager, |status| status.state == state).await
    }

    async fn connected_peer(
        manager: &ConnectionManager,
        connector: &MemoryConnector,
    ) -> MemoryPeer {
        let peer = connector.next_peer().await.unwrap();
        peer.accept();
        wait_for_state(manager, ConnectionState::Connected).await;
        peer
    }

    /// No new transport is opened for a long (paused) while
    async fn assert_no_new_peer(connector: &MemoryConnector) {
        assert!(timeout(Duration::from_secs(600), connector.next_peer())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_token_is_silent_noop() {
        let (manager, connector) = setup(Session::new());
        manager.connect();

        assert_eq!(connector.open_count(), 0);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(manager.connection_error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_handshake_states() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        assert_eq!(manager.state(), ConnectionState::Connecting);

        let peer = connector.next_peer().await.unwrap();
        assert_eq!(peer.token(), "token-1");
        assert_eq!(peer.request().client_id, manager.client_id());

        peer.open();
        wait_for_state(&manager, ConnectionState::Authenticating).await;

        peer.accept();
        let status = wait_for_state(&manager, ConnectionState::Connected).await;
        assert_eq!(status.attempts, 0);
        assert!(manager.is_connected());
        assert_eq!(manager.indicator(), ConnectionIndicator::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_while_attempt_in_flight() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        manager.connect();
        let _peer = connected_peer(&manager, &connector).await;
        manager.connect();

        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_double_until_failed() {
        let (manager, connector) = setup(logged_in());
        let start = Instant::now();
        manager.connect();

        let mut opened_at = Vec::new();
        let mut delays = Vec::new();
        for attempt in 1..=5u32 {
            let peer = connector.next_peer().await.unwrap();
            opened_at.push(start.elapsed());
            peer.reject("connection refused");

            let status = wait_until(&manager, |status| status.attempts == attempt).await;
            assert_eq!(status.state, ConnectionState::Reconnecting);
            assert_eq!(
                status.last_error.as_deref(),
                Some("Connection failed: connection refused")
            );
            delays.push(status.next_delay.unwrap());
        }

        // The failure after the 16s retry exhausts the policy
        let peer = connector.next_peer().await.unwrap();
        opened_at.push(start.elapsed());
        peer.reject("connection refused");
        let status = wait_for_state(&manager, ConnectionState::Failed).await;

        let secs = |ds: &[Duration]| ds.iter().map(Duration::as_secs).collect::<Vec<_>>();
        assert_eq!(secs(&delays), vec![1, 2, 4, 8, 16]);
        assert_eq!(secs(&opened_at), vec![0, 1, 3, 7, 15, 31]);

        assert_eq!(status.attempts, 5);
        assert_eq!(status.last_error.as_deref(), Some(EXHAUSTED));
        assert!(status.next_delay.is_none());
        assert_eq!(manager.indicator(), ConnectionIndicator::RetryAvailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_is_terminal_until_manual_reconnect() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        for _ in 0..6 {
            let peer = connector.next_peer().await.unwrap();
            peer.reject("refused");
        }
        wait_for_state(&manager, ConnectionState::Failed).await;

        assert_no_new_peer(&connector).await;
        assert_eq!(connector.open_count(), 6);

        manager.reconnect();
        let status = manager.status();
        assert_eq!(status.attempts, 0);
        assert_eq!(status.state, ConnectionState::Connecting);
        assert!(status.last_error.is_none());

        let _peer = connected_peer(&manager, &connector).await;
        assert_eq!(connector.open_count(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_resets_attempts_mid_backoff() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        for attempt in 1..=3u32 {
            let peer = connector.next_peer().await.unwrap();
            peer.reject("refused");
            wait_until(&manager, |status| status.attempts == attempt).await;
        }
        assert_eq!(manager.status().next_delay, Some(Duration::from_secs(4)));

        let start = Instant::now();
        manager.reconnect();
        assert_eq!(manager.status().attempts, 0);

        // Opened immediately, not after the pending 4s timer
        let peer = connector.next_peer().await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);

        peer.reject("refused again");
        let status = wait_until(&manager, |status| status.attempts == 1).await;
        assert_eq!(status.next_delay, Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout_feeds_backoff() {
        let (manager, connector) = setup(logged_in());
        let start = Instant::now();
        manager.connect();

        let mut peer = connector.next_peer().await.unwrap();
        peer.open();

        let status = wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(start.elapsed(), Duration::from_secs(10));
        assert_eq!(
            status.last_error.as_deref(),
            Some("Connection timed out after 10s")
        );
        assert_eq!(status.attempts, 1);

        // The timed-out transport was closed
        assert!(peer.next_frame().await.is_none());

        let _next = connector.next_peer().await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_disconnect_reason_never_reconnects() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        let peer = connected_peer(&manager, &connector).await;

        peer.disconnect(DisconnectReason::ClientInitiated);
        let status = wait_for_state(&manager, ConnectionState::Disconnected).await;
        assert_eq!(status, ConnectionStatus::default());

        assert_no_new_peer(&connector).await;
        assert_eq!(connector.open_count(), 1);
        assert_eq!(manager.indicator(), ConnectionIndicator::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_kick_feeds_backoff() {
        let (manager, connector) = setup(logged_in());
        let start = Instant::now();
        manager.connect();
        let peer = connected_peer(&manager, &connector).await;

        peer.disconnect(DisconnectReason::ServerInitiated);
        let status = wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(status.attempts, 1);
        assert_eq!(status.next_delay, Some(Duration::from_secs(1)));
        assert_eq!(
            status.last_error.as_deref(),
            Some("Connection lost: io server disconnect")
        );

        let _next = connected_peer(&manager, &connector).await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert_eq!(connector.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unexpected_disconnect_reconnects() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        let peer = connected_peer(&manager, &connector).await;

        peer.disconnect(DisconnectReason::PingTimeout);
        let status = wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(status.attempts, 1);
        assert_eq!(status.next_delay, Some(Duration::from_secs(1)));
        assert_eq!(
            status.last_error.as_deref(),
            Some("Connection lost: ping timeout")
        );

        let _peer = connected_peer(&manager, &connector).await;
        let status = manager.status();
        assert_eq!(status.attempts, 0);
        assert!(status.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_drop_counts_as_transport_close() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        let peer = connected_peer(&manager, &connector).await;

        drop(peer);
        let status = wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(
            status.last_error.as_deref(),
            Some("Connection lost: transport close")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_disconnect_closes_and_cancels_timer() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        let peer = connector.next_peer().await.unwrap();
        peer.reject("refused");
        wait_for_state(&manager, ConnectionState::Reconnecting).await;

        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::default());
        assert_no_new_peer(&connector).await;

        // Idempotent
        manager.disconnect();
        assert_eq!(manager.status(), ConnectionStatus::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_logout_while_connected_tears_down_without_reconnect() {
        let session = Session::new();
        let (manager, connector) = setup(session.clone());
        let _binding = manager.bind_session();

        session.login("token-1");
        let mut peer = connected_peer(&manager, &connector).await;

        session.logout();
        let status = wait_for_state(&manager, ConnectionState::Disconnected).await;
        assert_eq!(status, ConnectionStatus::default());
        assert!(peer.next_frame().await.is_none());

        assert_no_new_peer(&connector).await;
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_timer_abandoned_after_logout() {
        let session = logged_in();
        let (manager, connector) = setup(session.clone());
        manager.connect();
        let peer = connector.next_peer().await.unwrap();
        peer.reject("refused");
        wait_for_state(&manager, ConnectionState::Reconnecting).await;

        // Credential cleared without a bound session: the timer finds no token
        session.logout();
        let status = wait_for_state(&manager, ConnectionState::Disconnected).await;
        assert_eq!(status.attempts, 0);
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_is_informational() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        let peer = connected_peer(&manager, &connector).await;

        peer.server_error("room not found");
        let status = wait_until(&manager, |status| status.last_error.is_some()).await;
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.last_error.as_deref(), Some("Server error: room not found"));
        assert_eq!(connector.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listeners_survive_reconnect() {
        let (manager, connector) = setup(logged_in());
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let _sub = manager.on(EventName::QueueUpdated, move |payload| {
            assert_eq!(payload["clinic_id"], 7);
            sink.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect();
        let first = connected_peer(&manager, &connector).await;
        first.emit("queue_updated", json!({"clinic_id": 7}));
        first.disconnect(DisconnectReason::TransportError);
        wait_for_state(&manager, ConnectionState::Reconnecting).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let second = connected_peer(&manager, &connector).await;
        second.emit("queue_updated", json!({"clinic_id": 7}));
        second.emit("not_a_domain_event", json!({}));
        second.emit("connected", json!({"message": "welcome"}));
        second.disconnect(DisconnectReason::ClientInitiated);
        wait_for_state(&manager, ConnectionState::Disconnected).await;

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_all_listeners_silences_events() {
        let (manager, connector) = setup(logged_in());
        let count = Arc::new(AtomicUsize::new(0));
        let subs: Vec<Subscription> = EventName::ALL
            .iter()
            .map(|&event| {
                let sink = Arc::clone(&count);
                manager.on(event, move |_| {
                    sink.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();
        assert_eq!(manager.listener_count(), subs.len());

        manager.connect();
        let peer = connected_peer(&manager, &connector).await;
        assert_eq!(manager.remove_all_listeners(), EventName::ALL.len());

        for event in EventName::ALL {
            peer.emit(event.as_str(), json!({}));
        }
        peer.disconnect(DisconnectReason::ClientInitiated);
        wait_for_state(&manager, ConnectionState::Disconnected).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replaces_live_transport() {
        let (manager, connector) = setup(logged_in());
        manager.connect();
        let mut old = connected_peer(&manager, &connector).await;

        manager.reconnect();
        assert!(old.next_frame().await.is_none());
        // Events from the superseded transport go nowhere
        old.disconnect(DisconnectReason::TransportError);

        let _new = connected_peer(&manager, &connector).await;
        assert_eq!(manager.status().attempts, 0);
        assert_eq!(connector.open_count(), 2);
    }
}
