//! # Clinic Sync
//!
//! Realtime synchronization client for a clinic reception dashboard: one
//! persistent connection to the clinic server, which pushes queue,
//! appointment, patient and payment change events.
//!
//! ## Features
//!
//! - **Self-healing connection**: exponential backoff with an attempt ceiling
//! - **Rooms**: join/leave clinic and doctor queue broadcasts
//! - **Event dispatch**: subscription handles that survive reconnects
//! - **Debounced refresh**: one re-fetch per burst of related events
//!
//! ## Modules
//!
//! - [`realtime`]: Connection manager, connection state, rooms
//! - [`events`]: Event vocabulary, dispatch, refresh debouncer
//! - [`transport`]: WebSocket and in-memory transports
//! - [`session`]: Injected authentication context
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use clinic_sync::config::Config;
//! use clinic_sync::events::{refresh_fn, EventName, RefreshBatcher};
//! use clinic_sync::realtime::ConnectionManager;
//! use clinic_sync::session::Session;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load_default();
//!     let session = Session::new();
//!     let manager = ConnectionManager::websocket(&config.realtime, session.clone());
//!
//!     // Connect on login, tear down on logout
//!     let _binding = manager.bind_session();
//!     session.login("bearer-token");
//!
//!     let batcher = Arc::new(RefreshBatcher::new(
//!         config.refresh.debounce_window(),
//!         refresh_fn(|batch| println!("refresh after {:?}", batch.labels)),
//!     ));
//!     let _subscriptions = batcher.watch(&manager, &EventName::DASHBOARD);
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     session.logout();
//! }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod logging;
pub mod realtime;
pub mod session;
pub mod transport;

// Re-export top-level types for convenience
pub use config::{Config, ConfigError, LoggingConfig, RealtimeConfig, RefreshConfig};

pub use error::RealtimeError;

pub use events::{
    CurrentAppointmentHint, EventDispatcher, EventName, FlushBatch, RefreshAction, RefreshBatcher,
    Subscription,
};

pub use realtime::{
    ConnectionIndicator, ConnectionManager, ConnectionState, ConnectionStatus, ReconnectPolicy,
    Room, RoomKind, RoomMembership,
};

pub use session::{AuthCredential, Session};

pub use transport::{Connector, DisconnectReason, MemoryConnector, WebSocketConnector};
