//! Realtime Connection
//!
//! The long-lived link to the clinic server.
//!
//! ## Architecture
//!
//! - **Manager**: connect, authenticate, reconnect with exponential backoff
//! - **Backoff**: `base × 2^n` delays with an attempt ceiling
//! - **State**: status snapshots published through a `watch` channel
//! - **Rooms**: join/leave requests for clinic and doctor queues
//!
//! ## Example
//!
//! ```rust,no_run
//! use clinic_sync::config::RealtimeConfig;
//! use clinic_sync::realtime::{ConnectionManager, ConnectionState, Room, RoomMembership};
//! use clinic_sync::session::Session;
//!
//! # async fn run() {
//! let session = Session::new();
//! let manager = ConnectionManager::websocket(&RealtimeConfig::default(), session.clone());
//! let _binding = manager.bind_session();
//! session.login("bearer-token");
//!
//! let rooms: RoomMembership = [Room::clinic_queue(7)].into_iter().collect();
//! let mut status = manager.watch_status();
//! while status.changed().await.is_ok() {
//!     if status.borrow_and_update().state == ConnectionState::Connected {
//!         rooms.rejoin(&manager);
//!     }
//! }
//! # }
//! ```

mod backoff;
mod manager;
mod rooms;
mod state;

pub use backoff::ReconnectPolicy;
pub use manager::ConnectionManager;
pub use rooms::{Room, RoomKind, RoomMembership};
pub use state::{ConnectionIndicator, ConnectionState, ConnectionStatus};
