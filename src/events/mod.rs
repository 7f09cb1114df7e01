//! Domain Events
//!
//! What consumers (dashboard views, queue screens) subscribe to.
//!
//! - **Names**: the fixed event vocabulary pushed by the server
//! - **Dispatch**: handler registry with detachable subscription handles
//! - **Batcher**: fixed-window debouncer turning event bursts into one refresh
//!
//! ## Example
//!
//! ```rust,no_run
//! use clinic_sync::events::{refresh_fn, EventName, RefreshBatcher};
//! use clinic_sync::realtime::ConnectionManager;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! fn mount_dashboard(manager: &ConnectionManager) {
//!     let batcher = Arc::new(RefreshBatcher::new(
//!         Duration::from_millis(500),
//!         refresh_fn(|batch| println!("re-fetch dashboard after {:?}", batch.labels)),
//!     ));
//!     let _subscriptions = batcher.watch(manager, &EventName::DASHBOARD);
//! }
//! ```

mod batcher;
mod dispatch;
mod names;

pub use batcher::{refresh_fn, FlushBatch, RefreshAction, RefreshBatcher, RefreshFn};
pub use dispatch::{EventDispatcher, EventHandler, Subscription};
pub use names::{CurrentAppointmentHint, EventName, UnknownEvent};
