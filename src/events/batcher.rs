//! Refetch Debouncer
//!
//! Coalesces bursts of domain events into a single downstream refresh.
//!
//! The window is anchored to the first event of a burst: the first event
//! starts a timer, later events only add their label, and the timer is never
//! reset. When it fires the accumulated labels are handed to the
//! [`RefreshAction`] exactly once.
//!
//! ```text
//! Idle ──event──► Pending ──event──► Pending (timer untouched)
//!                    │
//!                    └──window elapsed──► flush ──► Idle
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::dispatch::Subscription;
use super::names::EventName;
use crate::realtime::ConnectionManager;

/// Labels coalesced into one flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushBatch {
    /// Distinct event types seen during the window
    pub labels: BTreeSet<EventName>,
    /// When the flush ran
    pub flushed_at: DateTime<Utc>,
}

/// Downstream refresh triggered by a flush (e.g. re-fetch dashboard aggregates)
#[async_trait]
pub trait RefreshAction: Send + Sync + 'static {
    async fn refresh(&self, batch: FlushBatch);
}

/// [`RefreshAction`] backed by a plain closure
pub struct RefreshFn<F>(F);

/// Wrap a closure as a [`RefreshAction`]
pub fn refresh_fn<F>(f: F) -> RefreshFn<F>
where
    F: Fn(FlushBatch) + Send + Sync + 'static,
{
    RefreshFn(f)
}

#[async_trait]
impl<F> RefreshAction for RefreshFn<F>
where
    F: Fn(FlushBatch) + Send + Sync + 'static,
{
    async fn refresh(&self, batch: FlushBatch) {
        (self.0)(batch)
    }
}

#[derive(Default)]
struct BatchState {
    labels: BTreeSet<EventName>,
    timer: Option<JoinHandle<()>>,
    last_flush: Option<DateTime<Utc>>,
    flush_count: u64,
}

struct BatcherInner {
    window: Duration,
    action: Arc<dyn RefreshAction>,
    state: Mutex<BatchState>,
}

impl BatcherInner {
    fn state(&self) -> MutexGuard<'_, BatchState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn flush(&self) {
        let batch = {
            let mut state = self.state();
            state.timer = None;
            let labels = std::mem::take(&mut state.labels);
            let flushed_at = Utc::now();
            state.last_flush = Some(flushed_at);
            state.flush_count += 1;
            FlushBatch { labels, flushed_at }
        };

        tracing::debug!(
            labels = ?batch.labels,
            window_ms = self.window.as_millis() as u64,
            "Flushing refresh batch"
        );
        self.action.refresh(batch).await;
    }
}

/// Per-consumer debouncer. Dropping it cancels any pending flush.
pub struct RefreshBatcher {
    inner: Arc<BatcherInner>,
}

impl RefreshBatcher {
    /// Create a batcher with a fixed quiet period
    pub fn new(window: Duration, action: impl RefreshAction) -> Self {
        Self::with_action(window, Arc::new(action))
    }

    /// Create a batcher sharing an existing action
    pub fn with_action(window: Duration, action: Arc<dyn RefreshAction>) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                window,
                action,
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    /// Record one qualifying event. Must be called inside a tokio runtime.
    pub fn record(&self, label: EventName) {
        let mut state = self.inner.state();
        state.labels.insert(label);

        if state.timer.is_some() {
            tracing::trace!(event = %label, "Event absorbed into pending batch");
            return;
        }

        let inner = Arc::clone(&self.inner);
        let deadline = tokio::time::Instant::now() + self.inner.window;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            inner.flush().await;
        }));
        tracing::trace!(event = %label, "Refresh batch window opened");
    }

    /// Drop the pending batch without flushing (consumer unmount)
    pub fn cancel(&self) {
        let mut state = self.inner.state();
        if let Some(timer) = state.timer.take() {
            timer.abort();
            tracing::debug!(dropped = state.labels.len(), "Pending refresh batch cancelled");
        }
        state.labels.clear();
    }

    /// Register handlers on `manager` that feed `events` into this batcher.
    /// The handlers hold only a weak reference to the batcher.
    pub fn watch(
        self: &Arc<Self>,
        manager: &ConnectionManager,
        events: &[EventName],
    ) -> Vec<Subscription> {
        events
            .iter()
            .map(|&event| {
                let batcher: Weak<RefreshBatcher> = Arc::downgrade(self);
                manager.on(event, move |_payload| {
                    if let Some(batcher) = batcher.upgrade() {
                        batcher.record(event);
                    }
                })
            })
            .collect()
    }

    pub fn window(&self) -> Duration {
        self.inner.window
    }

    /// Whether a flush is scheduled
    pub fn is_pending(&self) -> bool {
        self.inner.state().timer.is_some()
    }

    /// Labels collected since the last flush
    pub fn pending_labels(&self) -> BTreeSet<EventName> {
        self.inner.state().labels.clone()
    }

    /// Time of the most recent flush, for display
    pub fn last_flush(&self) -> Option<DateTime<Utc>> {
        self.inner.state().last_flush
    }

    /// Number of flushes executed
    pub fn flush_count(&self) -> u64 {
        self.inner.state().flush_count
    }
}

impl Drop for RefreshBatcher {
    fn drop(&mut self) {
        self.cancel();
    }
}
