//! Live subscriptions and their cancellation handles.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use nostr::Event;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::relay::RelayConnection;

/// Callback invoked once per event a relay delivers for a subscription.
///
/// The transport does not deduplicate across relays; consumers merge by
/// event id.
pub type EventCallback = Arc<dyn Fn(Event) -> Result<()> + Send + Sync>;

/// A subscription to filtered events, registered on one or more relays.
#[derive(Clone)]
pub struct Subscription {
    /// Subscription id, echoed in relay frames.
    pub id: String,
    /// Wire filters for this subscription.
    pub filters: Vec<Value>,
    cancelled: Arc<AtomicBool>,
    eose_received: Arc<AtomicBool>,
    callback: EventCallback,
}

impl Subscription {
    pub fn new(id: impl Into<String>, filters: Vec<Value>, callback: EventCallback) -> Self {
        Self {
            id: id.into(),
            filters,
            cancelled: Arc::new(AtomicBool::new(false)),
            eose_received: Arc::new(AtomicBool::new(false)),
            callback,
        }
    }

    /// Deliver a received event to the callback.
    ///
    /// Events arriving after cancellation are dropped silently; there is no
    /// drain guarantee for deliveries already in flight when the handle was
    /// cancelled.
    pub fn handle_event(&self, event: Event) -> Result<()> {
        if self.is_cancelled() {
            return Ok(());
        }
        (self.callback)(event)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Mark end-of-stored-events as received.
    pub fn mark_eose(&self) {
        self.eose_received.store(true, Ordering::Relaxed);
    }

    /// Whether the stored-event backlog has been fully delivered.
    pub fn has_eose(&self) -> bool {
        self.eose_received.load(Ordering::Relaxed)
    }

    pub(crate) fn cancellation(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }
}

/// Cancellation handle for an active subscription.
///
/// Dropping the handle does NOT cancel the subscription; delivery continues
/// until [`SubscriptionHandle::cancel`] is called.
pub struct SubscriptionHandle {
    id: String,
    cancelled: Arc<AtomicBool>,
    relays: Vec<Arc<RelayConnection>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        id: String,
        cancelled: Arc<AtomicBool>,
        relays: Vec<Arc<RelayConnection>>,
    ) -> Self {
        Self {
            id,
            cancelled,
            relays,
        }
    }

    /// Subscription id this handle controls.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Stop delivery and release relay-side resources.
    ///
    /// Idempotent: the first call flips the cancellation flag and sends
    /// `CLOSE` to every relay that accepted the subscription; later calls
    /// are no-ops. Safe to call from any task at any time.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        for relay in &self.relays {
            let relay = Arc::clone(relay);
            let subscription_id = self.id.clone();
            tokio::spawn(async move {
                if let Err(error) = relay.unsubscribe(&subscription_id).await {
                    debug!(
                        "CLOSE for {} on {} failed: {}",
                        subscription_id,
                        relay.url(),
                        error
                    );
                }
            });
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
