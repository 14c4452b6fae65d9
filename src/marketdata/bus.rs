//! The event bus port and its in-process implementation.

use super::events::MarketEvent;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Anything the publisher can hand events to.
///
/// Delivery is at-least-once: a sink may retry internally, and consumers
/// deduplicate by the sequence number carried on every event.
pub trait EventSink: Send + Sync {
    /// Publish one event. Must not reorder events published from one
    /// thread.
    fn publish(&self, topic: &str, event: &MarketEvent);
}

/// Handler invoked for each delivered event.
pub type EventHandler = Arc<dyn Fn(&str, &MarketEvent) + Send + Sync>;

/// Topic filter for subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicFilter {
    /// Exact topic, e.g. `trades.BTC_USD`.
    Exact(String),
    /// Topic prefix, e.g. `orderbook.` for every instrument's deltas.
    Prefix(String),
    /// Everything.
    All,
}

impl TopicFilter {
    #[must_use]
    pub fn matches(&self, topic: &str) -> bool {
        match self {
            TopicFilter::Exact(t) => t == topic,
            TopicFilter::Prefix(p) => topic.starts_with(p.as_str()),
            TopicFilter::All => true,
        }
    }
}

struct Subscriber {
    filter: TopicFilter,
    handler: EventHandler,
}

/// In-process publish/subscribe bus.
///
/// Handlers run synchronously on the publishing thread, so subscribers
/// observe events in exactly the order the orchestrator commits them.
#[derive(Default)]
pub struct InMemoryBus {
    subscribers: DashMap<u64, Subscriber>,
    next_id: AtomicU64,
}

impl InMemoryBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for topics matching `filter`. The returned
    /// [`Subscription`] unregisters the handler when cancelled or dropped.
    pub fn subscribe(self: &Arc<Self>, filter: TopicFilter, handler: EventHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, Subscriber { filter, handler });
        Subscription {
            id,
            bus: Arc::downgrade(self),
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl EventSink for InMemoryBus {
    fn publish(&self, topic: &str, event: &MarketEvent) {
        for entry in self.subscribers.iter() {
            if entry.filter.matches(topic) {
                (entry.handler)(topic, event);
            }
        }
    }
}

/// A cancellable subscription handle.
pub struct Subscription {
    id: u64,
    bus: std::sync::Weak<InMemoryBus>,
}

impl Subscription {
    /// Unregister the handler.
    pub fn cancel(self) {
        // Drop does the work.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.remove(&self.id);
        }
    }
}
