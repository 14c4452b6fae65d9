//! The market-data publisher: fan-out of committed events to the bus.

use super::bus::EventSink;
use super::events::MarketEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::trace;

/// Publishes committed events to the configured sink, preserving commit
/// order within one instrument.
///
/// The orchestrator calls [`publish_batch`](Self::publish_batch) only
/// after its storage transaction committed, so subscribers never observe
/// events for state that was rolled back.
pub struct MarketDataPublisher {
    sink: Arc<dyn EventSink>,

    /// Count of events handed to the sink.
    publish_count: AtomicU64,
}

impl MarketDataPublisher {
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            publish_count: AtomicU64::new(0),
        }
    }

    /// Publish events in order. The batch for one command is a contiguous
    /// run of strictly increasing sequences.
    pub fn publish_batch(&self, events: &[MarketEvent]) {
        for event in events {
            let topic = event.topic();
            self.sink.publish(&topic, event);
            self.publish_count.fetch_add(1, Ordering::Relaxed);
            trace!(topic = %topic, sequence = event.sequence(), "event published");
        }
    }

    /// Number of events published so far.
    #[must_use]
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }
}
