//! NATS JetStream event publisher.
//!
//! Bridges the bus port to NATS: each committed [`MarketEvent`] is
//! published to its topic as a JetStream subject. Serialization happens
//! synchronously so event order is fixed before the async publish is
//! spawned; transient failures are retried with exponential backoff.
//!
//! Only available with the `nats` feature:
//!
//! ```toml
//! [dependencies]
//! exchange-core = { version = "0.3", features = ["nats"] }
//! ```

use super::bus::EventSink;
use super::events::MarketEvent;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, trace, warn};

/// Default maximum number of retry attempts for transient publish failures.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay in milliseconds for exponential backoff between retries.
const BASE_RETRY_DELAY_MS: u64 = 10;

/// An [`EventSink`] that forwards events to NATS JetStream.
///
/// Each event is published to `{prefix}.{topic}` with the event's
/// sequence number in a `Nats-Sequence` header so downstream consumers
/// can deduplicate without parsing the payload.
pub struct NatsEventPublisher {
    /// JetStream context for publishing messages.
    jetstream: async_nats::jetstream::Context,

    /// Subject prefix prepended to every topic.
    subject_prefix: String,

    /// Handle to the Tokio runtime used for spawning publish tasks.
    runtime: tokio::runtime::Handle,

    /// Count of successfully published messages.
    publish_count: Arc<AtomicU64>,

    /// Count of permanently failed publish attempts.
    error_count: Arc<AtomicU64>,

    /// Maximum number of retry attempts for transient failures.
    max_retries: u32,
}

impl NatsEventPublisher {
    /// Create a new publisher on the given JetStream context.
    #[must_use]
    pub fn new(
        jetstream: async_nats::jetstream::Context,
        subject_prefix: String,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            jetstream,
            subject_prefix,
            runtime,
            publish_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Set the maximum number of retry attempts for transient failures.
    /// Defaults to 3; zero disables retries.
    #[must_use = "builders do nothing unless consumed"]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Number of successfully published messages.
    #[must_use]
    pub fn publish_count(&self) -> u64 {
        self.publish_count.load(Ordering::Relaxed)
    }

    /// Number of permanently failed publish attempts.
    #[must_use]
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    async fn publish_with_retry(
        jetstream: async_nats::jetstream::Context,
        subject: String,
        payload: bytes::Bytes,
        sequence: u64,
        max_retries: u32,
        publish_count: Arc<AtomicU64>,
        error_count: Arc<AtomicU64>,
    ) {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Sequence", sequence.to_string().as_str());

        let max_attempts = max_retries.saturating_add(1);
        for attempt in 0..max_attempts {
            let publish_result = jetstream
                .publish_with_headers(subject.clone(), headers.clone(), payload.clone())
                .await;

            match publish_result {
                Ok(ack_future) => match ack_future.await {
                    Ok(_) => {
                        publish_count.fetch_add(1, Ordering::Relaxed);
                        trace!(sequence, subject = %subject, "event published to NATS");
                        return;
                    }
                    Err(e) => {
                        warn!(
                            attempt = attempt + 1,
                            max = max_attempts,
                            subject = %subject,
                            error = %e,
                            "NATS ack failed, retrying"
                        );
                    }
                },
                Err(e) => {
                    warn!(
                        attempt = attempt + 1,
                        max = max_attempts,
                        subject = %subject,
                        error = %e,
                        "NATS publish failed, retrying"
                    );
                }
            }

            if attempt + 1 < max_attempts {
                let delay_ms = BASE_RETRY_DELAY_MS.saturating_mul(1u64 << attempt);
                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
            }
        }

        error_count.fetch_add(1, Ordering::Relaxed);
        error!(subject = %subject, "NATS publish failed after all retries");
    }
}

impl EventSink for NatsEventPublisher {
    fn publish(&self, topic: &str, event: &MarketEvent) {
        let payload = match serde_json::to_vec(event) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.error_count.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "failed to serialize event for NATS");
                return;
            }
        };

        let subject = format!("{}.{}", self.subject_prefix, topic);
        self.runtime.spawn(Self::publish_with_retry(
            self.jetstream.clone(),
            subject,
            bytes::Bytes::from(payload),
            event.sequence(),
            self.max_retries,
            Arc::clone(&self.publish_count),
            Arc::clone(&self.error_count),
        ));
    }
}

impl std::fmt::Debug for NatsEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NatsEventPublisher")
            .field("subject_prefix", &self.subject_prefix)
            .field("publish_count", &self.publish_count.load(Ordering::Relaxed))
            .field("error_count", &self.error_count.load(Ordering::Relaxed))
            .field("max_retries", &self.max_retries)
            .finish()
    }
}
