//! Point-in-time order book snapshots.
//!
//! A snapshot aggregates the top-K price levels per side and carries the
//! book's sequence number, so a subscriber can resync and then apply
//! deltas with `sequence > snapshot.sequence`. A SHA-256 checksum guards
//! against corruption in transit or at rest.

use super::book::OrderBook;
use super::error::OrderBookError;
use crate::money::Money;
use crate::utils::current_time_millis;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Aggregate state of one price level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthLevel {
    pub price: Money,
    /// Displayed quantity only; iceberg residuals stay hidden.
    pub visible_quantity: Money,
    pub order_count: usize,
}

/// A depth snapshot of one instrument's book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    /// Book sequence at capture time; deltas with a higher sequence apply
    /// cleanly on top.
    pub sequence: u64,
    pub timestamp_ms: u64,
    /// Best-first bid levels (descending price).
    pub bids: Vec<DepthLevel>,
    /// Best-first ask levels (ascending price).
    pub asks: Vec<DepthLevel>,
    /// SHA-256 over the canonical level contents.
    pub checksum: String,
}

impl OrderBookSnapshot {
    /// Recompute the checksum and compare it with the stored one.
    pub fn verify(&self) -> Result<(), OrderBookError> {
        let actual = Self::compute_checksum(&self.symbol, self.sequence, &self.bids, &self.asks);
        if actual == self.checksum {
            Ok(())
        } else {
            Err(OrderBookError::ChecksumMismatch {
                expected: self.checksum.clone(),
                actual,
            })
        }
    }

    fn compute_checksum(
        symbol: &str,
        sequence: u64,
        bids: &[DepthLevel],
        asks: &[DepthLevel],
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(symbol.as_bytes());
        hasher.update(sequence.to_be_bytes());
        for (tag, levels) in [("B", bids), ("A", asks)] {
            for level in levels {
                hasher.update(tag.as_bytes());
                hasher.update(level.price.to_string().as_bytes());
                hasher.update(level.visible_quantity.to_string().as_bytes());
                hasher.update(level.order_count.to_be_bytes());
            }
        }
        let digest = hasher.finalize();
        let mut out = String::with_capacity(digest.len() * 2);
        for byte in digest {
            out.push_str(&format!("{byte:02x}"));
        }
        out
    }
}

impl OrderBook {
    /// Capture the top `depth` levels of each side.
    #[must_use]
    pub fn snapshot(&self, depth: usize) -> OrderBookSnapshot {
        let bids: Vec<DepthLevel> = self
            .bids
            .iter()
            .rev()
            .take(depth)
            .map(|entry| DepthLevel {
                price: *entry.key(),
                visible_quantity: entry.value().visible_quantity(),
                order_count: entry.value().order_count(),
            })
            .collect();
        let asks: Vec<DepthLevel> = self
            .asks
            .iter()
            .take(depth)
            .map(|entry| DepthLevel {
                price: *entry.key(),
                visible_quantity: entry.value().visible_quantity(),
                order_count: entry.value().order_count(),
            })
            .collect();

        let sequence = self.current_sequence();
        let checksum =
            OrderBookSnapshot::compute_checksum(self.symbol(), sequence, &bids, &asks);
        OrderBookSnapshot {
            symbol: self.symbol().to_string(),
            sequence,
            timestamp_ms: current_time_millis(),
            bids,
            asks,
            checksum,
        }
    }
}
