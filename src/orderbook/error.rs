//! Order book error types.

use crate::domain::{FillError, OrderId};
use crate::money::{Money, MoneyError};

/// Errors that can occur within the order book.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum OrderBookError {
    /// Order not found in the book.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// Operation not permitted for the order's current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of the refusal.
        message: String,
    },

    /// Quantity updates may only decrease; raising quantity requires a
    /// cancel and re-submit so time priority is surrendered.
    #[error("quantity increase not allowed: current {current}, requested {requested}")]
    QuantityIncrease { current: Money, requested: Money },

    /// A book invariant was violated. Fatal for the owning instrument loop.
    #[error("book integrity violation: {message}")]
    Integrity {
        /// Which invariant failed.
        message: String,
    },

    /// Snapshot checksum did not match its contents.
    #[error("snapshot checksum mismatch: expected {expected}, computed {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Arithmetic failure during matching or aggregation. Treated as an
    /// integrity error by the orchestrator.
    #[error(transparent)]
    Arithmetic(#[from] MoneyError),

    /// A fill would have breached an order's quantity invariant.
    #[error(transparent)]
    Fill(#[from] FillError),
}
