//! Core error taxonomy.
//!
//! Each kind maps to one handling policy: validation and risk rejections
//! are expected control flow, transient faults are retried with backoff,
//! integrity faults halt the instrument loop. Messages carry no internal
//! identifiers beyond the correlation id.

use crate::money::MoneyError;
use crate::orderbook::OrderBookError;
use crate::settlement::SettlementError;
use crate::storage::StorageError;

/// Error returned by the command ingress.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Malformed or out-of-bounds input. No state change, no retry.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The risk gate refused the order. Audited.
    #[error("risk rejected: {reason}")]
    RiskRejected {
        reason: String,
        risk_score: u8,
    },

    /// Uniqueness or versioning conflict, propagated from storage
    /// unmasked.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Order, account, or instrument does not exist. Never auto-created.
    #[error("not found: {0}")]
    NotFound(String),

    /// Transient storage or bus fault; retried internally, surfaced only
    /// when the retry budget is exhausted.
    #[error("transient failure: {0}")]
    Transient(String),

    /// A core invariant was violated. The instrument loop halts and
    /// refuses further commands until operator intervention.
    #[error("integrity violation: {0}")]
    Integrity(String),

    /// The instrument's command queue is full. Flow control belongs to
    /// the client; nothing was enqueued.
    #[error("busy: command queue full for {symbol}")]
    Busy { symbol: String },

    /// The command's deadline elapsed while it was still queued.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The instrument loop previously halted on an integrity fault.
    #[error("instrument {symbol} is halted pending operator intervention")]
    Halted { symbol: String },
}

impl From<MoneyError> for CoreError {
    fn from(err: MoneyError) -> Self {
        // Arithmetic faults in the hot path are integrity, not validation.
        CoreError::Integrity(err.to_string())
    }
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Transient(msg) => CoreError::Transient(msg),
            StorageError::Conflict(msg) => CoreError::Conflict(msg),
        }
    }
}

impl From<SettlementError> for CoreError {
    fn from(err: SettlementError) -> Self {
        // A settlement that cannot balance means the gate admitted
        // something it should not have.
        CoreError::Integrity(err.to_string())
    }
}

impl From<OrderBookError> for CoreError {
    fn from(err: OrderBookError) -> Self {
        match err {
            OrderBookError::OrderNotFound(id) => CoreError::NotFound(format!("order {id}")),
            OrderBookError::QuantityIncrease { .. } | OrderBookError::InvalidOperation { .. } => {
                CoreError::Validation(err.to_string())
            }
            other => CoreError::Integrity(other.to_string()),
        }
    }
}
