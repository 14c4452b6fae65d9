//! Storage port.
//!
//! The core talks to persistence only through these traits. A transaction
//! stages writes and applies them atomically on commit; the single-writer
//! orchestrator preserves serializable semantics even when the backing
//! store cannot.

mod memory;

pub use memory::MemoryStore;

use crate::domain::{Balance, Instrument, Order, OrderId, Position, Trade};
use crate::risk::RiskLimits;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Storage failures, split by retry policy: transient errors are retried
/// with backoff by the orchestrator, conflicts propagate to the caller
/// unmasked.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum StorageError {
    /// Timeout, lost connection, or other retriable fault.
    #[error("transient storage failure: {0}")]
    Transient(String),

    /// Uniqueness or versioning conflict.
    #[error("storage conflict: {0}")]
    Conflict(String),
}

/// Why an audit entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    CommandAttempt,
    RiskRejection,
    OrderStatusChange,
    TradeExecuted,
    ExpirationSettlement,
    IntegrityFault,
}

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp_ms: u64,
    /// Correlates every entry written while handling one command.
    pub correlation_id: Uuid,
    pub kind: AuditKind,
    pub symbol: Option<String>,
    pub user_id: Option<Uuid>,
    pub sequence: Option<u64>,
    pub detail: String,
}

impl AuditEntry {
    /// Build an entry stamped with the current time.
    #[must_use]
    pub fn new(correlation_id: Uuid, kind: AuditKind, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp_ms: crate::utils::current_time_millis(),
            correlation_id,
            kind,
            symbol: None,
            user_id: None,
            sequence: None,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// Read access plus transaction creation.
///
/// Reads reflect the last committed state; uncommitted transactions are
/// invisible. The mutating command path reads through this port, never a
/// cache.
pub trait Storage: Send + Sync {
    /// Begin a transaction. Writes staged on it become visible atomically
    /// at commit.
    fn begin(&self) -> Box<dyn StorageTxn + '_>;

    fn order(&self, id: OrderId) -> Option<Order>;

    /// Non-terminal orders for one instrument.
    fn open_orders(&self, symbol: &str) -> Vec<Order>;

    fn position(&self, account_id: Uuid, symbol: &str) -> Option<Position>;

    /// Every non-flat position on one instrument.
    fn positions_for_instrument(&self, symbol: &str) -> Vec<Position>;

    fn balance(&self, account_id: Uuid, currency: &str) -> Option<Balance>;

    fn instrument(&self, symbol: &str) -> Option<Instrument>;

    /// Per-user limits for the risk gate. Absent users get the defaults.
    fn risk_limits(&self, user_id: Uuid) -> RiskLimits;

    /// Trades for one instrument with `sequence > from_sequence`, in
    /// sequence order.
    fn trades_for_instrument(&self, symbol: &str, from_sequence: u64) -> Vec<Trade>;

    /// Highest sequence persisted for one instrument; the orchestrator
    /// resumes its counter from this on cold start.
    fn max_sequence(&self, symbol: &str) -> u64;
}

/// A staged, atomically-committed set of writes.
pub trait StorageTxn: Send {
    fn put_order(&mut self, order: Order);

    /// Trades are append-only; committing a duplicate (symbol, sequence)
    /// is a conflict.
    fn put_trade(&mut self, trade: Trade);

    fn put_position(&mut self, position: Position);

    fn put_balance(&mut self, balance: Balance);

    fn put_instrument(&mut self, instrument: Instrument);

    fn append_audit(&mut self, entry: AuditEntry);

    /// Apply every staged write atomically.
    fn commit(self: Box<Self>) -> Result<(), StorageError>;

    /// Discard every staged write.
    fn rollback(self: Box<Self>);
}
