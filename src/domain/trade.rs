//! Trade record.

use crate::domain::OrderId;
use crate::money::Money;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An executed match between two orders. Immutable once written; trades
/// are append-only in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: Uuid,
    pub symbol: String,
    pub buy_order_id: OrderId,
    pub sell_order_id: OrderId,
    pub buyer_user_id: Uuid,
    pub seller_user_id: Uuid,
    pub buyer_account_id: Uuid,
    pub seller_account_id: Uuid,
    pub quantity: Money,
    /// Execution price; always the resting order's limit price.
    pub price: Money,
    pub timestamp_ms: u64,
    /// Instrument-scoped, strictly increasing.
    pub sequence: u64,
}

impl Trade {
    /// Notional value of this trade (`quantity × price`).
    pub fn notional(&self) -> Result<Money, crate::money::MoneyError> {
        self.quantity.checked_mul(self.price)
    }
}
