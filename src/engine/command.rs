//! Command and result shapes accepted by the orchestrator.
//!
//! These are plain structured records; their wire encoding is the host's
//! business.

use crate::domain::{OrderId, OrderStatus, Side, TimeInForce, Trade};
use crate::money::Money;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Place a new limit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub time_in_force: TimeInForce,
    pub quantity: Money,
    pub price: Money,
    /// Displayed slice for iceberg orders.
    pub display_quantity: Option<Money>,
    /// Epoch milliseconds after which the command is dropped unprocessed.
    pub deadline_ms: Option<u64>,
}

/// A command submitted to an instrument's loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    PlaceOrder(PlaceOrder),

    CancelOrder {
        user_id: Uuid,
        order_id: OrderId,
        deadline_ms: Option<u64>,
    },

    /// Quantity-only decreases keep time priority; a price change is a
    /// cancel plus re-submit and yields a fresh order id.
    ModifyOrder {
        user_id: Uuid,
        order_id: OrderId,
        new_quantity: Option<Money>,
        new_price: Option<Money>,
        deadline_ms: Option<u64>,
    },

    /// Cancel every open order for a user, optionally restricted to one
    /// account and/or instrument. Without a symbol the router fans out to
    /// every instrument loop.
    CancelAll {
        user_id: Uuid,
        account_id: Option<Uuid>,
        symbol: Option<String>,
        deadline_ms: Option<u64>,
    },

    /// Expiration settlement at an operator-supplied price.
    SettleInstrument {
        symbol: String,
        settlement_price: Money,
        deadline_ms: Option<u64>,
    },

    /// Operator-driven session close: expires resting DAY orders.
    ExpireDayOrders {
        symbol: String,
        deadline_ms: Option<u64>,
    },

    /// Depth snapshot for subscriber resynchronization. Served by the
    /// instrument loop so it carries a sequence consistent with the
    /// delta stream.
    Snapshot {
        symbol: String,
        depth: usize,
        deadline_ms: Option<u64>,
    },
}

impl Command {
    /// The command's deadline, if any.
    #[must_use]
    pub fn deadline_ms(&self) -> Option<u64> {
        match self {
            Command::PlaceOrder(place) => place.deadline_ms,
            Command::CancelOrder { deadline_ms, .. }
            | Command::ModifyOrder { deadline_ms, .. }
            | Command::CancelAll { deadline_ms, .. }
            | Command::SettleInstrument { deadline_ms, .. }
            | Command::ExpireDayOrders { deadline_ms, .. }
            | Command::Snapshot { deadline_ms, .. } => *deadline_ms,
        }
    }
}

/// Outcome of a [`PlaceOrder`] command.
///
/// Risk and validation rejections are reported here with
/// `accepted = false`; they are expected control flow, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceOrderResult {
    pub accepted: bool,
    pub order_id: Option<OrderId>,
    pub status: OrderStatus,
    pub trades: Vec<Trade>,
    pub reason: Option<String>,
    pub risk_score: u8,
}

/// Outcome of any command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CommandResult {
    OrderPlaced(PlaceOrderResult),

    OrderCancelled {
        order_id: OrderId,
        status: OrderStatus,
    },

    OrderModified {
        order_id: OrderId,
        /// Present when a price change produced a replacement order.
        new_order_id: Option<OrderId>,
        status: OrderStatus,
        trades: Vec<Trade>,
    },

    AllCancelled {
        cancelled_count: usize,
    },

    InstrumentSettled {
        positions_settled: usize,
        orders_expired: usize,
    },

    DayOrdersExpired {
        expired_count: usize,
    },

    Snapshot(crate::orderbook::OrderBookSnapshot),
}
