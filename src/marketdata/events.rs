//! Market event types.
//!
//! Every event carries the instrument-scoped sequence assigned by the
//! orchestrator at commit time. Consumers deduplicate by sequence:
//! anything at or below the last seen value is discarded.

use crate::domain::{OrderId, OrderStatus, Side, Trade};
use crate::money::Money;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A sequenced market-data event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MarketEvent {
    /// One price level's displayed state changed.
    BookDelta {
        symbol: String,
        side: Side,
        price: Money,
        /// Displayed quantity now resting at the level; zero when the
        /// level vanished.
        visible_quantity: Money,
        order_count: usize,
        sequence: u64,
    },

    /// A trade print.
    TradePrint {
        trade: Trade,
    },

    /// An order's lifecycle state changed. Routed to the owning user.
    OrderStatus {
        symbol: String,
        order_id: OrderId,
        user_id: Uuid,
        status: OrderStatus,
        filled_quantity: Money,
        total_quantity: Money,
        sequence: u64,
    },

    /// A position changed. Routed to the owning user.
    PositionUpdate {
        symbol: String,
        user_id: Uuid,
        account_id: Uuid,
        quantity: Money,
        avg_price: Money,
        realized_pnl: Money,
        unrealized_pnl: Money,
        sequence: u64,
    },

    /// A balance changed. Routed to the owning user.
    BalanceUpdate {
        user_id: Uuid,
        account_id: Uuid,
        currency: String,
        total: Money,
        available: Money,
        reserved: Money,
        sequence: u64,
    },

    /// An instrument loop halted on an integrity fault. Operators only.
    IntegrityAlert {
        symbol: String,
        message: String,
        sequence: u64,
    },
}

impl MarketEvent {
    /// The sequence number carried by this event.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            MarketEvent::BookDelta { sequence, .. }
            | MarketEvent::OrderStatus { sequence, .. }
            | MarketEvent::PositionUpdate { sequence, .. }
            | MarketEvent::BalanceUpdate { sequence, .. }
            | MarketEvent::IntegrityAlert { sequence, .. } => *sequence,
            MarketEvent::TradePrint { trade } => trade.sequence,
        }
    }

    /// The topic this event is published on.
    #[must_use]
    pub fn topic(&self) -> String {
        match self {
            MarketEvent::BookDelta { symbol, .. } => format!("orderbook.{symbol}"),
            MarketEvent::TradePrint { trade } => format!("trades.{}", trade.symbol),
            MarketEvent::OrderStatus { user_id, .. }
            | MarketEvent::PositionUpdate { user_id, .. }
            | MarketEvent::BalanceUpdate { user_id, .. } => format!("user.{user_id}"),
            MarketEvent::IntegrityAlert { symbol, .. } => format!("integrity.{symbol}"),
        }
    }

    /// The instrument symbol, where the event has one.
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            MarketEvent::BookDelta { symbol, .. }
            | MarketEvent::OrderStatus { symbol, .. }
            | MarketEvent::PositionUpdate { symbol, .. }
            | MarketEvent::IntegrityAlert { symbol, .. } => Some(symbol),
            MarketEvent::TradePrint { trade } => Some(&trade.symbol),
            MarketEvent::BalanceUpdate { .. } => None,
        }
    }
}
