//! Order record and its lifecycle state machine.

use crate::money::Money;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique order identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct OrderId(pub Uuid);

impl OrderId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        OrderId(Uuid::new_v4())
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the book an order rests on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// The side an incoming order matches against.
    #[must_use]
    #[inline]
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Lifetime rule for a resting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TimeInForce {
    /// Good till cancelled: residual persists until explicitly cancelled.
    #[default]
    Gtc,
    /// Immediate or cancel: any residual after the initial walk is cancelled.
    Ioc,
    /// Fill or kill: rejected unless the full quantity is matchable.
    Fok,
    /// As GTC, but auto-cancelled at session close.
    Day,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeInForce::Gtc => write!(f, "GTC"),
            TimeInForce::Ioc => write!(f, "IOC"),
            TimeInForce::Fok => write!(f, "FOK"),
            TimeInForce::Day => write!(f, "DAY"),
        }
    }
}

/// Order lifecycle state.
///
/// `Filled`, `Cancelled`, `Rejected`, and `Expired` are terminal and
/// absorbing: no transition leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Working,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl OrderStatus {
    /// Whether this state admits no further transitions.
    #[must_use]
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::Expired
        )
    }

    /// Whether the lifecycle state machine permits `self → next`.
    #[must_use]
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match self {
            Pending => matches!(
                next,
                Rejected | Working | PartiallyFilled | Filled | Cancelled
            ),
            Working => matches!(next, PartiallyFilled | Filled | Cancelled | Expired),
            PartiallyFilled => matches!(next, Filled | Cancelled | Expired),
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Working => "WORKING",
            OrderStatus::PartiallyFilled => "PARTIALLY_FILLED",
            OrderStatus::Filled => "FILLED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Rejected => "REJECTED",
            OrderStatus::Expired => "EXPIRED",
        };
        write!(f, "{s}")
    }
}

/// A limit order.
///
/// `sequence` is zero until the order enters a book; the book assigns the
/// instrument-scoped monotonic value at entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub user_id: Uuid,
    pub account_id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub limit_price: Money,
    pub total_quantity: Money,
    pub filled_quantity: Money,
    /// Displayed slice for iceberg orders. `None` means fully visible.
    pub display_quantity: Option<Money>,
    pub time_in_force: TimeInForce,
    pub created_at_ms: u64,
    pub sequence: u64,
    pub status: OrderStatus,
}

impl Order {
    /// Build a new order in `Pending` state.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        user_id: Uuid,
        account_id: Uuid,
        symbol: impl Into<String>,
        side: Side,
        limit_price: Money,
        total_quantity: Money,
        display_quantity: Option<Money>,
        time_in_force: TimeInForce,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: OrderId::new(),
            user_id,
            account_id,
            symbol: symbol.into(),
            side,
            limit_price,
            total_quantity,
            filled_quantity: Money::ZERO,
            display_quantity,
            time_in_force,
            created_at_ms,
            sequence: 0,
            status: OrderStatus::Pending,
        }
    }

    /// Unfilled quantity.
    #[must_use]
    #[inline]
    pub fn remaining(&self) -> Money {
        self.total_quantity
            .saturating_sub_floor_zero(self.filled_quantity)
    }

    #[must_use]
    #[inline]
    pub fn is_iceberg(&self) -> bool {
        match self.display_quantity {
            Some(display) => display < self.total_quantity,
            None => false,
        }
    }

    /// Record an execution of `quantity` against this order and move the
    /// lifecycle state accordingly. Quantities exceeding the remainder are
    /// an invariant breach and are refused.
    pub fn record_fill(&mut self, quantity: Money) -> Result<(), FillError> {
        if !quantity.is_positive() {
            return Err(FillError::NonPositiveQuantity);
        }
        if quantity > self.remaining() {
            return Err(FillError::Overfill {
                remaining: self.remaining(),
                requested: quantity,
            });
        }
        self.filled_quantity = self.filled_quantity.saturating_add(quantity);
        self.status = if self.filled_quantity == self.total_quantity {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        Ok(())
    }

    /// `filledQuantity ≤ totalQuantity` and `FILLED ⇔ filled = total`.
    #[must_use]
    pub fn invariants_hold(&self) -> bool {
        if self.filled_quantity > self.total_quantity {
            return false;
        }
        let full = self.filled_quantity == self.total_quantity;
        match self.status {
            OrderStatus::Filled => full,
            OrderStatus::PartiallyFilled | OrderStatus::Working => !full,
            _ => true,
        }
    }
}

/// Invariant-violating fill attempts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FillError {
    #[error("fill quantity must be positive")]
    NonPositiveQuantity,

    #[error("fill exceeds remaining quantity: remaining {remaining}, requested {requested}")]
    Overfill { remaining: Money, requested: Money },
}
