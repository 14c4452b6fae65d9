//! Trade settlement: atomic position, balance, and P&L accounting.
//!
//! The engine mutates records it is handed; making the mutations durable
//! together is the orchestrator's job via the storage transaction. Either
//! both counterparties' updates commit or neither does.

use crate::domain::{Balance, BalanceError, Position, Side, Trade};
use crate::money::{Money, MoneyError};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Settlement failures. Balance breaches at settle time mean the risk
/// gate let something through it should not have; the orchestrator treats
/// them as integrity faults.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[non_exhaustive]
pub enum SettlementError {
    #[error(transparent)]
    Balance(#[from] BalanceError),

    #[error(transparent)]
    Arithmetic(#[from] MoneyError),

    #[error("instrument already settled")]
    AlreadySettled,
}

/// Fees and realized P&L movements produced by settling one trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    pub buyer_fee: Money,
    pub seller_fee: Money,
    /// Realized P&L change for the buyer's position.
    pub buyer_realized_delta: Money,
    /// Realized P&L change for the seller's position.
    pub seller_realized_delta: Money,
}

/// The settlement engine. Stateless apart from its fee policy.
#[derive(Debug, Clone)]
pub struct SettlementEngine {
    /// Fee rate applied to each side's notional.
    fee_rate: Money,
    /// Rounding precision for derived cash amounts.
    precision: u32,
}

impl SettlementEngine {
    #[must_use]
    pub fn new(fee_rate: Money, precision: u32) -> Self {
        Self {
            fee_rate,
            precision,
        }
    }

    /// Fee charged on `notional`, rounded half-up to the configured
    /// precision.
    pub fn fee_on(&self, notional: Money) -> Result<Money, MoneyError> {
        Ok(notional.checked_mul(self.fee_rate)?.round_dp(self.precision))
    }

    /// Apply one fill to `position` and return the realized P&L delta.
    ///
    /// Adding to a position blends the average price; reducing or
    /// reversing realizes `closed × (price − avg) × sign(old)`. A
    /// reversal re-opens the surviving quantity at the trade price.
    /// Unrealized P&L is recomputed against `mark_price` afterwards.
    pub fn apply_fill(
        position: &mut Position,
        side: Side,
        quantity: Money,
        price: Money,
        mark_price: Money,
    ) -> Result<Money, MoneyError> {
        let delta = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        let old_quantity = position.quantity;
        let new_quantity = old_quantity.checked_add(delta)?;
        let mut realized_delta = Money::ZERO;

        if old_quantity.is_zero() {
            position.avg_price = price;
        } else if old_quantity.signum() == delta.signum() {
            // Same direction: blend the average price.
            let old_cost = old_quantity.checked_mul(position.avg_price)?;
            let add_cost = delta.checked_mul(price)?;
            position.avg_price = old_cost.checked_add(add_cost)?.checked_div(new_quantity)?;
        } else {
            // Reducing or reversing: realize P&L on the closed quantity.
            let closed = old_quantity.abs().min(delta.abs());
            let per_unit = price.checked_sub(position.avg_price)?;
            let sign = Money::from_int(i64::from(old_quantity.signum()));
            realized_delta = closed.checked_mul(per_unit)?.checked_mul(sign)?;
            position.realized_pnl = position.realized_pnl.checked_add(realized_delta)?;

            if new_quantity.is_zero() {
                position.avg_price = Money::ZERO;
            } else if new_quantity.signum() != old_quantity.signum() {
                // Reversal opens the opposite position at the trade price.
                position.avg_price = price;
            }
        }

        position.quantity = new_quantity;
        position.remark(mark_price)?;
        Ok(realized_delta)
    }

    /// Settle one trade against both counterparties.
    ///
    /// Buyer pays `notional + fee` from available cash; seller receives
    /// `notional − fee`. Position updates and balance movements for both
    /// sides belong to the same storage transaction.
    pub fn settle(
        &self,
        trade: &Trade,
        buyer_position: &mut Position,
        seller_position: &mut Position,
        buyer_balance: &mut Balance,
        seller_balance: &mut Balance,
        mark_price: Money,
    ) -> Result<SettlementOutcome, SettlementError> {
        let notional = trade.notional()?;
        let fee = self.fee_on(notional)?;

        let buyer_realized_delta = Self::apply_fill(
            buyer_position,
            Side::Buy,
            trade.quantity,
            trade.price,
            mark_price,
        )?;
        let seller_realized_delta = Self::apply_fill(
            seller_position,
            Side::Sell,
            trade.quantity,
            trade.price,
            mark_price,
        )?;

        buyer_balance.debit(notional.checked_add(fee)?)?;
        seller_balance.credit(notional.checked_sub(fee)?)?;

        trace!(
            trade_id = %trade.trade_id,
            notional = %notional,
            fee = %fee,
            "trade settled"
        );
        Ok(SettlementOutcome {
            buyer_fee: fee,
            seller_fee: fee,
            buyer_realized_delta,
            seller_realized_delta,
        })
    }

    /// Settle an open position at instrument expiration.
    ///
    /// Realizes `quantity × (settlement_price − avg)`, moves the cash, and
    /// flattens the position. Returns the realized delta.
    pub fn settle_expiration(
        &self,
        position: &mut Position,
        balance: &mut Balance,
        settlement_price: Money,
    ) -> Result<Money, SettlementError> {
        if position.is_flat() {
            return Ok(Money::ZERO);
        }
        let per_unit = settlement_price.checked_sub(position.avg_price)?;
        let realized = position
            .quantity
            .checked_mul(per_unit)?
            .round_dp(self.precision);

        if realized.is_positive() {
            balance.credit(realized)?;
        } else if realized.is_negative() {
            balance.debit(realized.abs())?;
        }

        position.realized_pnl = position.realized_pnl.checked_add(realized)?;
        position.quantity = Money::ZERO;
        position.avg_price = Money::ZERO;
        position.unrealized_pnl = Money::ZERO;
        Ok(realized)
    }
}
