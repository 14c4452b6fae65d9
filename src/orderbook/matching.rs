//! Core matching logic: walk the opposite ladder in price-time priority.

use super::book::OrderBook;
use super::error::OrderBookError;
use crate::domain::{Order, Side};
use crate::money::Money;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

/// One execution against a resting order.
#[derive(Debug, Clone)]
pub struct Fill {
    /// Snapshot of the maker order after this fill was applied.
    pub maker: Order,
    /// Executed quantity.
    pub quantity: Money,
    /// Execution price; the maker's limit price, so price improvement
    /// accrues to the taker.
    pub price: Money,
}

/// The result of matching one incoming order.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    /// Executions in the order they occurred.
    pub fills: Vec<Fill>,
    /// `(side, price)` of every level whose displayed state changed.
    /// The side is the resting (maker) side.
    pub touched_levels: Vec<(Side, Money)>,
}

impl MatchOutcome {
    /// Total executed quantity across all fills.
    #[must_use]
    pub fn executed_quantity(&self) -> Money {
        self.fills.iter().map(|f| f.quantity).sum()
    }
}

impl OrderBook {
    /// Match `incoming` against the opposite ladder.
    ///
    /// Walks levels in price priority (asks ascending for a buy, bids
    /// descending for a sell) and orders within a level in FIFO order,
    /// skipping any resting order owned by the same user. Execution price
    /// is always the resting order's price. Resting orders are updated in
    /// place; exhausted ones are removed, and emptied levels are swept
    /// after the walk.
    ///
    /// `incoming` has its `filled_quantity` and status updated. Residual
    /// handling (time-in-force) is the orchestrator's business.
    ///
    /// Deterministic: the same book state and the same incoming order
    /// always produce identical fills.
    pub fn match_order(&self, incoming: &mut Order) -> Result<MatchOutcome, OrderBookError> {
        let mut outcome = MatchOutcome::default();
        let match_side = incoming.side.opposite();
        let ladder = self.ladder(match_side);

        if ladder.is_empty() {
            return Ok(outcome);
        }

        let mut empty_levels: Vec<Money> = Vec::new();

        // SkipMap keeps prices sorted; reversing the bid ladder yields
        // best-first iteration for both sides.
        let level_iter: Box<dyn Iterator<Item = _>> = match incoming.side {
            Side::Buy => Box::new(ladder.iter()),
            Side::Sell => Box::new(ladder.iter().rev()),
        };

        for entry in level_iter {
            let price = *entry.key();
            let crosses = match incoming.side {
                Side::Buy => price <= incoming.limit_price,
                Side::Sell => price >= incoming.limit_price,
            };
            if !crosses {
                break;
            }
            if incoming.remaining().is_zero() {
                break;
            }

            let level: &Arc<_> = entry.value();
            let fills = level.match_against(incoming.user_id, incoming.remaining())?;
            if fills.is_empty() {
                // Only same-user liquidity at this level; keep walking.
                continue;
            }

            let mut level_total = Money::ZERO;
            for level_fill in fills {
                level_total = level_total.saturating_add(level_fill.quantity);
                if level_fill.maker.remaining().is_zero() {
                    self.order_locations.remove(&level_fill.maker.id);
                    self.untrack_user_order(level_fill.maker.user_id, level_fill.maker.id);
                }
                outcome.fills.push(Fill {
                    quantity: level_fill.quantity,
                    price,
                    maker: level_fill.maker,
                });
            }

            incoming.record_fill(level_total)?;
            self.last_trade_price.store(Some(price));
            outcome.touched_levels.push((match_side, price));

            if level.is_empty() {
                empty_levels.push(price);
            }
        }

        // Batch-remove levels emptied by the walk.
        for price in empty_levels {
            ladder.remove(&price);
        }

        if !outcome.fills.is_empty() {
            trace!(
                order_id = %incoming.id,
                executed = %outcome.executed_quantity(),
                fills = outcome.fills.len(),
                "matched incoming order"
            );
        }
        Ok(outcome)
    }

    /// Sum the quantity matchable by an order of `side` at `limit`,
    /// excluding liquidity owned by `user_id`, stopping early once
    /// `needed` is reachable. Used by the fill-or-kill pre-scan.
    #[must_use]
    pub fn matchable_quantity(
        &self,
        side: Side,
        limit: Money,
        user_id: Uuid,
        needed: Money,
    ) -> Money {
        let ladder = self.ladder(side.opposite());
        if ladder.is_empty() {
            return Money::ZERO;
        }

        let level_iter: Box<dyn Iterator<Item = _>> = match side {
            Side::Buy => Box::new(ladder.iter()),
            Side::Sell => Box::new(ladder.iter().rev()),
        };

        let mut available = Money::ZERO;
        for entry in level_iter {
            if available >= needed {
                break;
            }
            let price = *entry.key();
            let crosses = match side {
                Side::Buy => price <= limit,
                Side::Sell => price >= limit,
            };
            if !crosses {
                break;
            }
            available =
                available.saturating_add(entry.value().matchable_quantity_excluding(user_id));
        }
        available
    }
}
