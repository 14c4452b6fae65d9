//! Core order book: bid/ask ladders with price-time priority.

use super::error::OrderBookError;
use super::level::PriceLevel;
use crate::domain::{Instrument, Order, OrderId, Side};
use crate::money::Money;
use crossbeam::atomic::AtomicCell;
use crossbeam_skiplist::SkipMap;
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use uuid::Uuid;

/// The order book manages bid and ask price levels for one instrument.
///
/// Ladders are concurrent ordered maps (skip lists) keyed by price, so
/// matching walks levels in priority order without sorting: asks iterate
/// ascending, bids descending. A secondary index maps order ids to their
/// `(price, side)` location for O(log n) cancellation, and a per-user
/// index backs user-scoped mass cancel.
///
/// The book is exclusively owned by its instrument's command loop; other
/// components only ever see snapshots and events.
pub struct OrderBook {
    /// The symbol this book trades.
    pub(super) symbol: String,

    /// Bid side price levels, iterated in reverse for best-first order.
    pub(super) bids: SkipMap<Money, Arc<PriceLevel>>,

    /// Ask side price levels, naturally best-first.
    pub(super) asks: SkipMap<Money, Arc<PriceLevel>>,

    /// Order id to (price, side) for fast cancel and modify.
    pub(super) order_locations: DashMap<OrderId, (Money, Side)>,

    /// User id to open order ids, for cancel-all.
    pub(super) user_orders: DashMap<Uuid, Vec<OrderId>>,

    /// Instrument-scoped monotonic sequence. Assigned to book entries,
    /// trades, and published events; never reset except on cold start
    /// from the maximum persisted value.
    pub(super) sequence: AtomicU64,

    /// The last price at which a trade occurred.
    pub(super) last_trade_price: AtomicCell<Option<Money>>,

    /// Session close timestamp for DAY order expiry, if set.
    pub(super) session_close_ms: AtomicU64,

    /// Whether a session close is configured.
    pub(super) has_session_close: AtomicBool,
}

impl OrderBook {
    /// Create an empty book for `symbol`.
    #[must_use]
    pub fn new(symbol: &str) -> Self {
        Self::with_start_sequence(symbol, 0)
    }

    /// Create an empty book resuming the sequence counter from a persisted
    /// high-water mark.
    #[must_use]
    pub fn with_start_sequence(symbol: &str, start_sequence: u64) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: SkipMap::new(),
            asks: SkipMap::new(),
            order_locations: DashMap::new(),
            user_orders: DashMap::new(),
            sequence: AtomicU64::new(start_sequence),
            last_trade_price: AtomicCell::new(None),
            session_close_ms: AtomicU64::new(0),
            has_session_close: AtomicBool::new(false),
        }
    }

    /// The symbol this book trades.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Allocate the next sequence number.
    #[inline]
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// The most recently allocated sequence number.
    #[must_use]
    #[inline]
    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// Highest buy price, if any bids rest.
    #[must_use]
    pub fn best_bid(&self) -> Option<Money> {
        self.bids.back().map(|entry| *entry.key())
    }

    /// Lowest sell price, if any asks rest.
    #[must_use]
    pub fn best_ask(&self) -> Option<Money> {
        self.asks.front().map(|entry| *entry.key())
    }

    /// `best_ask − best_bid`, when both sides rest.
    #[must_use]
    pub fn spread(&self) -> Option<Money> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => ask.checked_sub(bid).ok(),
            _ => None,
        }
    }

    /// Midpoint of best bid and ask.
    #[must_use]
    pub fn mid_price(&self) -> Option<Money> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid
                .saturating_add(ask)
                .checked_div(Money::from_int(2))
                .ok(),
            _ => None,
        }
    }

    /// Price of the last trade, if one has occurred.
    #[must_use]
    pub fn last_trade_price(&self) -> Option<Money> {
        self.last_trade_price.load()
    }

    /// Reference price for unrealized P&L: last trade, then mid, then the
    /// midpoint of the instrument's price band.
    #[must_use]
    pub fn mark_price(&self, instrument: &Instrument) -> Money {
        self.last_trade_price()
            .or_else(|| self.mid_price())
            .unwrap_or_else(|| instrument.band_midpoint())
    }

    /// Configure the session close instant used by DAY order expiry.
    pub fn set_session_close(&self, timestamp_ms: u64) {
        self.session_close_ms.store(timestamp_ms, Ordering::SeqCst);
        self.has_session_close.store(true, Ordering::SeqCst);
    }

    /// The configured session close, if any.
    #[must_use]
    pub fn session_close(&self) -> Option<u64> {
        if self.has_session_close.load(Ordering::SeqCst) {
            Some(self.session_close_ms.load(Ordering::SeqCst))
        } else {
            None
        }
    }

    /// Number of open orders resting in the book.
    #[must_use]
    pub fn open_order_count(&self) -> usize {
        self.order_locations.len()
    }

    /// Displayed quantity and order count at one level, if it exists.
    #[must_use]
    pub fn level_state(&self, side: Side, price: Money) -> Option<(Money, usize)> {
        let ladder = self.ladder(side);
        ladder
            .get(&price)
            .map(|entry| (entry.value().visible_quantity(), entry.value().order_count()))
    }

    pub(super) fn ladder(&self, side: Side) -> &SkipMap<Money, Arc<PriceLevel>> {
        match side {
            Side::Buy => &self.bids,
            Side::Sell => &self.asks,
        }
    }

    pub(super) fn track_user_order(&self, user_id: Uuid, order_id: OrderId) {
        self.user_orders.entry(user_id).or_default().push(order_id);
    }

    pub(super) fn untrack_user_order(&self, user_id: Uuid, order_id: OrderId) {
        if let Some(mut ids) = self.user_orders.get_mut(&user_id) {
            ids.retain(|id| *id != order_id);
            let now_empty = ids.is_empty();
            drop(ids);
            if now_empty {
                self.user_orders.remove_if(&user_id, |_, ids| ids.is_empty());
            }
        }
    }

    /// Clone out an open order by id.
    #[must_use]
    pub fn get_order(&self, order_id: OrderId) -> Option<Order> {
        let location = self.order_locations.get(&order_id)?;
        let (price, side) = *location;
        drop(location);
        self.ladder(side).get(&price)?.value().get(order_id)
    }

    /// Clone out every open order for `user_id`, optionally filtered by
    /// account.
    #[must_use]
    pub fn orders_for_user(&self, user_id: Uuid, account_id: Option<Uuid>) -> Vec<Order> {
        let ids: Vec<OrderId> = self
            .user_orders
            .get(&user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| self.get_order(id))
            .filter(|order| account_id.is_none_or(|acct| order.account_id == acct))
            .collect()
    }

    /// Clone out every open order in the book, bids then asks, in
    /// price-priority order.
    #[must_use]
    pub fn all_orders(&self) -> Vec<Order> {
        let mut out = Vec::with_capacity(self.order_locations.len());
        for entry in self.bids.iter().rev() {
            out.extend(entry.value().orders());
        }
        for entry in self.asks.iter() {
            out.extend(entry.value().orders());
        }
        out
    }

    /// Assert book invariants. Used by tests and the periodic integrity
    /// audit; a failure is fatal for the instrument loop.
    pub fn validate_integrity(&self) -> Result<(), OrderBookError> {
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            // Self-match prevention skips same-user liquidity instead of
            // cancelling it, so a book may legitimately cross on orders
            // that all belong to one user. Any other crossing is fatal.
            if bid >= ask && !self.crossing_is_single_user(bid, ask) {
                return Err(OrderBookError::Integrity {
                    message: format!("crossed book: best bid {bid} >= best ask {ask}"),
                });
            }
        }

        for (ladder, side) in [(&self.bids, Side::Buy), (&self.asks, Side::Sell)] {
            for entry in ladder.iter() {
                let level = entry.value();
                if level.is_empty() {
                    return Err(OrderBookError::Integrity {
                        message: format!("empty level left in ladder at {}", entry.key()),
                    });
                }
                level
                    .check_invariants()
                    .map_err(|message| OrderBookError::Integrity { message })?;
                for order in level.orders() {
                    match self.order_locations.get(&order.id) {
                        Some(loc) if *loc == (level.price(), side) => {}
                        _ => {
                            return Err(OrderBookError::Integrity {
                                message: format!("order {} missing from location index", order.id),
                            });
                        }
                    }
                }
            }
        }

        let indexed = self.order_locations.len();
        let queued: usize = self
            .bids
            .iter()
            .chain(self.asks.iter())
            .map(|entry| entry.value().order_count())
            .sum();
        if indexed != queued {
            return Err(OrderBookError::Integrity {
                message: format!("location index holds {indexed} orders, ladders hold {queued}"),
            });
        }

        Ok(())
    }

    /// Whether every order resting in the crossed region `[ask, bid]`
    /// belongs to a single user.
    fn crossing_is_single_user(&self, best_bid: Money, best_ask: Money) -> bool {
        let mut owner: Option<Uuid> = None;
        for entry in self.bids.range(best_ask..) {
            for order in entry.value().orders() {
                match owner {
                    None => owner = Some(order.user_id),
                    Some(user) if user == order.user_id => {}
                    Some(_) => return false,
                }
            }
        }
        for entry in self.asks.range(..=best_bid) {
            for order in entry.value().orders() {
                match owner {
                    None => owner = Some(order.user_id),
                    Some(user) if user == order.user_id => {}
                    Some(_) => return false,
                }
            }
        }
        true
    }
}
