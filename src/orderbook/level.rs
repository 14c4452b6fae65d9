//! A single price level: a FIFO queue of resting orders.
//!
//! Iceberg orders keep a displayed slice alongside the full remainder.
//! Only the slice counts toward visible quantity; when a fill consumes it
//! the slice refills from the hidden remainder and the order re-queues at
//! the tail of the level, surrendering time priority to other displayed
//! size at the same price.

use crate::domain::{FillError, Order, OrderId};
use crate::money::Money;
use std::collections::VecDeque;
use std::sync::RwLock;
use uuid::Uuid;

/// A resting order plus its currently displayed slice.
#[derive(Debug, Clone)]
pub(crate) struct RestingOrder {
    pub order: Order,
    pub visible_remaining: Money,
}

impl RestingOrder {
    fn new(order: Order) -> Self {
        let remaining = order.remaining();
        let visible_remaining = match order.display_quantity {
            Some(display) => display.min(remaining),
            None => remaining,
        };
        Self {
            order,
            visible_remaining,
        }
    }

    /// Refill the display slice from the hidden remainder.
    fn replenish(&mut self) {
        let remaining = self.order.remaining();
        self.visible_remaining = match self.order.display_quantity {
            Some(display) => display.min(remaining),
            None => remaining,
        };
    }
}

/// One execution produced while matching against a level.
#[derive(Debug, Clone)]
pub(crate) struct LevelFill {
    /// Snapshot of the maker order after the fill was applied.
    pub maker: Order,
    pub quantity: Money,
}

/// A price level holding resting orders in FIFO order.
#[derive(Debug)]
pub(crate) struct PriceLevel {
    price: Money,
    queue: RwLock<VecDeque<RestingOrder>>,
}

impl PriceLevel {
    pub fn new(price: Money) -> Self {
        Self {
            price,
            queue: RwLock::new(VecDeque::new()),
        }
    }

    #[inline]
    pub fn price(&self) -> Money {
        self.price
    }

    /// Append at the tail, preserving FIFO discipline.
    pub fn push(&self, order: Order) {
        self.queue
            .write()
            .expect("level lock poisoned")
            .push_back(RestingOrder::new(order));
    }

    /// Remove by id, preserving sibling ordering.
    pub fn remove(&self, order_id: OrderId) -> Option<Order> {
        let mut queue = self.queue.write().expect("level lock poisoned");
        let idx = queue.iter().position(|r| r.order.id == order_id)?;
        queue.remove(idx).map(|r| r.order)
    }

    /// Down-adjust an order's total quantity in place, keeping its queue
    /// position. Returns the updated order.
    pub fn reduce_quantity(&self, order_id: OrderId, new_total: Money) -> Option<Order> {
        let mut queue = self.queue.write().expect("level lock poisoned");
        let entry = queue.iter_mut().find(|r| r.order.id == order_id)?;
        entry.order.total_quantity = new_total;
        let remaining = entry.order.remaining();
        if entry.visible_remaining > remaining {
            entry.visible_remaining = remaining;
        }
        Some(entry.order.clone())
    }

    /// Match up to `wanted` against this level in FIFO order, skipping
    /// orders owned by `taker_user_id` (self-match prevention leaves them
    /// resting untouched).
    ///
    /// Fills are produced in display-slice granularity: an iceberg whose
    /// slice is consumed replenishes and re-queues at the tail, so its
    /// hidden remainder is still reachable at this price before any worse
    /// price is touched.
    pub fn match_against(
        &self,
        taker_user_id: Uuid,
        wanted: Money,
    ) -> Result<Vec<LevelFill>, FillError> {
        let mut queue = self.queue.write().expect("level lock poisoned");
        let mut fills = Vec::new();
        let mut outstanding = wanted;
        let mut idx = 0;

        while outstanding.is_positive() && idx < queue.len() {
            if queue[idx].order.user_id == taker_user_id {
                idx += 1;
                continue;
            }

            let entry = &mut queue[idx];
            let fill_qty = outstanding.min(entry.visible_remaining);
            if !fill_qty.is_positive() {
                idx += 1;
                continue;
            }

            entry.order.record_fill(fill_qty)?;
            entry.visible_remaining = entry.visible_remaining.saturating_sub_floor_zero(fill_qty);
            outstanding = outstanding.saturating_sub_floor_zero(fill_qty);
            fills.push(LevelFill {
                maker: entry.order.clone(),
                quantity: fill_qty,
            });

            if entry.order.remaining().is_zero() {
                queue.remove(idx);
                // Do not advance: the next entry shifted into this slot.
            } else if entry.visible_remaining.is_zero() {
                if let Some(mut moved) = queue.remove(idx) {
                    moved.replenish();
                    queue.push_back(moved);
                }
                // Same slot now holds the next sibling.
            }
            // A partially consumed slice keeps its position; either
            // `outstanding` is exhausted or the loop revisits it.
        }

        Ok(fills)
    }

    /// Sum of displayed slices.
    pub fn visible_quantity(&self) -> Money {
        self.queue
            .read()
            .expect("level lock poisoned")
            .iter()
            .map(|r| r.visible_remaining)
            .sum()
    }

    /// Sum of full remainders, hidden size included.
    pub fn total_quantity(&self) -> Money {
        self.queue
            .read()
            .expect("level lock poisoned")
            .iter()
            .map(|r| r.order.remaining())
            .sum()
    }

    /// Total remainder excluding orders owned by `user_id`. Used by the
    /// fill-or-kill pre-scan.
    pub fn matchable_quantity_excluding(&self, user_id: Uuid) -> Money {
        self.queue
            .read()
            .expect("level lock poisoned")
            .iter()
            .filter(|r| r.order.user_id != user_id)
            .map(|r| r.order.remaining())
            .sum()
    }

    pub fn order_count(&self) -> usize {
        self.queue.read().expect("level lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.read().expect("level lock poisoned").is_empty()
    }

    pub fn get(&self, order_id: OrderId) -> Option<Order> {
        self.queue
            .read()
            .expect("level lock poisoned")
            .iter()
            .find(|r| r.order.id == order_id)
            .map(|r| r.order.clone())
    }

    /// Clone out every resting order in queue order.
    pub fn orders(&self) -> Vec<Order> {
        self.queue
            .read()
            .expect("level lock poisoned")
            .iter()
            .map(|r| r.order.clone())
            .collect()
    }

    /// Check level-local invariants: positive remainders and FIFO sequence
    /// order among non-iceberg orders (icebergs may have re-queued).
    pub fn check_invariants(&self) -> Result<(), String> {
        let queue = self.queue.read().expect("level lock poisoned");
        let mut last_seq: Option<u64> = None;
        for resting in queue.iter() {
            if !resting.order.remaining().is_positive() {
                return Err(format!(
                    "order {} rests with no remaining quantity",
                    resting.order.id
                ));
            }
            if resting.visible_remaining > resting.order.remaining() {
                return Err(format!(
                    "order {} displays more than its remainder",
                    resting.order.id
                ));
            }
            if !resting.order.is_iceberg() {
                if let Some(prev) = last_seq {
                    if resting.order.sequence <= prev {
                        return Err(format!(
                            "FIFO breach at price {}: sequence {} after {}",
                            self.price, resting.order.sequence, prev
                        ));
                    }
                }
                last_seq = Some(resting.order.sequence);
            }
        }
        Ok(())
    }
}
