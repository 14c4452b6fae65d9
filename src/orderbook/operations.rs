//! Book mutations: adding, reducing, cancelling, and expiring orders.

use super::book::OrderBook;
use super::error::OrderBookError;
use super::level::PriceLevel;
use crate::domain::{Order, OrderId, OrderStatus, TimeInForce};
use crate::money::Money;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

impl OrderBook {
    /// Enter `order` into the book.
    ///
    /// Assigns the instrument-scoped sequence number and moves the order
    /// to `Working` (or keeps `PartiallyFilled` when a residual enters
    /// after a partial match). Returns the stored order.
    pub fn add_order(&self, mut order: Order) -> Result<Order, OrderBookError> {
        if !order.remaining().is_positive() {
            return Err(OrderBookError::InvalidOperation {
                message: format!("order {} has no remaining quantity to rest", order.id),
            });
        }
        if order.status.is_terminal() {
            return Err(OrderBookError::InvalidOperation {
                message: format!("order {} is terminal ({})", order.id, order.status),
            });
        }

        order.sequence = self.next_sequence();
        if order.status == OrderStatus::Pending {
            order.status = OrderStatus::Working;
        }

        let ladder = self.ladder(order.side);
        let level = ladder
            .get_or_insert(order.limit_price, Arc::new(PriceLevel::new(order.limit_price)))
            .value()
            .clone();

        self.order_locations
            .insert(order.id, (order.limit_price, order.side));
        self.track_user_order(order.user_id, order.id);
        level.push(order.clone());

        trace!(
            order_id = %order.id,
            side = %order.side,
            price = %order.limit_price,
            quantity = %order.remaining(),
            sequence = order.sequence,
            "order entered book"
        );
        Ok(order)
    }

    /// Remove an order from the book, preserving FIFO order among its
    /// siblings. Returns the removed order.
    pub fn remove_order(&self, order_id: OrderId) -> Result<Order, OrderBookError> {
        let (price, side) = self
            .order_locations
            .remove(&order_id)
            .map(|(_, loc)| loc)
            .ok_or(OrderBookError::OrderNotFound(order_id))?;

        let ladder = self.ladder(side);
        let Some(entry) = ladder.get(&price) else {
            return Err(OrderBookError::Integrity {
                message: format!("location index points at missing level {price}"),
            });
        };
        let level = entry.value().clone();
        let Some(order) = level.remove(order_id) else {
            return Err(OrderBookError::Integrity {
                message: format!("order {order_id} indexed at {price} but not queued there"),
            });
        };
        if level.is_empty() {
            ladder.remove(&price);
        }
        self.untrack_user_order(order.user_id, order_id);

        trace!(order_id = %order_id, price = %price, "order removed from book");
        Ok(order)
    }

    /// Down-adjust an order's total quantity in place, keeping its time
    /// priority. Increases are refused; cancel and re-submit instead.
    /// `new_total` must also exceed the filled quantity.
    pub fn update_order_quantity(
        &self,
        order_id: OrderId,
        new_total: Money,
    ) -> Result<Order, OrderBookError> {
        let location = self
            .order_locations
            .get(&order_id)
            .map(|loc| *loc)
            .ok_or(OrderBookError::OrderNotFound(order_id))?;
        let (price, side) = location;

        let ladder = self.ladder(side);
        let entry = ladder
            .get(&price)
            .ok_or_else(|| OrderBookError::Integrity {
                message: format!("location index points at missing level {price}"),
            })?;
        let level = entry.value();

        let current = level
            .get(order_id)
            .ok_or(OrderBookError::OrderNotFound(order_id))?;
        if new_total >= current.total_quantity {
            return Err(OrderBookError::QuantityIncrease {
                current: current.total_quantity,
                requested: new_total,
            });
        }
        if new_total <= current.filled_quantity {
            return Err(OrderBookError::InvalidOperation {
                message: format!(
                    "new quantity {new_total} does not exceed filled {}; cancel instead",
                    current.filled_quantity
                ),
            });
        }

        let updated = level
            .reduce_quantity(order_id, new_total)
            .ok_or(OrderBookError::OrderNotFound(order_id))?;
        trace!(order_id = %order_id, new_total = %new_total, "order quantity reduced");
        Ok(updated)
    }

    /// Cancel every open order for `user_id`, optionally restricted to one
    /// account. Returns the removed orders with `Cancelled` status.
    pub fn cancel_all(&self, user_id: Uuid, account_id: Option<Uuid>) -> Vec<Order> {
        let targets = self.orders_for_user(user_id, account_id);
        let mut cancelled = Vec::with_capacity(targets.len());
        for order in targets {
            if let Ok(mut removed) = self.remove_order(order.id) {
                removed.status = OrderStatus::Cancelled;
                cancelled.push(removed);
            }
        }
        cancelled
    }

    /// Remove every DAY order once the session close has passed. Returns
    /// the removed orders with `Expired` status.
    pub fn expire_day_orders(&self, now_ms: u64) -> Vec<Order> {
        let Some(close) = self.session_close() else {
            return Vec::new();
        };
        if now_ms < close {
            return Vec::new();
        }

        let day_order_ids: Vec<OrderId> = self
            .all_orders()
            .into_iter()
            .filter(|order| order.time_in_force == TimeInForce::Day)
            .map(|order| order.id)
            .collect();

        let mut expired = Vec::with_capacity(day_order_ids.len());
        for id in day_order_ids {
            if let Ok(mut removed) = self.remove_order(id) {
                removed.status = OrderStatus::Expired;
                expired.push(removed);
            }
        }
        expired
    }

    /// Remove every open order on instrument expiration. Returns the
    /// removed orders with `Expired` status.
    pub fn expire_all_orders(&self) -> Vec<Order> {
        let ids: Vec<OrderId> = self.all_orders().into_iter().map(|o| o.id).collect();
        let mut expired = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(mut removed) = self.remove_order(id) {
                removed.status = OrderStatus::Expired;
                expired.push(removed);
            }
        }
        expired
    }
}
