//! The per-instrument command loop.
//!
//! One engine owns one instrument's book and is the only writer of that
//! instrument's positions and balances. Commands are processed to
//! completion, one at a time: risk → match → settle → persist → commit →
//! publish → respond. Events are published only after the storage
//! transaction committed.

use super::command::{Command, CommandResult, PlaceOrder, PlaceOrderResult};
use crate::config::CoreConfig;
use crate::domain::{Balance, Order, OrderId, OrderStatus, Position, Side, TimeInForce, Trade};
use crate::error::CoreError;
use crate::marketdata::{MarketDataPublisher, MarketEvent};
use crate::money::Money;
use crate::orderbook::OrderBook;
use crate::risk::{DailyActivity, RiskContext, RiskGate};
use crate::settlement::SettlementEngine;
use crate::storage::{AuditEntry, AuditKind, Storage, StorageError, StorageTxn};
use crate::utils::current_time_millis;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Commit retry budget for transient storage faults.
const MAX_COMMIT_ATTEMPTS: u32 = 3;

/// Base backoff delay between commit retries.
const COMMIT_RETRY_BASE_MS: u64 = 10;

/// A command paired with its response channel.
pub(super) struct Envelope {
    pub command: Command,
    pub respond: oneshot::Sender<Result<CommandResult, CoreError>>,
}

/// Single-writer engine for one instrument.
pub(super) struct InstrumentEngine {
    symbol: String,
    book: OrderBook,
    storage: Arc<dyn Storage>,
    publisher: Arc<MarketDataPublisher>,
    risk_gate: RiskGate,
    settlement: SettlementEngine,
    config: CoreConfig,
    /// Per-user daily counters, shared across instrument loops. DashMap
    /// entries are only written by the loop handling that user's command.
    activity: Arc<DashMap<Uuid, DailyActivity>>,
    /// Set on the first integrity fault; every later command is refused.
    halted: bool,
}

impl InstrumentEngine {
    pub fn new(
        symbol: String,
        storage: Arc<dyn Storage>,
        publisher: Arc<MarketDataPublisher>,
        config: CoreConfig,
        activity: Arc<DashMap<Uuid, DailyActivity>>,
    ) -> Self {
        // Resume the sequence counter past everything already persisted.
        let start_sequence = storage.max_sequence(&symbol);
        let settlement = SettlementEngine::new(config.fee_rate, config.decimal_precision);
        Self {
            book: OrderBook::with_start_sequence(&symbol, start_sequence),
            symbol,
            storage,
            publisher,
            risk_gate: RiskGate::new(),
            settlement,
            config,
            activity,
            halted: false,
        }
    }

    /// Run the command loop until every sender is gone.
    pub fn spawn(mut self, mut rx: mpsc::Receiver<Envelope>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(symbol = %self.symbol, "instrument loop started");
            while let Some(envelope) = rx.recv().await {
                let result = self.handle(envelope.command).await;
                // A dropped caller is its problem, not the loop's.
                let _ = envelope.respond.send(result);
            }
            info!(symbol = %self.symbol, "instrument loop stopped");
        })
    }

    async fn handle(&mut self, command: Command) -> Result<CommandResult, CoreError> {
        if self.halted {
            return Err(CoreError::Halted {
                symbol: self.symbol.clone(),
            });
        }

        // A deadline that elapsed while the command sat in the queue is a
        // rejection without work. Once processing begins the command runs
        // to completion; matching is short and rollback mid-match would
        // break determinism.
        if let Some(deadline) = command.deadline_ms() {
            if current_time_millis() > deadline {
                return Err(CoreError::DeadlineExceeded);
            }
        }

        let correlation_id = Uuid::new_v4();
        let result = self.dispatch(command, correlation_id).await;

        if let Err(CoreError::Integrity(message)) = &result {
            self.halt(correlation_id, message.clone()).await;
        }
        result
    }

    async fn dispatch(
        &mut self,
        command: Command,
        correlation_id: Uuid,
    ) -> Result<CommandResult, CoreError> {
        match command {
            Command::PlaceOrder(place) => self.place_order(place, correlation_id).await,
            Command::CancelOrder {
                user_id, order_id, ..
            } => self.cancel_order(user_id, order_id, correlation_id).await,
            Command::ModifyOrder {
                user_id,
                order_id,
                new_quantity,
                new_price,
                ..
            } => {
                self.modify_order(user_id, order_id, new_quantity, new_price, correlation_id)
                    .await
            }
            Command::CancelAll {
                user_id,
                account_id,
                ..
            } => self.cancel_all(user_id, account_id, correlation_id).await,
            Command::SettleInstrument {
                settlement_price, ..
            } => {
                self.settle_instrument(settlement_price, correlation_id)
                    .await
            }
            Command::ExpireDayOrders { .. } => self.expire_day_orders(correlation_id).await,
            Command::Snapshot { depth, .. } => {
                Ok(CommandResult::Snapshot(self.book.snapshot(depth)))
            }
        }
    }

    /// Halt the loop: audit, alert subscribers, refuse further commands.
    /// Never silently correct.
    async fn halt(&mut self, correlation_id: Uuid, message: String) {
        self.halted = true;
        error!(symbol = %self.symbol, %message, %correlation_id, "instrument loop halted on integrity fault");

        let entry = AuditEntry::new(correlation_id, AuditKind::IntegrityFault, &message)
            .with_symbol(&self.symbol);
        let commit = self
            .commit_with_retry(correlation_id, |txn| txn.append_audit(entry.clone()))
            .await;
        if let Err(e) = commit {
            error!(symbol = %self.symbol, error = %e, "failed to persist integrity audit");
        }

        self.publisher.publish_batch(&[MarketEvent::IntegrityAlert {
            symbol: self.symbol.clone(),
            message,
            sequence: self.book.next_sequence(),
        }]);
    }

    // ---- PlaceOrder -----------------------------------------------------

    async fn place_order(
        &mut self,
        place: PlaceOrder,
        correlation_id: Uuid,
    ) -> Result<CommandResult, CoreError> {
        let now = current_time_millis();

        // Schema validation: caller-visible rejection, no state change.
        if !place.quantity.is_positive() {
            return Ok(CommandResult::OrderPlaced(Self::rejected_result(
                None,
                "quantity must be positive",
                0,
            )));
        }
        if let Some(display) = place.display_quantity {
            if !display.is_positive() || display > place.quantity {
                return Ok(CommandResult::OrderPlaced(Self::rejected_result(
                    None,
                    "display quantity must be positive and at most the total quantity",
                    0,
                )));
            }
        }

        let order = Order::new(
            place.user_id,
            place.account_id,
            &self.symbol,
            place.side,
            place.price,
            place.quantity,
            place.display_quantity,
            place.time_in_force,
            now,
        );

        let result = self
            .admit_order(order, correlation_id, Vec::new(), Vec::new())
            .await?;
        Ok(CommandResult::OrderPlaced(result))
    }

    /// Risk-gate, match, settle, persist, and publish one order.
    ///
    /// `carry_orders` and `carry_events` come from a price-modify: the
    /// cancelled predecessor rides in the same transaction and its events
    /// precede the new order's.
    async fn admit_order(
        &mut self,
        mut order: Order,
        correlation_id: Uuid,
        carry_orders: Vec<Order>,
        carry_events: Vec<MarketEvent>,
    ) -> Result<PlaceOrderResult, CoreError> {
        let now = order.created_at_ms;
        let instrument = self
            .storage
            .instrument(&self.symbol)
            .ok_or_else(|| CoreError::NotFound(format!("instrument {}", self.symbol)))?;

        let attempt = AuditEntry::new(
            correlation_id,
            AuditKind::CommandAttempt,
            format!(
                "place {} {} {} @ {} ({})",
                order.side, order.total_quantity, self.symbol, order.limit_price,
                order.time_in_force
            ),
        )
        .with_symbol(&self.symbol)
        .with_user(order.user_id);

        // Risk gate.
        let mut activity = self
            .activity
            .get(&order.user_id)
            .map(|a| a.clone())
            .unwrap_or_default();
        activity.roll(now);
        let position = self
            .storage
            .position(order.account_id, &self.symbol)
            .unwrap_or_else(|| Position::flat(order.account_id, &self.symbol));
        let balance = self
            .storage
            .balance(order.account_id, &self.config.default_currency)
            .unwrap_or_else(|| Balance::empty(order.account_id, &self.config.default_currency));
        let relative_spread = match (self.book.spread(), self.book.mid_price()) {
            (Some(spread), Some(mid)) => spread.checked_div(mid).ok(),
            _ => None,
        };
        let portfolio_value = balance
            .total
            .checked_add(position.unrealized_pnl)
            .unwrap_or(balance.total);

        let assessment = self.risk_gate.evaluate(&RiskContext {
            order: &order,
            instrument: &instrument,
            limits: &self.storage.risk_limits(order.user_id),
            position: &position,
            balance: &balance,
            activity: &activity,
            portfolio_value,
            relative_spread,
            now_ms: now,
        })?;

        if !assessment.passed {
            let reason = assessment
                .rejection_reason()
                .unwrap_or("risk rejected")
                .to_string();
            order.status = OrderStatus::Rejected;
            let rejection = AuditEntry::new(correlation_id, AuditKind::RiskRejection, &reason)
                .with_symbol(&self.symbol)
                .with_user(order.user_id);
            let order_clone = order.clone();
            let carry = carry_orders.clone();
            self.commit_with_retry(correlation_id, move |txn| {
                txn.append_audit(attempt.clone());
                txn.append_audit(rejection.clone());
                for carried in &carry {
                    txn.put_order(carried.clone());
                }
                txn.put_order(order_clone.clone());
            })
            .await?;
            let mut events = carry_events;
            events.push(self.order_status_event(&order));
            self.publisher.publish_batch(&events);
            return Ok(Self::rejected_result(
                Some(order.id),
                &reason,
                assessment.risk_score,
            ));
        }

        // Fill-or-kill pre-scan: without enough matchable liquidity the
        // order is rejected with no fills and an unchanged book. Same-user
        // liquidity does not count; it would be skipped while matching.
        if order.time_in_force == TimeInForce::Fok {
            let available = self.book.matchable_quantity(
                order.side,
                order.limit_price,
                order.user_id,
                order.total_quantity,
            );
            if available < order.total_quantity {
                order.status = OrderStatus::Rejected;
                let reason = format!(
                    "insufficient liquidity for FOK: available {available}, required {}",
                    order.total_quantity
                );
                let order_clone = order.clone();
                let carry = carry_orders.clone();
                self.commit_with_retry(correlation_id, move |txn| {
                    txn.append_audit(attempt.clone());
                    for carried in &carry {
                        txn.put_order(carried.clone());
                    }
                    txn.put_order(order_clone.clone());
                })
                .await?;
                let mut events = carry_events;
                events.push(self.order_status_event(&order));
                self.publisher.publish_batch(&events);
                return Ok(Self::rejected_result(
                    Some(order.id),
                    &reason,
                    assessment.risk_score,
                ));
            }
        }

        // Match against the book.
        let outcome = self.book.match_order(&mut order)?;
        let mark_price = self.book.mark_price(&instrument);

        // Build trade records, one sequence each, in execution order.
        let mut trades = Vec::with_capacity(outcome.fills.len());
        for fill in &outcome.fills {
            let (buy_order_id, sell_order_id, buyer, seller) = match order.side {
                Side::Buy => (
                    order.id,
                    fill.maker.id,
                    (order.user_id, order.account_id),
                    (fill.maker.user_id, fill.maker.account_id),
                ),
                Side::Sell => (
                    fill.maker.id,
                    order.id,
                    (fill.maker.user_id, fill.maker.account_id),
                    (order.user_id, order.account_id),
                ),
            };
            trades.push(Trade {
                trade_id: Uuid::new_v4(),
                symbol: self.symbol.clone(),
                buy_order_id,
                sell_order_id,
                buyer_user_id: buyer.0,
                seller_user_id: seller.0,
                buyer_account_id: buyer.1,
                seller_account_id: seller.1,
                quantity: fill.quantity,
                price: fill.price,
                timestamp_ms: now,
                sequence: self.book.next_sequence(),
            });
        }

        // Residual handling per time-in-force.
        let mut residual_entered = false;
        if order.remaining().is_positive() {
            match order.time_in_force {
                TimeInForce::Ioc | TimeInForce::Fok => {
                    order.status = OrderStatus::Cancelled;
                }
                TimeInForce::Gtc | TimeInForce::Day => {
                    order = self.book.add_order(order)?;
                    residual_entered = true;
                }
            }
        }

        // Settle every trade against a working set of positions and
        // balances; both counterparties of each trade commit together.
        let mut positions: HashMap<Uuid, Position> = HashMap::new();
        let mut balances: HashMap<Uuid, Balance> = HashMap::new();
        let mut account_owner: HashMap<Uuid, Uuid> = HashMap::new();
        let mut realized: Vec<(Uuid, Money)> = Vec::new();
        for trade in &trades {
            if trade.buyer_account_id == trade.seller_account_id {
                return Err(CoreError::Integrity(format!(
                    "trade {} matched one account against itself",
                    trade.sequence
                )));
            }
            account_owner.insert(trade.buyer_account_id, trade.buyer_user_id);
            account_owner.insert(trade.seller_account_id, trade.seller_user_id);
            let mut buyer_pos = self.take_position(&mut positions, trade.buyer_account_id);
            let mut seller_pos = self.take_position(&mut positions, trade.seller_account_id);
            let mut buyer_bal = self.take_balance(&mut balances, trade.buyer_account_id);
            let mut seller_bal = self.take_balance(&mut balances, trade.seller_account_id);

            let settlement = self.settlement.settle(
                trade,
                &mut buyer_pos,
                &mut seller_pos,
                &mut buyer_bal,
                &mut seller_bal,
                mark_price,
            )?;
            realized.push((trade.buyer_user_id, settlement.buyer_realized_delta));
            realized.push((trade.seller_user_id, settlement.seller_realized_delta));

            positions.insert(trade.buyer_account_id, buyer_pos);
            positions.insert(trade.seller_account_id, seller_pos);
            balances.insert(trade.buyer_account_id, buyer_bal);
            balances.insert(trade.seller_account_id, seller_bal);
        }

        // Final maker snapshots, last state per order id.
        let mut makers: Vec<Order> = Vec::new();
        for fill in &outcome.fills {
            if let Some(existing) = makers.iter_mut().find(|m| m.id == fill.maker.id) {
                *existing = fill.maker.clone();
            } else {
                makers.push(fill.maker.clone());
            }
        }

        // Persist atomically, then publish.
        {
            let carry = carry_orders.clone();
            let order_clone = order.clone();
            let makers_clone = makers.clone();
            let trades_clone = trades.clone();
            let positions_clone: Vec<Position> = positions.values().cloned().collect();
            let balances_clone: Vec<Balance> = balances.values().cloned().collect();
            let symbol = self.symbol.clone();
            self.commit_with_retry(correlation_id, move |txn| {
                txn.append_audit(attempt.clone());
                for carried in &carry {
                    txn.put_order(carried.clone());
                }
                for maker in &makers_clone {
                    txn.put_order(maker.clone());
                }
                txn.put_order(order_clone.clone());
                for trade in &trades_clone {
                    txn.put_trade(trade.clone());
                    txn.append_audit(
                        AuditEntry::new(
                            correlation_id,
                            AuditKind::TradeExecuted,
                            format!("{} @ {}", trade.quantity, trade.price),
                        )
                        .with_symbol(&symbol)
                        .with_sequence(trade.sequence),
                    );
                }
                for position in &positions_clone {
                    txn.put_position(position.clone());
                }
                for balance in &balances_clone {
                    txn.put_balance(balance.clone());
                }
            })
            .await
            // The book was already mutated by matching; a commit that
            // cannot land leaves book and storage divergent, which only
            // an operator may reconcile.
            .map_err(|e| match e {
                CoreError::Conflict(msg) | CoreError::Transient(msg) => {
                    CoreError::Integrity(format!("commit failed after matching: {msg}"))
                }
                other => other,
            })?;
        }

        // Daily counters reflect committed trades only.
        for trade in &trades {
            let notional = trade.notional()?;
            for user in [trade.buyer_user_id, trade.seller_user_id] {
                let mut entry = self.activity.entry(user).or_default();
                entry.roll(now);
                entry.record_trade(notional);
            }
        }
        for (user, delta) in realized {
            if !delta.is_zero() {
                self.activity.entry(user).or_default().record_realized(delta);
            }
        }

        // Events, in commit order: carried events, trade prints, book
        // deltas, per-user position/balance updates, then order statuses
        // with the incoming order's last.
        let mut events = carry_events;
        for trade in &trades {
            events.push(MarketEvent::TradePrint {
                trade: trade.clone(),
            });
        }

        let mut touched = outcome.touched_levels.clone();
        if residual_entered {
            touched.push((order.side, order.limit_price));
        }
        let mut seen: Vec<(Side, Money)> = Vec::new();
        for (side, price) in touched {
            if seen.contains(&(side, price)) {
                continue;
            }
            seen.push((side, price));
            events.push(self.book_delta_event(side, price));
        }

        for (account_id, position) in &positions {
            let user_id = account_owner.get(account_id).copied().unwrap_or_default();
            events.push(MarketEvent::PositionUpdate {
                symbol: self.symbol.clone(),
                user_id,
                account_id: *account_id,
                quantity: position.quantity,
                avg_price: position.avg_price,
                realized_pnl: position.realized_pnl,
                unrealized_pnl: position.unrealized_pnl,
                sequence: self.book.next_sequence(),
            });
        }
        for (account_id, balance) in &balances {
            let user_id = account_owner.get(account_id).copied().unwrap_or_default();
            events.push(MarketEvent::BalanceUpdate {
                user_id,
                account_id: *account_id,
                currency: balance.currency.clone(),
                total: balance.total,
                available: balance.available,
                reserved: balance.reserved,
                sequence: self.book.next_sequence(),
            });
        }
        for maker in &makers {
            events.push(self.order_status_event(maker));
        }
        events.push(self.order_status_event(&order));
        self.publisher.publish_batch(&events);

        Ok(PlaceOrderResult {
            accepted: true,
            order_id: Some(order.id),
            status: order.status,
            trades,
            reason: None,
            risk_score: assessment.risk_score,
        })
    }

    fn take_position(&self, working: &mut HashMap<Uuid, Position>, account_id: Uuid) -> Position {
        working.remove(&account_id).unwrap_or_else(|| {
            self.storage
                .position(account_id, &self.symbol)
                .unwrap_or_else(|| Position::flat(account_id, &self.symbol))
        })
    }

    fn take_balance(&self, working: &mut HashMap<Uuid, Balance>, account_id: Uuid) -> Balance {
        working.remove(&account_id).unwrap_or_else(|| {
            self.storage
                .balance(account_id, &self.config.default_currency)
                .unwrap_or_else(|| Balance::empty(account_id, &self.config.default_currency))
        })
    }

    fn rejected_result(order_id: Option<OrderId>, reason: &str, risk_score: u8) -> PlaceOrderResult {
        PlaceOrderResult {
            accepted: false,
            order_id,
            status: OrderStatus::Rejected,
            trades: Vec::new(),
            reason: Some(reason.to_string()),
            risk_score,
        }
    }

    fn order_status_event(&self, order: &Order) -> MarketEvent {
        MarketEvent::OrderStatus {
            symbol: self.symbol.clone(),
            order_id: order.id,
            user_id: order.user_id,
            status: order.status,
            filled_quantity: order.filled_quantity,
            total_quantity: order.total_quantity,
            sequence: self.book.next_sequence(),
        }
    }

    fn book_delta_event(&self, side: Side, price: Money) -> MarketEvent {
        let (visible_quantity, order_count) =
            self.book.level_state(side, price).unwrap_or((Money::ZERO, 0));
        MarketEvent::BookDelta {
            symbol: self.symbol.clone(),
            side,
            price,
            visible_quantity,
            order_count,
            sequence: self.book.next_sequence(),
        }
    }

    // ---- CancelOrder ----------------------------------------------------

    async fn cancel_order(
        &mut self,
        user_id: Uuid,
        order_id: OrderId,
        correlation_id: Uuid,
    ) -> Result<CommandResult, CoreError> {
        match self.book.get_order(order_id) {
            Some(open) if open.user_id != user_id => {
                Err(CoreError::NotFound(format!("order {order_id}")))
            }
            Some(_) => {
                let mut removed = self.book.remove_order(order_id)?;
                removed.status = OrderStatus::Cancelled;

                let removed_clone = removed.clone();
                let entry = AuditEntry::new(
                    correlation_id,
                    AuditKind::OrderStatusChange,
                    "cancelled by user",
                )
                .with_symbol(&self.symbol)
                .with_user(user_id);
                self.commit_with_retry(correlation_id, move |txn| {
                    txn.append_audit(entry.clone());
                    txn.put_order(removed_clone.clone());
                })
                .await?;

                let events = vec![
                    self.book_delta_event(removed.side, removed.limit_price),
                    self.order_status_event(&removed),
                ];
                self.publisher.publish_batch(&events);
                Ok(CommandResult::OrderCancelled {
                    order_id,
                    status: OrderStatus::Cancelled,
                })
            }
            None => match self.storage.order(order_id) {
                Some(stored) if stored.user_id != user_id => {
                    Err(CoreError::NotFound(format!("order {order_id}")))
                }
                // Cancelling an already-terminal order is a no-op that
                // reports the terminal status.
                Some(stored) if stored.status.is_terminal() => Ok(CommandResult::OrderCancelled {
                    order_id,
                    status: stored.status,
                }),
                Some(_) => Err(CoreError::Integrity(format!(
                    "order {order_id} is open in storage but absent from the book"
                ))),
                None => Err(CoreError::NotFound(format!("order {order_id}"))),
            },
        }
    }

    // ---- ModifyOrder ----------------------------------------------------

    async fn modify_order(
        &mut self,
        user_id: Uuid,
        order_id: OrderId,
        new_quantity: Option<Money>,
        new_price: Option<Money>,
        correlation_id: Uuid,
    ) -> Result<CommandResult, CoreError> {
        let current = match self.book.get_order(order_id) {
            Some(open) if open.user_id == user_id => open,
            Some(_) => return Err(CoreError::NotFound(format!("order {order_id}"))),
            None => match self.storage.order(order_id) {
                Some(stored) if stored.user_id == user_id && stored.status.is_terminal() => {
                    return Err(CoreError::Validation(format!(
                        "order is terminal ({})",
                        stored.status
                    )));
                }
                _ => return Err(CoreError::NotFound(format!("order {order_id}"))),
            },
        };

        let price_changed = new_price.is_some_and(|p| p != current.limit_price);

        if price_changed {
            let quantity = new_quantity.unwrap_or_else(|| current.remaining());
            if !quantity.is_positive() {
                return Err(CoreError::Validation(
                    "replacement quantity must be positive".to_string(),
                ));
            }
            // A price change surrenders time priority: cancel the resting
            // order and admit a replacement with a fresh id and sequence,
            // all in one transaction.
            let mut removed = self.book.remove_order(order_id)?;
            removed.status = OrderStatus::Cancelled;
            let carry_events = vec![
                self.book_delta_event(removed.side, removed.limit_price),
                self.order_status_event(&removed),
            ];

            let price = new_price.unwrap_or(removed.limit_price);
            let replacement = Order::new(
                removed.user_id,
                removed.account_id,
                &self.symbol,
                removed.side,
                price,
                quantity,
                removed.display_quantity,
                removed.time_in_force,
                current_time_millis(),
            );
            let new_id = replacement.id;
            let placed = self
                .admit_order(replacement, correlation_id, vec![removed], carry_events)
                .await?;
            return Ok(CommandResult::OrderModified {
                order_id,
                new_order_id: Some(new_id),
                status: placed.status,
                trades: placed.trades,
            });
        }

        let Some(quantity) = new_quantity else {
            return Err(CoreError::Validation(
                "modify requires a new price or a new quantity".to_string(),
            ));
        };

        // Quantity-only change: decreases keep the sequence; an increase
        // must cancel and re-submit.
        let updated = self.book.update_order_quantity(order_id, quantity)?;
        let updated_clone = updated.clone();
        let entry = AuditEntry::new(
            correlation_id,
            AuditKind::OrderStatusChange,
            format!("quantity reduced to {quantity}"),
        )
        .with_symbol(&self.symbol)
        .with_user(user_id);
        self.commit_with_retry(correlation_id, move |txn| {
            txn.append_audit(entry.clone());
            txn.put_order(updated_clone.clone());
        })
        .await?;

        let events = vec![
            self.book_delta_event(updated.side, updated.limit_price),
            self.order_status_event(&updated),
        ];
        self.publisher.publish_batch(&events);
        Ok(CommandResult::OrderModified {
            order_id,
            new_order_id: None,
            status: updated.status,
            trades: Vec::new(),
        })
    }

    // ---- CancelAll ------------------------------------------------------

    async fn cancel_all(
        &mut self,
        user_id: Uuid,
        account_id: Option<Uuid>,
        correlation_id: Uuid,
    ) -> Result<CommandResult, CoreError> {
        let cancelled = self.book.cancel_all(user_id, account_id);
        if cancelled.is_empty() {
            return Ok(CommandResult::AllCancelled { cancelled_count: 0 });
        }

        let cancelled_clone = cancelled.clone();
        let entry = AuditEntry::new(
            correlation_id,
            AuditKind::OrderStatusChange,
            format!("cancel-all removed {} orders", cancelled.len()),
        )
        .with_symbol(&self.symbol)
        .with_user(user_id);
        self.commit_with_retry(correlation_id, move |txn| {
            txn.append_audit(entry.clone());
            for order in &cancelled_clone {
                txn.put_order(order.clone());
            }
        })
        .await?;

        let mut events = Vec::new();
        let mut seen: Vec<(Side, Money)> = Vec::new();
        for order in &cancelled {
            let key = (order.side, order.limit_price);
            if !seen.contains(&key) {
                seen.push(key);
                events.push(self.book_delta_event(order.side, order.limit_price));
            }
        }
        for order in &cancelled {
            events.push(self.order_status_event(order));
        }
        self.publisher.publish_batch(&events);

        Ok(CommandResult::AllCancelled {
            cancelled_count: cancelled.len(),
        })
    }

    // ---- SettleInstrument -----------------------------------------------

    async fn settle_instrument(
        &mut self,
        settlement_price: Money,
        correlation_id: Uuid,
    ) -> Result<CommandResult, CoreError> {
        let mut instrument = self
            .storage
            .instrument(&self.symbol)
            .ok_or_else(|| CoreError::NotFound(format!("instrument {}", self.symbol)))?;
        if instrument.settlement_price.is_some() {
            return Err(CoreError::Conflict(format!(
                "instrument {} already settled",
                self.symbol
            )));
        }

        // Expire the whole book first so the deltas reflect the final,
        // empty state.
        let expired = self.book.expire_all_orders();

        // Positions only come into being through trades, so the persisted
        // trade history recovers each account's owning user for event
        // routing.
        let mut account_owner: HashMap<Uuid, Uuid> = HashMap::new();
        for trade in self.storage.trades_for_instrument(&self.symbol, 0) {
            account_owner.insert(trade.buyer_account_id, trade.buyer_user_id);
            account_owner.insert(trade.seller_account_id, trade.seller_user_id);
        }

        let mut settled_positions = Vec::new();
        let mut settled_balances = Vec::new();
        for mut position in self.storage.positions_for_instrument(&self.symbol) {
            let account_id = position.account_id;
            let mut balance = self
                .storage
                .balance(account_id, &self.config.default_currency)
                .unwrap_or_else(|| Balance::empty(account_id, &self.config.default_currency));
            self.settlement
                .settle_expiration(&mut position, &mut balance, settlement_price)?;
            settled_positions.push(position);
            settled_balances.push(balance);
        }

        instrument.is_active = false;
        instrument.settlement_price = Some(settlement_price);

        let positions_settled = settled_positions.len();
        let orders_expired = expired.len();

        {
            let instrument_clone = instrument.clone();
            let expired_clone = expired.clone();
            let positions_clone = settled_positions.clone();
            let balances_clone = settled_balances.clone();
            let symbol = self.symbol.clone();
            self.commit_with_retry(correlation_id, move |txn| {
                txn.append_audit(
                    AuditEntry::new(
                        correlation_id,
                        AuditKind::ExpirationSettlement,
                        format!(
                            "settled {positions_settled} positions, expired {orders_expired} orders"
                        ),
                    )
                    .with_symbol(&symbol),
                );
                txn.put_instrument(instrument_clone.clone());
                for order in &expired_clone {
                    txn.put_order(order.clone());
                }
                for position in &positions_clone {
                    txn.put_position(position.clone());
                }
                for balance in &balances_clone {
                    txn.put_balance(balance.clone());
                }
            })
            .await?;
        }

        let mut events = Vec::new();
        let mut seen: Vec<(Side, Money)> = Vec::new();
        for order in &expired {
            let key = (order.side, order.limit_price);
            if !seen.contains(&key) {
                seen.push(key);
                events.push(self.book_delta_event(order.side, order.limit_price));
            }
        }
        for position in &settled_positions {
            let user_id = account_owner
                .get(&position.account_id)
                .copied()
                .unwrap_or_default();
            events.push(MarketEvent::PositionUpdate {
                symbol: self.symbol.clone(),
                user_id,
                account_id: position.account_id,
                quantity: position.quantity,
                avg_price: position.avg_price,
                realized_pnl: position.realized_pnl,
                unrealized_pnl: position.unrealized_pnl,
                sequence: self.book.next_sequence(),
            });
        }
        for order in &expired {
            events.push(self.order_status_event(order));
        }
        self.publisher.publish_batch(&events);

        Ok(CommandResult::InstrumentSettled {
            positions_settled,
            orders_expired,
        })
    }

    // ---- ExpireDayOrders ------------------------------------------------

    async fn expire_day_orders(
        &mut self,
        correlation_id: Uuid,
    ) -> Result<CommandResult, CoreError> {
        let now = current_time_millis();
        if self.book.session_close().is_none() {
            self.book.set_session_close(now);
        }
        let expired = self.book.expire_day_orders(now);
        if expired.is_empty() {
            return Ok(CommandResult::DayOrdersExpired { expired_count: 0 });
        }

        let expired_clone = expired.clone();
        let entry = AuditEntry::new(
            correlation_id,
            AuditKind::OrderStatusChange,
            format!("session close expired {} DAY orders", expired.len()),
        )
        .with_symbol(&self.symbol);
        self.commit_with_retry(correlation_id, move |txn| {
            txn.append_audit(entry.clone());
            for order in &expired_clone {
                txn.put_order(order.clone());
            }
        })
        .await?;

        let mut events = Vec::new();
        let mut seen: Vec<(Side, Money)> = Vec::new();
        for order in &expired {
            let key = (order.side, order.limit_price);
            if !seen.contains(&key) {
                seen.push(key);
                events.push(self.book_delta_event(order.side, order.limit_price));
            }
        }
        for order in &expired {
            events.push(self.order_status_event(order));
        }
        self.publisher.publish_batch(&events);

        Ok(CommandResult::DayOrdersExpired {
            expired_count: expired.len(),
        })
    }

    // ---- Commit helper --------------------------------------------------

    /// Stage and commit a transaction, retrying transient failures with
    /// exponential backoff up to the budget. The staging closure runs
    /// afresh on every attempt.
    async fn commit_with_retry<F>(
        &self,
        correlation_id: Uuid,
        stage: F,
    ) -> Result<(), CoreError>
    where
        F: Fn(&mut dyn StorageTxn),
    {
        let mut attempt: u32 = 0;
        loop {
            let mut txn = self.storage.begin();
            stage(txn.as_mut());
            match txn.commit() {
                Ok(()) => return Ok(()),
                Err(StorageError::Transient(message)) if attempt + 1 < MAX_COMMIT_ATTEMPTS => {
                    attempt += 1;
                    warn!(
                        symbol = %self.symbol,
                        %correlation_id,
                        attempt,
                        %message,
                        "transient commit failure, retrying"
                    );
                    let delay = COMMIT_RETRY_BASE_MS.saturating_mul(1 << attempt);
                    tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
