//! In-memory reference implementation of the storage port.
//!
//! Backs tests and single-process deployments. Commit takes one write
//! lock and applies every staged write, so a reader never observes a
//! half-applied transaction.

use super::{AuditEntry, Storage, StorageError, StorageTxn};
use crate::domain::{Balance, Instrument, Order, OrderId, Position, Trade};
use crate::money::Money;
use crate::risk::RiskLimits;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    orders: HashMap<OrderId, Order>,
    /// Keyed by (symbol, sequence) so per-instrument range reads come out
    /// in sequence order.
    trades: BTreeMap<(String, u64), Trade>,
    positions: HashMap<(Uuid, String), Position>,
    balances: HashMap<(Uuid, String), Balance>,
    instruments: HashMap<String, Instrument>,
    risk_limits: HashMap<Uuid, RiskLimits>,
    audit: Vec<AuditEntry>,
}

/// In-memory storage.
#[derive(Default, Clone)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

enum Write {
    Order(Order),
    Trade(Trade),
    Position(Position),
    Balance(Balance),
    Instrument(Instrument),
    Audit(AuditEntry),
}

/// A staged transaction against a [`MemoryStore`].
pub struct MemoryTxn<'a> {
    tables: &'a RwLock<Tables>,
    staged: Vec<Write>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Host-side setup: register an instrument.
    pub fn create_instrument(&self, instrument: Instrument) -> Result<(), StorageError> {
        let mut tables = self.tables.write().expect("store lock poisoned");
        if tables.instruments.contains_key(&instrument.symbol) {
            return Err(StorageError::Conflict(format!(
                "instrument {} already exists",
                instrument.symbol
            )));
        }
        tables.instruments.insert(instrument.symbol.clone(), instrument);
        Ok(())
    }

    /// Host-side setup: fund an account with available cash.
    pub fn fund_account(&self, account_id: Uuid, currency: &str, amount: Money) {
        let mut tables = self.tables.write().expect("store lock poisoned");
        let balance = tables
            .balances
            .entry((account_id, currency.to_string()))
            .or_insert_with(|| Balance::empty(account_id, currency));
        // Setup-time credit; the settlement path uses checked mutations.
        balance.total = balance.total.saturating_add(amount);
        balance.available = balance.available.saturating_add(amount);
    }

    /// Host-side setup: override a user's risk limits.
    pub fn set_risk_limits(&self, user_id: Uuid, limits: RiskLimits) {
        self.tables
            .write()
            .expect("store lock poisoned")
            .risk_limits
            .insert(user_id, limits);
    }

    /// Every audit entry written so far, in write order.
    #[must_use]
    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.tables
            .read()
            .expect("store lock poisoned")
            .audit
            .clone()
    }

    /// Sum of positions per instrument, for conservation checks.
    #[must_use]
    pub fn position_sum(&self, symbol: &str) -> Money {
        self.tables
            .read()
            .expect("store lock poisoned")
            .positions
            .iter()
            .filter(|((_, s), _)| s == symbol)
            .map(|(_, p)| p.quantity)
            .sum()
    }
}

impl Storage for MemoryStore {
    fn begin(&self) -> Box<dyn StorageTxn + '_> {
        Box::new(MemoryTxn {
            tables: &self.tables,
            staged: Vec::new(),
        })
    }

    fn order(&self, id: OrderId) -> Option<Order> {
        self.tables
            .read()
            .expect("store lock poisoned")
            .orders
            .get(&id)
            .cloned()
    }

    fn open_orders(&self, symbol: &str) -> Vec<Order> {
        self.tables
            .read()
            .expect("store lock poisoned")
            .orders
            .values()
            .filter(|o| o.symbol == symbol && !o.status.is_terminal())
            .cloned()
            .collect()
    }

    fn position(&self, account_id: Uuid, symbol: &str) -> Option<Position> {
        self.tables
            .read()
            .expect("store lock poisoned")
            .positions
            .get(&(account_id, symbol.to_string()))
            .cloned()
    }

    fn positions_for_instrument(&self, symbol: &str) -> Vec<Position> {
        self.tables
            .read()
            .expect("store lock poisoned")
            .positions
            .iter()
            .filter(|((_, s), p)| s == symbol && !p.is_flat())
            .map(|(_, p)| p.clone())
            .collect()
    }

    fn balance(&self, account_id: Uuid, currency: &str) -> Option<Balance> {
        self.tables
            .read()
            .expect("store lock poisoned")
            .balances
            .get(&(account_id, currency.to_string()))
            .cloned()
    }

    fn instrument(&self, symbol: &str) -> Option<Instrument> {
        self.tables
            .read()
            .expect("store lock poisoned")
            .instruments
            .get(symbol)
            .cloned()
    }

    fn risk_limits(&self, user_id: Uuid) -> RiskLimits {
        self.tables
            .read()
            .expect("store lock poisoned")
            .risk_limits
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    fn trades_for_instrument(&self, symbol: &str, from_sequence: u64) -> Vec<Trade> {
        self.tables
            .read()
            .expect("store lock poisoned")
            .trades
            .range((symbol.to_string(), from_sequence + 1)..(symbol.to_string(), u64::MAX))
            .map(|(_, t)| t.clone())
            .collect()
    }

    fn max_sequence(&self, symbol: &str) -> u64 {
        let tables = self.tables.read().expect("store lock poisoned");
        let trade_max = tables
            .trades
            .range((symbol.to_string(), 0)..(symbol.to_string(), u64::MAX))
            .next_back()
            .map(|((_, seq), _)| *seq)
            .unwrap_or(0);
        let order_max = tables
            .orders
            .values()
            .filter(|o| o.symbol == symbol)
            .map(|o| o.sequence)
            .max()
            .unwrap_or(0);
        trade_max.max(order_max)
    }
}

impl StorageTxn for MemoryTxn<'_> {
    fn put_order(&mut self, order: Order) {
        self.staged.push(Write::Order(order));
    }

    fn put_trade(&mut self, trade: Trade) {
        self.staged.push(Write::Trade(trade));
    }

    fn put_position(&mut self, position: Position) {
        self.staged.push(Write::Position(position));
    }

    fn put_balance(&mut self, balance: Balance) {
        self.staged.push(Write::Balance(balance));
    }

    fn put_instrument(&mut self, instrument: Instrument) {
        self.staged.push(Write::Instrument(instrument));
    }

    fn append_audit(&mut self, entry: AuditEntry) {
        self.staged.push(Write::Audit(entry));
    }

    fn commit(self: Box<Self>) -> Result<(), StorageError> {
        let mut tables = self.tables.write().expect("store lock poisoned");

        // Trades are append-only: re-committing a sequence is a conflict.
        for write in &self.staged {
            if let Write::Trade(trade) = write {
                let key = (trade.symbol.clone(), trade.sequence);
                if tables.trades.contains_key(&key) {
                    return Err(StorageError::Conflict(format!(
                        "trade sequence {} already persisted for {}",
                        trade.sequence, trade.symbol
                    )));
                }
            }
        }

        for write in self.staged {
            match write {
                Write::Order(order) => {
                    tables.orders.insert(order.id, order);
                }
                Write::Trade(trade) => {
                    tables
                        .trades
                        .insert((trade.symbol.clone(), trade.sequence), trade);
                }
                Write::Position(position) => {
                    tables
                        .positions
                        .insert((position.account_id, position.symbol.clone()), position);
                }
                Write::Balance(balance) => {
                    tables
                        .balances
                        .insert((balance.account_id, balance.currency.clone()), balance);
                }
                Write::Instrument(instrument) => {
                    tables
                        .instruments
                        .insert(instrument.symbol.clone(), instrument);
                }
                Write::Audit(entry) => {
                    tables.audit.push(entry);
                }
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) {
        // Staged writes are dropped; nothing ever touched the tables.
    }
}
