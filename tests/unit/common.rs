//! Shared fixtures for the integration suite.

use exchange_core::config::CoreConfig;
use exchange_core::domain::{Instrument, Order, OrderStatus, Side, TimeInForce};
use exchange_core::engine::{Command, CommandResult, ExchangeRouter, PlaceOrder, PlaceOrderResult};
use exchange_core::marketdata::InMemoryBus;
use exchange_core::money::Money;
use exchange_core::storage::MemoryStore;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

pub fn m(s: &str) -> Money {
    Money::from_str(s).unwrap()
}

/// Instrument with a wide band, unit tick and lot, 10% margin.
pub fn test_instrument(symbol: &str) -> Instrument {
    Instrument::new(
        symbol,
        m("1"),
        m("100000"),
        m("1"),
        m("1"),
        m("0.1"),
        None,
    )
    .unwrap()
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub bus: Arc<InMemoryBus>,
    pub router: ExchangeRouter,
}

impl Harness {
    /// Router over an in-memory store and bus with one registered
    /// instrument.
    pub fn new(symbol: &str) -> Self {
        Self::with_instrument(test_instrument(symbol))
    }

    pub fn with_instrument(instrument: Instrument) -> Self {
        let symbol = instrument.symbol.clone();
        let store = Arc::new(MemoryStore::new());
        store.create_instrument(instrument).unwrap();
        let bus = Arc::new(InMemoryBus::new());
        let router = ExchangeRouter::new(
            store.clone(),
            bus.clone(),
            CoreConfig::default(),
        );
        router.register_instrument(&symbol).unwrap();
        Self { store, bus, router }
    }

    /// Register one more instrument on the same router.
    pub fn add_instrument(&self, symbol: &str) {
        self.store.create_instrument(test_instrument(symbol)).unwrap();
        self.router.register_instrument(symbol).unwrap();
    }

    /// A funded user whose account id equals the user id.
    pub fn funded_user(&self, cash: &str) -> Uuid {
        let user = Uuid::new_v4();
        self.store.fund_account(user, "USD", m(cash));
        user
    }

    pub async fn place(
        &self,
        user: Uuid,
        symbol: &str,
        side: Side,
        quantity: &str,
        price: &str,
        tif: TimeInForce,
    ) -> PlaceOrderResult {
        self.place_order(PlaceOrder {
            user_id: user,
            account_id: user,
            symbol: symbol.to_string(),
            side,
            time_in_force: tif,
            quantity: m(quantity),
            price: m(price),
            display_quantity: None,
            deadline_ms: None,
        })
        .await
    }

    pub async fn place_order(&self, place: PlaceOrder) -> PlaceOrderResult {
        match self.router.submit(Command::PlaceOrder(place)).await.unwrap() {
            CommandResult::OrderPlaced(result) => result,
            other => panic!("expected OrderPlaced, got {other:?}"),
        }
    }

    pub async fn snapshot(&self, symbol: &str) -> exchange_core::orderbook::OrderBookSnapshot {
        match self
            .router
            .submit(Command::Snapshot {
                symbol: symbol.to_string(),
                depth: 10,
                deadline_ms: None,
            })
            .await
            .unwrap()
        {
            CommandResult::Snapshot(snapshot) => snapshot,
            other => panic!("expected Snapshot, got {other:?}"),
        }
    }
}

/// Fetch an order back from storage.
pub fn stored_order(harness: &Harness, result: &PlaceOrderResult) -> Order {
    use exchange_core::storage::Storage;
    harness
        .store
        .order(result.order_id.expect("order id"))
        .expect("order persisted")
}

pub fn assert_status(order: &Order, status: OrderStatus) {
    assert_eq!(order.status, status, "order {order:?}");
}
