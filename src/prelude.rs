//! Convenience re-exports for hosts embedding the core.

pub use crate::config::CoreConfig;
pub use crate::domain::{
    Balance, Instrument, Order, OrderId, OrderStatus, Position, Side, TimeInForce, Trade,
};
pub use crate::engine::{Command, CommandResult, ExchangeRouter, PlaceOrder, PlaceOrderResult};
pub use crate::error::CoreError;
pub use crate::marketdata::{
    EventSink, InMemoryBus, MarketDataPublisher, MarketEvent, TopicFilter,
};
pub use crate::money::{Money, MoneyError};
pub use crate::orderbook::{OrderBook, OrderBookError, OrderBookSnapshot};
pub use crate::risk::{RiskAssessment, RiskGate, RiskLimits};
pub use crate::settlement::{SettlementEngine, SettlementError};
pub use crate::storage::{MemoryStore, Storage, StorageError};
