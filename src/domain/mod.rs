//! Domain records shared across the engine: instruments, orders, trades,
//! positions, and balances.

mod account;
mod instrument;
mod order;
mod trade;

pub use account::{Balance, BalanceError, Position};
pub use instrument::{Instrument, InstrumentError};
pub use order::{FillError, Order, OrderId, OrderStatus, Side, TimeInForce};
pub use trade::Trade;
