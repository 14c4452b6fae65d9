//! # Exchange Core
//!
//! The core trading subsystem of a limit-order exchange: an in-memory
//! matching engine and order book, the settlement and position/balance
//! accounting it drives, and the sequenced market-data stream it feeds.
//! Transport framing, authentication, and storage backends are external
//! collaborators behind narrow ports.
//!
//! ## Guarantees
//!
//! - **Price-time priority**: better price wins; at equal price, earlier
//!   sequence wins. Matching is deterministic: the same book state and
//!   the same command order produce identical trades.
//! - **Atomic settlement**: a trade updates both counterparties'
//!   positions, balances, and P&L in one storage transaction, or not at
//!   all.
//! - **Consistent broadcast**: every committed trade and book change is
//!   published in commit order with a monotonic per-instrument sequence;
//!   consumers deduplicate by sequence.
//! - **Risk gating**: no order reaches the book without passing margin,
//!   position-limit, and daily-limit checks.
//!
//! ## Architecture
//!
//! One [`engine::ExchangeRouter`] owns one command loop per instrument.
//! Each loop is the single writer for its instrument's
//! [`orderbook::OrderBook`] and the (account, instrument) position and
//! balance records, which removes fine-grained locking from the hot
//! path. Within an instrument commands are processed to completion in
//! submission order; across instruments loops run concurrently on the
//! Tokio runtime.
//!
//! Per command the loop runs: risk gate → match → settle → persist →
//! commit → publish. Suspension points are limited to queue dequeue,
//! storage commit, and publisher enqueue; the matching and accounting
//! arithmetic in between performs no I/O.
//!
//! ## Monetary arithmetic
//!
//! Every price, quantity, and balance is a [`money::Money`], a checked
//! fixed-precision decimal. Binary floating point appears nowhere in the
//! trading path.
//!
//! ## Example
//!
//! ```no_run
//! use exchange_core::config::CoreConfig;
//! use exchange_core::domain::{Instrument, Side, TimeInForce};
//! use exchange_core::engine::{Command, ExchangeRouter, PlaceOrder};
//! use exchange_core::marketdata::InMemoryBus;
//! use exchange_core::money::Money;
//! use exchange_core::storage::MemoryStore;
//! use std::str::FromStr;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new());
//! store.create_instrument(Instrument::new(
//!     "BTC_USD",
//!     Money::from_str("1")?,
//!     Money::from_str("1000000")?,
//!     Money::from_str("0.5")?,
//!     Money::from_str("0.001")?,
//!     Money::from_str("0.1")?,
//!     None,
//! )?)?;
//!
//! let bus = Arc::new(InMemoryBus::new());
//! let router = ExchangeRouter::new(store.clone(), bus, CoreConfig::from_env());
//! router.register_instrument("BTC_USD")?;
//!
//! let user = uuid::Uuid::new_v4();
//! let result = router
//!     .submit(Command::PlaceOrder(PlaceOrder {
//!         user_id: user,
//!         account_id: user,
//!         symbol: "BTC_USD".to_string(),
//!         side: Side::Buy,
//!         time_in_force: TimeInForce::Gtc,
//!         quantity: Money::from_str("0.01")?,
//!         price: Money::from_str("50000")?,
//!         display_quantity: None,
//!         deadline_ms: None,
//!     }))
//!     .await?;
//! println!("{result:?}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod domain;
pub mod engine;
pub mod marketdata;
pub mod money;
pub mod orderbook;
pub mod risk;
pub mod settlement;
pub mod storage;

mod error;
pub mod prelude;
mod utils;

pub use error::CoreError;
pub use utils::current_time_millis;
