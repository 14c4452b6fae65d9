//! Market-data dissemination: sequenced events, the bus port, and
//! publisher implementations.

mod bus;
mod events;
mod log;
#[cfg(feature = "nats")]
mod nats;
mod publisher;

pub use bus::{EventHandler, EventSink, InMemoryBus, Subscription, TopicFilter};
pub use events::MarketEvent;
pub use log::{EventLog, EventLogError};
#[cfg(feature = "nats")]
pub use nats::NatsEventPublisher;
pub use publisher::MarketDataPublisher;
