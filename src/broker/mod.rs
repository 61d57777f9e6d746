//! Broker boundary: trait contracts, domain types, and the paper-trading
//! implementation.

mod mock;
mod traits;
mod types;

pub use mock::MockBroker;
pub use traits::{AccountData, ExecutionAdapter, FlagStore, MarketData, PositionFeed};
pub use types::{
    Bar, BrokerError, Direction, InstrumentInfo, OrderSpec, OrderTag, Position, TicketId,
};
