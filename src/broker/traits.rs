//! Trait boundaries between the decision engine and the hosting platform.
//!
//! The engine consumes these traits and never talks to a venue directly.
//! Production implementations live in the platform harness; the in-crate
//! [`MockBroker`](super::MockBroker) implements every boundary for paper
//! trading and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::types::{Bar, BrokerError, InstrumentInfo, OrderSpec, Position, TicketId};

/// Order execution primitives.
///
/// All calls are synchronous request/response from the engine's point of
/// view; retries are the engine's concern (it re-evaluates next tick), never
/// the adapter's.
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    /// Submit a market order. Returns the broker-assigned ticket.
    async fn submit_order(&self, order: OrderSpec) -> Result<TicketId, BrokerError>;

    /// Replace the stop-loss / take-profit of an open order.
    async fn modify_order(
        &self,
        ticket: TicketId,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), BrokerError>;

    /// Close an open order (fully, at the given price hint).
    async fn close_order(
        &self,
        ticket: TicketId,
        volume: Decimal,
        price_hint: Decimal,
    ) -> Result<(), BrokerError>;
}

/// Market data for the traded instrument.
#[async_trait]
pub trait MarketData: Send + Sync {
    fn instrument(&self) -> InstrumentInfo;

    async fn bid(&self) -> Result<Decimal, BrokerError>;

    async fn ask(&self) -> Result<Decimal, BrokerError>;

    /// Current spread expressed in points.
    async fn spread_points(&self) -> Result<Decimal, BrokerError>;

    /// Broker server time.
    fn now(&self) -> DateTime<Utc>;

    /// Daily bar at `offset` (0 = today, 1 = yesterday, ...).
    async fn daily_bar(&self, offset: u32) -> Result<Bar, BrokerError>;
}

/// Account-level figures.
#[async_trait]
pub trait AccountData: Send + Sync {
    async fn equity(&self) -> Result<Decimal, BrokerError>;

    async fn balance(&self) -> Result<Decimal, BrokerError>;

    async fn floating_profit(&self) -> Result<Decimal, BrokerError>;
}

/// Indexed access to the broker-held position ledger.
///
/// Mirrors the select-by-position shape of the upstream terminal API: the
/// ledger walks indices and skips any entry whose read fails, because broker
/// state can mutate between the count and the individual reads.
#[async_trait]
pub trait PositionFeed: Send + Sync {
    async fn open_count(&self) -> Result<usize, BrokerError>;

    async fn open_at(&self, index: usize) -> Result<Position, BrokerError>;

    /// Number of closed positions retained by the broker.
    async fn closed_count(&self) -> Result<usize, BrokerError>;

    /// Closed position at `index`; index 0 is the oldest. Callers walk
    /// backward from `closed_count() - 1` for most-recent-first order.
    async fn closed_at(&self, index: usize) -> Result<Position, BrokerError>;
}

/// Persistent key/value store for flags that must outlive restarts.
///
/// Only the cooldown latch (flag, timestamp, equity floor) is written here;
/// every other engine flag is process-local by contract.
#[async_trait]
pub trait FlagStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), BrokerError>;

    async fn delete(&self, key: &str) -> Result<(), BrokerError>;
}
