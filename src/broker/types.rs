//! Domain types shared across the broker boundary.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Trade direction for a position or order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Both directions, in evaluation order.
    pub const BOTH: [Direction; 2] = [Direction::Long, Direction::Short];
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Broker-assigned ticket identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TicketId(pub u64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Structured role tag attached to every order the engine creates.
///
/// A seed marker timestamps the start of a series, series members carry
/// their ladder sequence, and anything the engine did not create (or cannot
/// parse) is `Manual` and is ignored by all strategy logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderTag {
    /// Minimal-volume placeholder that timestamps a series start.
    Seed { direction: Direction },
    /// The Nth scaled-in member of a direction's series (1-based).
    Member { direction: Direction, sequence: u32 },
    /// Untagged or foreign order; invisible to the engine.
    Manual,
}

impl OrderTag {
    pub fn seed(direction: Direction) -> Self {
        OrderTag::Seed { direction }
    }

    pub fn member(direction: Direction, sequence: u32) -> Self {
        OrderTag::Member {
            direction,
            sequence,
        }
    }

    pub fn is_seed(&self) -> bool {
        matches!(self, OrderTag::Seed { .. })
    }

    pub fn is_member(&self) -> bool {
        matches!(self, OrderTag::Member { .. })
    }

    /// Direction the tag belongs to, if it is engine-owned.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            OrderTag::Seed { direction } => Some(*direction),
            OrderTag::Member { direction, .. } => Some(*direction),
            OrderTag::Manual => None,
        }
    }

    pub fn sequence(&self) -> Option<u32> {
        match self {
            OrderTag::Member { sequence, .. } => Some(*sequence),
            _ => None,
        }
    }

    /// Parse the wire form produced by `Display`. Never fails: anything that
    /// does not round-trip is a `Manual` order.
    pub fn parse(raw: &str) -> OrderTag {
        let mut parts = raw.split(':');
        if parts.next() != Some("ea") {
            return OrderTag::Manual;
        }
        let role = parts.next();
        let direction = match parts.next() {
            Some("long") => Direction::Long,
            Some("short") => Direction::Short,
            _ => return OrderTag::Manual,
        };
        match role {
            Some("seed") => OrderTag::Seed { direction },
            Some("member") => match parts.next().and_then(|s| s.parse::<u32>().ok()) {
                Some(sequence) if sequence >= 1 => OrderTag::Member {
                    direction,
                    sequence,
                },
                _ => OrderTag::Manual,
            },
            _ => OrderTag::Manual,
        }
    }
}

impl fmt::Display for OrderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderTag::Seed { direction } => write!(f, "ea:seed:{direction}"),
            OrderTag::Member {
                direction,
                sequence,
            } => write!(f, "ea:member:{direction}:{sequence}"),
            OrderTag::Manual => Ok(()),
        }
    }
}

/// A position as reported by the broker, open or closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: TicketId,
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub open_price: Decimal,
    pub opened_at: DateTime<Utc>,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    /// Running profit including swap (floating for open, realized for closed).
    pub profit: Decimal,
    pub tag: OrderTag,
}

impl Position {
    pub fn is_losing(&self) -> bool {
        self.profit < Decimal::ZERO
    }

    pub fn is_winning(&self) -> bool {
        self.profit > Decimal::ZERO
    }

    /// Seconds this position has been held as of `now`.
    pub fn holding_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_seconds()
    }
}

/// Static instrument description, read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentInfo {
    pub symbol: String,
    /// Price units per point (e.g. 0.0001 for a 5-digit FX pair, 0.1 for gold).
    pub point: Decimal,
    pub min_volume: Decimal,
    pub volume_step: Decimal,
    /// Price precision in decimal places.
    pub digits: u32,
}

/// One daily bar, most-recent-first addressing (offset 0 = today).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
}

/// A request to open a new market order.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    /// Submission-time price the intent was computed against.
    pub price_hint: Decimal,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub tag: OrderTag,
}

/// Errors surfaced by the broker boundary.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The broker refused the request (stale price, momentary error). Not
    /// retried within the tick; the next evaluation retries naturally.
    #[error("order rejected: {reason}")]
    Rejected { reason: String },

    #[error("unknown ticket {0}")]
    UnknownOrder(TicketId),

    /// A single ledger entry could not be read; the caller skips it.
    #[error("broker data unavailable: {0}")]
    Unavailable(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn tag_round_trip() {
        let seed = OrderTag::seed(Direction::Long);
        assert_eq!(OrderTag::parse(&seed.to_string()), seed);

        let member = OrderTag::member(Direction::Short, 7);
        assert_eq!(OrderTag::parse(&member.to_string()), member);
    }

    #[test]
    fn foreign_tags_are_manual() {
        assert_eq!(OrderTag::parse(""), OrderTag::Manual);
        assert_eq!(OrderTag::parse("customer order"), OrderTag::Manual);
        assert_eq!(OrderTag::parse("ea:member:long:0"), OrderTag::Manual);
        assert_eq!(OrderTag::parse("ea:member:sideways:1"), OrderTag::Manual);
        assert_eq!(OrderTag::parse("ea:harvest:long"), OrderTag::Manual);
    }

    #[test]
    fn position_profit_sign() {
        let pos = Position {
            ticket: TicketId(1),
            symbol: "XAUUSD".into(),
            direction: Direction::Long,
            volume: dec!(0.05),
            open_price: dec!(1900),
            opened_at: Utc::now(),
            stop_loss: None,
            take_profit: None,
            profit: dec!(-3.20),
            tag: OrderTag::member(Direction::Long, 1),
        };
        assert!(pos.is_losing());
        assert!(!pos.is_winning());
    }
}
