//! Strategy engine: pluggable tick policies and the runner that drives them.
//!
//! A policy is a pure-ish state machine: it reads the tick context (quotes,
//! clock, ledger view) and returns an ordered intent list. Everything
//! order-shaped goes through the runner, which gates intents through the
//! risk governor and submits survivors to the execution adapter.

mod breakout;
mod grid;
mod intent;
mod runner;
mod single_shot;

pub use breakout::{BreakoutPolicy, EntryTrigger};
pub use grid::GridPolicy;
pub use intent::{CloseReason, Intent};
pub use runner::{RunnerHandles, TickOutcome, TickRunner};
pub use single_shot::SingleShotPolicy;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::broker::{Direction, InstrumentInfo};
use crate::ledger::LedgerView;

/// Everything a policy may look at during one tick.
pub struct TickContext<'a> {
    pub instrument: &'a InstrumentInfo,
    pub bid: Decimal,
    pub ask: Decimal,
    pub now: DateTime<Utc>,
    pub ledger: &'a LedgerView,
    /// Environment-gate verdict. When false a policy must not emit opens,
    /// and must not advance open-related state like the seed-pending flags.
    /// Risk-reducing intents are always fair game.
    pub opens_allowed: bool,
}

impl TickContext<'_> {
    /// Working price for a direction: ask for longs, bid for shorts.
    pub fn side_price(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => self.ask,
            Direction::Short => self.bid,
        }
    }

    /// Fill price a new order of this direction would take.
    pub fn entry_price(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => self.ask,
            Direction::Short => self.bid,
        }
    }

    /// Price hint for closing a position of this direction.
    pub fn close_price(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Long => self.bid,
            Direction::Short => self.ask,
        }
    }
}

/// A strategy variant. One instance per instrument; re-evaluated every tick.
pub trait Policy: Send {
    fn name(&self) -> &'static str;

    /// Produce this tick's intents, in submission order.
    fn evaluate(&mut self, ctx: &TickContext<'_>) -> Vec<Intent>;
}

/// Tiny per-direction pair used for engine flags.
#[derive(Debug, Default, Clone, Copy)]
pub struct PerDirection<T> {
    pub long: T,
    pub short: T,
}

impl<T> PerDirection<T> {
    pub fn get(&self, direction: Direction) -> &T {
        match direction {
            Direction::Long => &self.long,
            Direction::Short => &self.short,
        }
    }

    pub fn get_mut(&mut self, direction: Direction) -> &mut T {
        match direction {
            Direction::Long => &mut self.long,
            Direction::Short => &mut self.short,
        }
    }
}
