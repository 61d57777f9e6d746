//! Intents: what a policy wants done this tick.
//!
//! Policies never touch the broker. They return an ordered intent list; the
//! runner submits each in order after the governor has had its say.

use rust_decimal::Decimal;
use std::fmt;

use crate::broker::{OrderSpec, TicketId};

/// Why a close intent was raised; carried through to execution logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A seed marker outlived its holding allowance.
    SeedExpired,
    /// Realized series gains are funding the cut of the oldest loser.
    Harvest,
    /// The fixed-risk variant hit its loss limit.
    MaxLoss,
    /// Equity target reached; the whole book is being flattened.
    Completion,
    /// Capital-preservation floor breached; terminal flatten.
    FloorBreach,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CloseReason::SeedExpired => "seed_expired",
            CloseReason::Harvest => "harvest",
            CloseReason::MaxLoss => "max_loss",
            CloseReason::Completion => "completion",
            CloseReason::FloorBreach => "floor_breach",
        };
        f.write_str(s)
    }
}

/// One unit of work for the execution adapter.
#[derive(Debug, Clone)]
pub enum Intent {
    Open(OrderSpec),
    Modify {
        ticket: TicketId,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    },
    Close {
        ticket: TicketId,
        volume: Decimal,
        price_hint: Decimal,
        reason: CloseReason,
    },
}

impl Intent {
    pub fn is_open(&self) -> bool {
        matches!(self, Intent::Open(_))
    }

    /// Modifies and closes only ever reduce risk; the governor always lets
    /// them through.
    pub fn reduces_risk(&self) -> bool {
        !self.is_open()
    }

    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::Open(_) => "open",
            Intent::Modify { .. } => "modify",
            Intent::Close { .. } => "close",
        }
    }
}
