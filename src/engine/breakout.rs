//! Breakout/trailing policy: one discretionary entry, then a monotonic
//! protective ratchet and trailing stop on every open position.

use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::broker::{Direction, OrderSpec, OrderTag, Position};
use crate::config::BreakoutConfig;
use crate::utils::points::{distance, round_price};

use super::intent::Intent;
use super::{Policy, TickContext};

/// Cloneable handle for queueing a discretionary entry from outside the
/// tick loop (a panel button or CLI signal). A second fire before the open
/// replaces the first.
#[derive(Clone, Default)]
pub struct EntryTrigger(Arc<Mutex<Option<Direction>>>);

impl EntryTrigger {
    pub fn fire(&self, direction: Direction) {
        *self.0.lock().unwrap() = Some(direction);
    }

    fn peek(&self) -> Option<Direction> {
        *self.0.lock().unwrap()
    }

    fn take(&self) -> Option<Direction> {
        self.0.lock().unwrap().take()
    }
}

/// Trailing-stop manager with a user-triggered entry.
pub struct BreakoutPolicy {
    cfg: BreakoutConfig,
    pending_entry: EntryTrigger,
}

impl BreakoutPolicy {
    pub fn new(cfg: BreakoutConfig) -> Self {
        Self {
            cfg,
            pending_entry: EntryTrigger::default(),
        }
    }

    /// Handle for queueing entries; the next un-gated tick opens them.
    pub fn trigger(&self) -> EntryTrigger {
        self.pending_entry.clone()
    }

    /// Queue a discretionary entry for the next tick.
    pub fn trigger_entry(&mut self, direction: Direction) {
        self.pending_entry.fire(direction);
    }

    /// Initial protective stop for a fresh entry.
    fn entry_stop(&self, ctx: &TickContext<'_>, direction: Direction) -> Decimal {
        let digits = ctx.instrument.digits;
        match direction {
            Direction::Long => round_price(ctx.ask - self.cfg.trail_distance, digits),
            Direction::Short => round_price(ctx.bid + self.cfg.trail_distance, digits),
        }
    }

    /// Stop adjustment for one open position, if any is due.
    fn stop_adjustment(&self, ctx: &TickContext<'_>, position: &Position) -> Option<Decimal> {
        let direction = position.direction;
        let current = ctx.side_price(direction);
        let digits = ctx.instrument.digits;

        if position.is_losing() {
            // Protective ratchet: a losing position may never carry a stop
            // wider than the configured maximum from its open price.
            let too_wide = match position.stop_loss {
                None => true,
                Some(sl) => distance(position.open_price, sl) > self.cfg.max_stop_distance,
            };
            if too_wide {
                let tightened = match direction {
                    Direction::Long => position.open_price - self.cfg.max_stop_distance,
                    Direction::Short => position.open_price + self.cfg.max_stop_distance,
                };
                return Some(round_price(tightened, digits));
            }
            return None;
        }

        if position.is_winning()
            && distance(current, position.open_price) > self.cfg.trail_activation_distance
        {
            // Trail: keep the stop exactly trail_distance behind the price,
            // and only ever move it in the position's favor.
            let target = match direction {
                Direction::Long => current - self.cfg.trail_distance,
                Direction::Short => current + self.cfg.trail_distance,
            };
            let target = round_price(target, digits);
            let improves = match (direction, position.stop_loss) {
                (_, None) => true,
                (Direction::Long, Some(sl)) => target > sl,
                (Direction::Short, Some(sl)) => target < sl,
            };
            if improves {
                return Some(target);
            }
        }

        None
    }
}

impl Policy for BreakoutPolicy {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn evaluate(&mut self, ctx: &TickContext<'_>) -> Vec<Intent> {
        let mut intents = Vec::new();

        if !ctx.opens_allowed && self.pending_entry.peek().is_some() {
            // Entry stays queued until the environment allows opens again.
            debug!("environment vetoed opens; holding queued breakout entry");
        } else if let Some(direction) = self.pending_entry.take() {
            info!(%direction, volume = %self.cfg.entry_volume, "opening discretionary breakout entry");
            intents.push(Intent::Open(OrderSpec {
                symbol: ctx.instrument.symbol.clone(),
                direction,
                volume: self.cfg.entry_volume,
                price_hint: ctx.entry_price(direction),
                stop_loss: Some(self.entry_stop(ctx, direction)),
                take_profit: None,
                tag: OrderTag::member(direction, 1),
            }));
        }

        for position in ctx.ledger.open_positions() {
            if let Some(stop) = self.stop_adjustment(ctx, position) {
                debug!(ticket = %position.ticket, %stop, "advancing protective stop");
                intents.push(Intent::Modify {
                    ticket: position.ticket,
                    stop_loss: Some(stop),
                    take_profit: position.take_profit,
                });
            }
        }

        intents
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InstrumentInfo, TicketId};
    use crate::ledger::LedgerView;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn instrument() -> InstrumentInfo {
        InstrumentInfo {
            symbol: "XAUUSD".into(),
            point: dec!(0.1),
            min_volume: dec!(0.01),
            volume_step: dec!(0.01),
            digits: 2,
        }
    }

    fn config() -> BreakoutConfig {
        BreakoutConfig {
            entry_volume: dec!(0.05),
            trail_activation_distance: dec!(0.5),
            trail_distance: dec!(0.4),
            max_stop_distance: dec!(0.4),
        }
    }

    fn ctx<'a>(instrument: &'a InstrumentInfo, ledger: &'a LedgerView, bid: Decimal) -> TickContext<'a> {
        TickContext {
            instrument,
            bid,
            ask: bid + dec!(0.3),
            now: Utc::now(),
            ledger,
            opens_allowed: true,
        }
    }

    fn open_long(stop_loss: Option<Decimal>, profit: Decimal) -> Position {
        Position {
            ticket: TicketId(1),
            symbol: "XAUUSD".into(),
            direction: Direction::Long,
            volume: dec!(0.05),
            open_price: dec!(1900.00),
            opened_at: Utc::now(),
            stop_loss,
            take_profit: None,
            profit,
            tag: OrderTag::member(Direction::Long, 1),
        }
    }

    #[test]
    fn triggered_entry_opens_once_with_initial_stop() {
        let instrument = instrument();
        let mut policy = BreakoutPolicy::new(config());
        policy.trigger_entry(Direction::Long);

        let ledger = LedgerView::from_parts("XAUUSD", vec![], vec![]);
        let intents = policy.evaluate(&ctx(&instrument, &ledger, dec!(1900.0)));
        assert_eq!(intents.len(), 1);
        match &intents[0] {
            Intent::Open(spec) => {
                // ask 1900.3, stop trail_distance below it
                assert_eq!(spec.stop_loss, Some(dec!(1899.90)));
                assert_eq!(spec.take_profit, None);
            }
            other => panic!("expected open, got {other:?}"),
        }

        // Trigger consumed; next tick is quiet.
        let intents = policy.evaluate(&ctx(&instrument, &ledger, dec!(1900.0)));
        assert!(intents.is_empty());
    }

    #[test]
    fn losing_position_gets_stop_tightened_to_maximum() {
        let instrument = instrument();
        let mut policy = BreakoutPolicy::new(config());

        // Stop 1.0 below open; maximum allowed is 0.4.
        let position = open_long(Some(dec!(1899.00)), dec!(-4));
        let ledger = LedgerView::from_parts("XAUUSD", vec![position], vec![]);
        let intents = policy.evaluate(&ctx(&instrument, &ledger, dec!(1899.6)));

        match &intents[0] {
            Intent::Modify { stop_loss, .. } => assert_eq!(*stop_loss, Some(dec!(1899.60))),
            other => panic!("expected modify, got {other:?}"),
        }

        // Already within the maximum: nothing to do.
        let position = open_long(Some(dec!(1899.70)), dec!(-4));
        let ledger = LedgerView::from_parts("XAUUSD", vec![position], vec![]);
        assert!(policy
            .evaluate(&ctx(&instrument, &ledger, dec!(1899.6)))
            .is_empty());
    }

    #[test]
    fn trailing_stop_never_retreats() {
        let instrument = instrument();
        let mut policy = BreakoutPolicy::new(config());

        // Profitable long, 0.6 beyond open on the ask side: trail activates.
        let position = open_long(Some(dec!(1899.60)), dec!(3));
        let ledger = LedgerView::from_parts("XAUUSD", vec![position], vec![]);
        let intents = policy.evaluate(&ctx(&instrument, &ledger, dec!(1900.30)));
        let first_stop = match &intents[0] {
            Intent::Modify { stop_loss, .. } => stop_loss.unwrap(),
            other => panic!("expected modify, got {other:?}"),
        };
        assert_eq!(first_stop, dec!(1900.20)); // ask 1900.60 - 0.40

        // Price advances: stop advances with it.
        let position = open_long(Some(first_stop), dec!(5));
        let ledger = LedgerView::from_parts("XAUUSD", vec![position], vec![]);
        let intents = policy.evaluate(&ctx(&instrument, &ledger, dec!(1900.80)));
        let second_stop = match &intents[0] {
            Intent::Modify { stop_loss, .. } => stop_loss.unwrap(),
            other => panic!("expected modify, got {other:?}"),
        };
        assert!(second_stop > first_stop);

        // Price retreats: the trail target falls below the held stop and
        // the stop holds its ground.
        let position = open_long(Some(second_stop), dec!(4));
        let ledger = LedgerView::from_parts("XAUUSD", vec![position], vec![]);
        assert!(policy
            .evaluate(&ctx(&instrument, &ledger, dec!(1900.60)))
            .is_empty());
    }

    #[test]
    fn short_positions_trail_downward() {
        let instrument = instrument();
        let mut policy = BreakoutPolicy::new(config());

        let position = Position {
            ticket: TicketId(2),
            symbol: "XAUUSD".into(),
            direction: Direction::Short,
            volume: dec!(0.05),
            open_price: dec!(1900.00),
            opened_at: Utc::now(),
            stop_loss: Some(dec!(1900.40)),
            take_profit: None,
            profit: dec!(6),
            tag: OrderTag::member(Direction::Short, 1),
        };
        let ledger = LedgerView::from_parts("XAUUSD", vec![position], vec![]);
        // bid 1899.20: 0.8 in favor, trail target 1899.60 < current stop.
        let intents = policy.evaluate(&ctx(&instrument, &ledger, dec!(1899.20)));
        match &intents[0] {
            Intent::Modify { stop_loss, .. } => assert_eq!(*stop_loss, Some(dec!(1899.60))),
            other => panic!("expected modify, got {other:?}"),
        }
    }
}
