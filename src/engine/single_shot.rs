//! Fixed-risk single-shot policy: one position at a time, a hard loss cut,
//! and a give-back ratchet once the trade runs in favor.

use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::broker::{Direction, OrderSpec, OrderTag, Position};
use crate::config::{EntryDirection, SingleShotConfig};
use crate::utils::points::{distance, round_price};

use super::intent::{CloseReason, Intent};
use super::{Policy, TickContext};

pub struct SingleShotPolicy {
    cfg: SingleShotConfig,
}

impl SingleShotPolicy {
    pub fn new(cfg: SingleShotConfig) -> Self {
        Self { cfg }
    }

    fn pick_direction(&self) -> Direction {
        match self.cfg.entry_direction {
            EntryDirection::Long => Direction::Long,
            EntryDirection::Short => Direction::Short,
            EntryDirection::Random => {
                if rand::thread_rng().gen::<bool>() {
                    Direction::Long
                } else {
                    Direction::Short
                }
            }
        }
    }

    fn manage(&self, ctx: &TickContext<'_>, position: &Position) -> Option<Intent> {
        let direction = position.direction;
        let current = ctx.side_price(direction);
        let dist = distance(current, position.open_price);

        // Loss cut is non-strict: hitting the limit exactly is enough.
        if position.is_losing() && dist >= self.cfg.max_loss_distance {
            info!(ticket = %position.ticket, loss = %position.profit, "loss limit reached, cutting");
            return Some(Intent::Close {
                ticket: position.ticket,
                volume: position.volume,
                price_hint: ctx.close_price(direction),
                reason: CloseReason::MaxLoss,
            });
        }

        if position.is_winning() && dist > self.cfg.trail_activation_distance {
            // Lock in all but the give-back allowance behind the move.
            let retained = self.cfg.trail_activation_distance - self.cfg.trail_backoff_distance;
            let target = match direction {
                Direction::Long => current - retained,
                Direction::Short => current + retained,
            };
            let target = round_price(target, ctx.instrument.digits);
            let improves = match (direction, position.stop_loss) {
                (_, None) => true,
                (Direction::Long, Some(sl)) => target > sl,
                (Direction::Short, Some(sl)) => target < sl,
            };
            if improves {
                debug!(ticket = %position.ticket, stop = %target, "ratcheting profit stop");
                return Some(Intent::Modify {
                    ticket: position.ticket,
                    stop_loss: Some(target),
                    take_profit: position.take_profit,
                });
            }
        }

        None
    }
}

impl Policy for SingleShotPolicy {
    fn name(&self) -> &'static str {
        "single_shot"
    }

    fn evaluate(&mut self, ctx: &TickContext<'_>) -> Vec<Intent> {
        let mut intents = Vec::new();

        if ctx.ledger.open_count() == 0 {
            if !ctx.opens_allowed {
                return intents;
            }
            let direction = self.pick_direction();
            info!(%direction, volume = %self.cfg.volume, "opening single-shot entry");
            intents.push(Intent::Open(OrderSpec {
                symbol: ctx.instrument.symbol.clone(),
                direction,
                volume: self.cfg.volume,
                price_hint: ctx.entry_price(direction),
                stop_loss: None,
                take_profit: None,
                tag: OrderTag::member(direction, 1),
            }));
            return intents;
        }

        for position in ctx.ledger.open_positions() {
            if let Some(intent) = self.manage(ctx, position) {
                intents.push(intent);
            }
        }
        intents
    }
}
