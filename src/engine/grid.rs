//! Grid/martingale policy: seed-then-commit series starts, loss-aware
//! scale-ins, and realized-profit harvesting of the oldest loser.

use rand::Rng;
use rust_decimal::Decimal;
use tracing::{debug, error, info};

use crate::broker::{Direction, OrderSpec, OrderTag, Position};
use crate::config::{DirectionMode, EntryDirection, GridConfig, ScaleMode};
use crate::utils::points::{distance, round_price, snap_volume};

use super::intent::{CloseReason, Intent};
use super::{PerDirection, Policy, TickContext};

/// One grid engine instance per instrument.
///
/// The two seed-pending flags are deliberately process-local: losing them on
/// restart costs at most one extra seed-marker cycle, which the seed-expiry
/// rule cleans up on its own.
pub struct GridPolicy {
    cfg: GridConfig,
    seed_pending: PerDirection<bool>,
}

impl GridPolicy {
    pub fn new(cfg: GridConfig) -> Self {
        Self {
            cfg,
            seed_pending: PerDirection::default(),
        }
    }

    /// Whether the seed protocol is mid-flight for a direction (test hook).
    pub fn seed_pending(&self, direction: Direction) -> bool {
        *self.seed_pending.get(direction)
    }

    fn thresholds_armed(&self) -> bool {
        self.cfg.take_profit_distance > Decimal::ZERO
            && self.cfg.scale_in_distance > Decimal::ZERO
            && self.cfg.hedge_trigger_distance > Decimal::ZERO
    }

    /// Step volume for the next scale-in given the direction's floating
    /// profit. Stages only ever shrink the step as the loss deepens.
    fn step_for(&self, floating_profit: Decimal) -> Decimal {
        let loss = -floating_profit;
        let mut step = self.cfg.step_volume;
        if loss <= Decimal::ZERO {
            return step;
        }
        for stage in &self.cfg.step_stages {
            if loss >= stage.loss_beyond {
                step = stage.step_volume;
            }
        }
        step
    }

    fn pick_entry_direction(&self) -> Direction {
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

    fn directions_to_run(&self, ctx: &TickContext<'_>) -> Vec<Direction> {
        match self.cfg.direction_mode {
            DirectionMode::Dual => Direction::BOTH.to_vec(),
            DirectionMode::Single => {
                // Stick with whichever direction already has skin in the game
                // or a seed protocol in flight; otherwise pick a fresh one.
                for direction in Direction::BOTH {
                    let series = ctx.ledger.series(direction);
                    if !series.is_empty() || !series.seeds.is_empty() {
                        return vec![direction];
                    }
                }
                for direction in Direction::BOTH {
                    if *self.seed_pending.get(direction) {
                        return vec![direction];
                    }
                }
                vec![self.pick_entry_direction()]
            }
        }
    }

    fn member_exit(&self, ctx: &TickContext<'_>, direction: Direction) -> (Option<Decimal>, Option<Decimal>) {
        let digits = ctx.instrument.digits;
        match (self.cfg.scale_mode, direction) {
            (ScaleMode::Martingale, Direction::Long) => (
                None,
                Some(round_price(ctx.ask + self.cfg.take_profit_distance, digits)),
            ),
            (ScaleMode::Martingale, Direction::Short) => (
                None,
                Some(round_price(ctx.bid - self.cfg.take_profit_distance, digits)),
            ),
            (ScaleMode::Reverse, Direction::Long) => (
                Some(round_price(ctx.ask - self.cfg.take_profit_distance, digits)),
                None,
            ),
            (ScaleMode::Reverse, Direction::Short) => (
                Some(round_price(ctx.bid + self.cfg.take_profit_distance, digits)),
                None,
            ),
        }
    }

    fn member_open(
        &self,
        ctx: &TickContext<'_>,
        direction: Direction,
        sequence: u32,
        volume: Decimal,
    ) -> Intent {
        let (stop_loss, take_profit) = self.member_exit(ctx, direction);
        Intent::Open(OrderSpec {
            symbol: ctx.instrument.symbol.clone(),
            direction,
            volume,
            price_hint: ctx.entry_price(direction),
            stop_loss,
            take_profit,
            tag: OrderTag::member(direction, sequence),
        })
    }

    fn close_expired_seeds(
        &self,
        ctx: &TickContext<'_>,
        seeds: &[&Position],
        intents: &mut Vec<Intent>,
    ) {
        for seed in seeds {
            if seed.holding_secs(ctx.now) > self.cfg.seed_max_hold_secs {
                info!(ticket = %seed.ticket, direction = %seed.direction, "seed marker expired");
                intents.push(Intent::Close {
                    ticket: seed.ticket,
                    volume: seed.volume,
                    price_hint: ctx.close_price(seed.direction),
                    reason: CloseReason::SeedExpired,
                });
            }
        }
    }

    fn evaluate_direction(
        &mut self,
        ctx: &TickContext<'_>,
        direction: Direction,
        intents: &mut Vec<Intent>,
    ) {
        let series = ctx.ledger.series(direction);

        // Seed markers are timing probes, not positions; cap their life
        // before anything else.
        self.close_expired_seeds(ctx, &series.seeds, intents);

        if series.is_empty() {
            if !series.seeds.is_empty() {
                // Seed still on the book; the protocol resumes once it
                // expires and leaves the history boundary behind.
                return;
            }
            if !ctx.opens_allowed {
                // Environment vetoed opens: hold the protocol where it is so
                // the pending flag stays truthful.
                return;
            }
            if !*self.seed_pending.get(direction) {
                debug!(%direction, "placing series-start seed marker");
                intents.push(Intent::Open(OrderSpec {
                    symbol: ctx.instrument.symbol.clone(),
                    direction,
                    volume: ctx.instrument.min_volume,
                    price_hint: ctx.entry_price(direction),
                    stop_loss: None,
                    take_profit: None,
                    tag: OrderTag::seed(direction),
                }));
                *self.seed_pending.get_mut(direction) = true;
            } else {
                debug!(%direction, volume = %self.cfg.start_volume, "committing first series member");
                let commit = self.member_open(ctx, direction, 1, self.cfg.start_volume);
                intents.push(commit);
                *self.seed_pending.get_mut(direction) = false;
            }
            return;
        }

        let current = ctx.side_price(direction);

        // Scale-in off the most recently opened member.
        if ctx.opens_allowed {
            if let Some(newest) = series.newest() {
                let dist = distance(current, newest.open_price);
                let triggered = match self.cfg.scale_mode {
                    ScaleMode::Martingale => newest.is_losing(),
                    ScaleMode::Reverse => newest.is_winning(),
                };
                if triggered && dist > self.cfg.scale_in_distance {
                    let step = self.step_for(series.floating_profit());
                    let volume = snap_volume(
                        newest.volume + step,
                        ctx.instrument.volume_step,
                        ctx.instrument.min_volume,
                    );
                    debug!(
                        %direction,
                        distance = %dist,
                        %volume,
                        sequence = series.next_sequence(),
                        "scale-in triggered"
                    );
                    intents.push(self.member_open(ctx, direction, series.next_sequence(), volume));
                }
            }
        }

        // Harvest the oldest loser out of realized series gains. Strictly
        // greater than the multiple: equality does not fire.
        if self.cfg.scale_mode == ScaleMode::Martingale {
            if let Some(oldest) = series.oldest() {
                if oldest.is_losing() {
                    let dist = distance(current, oldest.open_price);
                    let realized = ctx.ledger.realized_series_profit(direction);
                    let required = oldest.profit.abs() * self.cfg.harvest_multiplier;
                    if dist > self.cfg.hedge_trigger_distance && realized > required {
                        info!(
                            ticket = %oldest.ticket,
                            %direction,
                            %realized,
                            unrealized = %oldest.profit,
                            "harvesting oldest series member"
                        );
                        intents.push(Intent::Close {
                            ticket: oldest.ticket,
                            volume: oldest.volume,
                            price_hint: ctx.close_price(direction),
                            reason: CloseReason::Harvest,
                        });
                    }
                }
            }
        }
    }
}

impl Policy for GridPolicy {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn evaluate(&mut self, ctx: &TickContext<'_>) -> Vec<Intent> {
        let mut intents = Vec::new();

        if !self.thresholds_armed() {
            // A zero threshold disarms the ladder maths; refuse to add risk
            // and keep shouting until someone fixes the config.
            error!("grid thresholds unset; no new risk will be opened");
            for direction in Direction::BOTH {
                let series = ctx.ledger.series(direction);
                self.close_expired_seeds(ctx, &series.seeds, &mut intents);
            }
            return intents;
        }

        for direction in self.directions_to_run(ctx) {
            self.evaluate_direction(ctx, direction, &mut intents);
        }
        intents
    }
}
