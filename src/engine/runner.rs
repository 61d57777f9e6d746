//! Per-tick driver: snapshot, gate, evaluate, execute, then the equity
//! completion check against a re-read ledger.
//!
//! Exactly one tick runs to completion at a time; intents submit in the
//! order the policy produced them. Every anomaly short of the equity floor
//! is logged and the next tick carries on; transient order failures are
//! retried implicitly because the same state is re-evaluated then.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::broker::{
    AccountData, ExecutionAdapter, FlagStore, InstrumentInfo, MarketData, PositionFeed,
};
use crate::config::{EquityConfig, NotifyConfig};
use crate::governor::{CooldownLatch, DrawdownTracker, RiskGovernor};
use crate::ledger::LedgerView;
use crate::notify::{BalanceWatcher, FloatingProfitAlarm, Notifier};

use super::intent::{CloseReason, Intent};
use super::{Policy, TickContext};

/// Boundary handles the runner drives.
pub struct RunnerHandles {
    pub execution: Arc<dyn ExecutionAdapter>,
    pub market: Arc<dyn MarketData>,
    pub account: Arc<dyn AccountData>,
    pub positions: Arc<dyn PositionFeed>,
    pub flags: Arc<dyn FlagStore>,
}

/// What the host should do after this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Continue,
    /// Equity fell through the preservation floor; unload the engine.
    Halt,
}

pub struct TickRunner {
    handles: RunnerHandles,
    instrument: InstrumentInfo,
    policy: Box<dyn Policy>,
    governor: RiskGovernor,
    cooldown: CooldownLatch,
    drawdown: DrawdownTracker,
    notifier: Arc<dyn Notifier>,
    equity_cfg: EquityConfig,
    balance_watcher: BalanceWatcher,
    floating_alarm: FloatingProfitAlarm,
}

impl TickRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handles: RunnerHandles,
        instrument: InstrumentInfo,
        policy: Box<dyn Policy>,
        governor: RiskGovernor,
        equity_cfg: EquityConfig,
        notify_cfg: &NotifyConfig,
        notifier: Arc<dyn Notifier>,
        initial_equity: Decimal,
    ) -> Self {
        let cooldown = CooldownLatch::new(handles.flags.clone(), &equity_cfg);
        Self {
            handles,
            instrument,
            policy,
            governor,
            cooldown,
            drawdown: DrawdownTracker::new(initial_equity),
            notifier,
            equity_cfg,
            balance_watcher: BalanceWatcher::new(notify_cfg.min_balance_delta),
            floating_alarm: FloatingProfitAlarm::new(notify_cfg.floating_profit_alarm),
        }
    }

    /// Process one tick to completion.
    pub async fn on_tick(&mut self) -> TickOutcome {
        let market = self.handles.market.clone();

        let (bid, ask, spread_points) = match (
            market.bid().await,
            market.ask().await,
            market.spread_points().await,
        ) {
            (Ok(bid), Ok(ask), Ok(spread)) => (bid, ask, spread),
            (bid, ask, spread) => {
                warn!(?bid, ?ask, ?spread, "market snapshot unavailable; skipping tick");
                return TickOutcome::Continue;
            }
        };
        let now = market.now();

        let ledger = LedgerView::load(self.handles.positions.as_ref(), &self.instrument.symbol).await;

        let cooldown_latched = match self.cooldown.is_latched(now).await {
            Ok(latched) => latched,
            Err(err) => {
                // Fail safe: an unreadable latch means no new risk.
                warn!(%err, "flag store unavailable; treating cooldown as latched");
                true
            }
        };

        let reasons = self.governor.environment_gate(
            now,
            bid,
            spread_points,
            ledger.open_count(),
            cooldown_latched,
        );
        let opens_allowed = reasons.is_empty();

        let ctx = TickContext {
            instrument: &self.instrument,
            bid,
            ask,
            now,
            ledger: &ledger,
            opens_allowed,
        };
        let intents = self.policy.evaluate(&ctx);
        let intents = self.governor.filter_intents(intents, &reasons);

        for intent in intents {
            self.execute(intent).await;
        }

        self.watch_account().await;

        let outcome = self.check_equity(cooldown_latched, now).await;

        debug!(
            policy = self.policy.name(),
            %bid,
            %spread_points,
            open = ledger.open_count(),
            floating = %ledger.floating_profit(),
            cooldown = cooldown_latched,
            worst_drawdown = %self.drawdown.worst_drawdown(),
            "tick complete"
        );

        outcome
    }

    /// Submit one intent; failures are logged, never retried within the
    /// tick.
    async fn execute(&self, intent: Intent) {
        match intent {
            Intent::Open(spec) => {
                let direction = spec.direction;
                let volume = spec.volume;
                let tag = spec.tag;
                match self.handles.execution.submit_order(spec).await {
                    Ok(ticket) => {
                        info!(%ticket, %direction, %volume, %tag, "order opened")
                    }
                    Err(err) => warn!(%direction, %volume, %err, "open failed; will re-evaluate next tick"),
                }
            }
            Intent::Modify {
                ticket,
                stop_loss,
                take_profit,
            } => match self
                .handles
                .execution
                .modify_order(ticket, stop_loss, take_profit)
                .await
            {
                Ok(()) => info!(%ticket, ?stop_loss, "order modified"),
                Err(err) => warn!(%ticket, %err, "modify failed"),
            },
            Intent::Close {
                ticket,
                volume,
                price_hint,
                reason,
            } => match self
                .handles
                .execution
                .close_order(ticket, volume, price_hint)
                .await
            {
                Ok(()) => info!(%ticket, %reason, "order closed"),
                Err(err) => warn!(%ticket, %reason, %err, "close failed"),
            },
        }
    }

    async fn watch_account(&mut self) {
        if let Ok(balance) = self.handles.account.balance().await {
            self.balance_watcher
                .observe(balance, self.notifier.as_ref());
        }
        if let Ok(floating) = self.handles.account.floating_profit().await {
            self.floating_alarm
                .observe(floating, self.notifier.as_ref());
        }
    }

    /// Equity floor and target checks, run against post-execution state.
    async fn check_equity(
        &mut self,
        cooldown_latched: bool,
        now: chrono::DateTime<chrono::Utc>,
    ) -> TickOutcome {
        let equity = match self.handles.account.equity().await {
            Ok(equity) => equity,
            Err(err) => {
                warn!(%err, "equity unavailable; deferring completion check");
                return TickOutcome::Continue;
            }
        };
        self.drawdown.update(equity);

        if equity < self.equity_cfg.min_equity {
            error!(%equity, floor = %self.equity_cfg.min_equity, "equity floor breached; flattening and halting");
            self.flatten(CloseReason::FloorBreach).await;
            self.notifier.send(
                "equity floor breached",
                &format!(
                    "Equity {equity} fell below the preservation floor {}; engine halted",
                    self.equity_cfg.min_equity
                ),
            );
            return TickOutcome::Halt;
        }

        if !cooldown_latched {
            let floor = match self.cooldown.floor(self.equity_cfg.initial_floor).await {
                Ok(floor) => floor,
                Err(err) => {
                    warn!(%err, "equity floor unreadable; using configured initial floor");
                    self.equity_cfg.initial_floor
                }
            };
            let target = floor + self.equity_cfg.profit_increment;
            if equity > target {
                info!(%equity, %target, "equity target reached; flattening the book");
                self.flatten(CloseReason::Completion).await;

                // The floor rolls forward to post-flatten equity so the next
                // round measures from realized capital.
                let new_floor = self.handles.account.equity().await.unwrap_or(equity);
                if let Err(err) = self.cooldown.latch(now, new_floor).await {
                    error!(%err, "failed to persist cooldown latch");
                }
                self.notifier.send(
                    "profit target reached",
                    &format!(
                        "Round complete at equity {equity}. Next target {}",
                        new_floor + self.equity_cfg.profit_increment
                    ),
                );
            }
        }

        TickOutcome::Continue
    }

    /// Close every open position for the instrument, re-reading the ledger
    /// first so same-tick closes are not double-issued.
    async fn flatten(&self, reason: CloseReason) {
        let ledger =
            LedgerView::load(self.handles.positions.as_ref(), &self.instrument.symbol).await;
        let bid = self.handles.market.bid().await.ok();
        let ask = self.handles.market.ask().await.ok();

        for position in ledger.open_positions() {
            let price_hint = match position.direction {
                crate::broker::Direction::Long => bid,
                crate::broker::Direction::Short => ask,
            }
            .unwrap_or(position.open_price);
            if let Err(err) = self
                .handles
                .execution
                .close_order(position.ticket, position.volume, price_hint)
                .await
            {
                warn!(ticket = %position.ticket, %reason, %err, "flatten close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use crate::broker::{
        AccountData, Direction, ExecutionAdapter, FlagStore, InstrumentInfo, MockBroker, OrderSpec,
        OrderTag,
    };
    use crate::config::{
        BreakoutConfig, DirectionMode, EntryDirection, EquityConfig, GovernorConfig, GridConfig,
        NotifyConfig,
    };
    use crate::engine::{
        BreakoutPolicy, GridPolicy, Policy, RunnerHandles, TickOutcome, TickRunner,
    };
    use crate::governor::RiskGovernor;
    use crate::notify::LogNotifier;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn instrument() -> InstrumentInfo {
        InstrumentInfo {
            symbol: "XAUUSD".into(),
            point: dec!(0.1),
            min_volume: dec!(0.01),
            volume_step: dec!(0.01),
            digits: 2,
        }
    }

    fn grid_config() -> GridConfig {
        GridConfig {
            direction_mode: DirectionMode::Single,
            entry_direction: EntryDirection::Long,
            take_profit_distance: dec!(1.3),
            scale_in_distance: dec!(4.0),
            hedge_trigger_distance: dec!(4.0),
            start_volume: dec!(0.05),
            step_volume: dec!(0.05),
            seed_max_hold_secs: 30,
            ..GridConfig::default()
        }
    }

    /// Governor with the volatility pause effectively disabled so tests can
    /// jump prices without tripping it.
    fn calm_governor() -> GovernorConfig {
        GovernorConfig {
            volatility_move_threshold: dec!(100000),
            ..GovernorConfig::default()
        }
    }

    fn equity_config() -> EquityConfig {
        EquityConfig {
            initial_floor: dec!(5000),
            profit_increment: dec!(700),
            cooldown_wait_hours: 5,
            restart_blackout_weekday: 6,
            min_equity: dec!(50),
        }
    }

    fn quiet_monday() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 3, 10, 0, 0).unwrap()
    }

    fn broker_at(bid: Decimal) -> Arc<MockBroker> {
        let broker = Arc::new(MockBroker::new(
            instrument(),
            dec!(5000),
            bid,
            bid + dec!(0.3),
        ));
        broker.set_now(quiet_monday());
        broker
    }

    fn runner_with(
        broker: &Arc<MockBroker>,
        policy: Box<dyn Policy>,
        governor_cfg: GovernorConfig,
        equity_cfg: EquityConfig,
    ) -> TickRunner {
        let handles = RunnerHandles {
            execution: broker.clone(),
            market: broker.clone(),
            account: broker.clone(),
            positions: broker.clone(),
            flags: broker.clone(),
        };
        TickRunner::new(
            handles,
            instrument(),
            policy,
            RiskGovernor::new(governor_cfg),
            equity_cfg,
            &NotifyConfig::default(),
            Arc::new(LogNotifier),
            dec!(5000),
        )
    }

    async fn open_member(
        broker: &MockBroker,
        direction: Direction,
        sequence: u32,
        volume: Decimal,
    ) -> crate::broker::TicketId {
        broker
            .submit_order(OrderSpec {
                symbol: "XAUUSD".into(),
                direction,
                volume,
                price_hint: dec!(0),
                stop_loss: None,
                take_profit: None,
                tag: OrderTag::member(direction, sequence),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn grid_seed_protocol_end_to_end() {
        let broker = broker_at(dec!(100.0));
        let mut runner = runner_with(
            &broker,
            Box::new(GridPolicy::new(grid_config())),
            calm_governor(),
            equity_config(),
        );

        // Tick 1: empty book -> exactly one seed marker at minimum volume.
        assert_eq!(runner.on_tick().await, TickOutcome::Continue);
        let open = broker.open_snapshot();
        assert_eq!(open.len(), 1);
        assert!(open[0].tag.is_seed());
        assert_eq!(open[0].volume, dec!(0.01));

        // Tick 2: seed on the book, nothing else happens.
        broker.advance(Duration::seconds(5));
        runner.on_tick().await;
        assert_eq!(broker.open_snapshot().len(), 1);

        // Tick 3: seed has outlived its allowance -> closed into history.
        broker.advance(Duration::seconds(30));
        runner.on_tick().await;
        assert!(broker.open_snapshot().is_empty());
        assert_eq!(broker.closed_snapshot().len(), 1);
        assert!(broker.closed_snapshot()[0].tag.is_seed());

        // Tick 4: boundary in place, pending flag armed -> member-1 commits.
        broker.advance(Duration::seconds(1));
        runner.on_tick().await;
        let open = broker.open_snapshot();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].tag, OrderTag::member(Direction::Long, 1));
        assert_eq!(open[0].volume, dec!(0.05));
        assert!(open[0].take_profit.is_some());
    }

    #[tokio::test]
    async fn worked_scale_in_and_harvest_scenario() {
        // Member-1 long from the 100.00 area, ask down at 95.90 (past the 4.0
        // scale-in distance), realized series profit 45 against a 2x harvest
        // multiplier.
        let broker = broker_at(dec!(100.0));

        // Closed history, oldest first: seed boundary then a realized winner.
        broker.inject_closed(crate::broker::Position {
            ticket: crate::broker::TicketId(0),
            symbol: "XAUUSD".into(),
            direction: Direction::Long,
            volume: dec!(0.01),
            open_price: dec!(101.0),
            opened_at: quiet_monday() - Duration::minutes(60),
            stop_loss: None,
            take_profit: None,
            profit: dec!(-0.1),
            tag: OrderTag::seed(Direction::Long),
        });
        broker.inject_closed(crate::broker::Position {
            ticket: crate::broker::TicketId(0),
            symbol: "XAUUSD".into(),
            direction: Direction::Long,
            volume: dec!(0.10),
            open_price: dec!(98.0),
            opened_at: quiet_monday() - Duration::minutes(30),
            stop_loss: None,
            take_profit: None,
            profit: dec!(45),
            tag: OrderTag::member(Direction::Long, 2),
        });

        let member1 = open_member(&broker, Direction::Long, 1, dec!(0.05)).await;

        // Price falls: member-1 fills at ask 100.3, bid drops to 95.60 so the
        // ask sits at 95.90 (distance 4.40 from the 100.3 fill, loss ~23.5).
        broker.set_price(dec!(95.60), dec!(95.90));

        let mut runner = runner_with(
            &broker,
            Box::new(GridPolicy::new(grid_config())),
            calm_governor(),
            equity_config(),
        );
        runner.on_tick().await;

        // Member-1 filled at ask 100.3, so its loss is (95.60 - 100.3) * 0.05 *
        // 100 = -23.50 and the harvest bar sits at 47. Realized 45 misses it;
        // only the scale-in fires this tick.
        let open = broker.open_snapshot();
        let member2: Vec<_> = open
            .iter()
            .filter(|p| p.tag == OrderTag::member(Direction::Long, 2))
            .collect();
        assert_eq!(member2.len(), 1, "scale-in should add member-2");
        assert_eq!(member2[0].volume, dec!(0.10));
        assert!(open.iter().any(|p| p.ticket == member1));
    }

    #[tokio::test]
    async fn harvest_closes_oldest_when_realized_covers_double_the_loss() {
        let broker = broker_at(dec!(100.0));

        broker.inject_closed(crate::broker::Position {
            ticket: crate::broker::TicketId(0),
            symbol: "XAUUSD".into(),
            direction: Direction::Long,
            volume: dec!(0.01),
            open_price: dec!(101.0),
            opened_at: quiet_monday() - Duration::minutes(60),
            stop_loss: None,
            take_profit: None,
            profit: dec!(-0.1),
            tag: OrderTag::seed(Direction::Long),
        });
        broker.inject_closed(crate::broker::Position {
            ticket: crate::broker::TicketId(0),
            symbol: "XAUUSD".into(),
            direction: Direction::Long,
            volume: dec!(0.10),
            open_price: dec!(98.0),
            opened_at: quiet_monday() - Duration::minutes(30),
            stop_loss: None,
            take_profit: None,
            profit: dec!(50),
            tag: OrderTag::member(Direction::Long, 2),
        });

        let member1 = open_member(&broker, Direction::Long, 1, dec!(0.05)).await;
        // Loss = (95.60 - 100.3) * 0.05 * 100 = -23.5; realized 50 > 47.
        broker.set_price(dec!(95.60), dec!(95.90));

        let mut runner = runner_with(
            &broker,
            Box::new(GridPolicy::new(grid_config())),
            calm_governor(),
            equity_config(),
        );
        runner.on_tick().await;

        let open = broker.open_snapshot();
        assert!(
            !open.iter().any(|p| p.ticket == member1),
            "harvest should have closed member-1"
        );
        // The scale-in still happened off the (previously) newest member.
        assert!(open
            .iter()
            .any(|p| p.tag == OrderTag::member(Direction::Long, 2)));
    }

    #[tokio::test]
    async fn equity_completion_flattens_once_and_latches_cooldown() {
        let broker = broker_at(dec!(100.0));
        let m1 = open_member(&broker, Direction::Long, 1, dec!(0.05)).await;
        let m2 = open_member(&broker, Direction::Long, 2, dec!(0.10)).await;

        // Price rips: equity = 5000 + floating well past the 5700 target.
        broker.set_price(dec!(160.0), dec!(160.3));
        assert!(broker.equity().await.unwrap() > dec!(5700));

        let mut runner = runner_with(
            &broker,
            Box::new(GridPolicy::new(grid_config())),
            calm_governor(),
            equity_config(),
        );

        assert_eq!(runner.on_tick().await, TickOutcome::Continue);

        // Everything flattened exactly once, cooldown latched, floor rolled.
        assert!(broker.open_snapshot().is_empty());
        let closed = broker.closed_snapshot();
        assert!(closed.iter().any(|p| p.ticket == m1));
        assert!(closed.iter().any(|p| p.ticket == m2));
        assert_eq!(
            broker.get("cooldown.latched").await.unwrap(),
            Some("1".to_string())
        );
        let floor: Decimal = broker
            .get("equity.floor")
            .await
            .unwrap()
            .unwrap()
            .parse()
            .unwrap();
        assert!(floor > dec!(5700));

        // Subsequent ticks with equity still above target: no duplicate
        // completion, no new orders while latched.
        let closed_before = broker.closed_snapshot().len();
        broker.advance(Duration::seconds(10));
        runner.on_tick().await;
        broker.advance(Duration::seconds(10));
        runner.on_tick().await;
        assert_eq!(broker.closed_snapshot().len(), closed_before);
        assert!(broker.open_snapshot().is_empty());
    }

    #[tokio::test]
    async fn equity_floor_breach_flattens_and_halts() {
        let broker = broker_at(dec!(100.0));
        let m1 = open_member(&broker, Direction::Long, 1, dec!(0.05)).await;
        broker.set_balance(dec!(40)); // below the 50 floor

        let mut runner = runner_with(
            &broker,
            Box::new(GridPolicy::new(grid_config())),
            calm_governor(),
            equity_config(),
        );

        assert_eq!(runner.on_tick().await, TickOutcome::Halt);
        assert!(broker.open_snapshot().is_empty());
        assert!(broker.closed_snapshot().iter().any(|p| p.ticket == m1));
    }

    #[tokio::test]
    async fn wide_spread_blocks_opens_but_trailing_modify_executes() {
        // Spread ceiling 30 points; quote 45 points wide. A profitable
        // breakout position still gets its trailing stop advanced.
        let broker = Arc::new(MockBroker::new(
            instrument(),
            dec!(5000),
            dec!(1900.0),
            dec!(1904.5), // 45 points at 0.1/point
        ));
        broker.set_now(quiet_monday());

        let ticket = broker
            .submit_order(OrderSpec {
                symbol: "XAUUSD".into(),
                direction: Direction::Long,
                volume: dec!(0.05),
                price_hint: dec!(1904.5),
                stop_loss: None,
                take_profit: None,
                tag: OrderTag::member(Direction::Long, 1),
            })
            .await
            .unwrap();
        // Push the quote up so the position is profitable past activation.
        broker.set_price(dec!(1906.0), dec!(1910.5));

        let breakout = BreakoutPolicy::new(BreakoutConfig {
            entry_volume: dec!(0.05),
            trail_activation_distance: dec!(0.5),
            trail_distance: dec!(0.4),
            max_stop_distance: dec!(0.4),
        });
        // A queued entry must NOT open through the spread gate.
        breakout.trigger().fire(Direction::Short);

        let mut runner = runner_with(
            &broker,
            Box::new(breakout),
            calm_governor(),
            equity_config(),
        );
        runner.on_tick().await;

        let open = broker.open_snapshot();
        assert_eq!(open.len(), 1, "no open intent may pass the spread gate");
        assert_eq!(open[0].ticket, ticket);
        // Trail followed the ask: 1910.5 - 0.4.
        assert_eq!(open[0].stop_loss, Some(dec!(1910.10)));

        // Spread normalizes above the held stop: the queued entry goes out on
        // the next tick and the position survives.
        broker.set_price(dec!(1910.5), dec!(1910.8));
        runner.on_tick().await;
        assert_eq!(broker.open_snapshot().len(), 2);
    }

    #[tokio::test]
    async fn cooldown_survives_a_restart() {
        let broker = broker_at(dec!(100.0));
        open_member(&broker, Direction::Long, 1, dec!(0.20)).await;
        // (160.0 - 100.3) * 0.20 * 100 = 1194 floating, well past the target.
        broker.set_price(dec!(160.0), dec!(160.3));

        let mut runner = runner_with(
            &broker,
            Box::new(GridPolicy::new(grid_config())),
            calm_governor(),
            equity_config(),
        );
        runner.on_tick().await;
        assert_eq!(
            broker.get("cooldown.latched").await.unwrap(),
            Some("1".to_string())
        );

        // "Restart": a fresh runner over the same flag store. The latch still
        // vetoes new series, so the book stays empty.
        let mut restarted = runner_with(
            &broker,
            Box::new(GridPolicy::new(grid_config())),
            calm_governor(),
            equity_config(),
        );
        broker.advance(Duration::seconds(5));
        restarted.on_tick().await;
        assert!(broker.open_snapshot().is_empty());
    }

    #[tokio::test]
    async fn rejected_open_retries_on_a_later_tick() {
        let broker = broker_at(dec!(100.0));
        broker.reject_next_submit("momentary broker error");

        let mut runner = runner_with(
            &broker,
            Box::new(GridPolicy::new(grid_config())),
            calm_governor(),
            equity_config(),
        );

        // Tick 1: the seed submit is rejected; nothing lands on the book.
        runner.on_tick().await;
        assert!(broker.open_snapshot().is_empty());

        // The pending flag already advanced, which is exactly the reason the
        // two-phase protocol exists: a dropped cold-start order does not stall
        // the series. The commit leg goes out on the next evaluation.
        broker.advance(Duration::seconds(1));
        runner.on_tick().await;
        let open = broker.open_snapshot();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].tag, OrderTag::member(Direction::Long, 1));
    }
}
