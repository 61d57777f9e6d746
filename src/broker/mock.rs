//! In-memory broker for paper trading and the test suite.
//!
//! Implements every boundary trait against a single shared state: a
//! controllable clock, a quoted price, an open-position book and a closed
//! history. Broker-side stop-loss / take-profit fills are simulated on each
//! price update so the engine observes them the same way it would in
//! production (it never causes them).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

use super::traits::{AccountData, ExecutionAdapter, FlagStore, MarketData, PositionFeed};
use super::types::{Bar, BrokerError, InstrumentInfo, OrderSpec, Position, TicketId};
use crate::broker::Direction;

#[derive(Debug)]
struct MockState {
    bid: Decimal,
    ask: Decimal,
    now: DateTime<Utc>,
    balance: Decimal,
    open: Vec<Position>,
    closed: Vec<Position>,
    daily_bars: Vec<Bar>,
    flags: HashMap<String, String>,
    /// Tickets whose per-index reads fail (ledger skip-entry testing).
    unreadable: HashSet<TicketId>,
    /// When set, the next submit is rejected with this reason.
    reject_next_submit: Option<String>,
}

/// Paper-trading broker shared across the engine's trait handles.
pub struct MockBroker {
    instrument: InstrumentInfo,
    /// Account currency per 1.0 volume per price unit of movement.
    unit_value: Decimal,
    state: Arc<RwLock<MockState>>,
    ticket_counter: AtomicU64,
}

impl MockBroker {
    pub fn new(instrument: InstrumentInfo, balance: Decimal, bid: Decimal, ask: Decimal) -> Self {
        Self {
            instrument,
            unit_value: Decimal::ONE_HUNDRED,
            state: Arc::new(RwLock::new(MockState {
                bid,
                ask,
                now: Utc::now(),
                balance,
                open: Vec::new(),
                closed: Vec::new(),
                daily_bars: Vec::new(),
                flags: HashMap::new(),
                unreadable: HashSet::new(),
                reject_next_submit: None,
            })),
            ticket_counter: AtomicU64::new(1),
        }
    }

    /// Override the per-unit profit value (defaults to 100, a gold-like
    /// contract: $100 per 1.0 lot per price unit).
    pub fn with_unit_value(mut self, unit_value: Decimal) -> Self {
        self.unit_value = unit_value;
        self
    }

    fn mark_price(&self, direction: Direction, state: &MockState) -> Decimal {
        // Longs are valued (and closed) at bid, shorts at ask.
        match direction {
            Direction::Long => state.bid,
            Direction::Short => state.ask,
        }
    }

    fn revalue(&self, state: &mut MockState) {
        let (bid, ask) = (state.bid, state.ask);
        for pos in state.open.iter_mut() {
            let mark = match pos.direction {
                Direction::Long => bid,
                Direction::Short => ask,
            };
            let delta = match pos.direction {
                Direction::Long => mark - pos.open_price,
                Direction::Short => pos.open_price - mark,
            };
            pos.profit = delta * pos.volume * self.unit_value;
        }
    }

    /// Move the quote; revalues open positions and fills any stop-loss /
    /// take-profit the new price crossed.
    pub fn set_price(&self, bid: Decimal, ask: Decimal) {
        let mut state = self.state.write().unwrap();
        state.bid = bid;
        state.ask = ask;
        self.revalue(&mut state);

        let mut filled = Vec::new();
        state.open.retain(|pos| {
            let mark = match pos.direction {
                Direction::Long => bid,
                Direction::Short => ask,
            };
            let stop_hit = pos.stop_loss.map_or(false, |sl| match pos.direction {
                Direction::Long => mark <= sl,
                Direction::Short => mark >= sl,
            });
            let target_hit = pos.take_profit.map_or(false, |tp| match pos.direction {
                Direction::Long => mark >= tp,
                Direction::Short => mark <= tp,
            });
            if stop_hit || target_hit {
                filled.push(pos.clone());
                false
            } else {
                true
            }
        });
        for pos in filled {
            debug!(ticket = %pos.ticket, profit = %pos.profit, "broker-side exit filled");
            state.balance += pos.profit;
            state.closed.push(pos);
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.write().unwrap();
        state.now += duration;
    }

    pub fn set_now(&self, now: DateTime<Utc>) {
        self.state.write().unwrap().now = now;
    }

    pub fn set_daily_bars(&self, bars: Vec<Bar>) {
        self.state.write().unwrap().daily_bars = bars;
    }

    pub fn set_balance(&self, balance: Decimal) {
        self.state.write().unwrap().balance = balance;
    }

    /// Test hook: make per-index reads of this ticket fail.
    pub fn poison_ticket(&self, ticket: TicketId) {
        self.state.write().unwrap().unreadable.insert(ticket);
    }

    /// Test hook: reject the next submitted order.
    pub fn reject_next_submit(&self, reason: &str) {
        self.state.write().unwrap().reject_next_submit = Some(reason.to_string());
    }

    pub fn open_snapshot(&self) -> Vec<Position> {
        self.state.read().unwrap().open.clone()
    }

    pub fn closed_snapshot(&self) -> Vec<Position> {
        self.state.read().unwrap().closed.clone()
    }

    /// Seed a pre-existing position (e.g. restart scenarios).
    pub fn inject_position(&self, mut position: Position) -> TicketId {
        let ticket = TicketId(self.ticket_counter.fetch_add(1, Ordering::SeqCst));
        position.ticket = ticket;
        let mut state = self.state.write().unwrap();
        state.open.push(position);
        self.revalue(&mut state);
        ticket
    }

    /// Seed a closed-history entry directly (oldest first).
    pub fn inject_closed(&self, mut position: Position) {
        let ticket = TicketId(self.ticket_counter.fetch_add(1, Ordering::SeqCst));
        position.ticket = ticket;
        self.state.write().unwrap().closed.push(position);
    }
}

#[async_trait]
impl ExecutionAdapter for MockBroker {
    async fn submit_order(&self, order: OrderSpec) -> Result<TicketId, BrokerError> {
        let mut state = self.state.write().unwrap();
        if let Some(reason) = state.reject_next_submit.take() {
            return Err(BrokerError::Rejected { reason });
        }
        if order.volume < self.instrument.min_volume {
            return Err(BrokerError::Rejected {
                reason: format!("volume {} below minimum", order.volume),
            });
        }
        let fill_price = match order.direction {
            Direction::Long => state.ask,
            Direction::Short => state.bid,
        };
        let ticket = TicketId(self.ticket_counter.fetch_add(1, Ordering::SeqCst));
        let position = Position {
            ticket,
            symbol: order.symbol,
            direction: order.direction,
            volume: order.volume,
            open_price: fill_price,
            opened_at: state.now,
            stop_loss: order.stop_loss,
            take_profit: order.take_profit,
            profit: Decimal::ZERO,
            tag: order.tag,
        };
        debug!(%ticket, direction = %position.direction, volume = %position.volume, "mock fill");
        state.open.push(position);
        self.revalue(&mut state);
        Ok(ticket)
    }

    async fn modify_order(
        &self,
        ticket: TicketId,
        stop_loss: Option<Decimal>,
        take_profit: Option<Decimal>,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().unwrap();
        let pos = state
            .open
            .iter_mut()
            .find(|p| p.ticket == ticket)
            .ok_or(BrokerError::UnknownOrder(ticket))?;
        pos.stop_loss = stop_loss;
        pos.take_profit = take_profit;
        Ok(())
    }

    async fn close_order(
        &self,
        ticket: TicketId,
        _volume: Decimal,
        _price_hint: Decimal,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.write().unwrap();
        let idx = state
            .open
            .iter()
            .position(|p| p.ticket == ticket)
            .ok_or(BrokerError::UnknownOrder(ticket))?;
        let mut pos = state.open.remove(idx);
        let mark = self.mark_price(pos.direction, &state);
        let delta = match pos.direction {
            Direction::Long => mark - pos.open_price,
            Direction::Short => pos.open_price - mark,
        };
        pos.profit = delta * pos.volume * self.unit_value;
        state.balance += pos.profit;
        state.closed.push(pos);
        Ok(())
    }
}

#[async_trait]
impl MarketData for MockBroker {
    fn instrument(&self) -> InstrumentInfo {
        self.instrument.clone()
    }

    async fn bid(&self) -> Result<Decimal, BrokerError> {
        Ok(self.state.read().unwrap().bid)
    }

    async fn ask(&self) -> Result<Decimal, BrokerError> {
        Ok(self.state.read().unwrap().ask)
    }

    async fn spread_points(&self) -> Result<Decimal, BrokerError> {
        let state = self.state.read().unwrap();
        if self.instrument.point == Decimal::ZERO {
            return Err(BrokerError::Unavailable("zero point size".into()));
        }
        Ok((state.ask - state.bid) / self.instrument.point)
    }

    fn now(&self) -> DateTime<Utc> {
        self.state.read().unwrap().now
    }

    async fn daily_bar(&self, offset: u32) -> Result<Bar, BrokerError> {
        self.state
            .read()
            .unwrap()
            .daily_bars
            .get(offset as usize)
            .copied()
            .ok_or_else(|| BrokerError::Unavailable(format!("no daily bar at offset {offset}")))
    }
}

#[async_trait]
impl AccountData for MockBroker {
    async fn equity(&self) -> Result<Decimal, BrokerError> {
        let state = self.state.read().unwrap();
        let floating: Decimal = state.open.iter().map(|p| p.profit).sum();
        Ok(state.balance + floating)
    }

    async fn balance(&self) -> Result<Decimal, BrokerError> {
        Ok(self.state.read().unwrap().balance)
    }

    async fn floating_profit(&self) -> Result<Decimal, BrokerError> {
        let state = self.state.read().unwrap();
        Ok(state.open.iter().map(|p| p.profit).sum())
    }
}

#[async_trait]
impl PositionFeed for MockBroker {
    async fn open_count(&self) -> Result<usize, BrokerError> {
        Ok(self.state.read().unwrap().open.len())
    }

    async fn open_at(&self, index: usize) -> Result<Position, BrokerError> {
        let state = self.state.read().unwrap();
        let pos = state
            .open
            .get(index)
            .ok_or_else(|| BrokerError::Unavailable(format!("open index {index} out of range")))?;
        if state.unreadable.contains(&pos.ticket) {
            return Err(BrokerError::Unavailable(format!(
                "entry {} temporarily unreadable",
                pos.ticket
            )));
        }
        Ok(pos.clone())
    }

    async fn closed_count(&self) -> Result<usize, BrokerError> {
        Ok(self.state.read().unwrap().closed.len())
    }

    async fn closed_at(&self, index: usize) -> Result<Position, BrokerError> {
        let state = self.state.read().unwrap();
        state
            .closed
            .get(index)
            .cloned()
            .ok_or_else(|| BrokerError::Unavailable(format!("closed index {index} out of range")))
    }
}

#[async_trait]
impl FlagStore for MockBroker {
    async fn get(&self, key: &str) -> Result<Option<String>, BrokerError> {
        Ok(self.state.read().unwrap().flags.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BrokerError> {
        self.state
            .write()
            .unwrap()
            .flags
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), BrokerError> {
        self.state.write().unwrap().flags.remove(key);
        Ok(())
    }
}
