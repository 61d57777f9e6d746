//! Per-tick materialized view of the broker-held position ledger.
//!
//! The broker is the single source of truth: the view is rebuilt from the
//! position feed on every tick and never cached across ticks. A failed read
//! of an individual entry is skipped with a warning, because broker state
//! can mutate between the count and the per-index re-reads.

use rust_decimal::Decimal;
use tracing::warn;

use crate::broker::{Direction, Position, PositionFeed};

/// Snapshot of open positions and closed history for one instrument.
#[derive(Debug, Clone)]
pub struct LedgerView {
    symbol: String,
    open: Vec<Position>,
    /// Closed positions, most recent first.
    closed: Vec<Position>,
}

/// Per-direction slice of the open series.
#[derive(Debug)]
pub struct SeriesView<'a> {
    pub direction: Direction,
    /// Series members ordered oldest first.
    pub members: Vec<&'a Position>,
    /// Seed markers currently open for this direction.
    pub seeds: Vec<&'a Position>,
}

impl LedgerView {
    /// Fetch the current view from the broker feed.
    ///
    /// Entries that fail to read are skipped, not fatal; the evaluation
    /// proceeds on whatever data is available this tick.
    pub async fn load(feed: &dyn PositionFeed, symbol: &str) -> Self {
        let mut open = Vec::new();
        match feed.open_count().await {
            Ok(count) => {
                for index in 0..count {
                    match feed.open_at(index).await {
                        Ok(position) if position.symbol == symbol => open.push(position),
                        Ok(_) => {}
                        Err(err) => {
                            warn!(index, %err, "skipping unreadable open ledger entry");
                        }
                    }
                }
            }
            Err(err) => warn!(%err, "open ledger count unavailable; treating as empty"),
        }

        let mut closed = Vec::new();
        match feed.closed_count().await {
            Ok(count) => {
                // Walk backward so the view is most-recent-first.
                for index in (0..count).rev() {
                    match feed.closed_at(index).await {
                        Ok(position) if position.symbol == symbol => closed.push(position),
                        Ok(_) => {}
                        Err(err) => {
                            warn!(index, %err, "skipping unreadable closed ledger entry");
                        }
                    }
                }
            }
            Err(err) => warn!(%err, "closed ledger count unavailable; treating as empty"),
        }

        Self {
            symbol: symbol.to_string(),
            open,
            closed,
        }
    }

    /// Build a view from explicit data (tests, replay).
    pub fn from_parts(symbol: &str, open: Vec<Position>, closed_recent_first: Vec<Position>) -> Self {
        Self {
            symbol: symbol.to_string(),
            open,
            closed: closed_recent_first,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Every open position for the instrument, engine-tagged or not.
    pub fn open_positions(&self) -> &[Position] {
        &self.open
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    /// Closed positions, most recent first.
    pub fn closed_positions(&self) -> &[Position] {
        &self.closed
    }

    /// Engine-tagged open members and seeds of one direction.
    pub fn series(&self, direction: Direction) -> SeriesView<'_> {
        let mut members: Vec<&Position> = self
            .open
            .iter()
            .filter(|p| p.tag.is_member() && p.tag.direction() == Some(direction))
            .collect();
        members.sort_by_key(|p| (p.opened_at, p.ticket));

        let seeds = self
            .open
            .iter()
            .filter(|p| p.tag.is_seed() && p.tag.direction() == Some(direction))
            .collect();

        SeriesView {
            direction,
            members,
            seeds,
        }
    }

    /// Floating profit of everything the engine owns (members and seeds,
    /// both directions).
    pub fn floating_profit(&self) -> Decimal {
        self.open
            .iter()
            .filter(|p| p.tag.direction().is_some())
            .map(|p| p.profit)
            .sum()
    }

    /// Realized profit of the direction's series since its last seed marker.
    ///
    /// Walks the closed history backward and stops at the most recent seed
    /// marker for the direction, so the sum resets to zero exactly at the
    /// series boundary. Entries of the other direction, and manual entries,
    /// neither contribute nor stop the walk.
    pub fn realized_series_profit(&self, direction: Direction) -> Decimal {
        let mut total = Decimal::ZERO;
        for position in &self.closed {
            if position.tag.direction() != Some(direction) {
                continue;
            }
            if position.tag.is_seed() {
                break;
            }
            total += position.profit;
        }
        total
    }
}

impl SeriesView<'_> {
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// First member of the series still open.
    pub fn oldest(&self) -> Option<&Position> {
        self.members.first().copied()
    }

    /// Most recently opened member.
    pub fn newest(&self) -> Option<&Position> {
        self.members.last().copied()
    }

    pub fn floating_profit(&self) -> Decimal {
        self.members.iter().map(|p| p.profit).sum()
    }

    pub fn total_volume(&self) -> Decimal {
        self.members.iter().map(|p| p.volume).sum()
    }

    /// Ladder sequence for the next member.
    pub fn next_sequence(&self) -> u32 {
        self.members
            .iter()
            .filter_map(|p| p.tag.sequence())
            .max()
            .unwrap_or(0)
            + 1
    }
}
