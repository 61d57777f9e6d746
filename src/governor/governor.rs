//! Gate coordination: one place that decides whether this tick may open new
//! risk, and the final filter that strips vetoed intents.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use tracing::{debug, warn};

use crate::config::GovernorConfig;
use crate::engine::Intent;

use super::blackout::BlackoutCalendar;
use super::volatility::VolatilityPause;

/// Why opens are vetoed this tick.
#[derive(Debug, Clone, PartialEq)]
pub enum GateReason {
    Spread { spread: Decimal, ceiling: Decimal },
    PositionCount { count: usize, ceiling: usize },
    Blackout,
    VolatilityPause,
    Cooldown,
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateReason::Spread { spread, ceiling } => {
                write!(f, "spread {spread} above ceiling {ceiling}")
            }
            GateReason::PositionCount { count, ceiling } => {
                write!(f, "{count} open positions at ceiling {ceiling}")
            }
            GateReason::Blackout => f.write_str("blackout window"),
            GateReason::VolatilityPause => f.write_str("volatility pause"),
            GateReason::Cooldown => f.write_str("cooldown latched"),
        }
    }
}

/// Cross-cutting environment checks applied before and after the policy.
pub struct RiskGovernor {
    cfg: GovernorConfig,
    calendar: BlackoutCalendar,
    volatility: VolatilityPause,
}

impl RiskGovernor {
    pub fn new(cfg: GovernorConfig) -> Self {
        let calendar = BlackoutCalendar::from_config(&cfg);
        let volatility = VolatilityPause::from_config(&cfg);
        Self {
            cfg,
            calendar,
            volatility,
        }
    }

    /// Evaluate the environment for this tick. An empty result means opens
    /// are allowed; any entry vetoes them (risk-reducing intents always
    /// pass).
    pub fn environment_gate(
        &mut self,
        now: DateTime<Utc>,
        bid: Decimal,
        spread_points: Decimal,
        open_count: usize,
        cooldown_latched: bool,
    ) -> Vec<GateReason> {
        let mut reasons = Vec::new();

        if spread_points > self.cfg.max_spread_points {
            reasons.push(GateReason::Spread {
                spread: spread_points,
                ceiling: self.cfg.max_spread_points,
            });
        }

        if open_count >= self.cfg.max_positions {
            reasons.push(GateReason::PositionCount {
                count: open_count,
                ceiling: self.cfg.max_positions,
            });
        }

        if self.calendar.is_blackout(now) {
            reasons.push(GateReason::Blackout);
        }

        // The pause tracker needs the price every tick, gated or not.
        if self.volatility.observe(now, bid) {
            reasons.push(GateReason::VolatilityPause);
        }

        if cooldown_latched {
            reasons.push(GateReason::Cooldown);
        }

        for reason in &reasons {
            debug!(%reason, "opens vetoed");
        }
        reasons
    }

    /// Strip open intents when any gate fired. Belt to the policies'
    /// braces: a well-behaved policy saw `opens_allowed == false` and
    /// emitted none.
    pub fn filter_intents(&self, intents: Vec<Intent>, reasons: &[GateReason]) -> Vec<Intent> {
        if reasons.is_empty() {
            return intents;
        }
        intents
            .into_iter()
            .filter(|intent| {
                if intent.reduces_risk() {
                    true
                } else {
                    warn!(kind = intent.kind(), "vetoed open intent reached the filter");
                    false
                }
            })
            .collect()
    }
}
