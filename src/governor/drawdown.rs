//! Peak-equity and drawdown bookkeeping for the per-tick status line.

use rust_decimal::Decimal;
use tracing::warn;

use crate::utils::points::safe_div;

/// Tracks peak equity and the worst excursion below it.
#[derive(Debug)]
pub struct DrawdownTracker {
    peak_equity: Decimal,
    current_drawdown: Decimal,
    worst_drawdown: Decimal,
}

impl DrawdownTracker {
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            peak_equity: initial_equity,
            current_drawdown: Decimal::ZERO,
            worst_drawdown: Decimal::ZERO,
        }
    }

    /// Update with the latest equity; returns the current drawdown fraction.
    pub fn update(&mut self, equity: Decimal) -> Decimal {
        if equity > self.peak_equity {
            self.peak_equity = equity;
            self.current_drawdown = Decimal::ZERO;
        } else {
            self.current_drawdown = safe_div(self.peak_equity - equity, self.peak_equity);
            if self.current_drawdown > self.worst_drawdown {
                self.worst_drawdown = self.current_drawdown;
                warn!(
                    drawdown = %self.worst_drawdown,
                    peak = %self.peak_equity,
                    current = %equity,
                    "new worst drawdown recorded"
                );
            }
        }
        self.current_drawdown
    }

    pub fn peak_equity(&self) -> Decimal {
        self.peak_equity
    }

    pub fn worst_drawdown(&self) -> Decimal {
        self.worst_drawdown
    }
}
