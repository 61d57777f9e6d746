//! Volatility pause: anchor the price at the start of a rolling window and
//! stop opening when the market runs too far too fast.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::config::GovernorConfig;
use crate::utils::points::distance;

#[derive(Debug)]
pub struct VolatilityPause {
    move_threshold: Decimal,
    window: Duration,
    pause: Duration,
    anchor_price: Option<Decimal>,
    anchor_time: Option<DateTime<Utc>>,
    paused_until: Option<DateTime<Utc>>,
}

impl VolatilityPause {
    pub fn from_config(cfg: &GovernorConfig) -> Self {
        Self {
            move_threshold: cfg.volatility_move_threshold,
            window: Duration::seconds(cfg.volatility_window_secs),
            pause: Duration::seconds(cfg.volatility_pause_secs),
            anchor_price: None,
            anchor_time: None,
            paused_until: None,
        }
    }

    /// Feed the current price; returns whether opens are paused.
    ///
    /// The anchor re-bases whenever the window elapses quietly or a breach
    /// fires, so back-to-back breaches keep extending the pause.
    pub fn observe(&mut self, now: DateTime<Utc>, price: Decimal) -> bool {
        let (anchor_price, anchor_time) = match (self.anchor_price, self.anchor_time) {
            (Some(p), Some(t)) => (p, t),
            _ => {
                self.anchor_price = Some(price);
                self.anchor_time = Some(now);
                return self.is_paused(now);
            }
        };

        let elapsed = now - anchor_time;
        if elapsed <= self.window {
            if distance(price, anchor_price) > self.move_threshold {
                warn!(
                    anchor = %anchor_price,
                    current = %price,
                    elapsed_secs = elapsed.num_seconds(),
                    "price moved too far within the window; pausing opens"
                );
                self.paused_until = Some(now + self.pause);
                self.anchor_price = Some(price);
                self.anchor_time = Some(now);
            }
        } else {
            self.anchor_price = Some(price);
            self.anchor_time = Some(now);
        }

        let paused = self.is_paused(now);
        if !paused && self.paused_until.is_some() {
            info!("volatility pause elapsed; opens re-enabled");
            self.paused_until = None;
        }
        paused
    }

    pub fn is_paused(&self, now: DateTime<Utc>) -> bool {
        self.paused_until.map_or(false, |until| now < until)
    }
}
