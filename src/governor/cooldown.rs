//! Cooldown latch: after an equity-target completion no new series may open
//! until the wait elapses, and late in the week it stays latched entirely.
//!
//! The latch is the one piece of engine state that must survive a restart,
//! so it lives behind the persistent flag store together with its timestamp
//! and the rolling equity floor.

use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use crate::broker::{BrokerError, FlagStore};
use crate::config::EquityConfig;

const FLAG_LATCHED: &str = "cooldown.latched";
const FLAG_SINCE: &str = "cooldown.since";
const FLAG_FLOOR: &str = "equity.floor";

pub struct CooldownLatch {
    store: Arc<dyn FlagStore>,
    wait: Duration,
    restart_blackout_weekday: u8,
}

impl CooldownLatch {
    pub fn new(store: Arc<dyn FlagStore>, cfg: &EquityConfig) -> Self {
        Self {
            store,
            wait: Duration::hours(cfg.cooldown_wait_hours),
            restart_blackout_weekday: cfg.restart_blackout_weekday,
        }
    }

    /// Whether the latch currently blocks new series, clearing it when the
    /// wait has elapsed outside the late-week restart blackout.
    pub async fn is_latched(&self, now: DateTime<Utc>) -> Result<bool, BrokerError> {
        match self.store.get(FLAG_LATCHED).await? {
            Some(v) if v == "1" => {}
            _ => return Ok(false),
        }

        let since = match self.store.get(FLAG_SINCE).await? {
            Some(raw) => match DateTime::parse_from_rfc3339(&raw) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(err) => {
                    // Unreadable timestamp: re-stamp and wait the full
                    // period from here rather than clearing blind.
                    warn!(%err, "cooldown timestamp unreadable; re-stamping");
                    self.store.set(FLAG_SINCE, &now.to_rfc3339()).await?;
                    now
                }
            },
            None => {
                self.store.set(FLAG_SINCE, &now.to_rfc3339()).await?;
                now
            }
        };

        let weekday = now.weekday().num_days_from_sunday() as u8;
        if weekday >= self.restart_blackout_weekday {
            info!(weekday, "cooldown held through the late-week blackout");
            return Ok(true);
        }

        if now - since > self.wait {
            info!("cooldown wait elapsed; clearing the latch");
            self.store.delete(FLAG_LATCHED).await?;
            self.store.delete(FLAG_SINCE).await?;
            return Ok(false);
        }

        Ok(true)
    }

    /// Latch after a completion, rolling the equity floor forward.
    pub async fn latch(&self, now: DateTime<Utc>, new_floor: Decimal) -> Result<(), BrokerError> {
        self.store.set(FLAG_LATCHED, "1").await?;
        self.store.set(FLAG_SINCE, &now.to_rfc3339()).await?;
        self.store.set(FLAG_FLOOR, &new_floor.to_string()).await?;
        info!(%new_floor, "cooldown latched");
        Ok(())
    }

    /// Current equity floor the next target is measured from.
    pub async fn floor(&self, default: Decimal) -> Result<Decimal, BrokerError> {
        match self.store.get(FLAG_FLOOR).await? {
            Some(raw) => match Decimal::from_str(&raw) {
                Ok(value) => Ok(value),
                Err(err) => {
                    warn!(%err, raw, "persisted equity floor unreadable; using default");
                    Ok(default)
                }
            },
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{InstrumentInfo, MockBroker};
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn store() -> Arc<MockBroker> {
        Arc::new(MockBroker::new(
            InstrumentInfo {
                symbol: "XAUUSD".into(),
                point: dec!(0.1),
                min_volume: dec!(0.01),
                volume_step: dec!(0.01),
                digits: 2,
            },
            dec!(5000),
            dec!(1900.0),
            dec!(1900.3),
        ))
    }

    fn latch(store: Arc<MockBroker>) -> CooldownLatch {
        CooldownLatch::new(
            store,
            &EquityConfig {
                cooldown_wait_hours: 5,
                restart_blackout_weekday: 3,
                ..EquityConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn latch_blocks_then_clears_after_wait() {
        let broker = store();
        let latch = latch(broker.clone());

        // 2026-08-03 is a Monday (weekday 1, below the blackout).
        let monday = Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap();
        assert!(!latch.is_latched(monday).await.unwrap());

        latch.latch(monday, dec!(5700)).await.unwrap();
        assert!(latch.is_latched(monday + Duration::hours(4)).await.unwrap());
        assert!(!latch
            .is_latched(monday + Duration::hours(6))
            .await
            .unwrap());
        // Cleared for good.
        assert!(!latch
            .is_latched(monday + Duration::hours(7))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn late_week_holds_the_latch_past_the_wait() {
        let broker = store();
        let latch = latch(broker.clone());

        // 2026-08-06 is a Thursday (weekday 4 >= 3).
        let thursday = Utc.with_ymd_and_hms(2026, 8, 6, 8, 0, 0).unwrap();
        latch.latch(thursday, dec!(5700)).await.unwrap();
        assert!(latch
            .is_latched(thursday + Duration::hours(20))
            .await
            .unwrap());

        // Monday of the next week releases it.
        let monday = Utc.with_ymd_and_hms(2026, 8, 10, 8, 0, 0).unwrap();
        assert!(!latch.is_latched(monday).await.unwrap());
    }

    #[tokio::test]
    async fn floor_round_trips_through_the_store() {
        let broker = store();
        let latch = latch(broker.clone());

        assert_eq!(latch.floor(dec!(5000)).await.unwrap(), dec!(5000));
        let monday = Utc.with_ymd_and_hms(2026, 8, 3, 8, 0, 0).unwrap();
        latch.latch(monday, dec!(5700)).await.unwrap();
        assert_eq!(latch.floor(dec!(5000)).await.unwrap(), dec!(5700));
    }
}
