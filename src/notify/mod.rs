//! Notification sinks and account watchers.
//!
//! The engine treats notification dispatch as a pure side-effect sink: the
//! [`Notifier`] trait is the boundary, and the default implementation just
//! logs. The watchers mirror the account-minding mails of the production
//! deployment: balance changes, a floating-profit alarm, and a daily range
//! digest.

use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::broker::MarketData;
use crate::utils::points::distance;

/// Side-effect sink for operator notifications.
pub trait Notifier: Send + Sync {
    fn send(&self, subject: &str, body: &str);
}

/// Default sink: structured log lines, nothing else.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, subject: &str, body: &str) {
        info!(target: "notify", subject, body, "notification");
    }
}

/// Announces balance changes bigger than a configured delta.
pub struct BalanceWatcher {
    min_delta: Decimal,
    last: Option<Decimal>,
}

impl BalanceWatcher {
    pub fn new(min_delta: Decimal) -> Self {
        Self {
            min_delta,
            last: None,
        }
    }

    pub fn observe(&mut self, balance: Decimal, notifier: &dyn Notifier) {
        let Some(last) = self.last else {
            self.last = Some(balance);
            return;
        };
        if balance == last {
            return;
        }
        let delta = balance - last;
        if delta.abs() < self.min_delta {
            return;
        }
        notifier.send(
            "balance changed",
            &format!("Balance moved {delta:+}; now {balance}"),
        );
        self.last = Some(balance);
    }
}

/// Raises one alarm per run when floating PnL swings past a threshold.
pub struct FloatingProfitAlarm {
    threshold: Decimal,
    sent: bool,
}

impl FloatingProfitAlarm {
    pub fn new(threshold: Decimal) -> Self {
        Self {
            threshold,
            sent: false,
        }
    }

    pub fn observe(&mut self, floating: Decimal, notifier: &dyn Notifier) {
        if self.threshold <= Decimal::ZERO || self.sent {
            return;
        }
        if floating.abs() > self.threshold {
            warn!(%floating, threshold = %self.threshold, "floating profit past alarm threshold");
            notifier.send(
                "floating profit alarm",
                &format!("Floating PnL is {floating}, past the {} threshold", self.threshold),
            );
            self.sent = true;
        }
    }
}

/// Build the daily high/low digest from the market's daily bars.
pub async fn daily_range_report(market: &dyn MarketData, days: u32) -> String {
    let mut lines = Vec::new();
    for offset in 0..days {
        match market.daily_bar(offset).await {
            Ok(bar) => {
                let range = distance(bar.high, bar.low);
                lines.push(format!(
                    "{}: high {} low {} range {}",
                    bar.time.format("%Y-%m-%d"),
                    bar.high,
                    bar.low,
                    range
                ));
            }
            Err(err) => {
                warn!(offset, %err, "daily bar unavailable for report");
                break;
            }
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    #[derive(Default)]
    struct CapturingNotifier {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for CapturingNotifier {
        fn send(&self, subject: &str, body: &str) {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string()));
        }
    }

    impl CapturingNotifier {
        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[test]
    fn balance_watcher_respects_minimum_delta() {
        let notifier = CapturingNotifier::default();
        let mut watcher = BalanceWatcher::new(dec!(10));

        watcher.observe(dec!(5000), &notifier); // baseline, no mail
        watcher.observe(dec!(5004), &notifier); // too small
        watcher.observe(dec!(5020), &notifier); // 20 from baseline
        assert_eq!(notifier.count(), 1);

        // Baseline advanced to 5020.
        watcher.observe(dec!(5025), &notifier);
        assert_eq!(notifier.count(), 1);
        watcher.observe(dec!(5000), &notifier);
        assert_eq!(notifier.count(), 2);
    }

    #[test]
    fn floating_alarm_fires_once_per_run() {
        let notifier = CapturingNotifier::default();
        let mut alarm = FloatingProfitAlarm::new(dec!(100));

        alarm.observe(dec!(-50), &notifier);
        assert_eq!(notifier.count(), 0);
        alarm.observe(dec!(-150), &notifier);
        assert_eq!(notifier.count(), 1);
        // Latched: deeper swings do not spam.
        alarm.observe(dec!(-500), &notifier);
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn zero_threshold_disables_the_alarm() {
        let notifier = CapturingNotifier::default();
        let mut alarm = FloatingProfitAlarm::new(Decimal::ZERO);
        alarm.observe(dec!(-10000), &notifier);
        assert_eq!(notifier.count(), 0);
    }

    #[tokio::test]
    async fn daily_report_lists_each_bar() {
        use crate::broker::{Bar, InstrumentInfo, MockBroker};
        use chrono::{Duration, Utc};

        let broker = MockBroker::new(
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
        );
        let today = Utc::now();
        broker.set_daily_bars(vec![
            Bar {
                time: today,
                open: dec!(1900),
                high: dec!(1915),
                low: dec!(1895),
            },
            Bar {
                time: today - Duration::days(1),
                open: dec!(1890),
                high: dec!(1905),
                low: dec!(1885),
            },
        ]);

        let report = daily_range_report(&broker, 5).await;
        let lines: Vec<_> = report.lines().collect();
        // Only two bars exist; the report stops where data runs out.
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("range 20"));
    }
}
