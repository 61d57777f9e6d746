//! Recurring blackout windows derived from the high-impact release schedule.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use crate::config::{BlackoutWindowConfig, GovernorConfig};

/// One recurring window, stored as minutes of day in reference time.
#[derive(Debug, Clone)]
struct Window {
    /// Day of week as days from Sunday; `None` matches every day.
    weekday: Option<u8>,
    first_week_only: bool,
    /// Inclusive start minute of day.
    start: u32,
    /// Exclusive end minute of day; `start > end` wraps midnight.
    end: u32,
}

impl Window {
    fn contains(&self, weekday: u8, day_of_month: u32, minute: u32) -> bool {
        if let Some(required) = self.weekday {
            if required != weekday {
                return false;
            }
        }
        if self.first_week_only && day_of_month >= 8 {
            return false;
        }
        if self.start <= self.end {
            minute >= self.start && minute < self.end
        } else {
            minute >= self.start || minute < self.end
        }
    }
}

/// Table of recurring no-open windows, evaluated in reference time
/// (broker time plus a configured hour offset).
#[derive(Debug, Clone)]
pub struct BlackoutCalendar {
    hour_offset: i32,
    windows: Vec<Window>,
}

impl BlackoutCalendar {
    pub fn from_config(cfg: &GovernorConfig) -> Self {
        Self {
            hour_offset: cfg.blackout_hour_offset,
            windows: cfg.blackout_windows.iter().map(Window::from).collect(),
        }
    }

    /// Whether opening new risk is disallowed at this instant.
    pub fn is_blackout(&self, now: DateTime<Utc>) -> bool {
        let reference = now + Duration::hours(self.hour_offset as i64);
        let weekday = reference.weekday().num_days_from_sunday() as u8;
        let day_of_month = reference.day();
        let minute = reference.hour() * 60 + reference.minute();
        self.windows
            .iter()
            .any(|w| w.contains(weekday, day_of_month, minute))
    }
}

impl From<&BlackoutWindowConfig> for Window {
    fn from(cfg: &BlackoutWindowConfig) -> Self {
        Self {
            weekday: cfg.weekday,
            first_week_only: cfg.first_week_only,
            start: cfg.start_hour * 60 + cfg.start_minute,
            end: cfg.end_hour * 60 + cfg.end_minute,
        }
    }
}
