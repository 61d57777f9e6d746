//! Configuration management for the expert advisor engine.
//!
//! Loads settings from environment variables and config files. Price
//! thresholds are expressed in instrument price units (the engine compares
//! them against raw quote distances); only the spread ceiling is in points.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Traded instrument description
    #[serde(default)]
    pub instrument: InstrumentConfig,
    /// Which strategy variant drives the engine
    #[serde(default)]
    pub variant: VariantKind,
    /// Grid/martingale parameters
    #[serde(default)]
    pub grid: GridConfig,
    /// Breakout/trailing parameters
    #[serde(default)]
    pub breakout: BreakoutConfig,
    /// Fixed-risk single-shot parameters
    #[serde(default)]
    pub single_shot: SingleShotConfig,
    /// Risk governor gates
    #[serde(default)]
    pub governor: GovernorConfig,
    /// Equity target / floor and cooldown
    #[serde(default)]
    pub equity: EquityConfig,
    /// Account watcher thresholds
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Strategy variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VariantKind {
    #[default]
    Grid,
    Breakout,
    SingleShot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Price units per point
    #[serde(default = "default_point")]
    pub point: Decimal,
    #[serde(default = "default_min_volume")]
    pub min_volume: Decimal,
    #[serde(default = "default_volume_step")]
    pub volume_step: Decimal,
    #[serde(default = "default_digits")]
    pub digits: u32,
}

/// How series members scale in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScaleMode {
    /// Scale into losers, exit each member at a take-profit.
    #[default]
    Martingale,
    /// Scale into winners, exit each member at a stop-loss.
    Reverse,
}

/// One or two independently managed directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DirectionMode {
    Single,
    #[default]
    Dual,
}

/// Cold-start direction choice for single-direction and single-shot variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    /// Coin flip; the premise is a random walk.
    #[default]
    Random,
    Long,
    Short,
}

/// One stage of loss-aware step sizing: once the direction's floating loss
/// is at least `loss_beyond` (absolute account currency), the scale-in step
/// drops to `step_volume`. Stages must be non-increasing in volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStage {
    pub loss_beyond: Decimal,
    pub step_volume: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default)]
    pub scale_mode: ScaleMode,
    #[serde(default)]
    pub direction_mode: DirectionMode,
    #[serde(default)]
    pub entry_direction: EntryDirection,
    /// Exit distance for each member (take-profit, or stop-loss in reverse mode)
    #[serde(default = "default_take_profit_distance")]
    pub take_profit_distance: Decimal,
    /// Adverse (or favorable, in reverse mode) move that triggers a scale-in
    #[serde(default = "default_scale_in_distance")]
    pub scale_in_distance: Decimal,
    /// Move beyond which the oldest losing member becomes harvestable
    #[serde(default = "default_hedge_trigger_distance")]
    pub hedge_trigger_distance: Decimal,
    /// Volume of the first real member
    #[serde(default = "default_start_volume")]
    pub start_volume: Decimal,
    /// Base volume increment between members
    #[serde(default = "default_step_volume")]
    pub step_volume: Decimal,
    /// Loss-staged step overrides (deepest loss last)
    #[serde(default)]
    pub step_stages: Vec<StepStage>,
    /// Realized-profit multiple required to harvest the oldest loser
    #[serde(default = "default_harvest_multiplier")]
    pub harvest_multiplier: Decimal,
    /// Seconds a seed marker may live before it is force-closed
    #[serde(default = "default_seed_max_hold_secs")]
    pub seed_max_hold_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakoutConfig {
    #[serde(default = "default_entry_volume")]
    pub entry_volume: Decimal,
    /// Profit distance that activates the trailing stop
    #[serde(default = "default_trail_activation_distance")]
    pub trail_activation_distance: Decimal,
    /// Distance the stop trails behind the current price
    #[serde(default = "default_trail_distance")]
    pub trail_distance: Decimal,
    /// Widest stop distance tolerated on a losing position
    #[serde(default = "default_max_stop_distance")]
    pub max_stop_distance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleShotConfig {
    #[serde(default)]
    pub entry_direction: EntryDirection,
    #[serde(default = "default_single_shot_volume")]
    pub volume: Decimal,
    /// Adverse move at which the position is cut
    #[serde(default = "default_max_loss_distance")]
    pub max_loss_distance: Decimal,
    /// Favorable move that activates the stop ratchet
    #[serde(default = "default_trail_activation_distance")]
    pub trail_activation_distance: Decimal,
    /// Give-back allowance once the ratchet is active
    #[serde(default = "default_trail_backoff_distance")]
    pub trail_backoff_distance: Decimal,
}

/// A recurring blackout window in reference time (broker time + offset).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlackoutWindowConfig {
    /// Day of week (0 = Sunday .. 6 = Saturday); absent = every day
    #[serde(default)]
    pub weekday: Option<u8>,
    /// Restrict to the first week of the month (day < 8)
    #[serde(default)]
    pub first_week_only: bool,
    pub start_hour: u32,
    pub start_minute: u32,
    pub end_hour: u32,
    pub end_minute: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorConfig {
    /// Spread ceiling in points; opens are vetoed above it
    #[serde(default = "default_max_spread_points")]
    pub max_spread_points: Decimal,
    /// Circuit breaker against runaway scaling
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Hours added to broker time before blackout evaluation
    #[serde(default)]
    pub blackout_hour_offset: i32,
    /// Recurring no-open windows; defaults follow the known release schedule
    #[serde(default = "default_blackout_windows")]
    pub blackout_windows: Vec<BlackoutWindowConfig>,
    /// Price move within the rolling window that triggers a pause
    #[serde(default = "default_volatility_move_threshold")]
    pub volatility_move_threshold: Decimal,
    /// Rolling observation window in seconds
    #[serde(default = "default_volatility_window_secs")]
    pub volatility_window_secs: i64,
    /// Pause duration after a breach, in seconds
    #[serde(default = "default_volatility_pause_secs")]
    pub volatility_pause_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquityConfig {
    /// Equity floor the first target is measured from
    #[serde(default = "default_initial_floor")]
    pub initial_floor: Decimal,
    /// Profit above the floor that completes a round
    #[serde(default = "default_profit_increment")]
    pub profit_increment: Decimal,
    /// Hours to stay latched after a completion
    #[serde(default = "default_cooldown_wait_hours")]
    pub cooldown_wait_hours: i64,
    /// From this weekday (0 = Sunday) onward the cooldown stays latched
    #[serde(default = "default_restart_blackout_weekday")]
    pub restart_blackout_weekday: u8,
    /// Capital-preservation floor; breaching it is terminal
    #[serde(default = "default_min_equity")]
    pub min_equity: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Minimum balance change worth a notification (0 = every change)
    #[serde(default)]
    pub min_balance_delta: Decimal,
    /// Absolute floating profit that raises the alarm (0 = disabled)
    #[serde(default)]
    pub floating_profit_alarm: Decimal,
    /// Days covered by the daily range report
    #[serde(default = "default_daily_report_days")]
    pub daily_report_days: u32,
}

// Default value functions

fn default_symbol() -> String {
    "XAUUSD".to_string()
}

fn default_point() -> Decimal {
    Decimal::new(1, 1) // 0.1
}

fn default_min_volume() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_volume_step() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

fn default_digits() -> u32 {
    2
}

fn default_take_profit_distance() -> Decimal {
    Decimal::new(13, 1) // 1.3
}

fn default_scale_in_distance() -> Decimal {
    Decimal::new(4, 0) // 4.0
}

fn default_hedge_trigger_distance() -> Decimal {
    Decimal::new(8, 0) // 8.0
}

fn default_start_volume() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_step_volume() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_harvest_multiplier() -> Decimal {
    Decimal::new(2, 0) // 2x
}

fn default_seed_max_hold_secs() -> i64 {
    30
}

fn default_entry_volume() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_trail_activation_distance() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_trail_distance() -> Decimal {
    Decimal::new(4, 1) // 0.4
}

fn default_max_stop_distance() -> Decimal {
    Decimal::new(4, 1) // 0.4
}

fn default_single_shot_volume() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_max_loss_distance() -> Decimal {
    Decimal::new(3, 1) // 0.3
}

fn default_trail_backoff_distance() -> Decimal {
    Decimal::new(4, 1) // 0.4
}

fn default_max_spread_points() -> Decimal {
    Decimal::new(30, 0)
}

fn default_max_positions() -> usize {
    50
}

fn default_volatility_move_threshold() -> Decimal {
    Decimal::new(4, 0) // 4.0
}

fn default_volatility_window_secs() -> i64 {
    30 * 60
}

fn default_volatility_pause_secs() -> i64 {
    60 * 60
}

/// High-impact release schedule in reference time, plus the late-week
/// restriction windows carried over from the production configuration.
fn default_blackout_windows() -> Vec<BlackoutWindowConfig> {
    vec![
        // 20:30 release, ten minutes either side
        BlackoutWindowConfig {
            weekday: None,
            first_week_only: false,
            start_hour: 20,
            start_minute: 20,
            end_hour: 20,
            end_minute: 40,
        },
        // 22:00 release, five minutes either side
        BlackoutWindowConfig {
            weekday: None,
            first_week_only: false,
            start_hour: 21,
            start_minute: 55,
            end_hour: 22,
            end_minute: 5,
        },
        // 02:00 release, ten minutes either side
        BlackoutWindowConfig {
            weekday: None,
            first_week_only: false,
            start_hour: 1,
            start_minute: 50,
            end_hour: 2,
            end_minute: 10,
        },
        // Thursday 20:00 hour
        BlackoutWindowConfig {
            weekday: Some(4),
            first_week_only: false,
            start_hour: 20,
            start_minute: 0,
            end_hour: 21,
            end_minute: 0,
        },
        // Non-farm payroll: first Friday of the month, 20:00 hour
        BlackoutWindowConfig {
            weekday: Some(5),
            first_week_only: true,
            start_hour: 20,
            start_minute: 0,
            end_hour: 21,
            end_minute: 0,
        },
    ]
}

fn default_initial_floor() -> Decimal {
    Decimal::new(5000, 0)
}

fn default_profit_increment() -> Decimal {
    Decimal::new(700, 0)
}

fn default_cooldown_wait_hours() -> i64 {
    5
}

fn default_restart_blackout_weekday() -> u8 {
    3 // Wednesday onward: finished rounds wait for the new week
}

fn default_min_equity() -> Decimal {
    Decimal::new(50, 0)
}

fn default_daily_report_days() -> u32 {
    5
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("gridpilot").required(false))
            .add_source(config::Environment::default().separator("__").prefix("GP"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    ///
    /// A zero threshold silently disarms a safety rule, so startup refuses
    /// it here; the grid policy re-checks per tick for configs mutated after
    /// load.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.instrument.point > Decimal::ZERO,
            "instrument.point must be positive"
        );
        anyhow::ensure!(
            self.instrument.min_volume > Decimal::ZERO,
            "instrument.min_volume must be positive"
        );

        match self.variant {
            VariantKind::Grid => {
                anyhow::ensure!(
                    self.grid.take_profit_distance > Decimal::ZERO
                        && self.grid.scale_in_distance > Decimal::ZERO
                        && self.grid.hedge_trigger_distance > Decimal::ZERO,
                    "grid distances must all be set and positive"
                );
                anyhow::ensure!(
                    self.grid.start_volume >= self.instrument.min_volume,
                    "grid.start_volume below instrument minimum"
                );
                anyhow::ensure!(
                    self.grid.step_volume > Decimal::ZERO,
                    "grid.step_volume must be positive"
                );
                anyhow::ensure!(
                    self.grid.harvest_multiplier > Decimal::ZERO,
                    "grid.harvest_multiplier must be positive"
                );
                anyhow::ensure!(
                    self.grid.seed_max_hold_secs > 0,
                    "grid.seed_max_hold_secs must be positive"
                );

                // Stages must deepen in loss and never grow the step.
                let mut prev_loss = Decimal::ZERO;
                let mut prev_step = self.grid.step_volume;
                for stage in &self.grid.step_stages {
                    anyhow::ensure!(
                        stage.loss_beyond > prev_loss,
                        "grid.step_stages must be ordered by increasing loss"
                    );
                    anyhow::ensure!(
                        stage.step_volume <= prev_step && stage.step_volume > Decimal::ZERO,
                        "grid.step_stages volumes must be positive and non-increasing"
                    );
                    prev_loss = stage.loss_beyond;
                    prev_step = stage.step_volume;
                }
            }
            VariantKind::Breakout => {
                anyhow::ensure!(
                    self.breakout.entry_volume >= self.instrument.min_volume,
                    "breakout.entry_volume below instrument minimum"
                );
                anyhow::ensure!(
                    self.breakout.trail_activation_distance > Decimal::ZERO
                        && self.breakout.trail_distance > Decimal::ZERO
                        && self.breakout.max_stop_distance > Decimal::ZERO,
                    "breakout distances must all be set and positive"
                );
            }
            VariantKind::SingleShot => {
                anyhow::ensure!(
                    self.single_shot.volume >= self.instrument.min_volume,
                    "single_shot.volume below instrument minimum"
                );
                anyhow::ensure!(
                    self.single_shot.max_loss_distance > Decimal::ZERO
                        && self.single_shot.trail_activation_distance > Decimal::ZERO,
                    "single_shot distances must all be set and positive"
                );
                anyhow::ensure!(
                    self.single_shot.trail_backoff_distance
                        < self.single_shot.trail_activation_distance,
                    "single_shot.trail_backoff_distance must stay below the activation distance"
                );
            }
        }

        anyhow::ensure!(
            self.governor.max_positions > 0,
            "governor.max_positions must be positive"
        );
        anyhow::ensure!(
            self.governor.max_spread_points > Decimal::ZERO,
            "governor.max_spread_points must be positive"
        );
        for window in &self.governor.blackout_windows {
            anyhow::ensure!(
                window.start_hour < 24
                    && window.end_hour < 24
                    && window.start_minute < 60
                    && window.end_minute < 60,
                "blackout window out of range"
            );
            if let Some(weekday) = window.weekday {
                anyhow::ensure!(weekday < 7, "blackout weekday out of range");
            }
        }

        anyhow::ensure!(
            self.equity.profit_increment > Decimal::ZERO,
            "equity.profit_increment must be positive"
        );
        anyhow::ensure!(
            self.equity.cooldown_wait_hours > 0,
            "equity.cooldown_wait_hours must be positive"
        );
        anyhow::ensure!(
            self.equity.restart_blackout_weekday < 7,
            "equity.restart_blackout_weekday out of range"
        );
        anyhow::ensure!(
            self.equity.min_equity >= Decimal::ZERO,
            "equity.min_equity must not be negative"
        );

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instrument: InstrumentConfig::default(),
            variant: VariantKind::default(),
            grid: GridConfig::default(),
            breakout: BreakoutConfig::default(),
            single_shot: SingleShotConfig::default(),
            governor: GovernorConfig::default(),
            equity: EquityConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl Default for InstrumentConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            point: default_point(),
            min_volume: default_min_volume(),
            volume_step: default_volume_step(),
            digits: default_digits(),
        }
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            scale_mode: ScaleMode::default(),
            direction_mode: DirectionMode::default(),
            entry_direction: EntryDirection::default(),
            take_profit_distance: default_take_profit_distance(),
            scale_in_distance: default_scale_in_distance(),
            hedge_trigger_distance: default_hedge_trigger_distance(),
            start_volume: default_start_volume(),
            step_volume: default_step_volume(),
            step_stages: Vec::new(),
            harvest_multiplier: default_harvest_multiplier(),
            seed_max_hold_secs: default_seed_max_hold_secs(),
        }
    }
}

impl Default for BreakoutConfig {
    fn default() -> Self {
        Self {
            entry_volume: default_entry_volume(),
            trail_activation_distance: default_trail_activation_distance(),
            trail_distance: default_trail_distance(),
            max_stop_distance: default_max_stop_distance(),
        }
    }
}

impl Default for SingleShotConfig {
    fn default() -> Self {
        Self {
            entry_direction: EntryDirection::default(),
            volume: default_single_shot_volume(),
            max_loss_distance: default_max_loss_distance(),
            trail_activation_distance: default_trail_activation_distance(),
            trail_backoff_distance: default_trail_backoff_distance(),
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            max_spread_points: default_max_spread_points(),
            max_positions: default_max_positions(),
            blackout_hour_offset: 0,
            blackout_windows: default_blackout_windows(),
            volatility_move_threshold: default_volatility_move_threshold(),
            volatility_window_secs: default_volatility_window_secs(),
            volatility_pause_secs: default_volatility_pause_secs(),
        }
    }
}

impl Default for EquityConfig {
    fn default() -> Self {
        Self {
            initial_floor: default_initial_floor(),
            profit_increment: default_profit_increment(),
            cooldown_wait_hours: default_cooldown_wait_hours(),
            restart_blackout_weekday: default_restart_blackout_weekday(),
            min_equity: default_min_equity(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            min_balance_delta: Decimal::ZERO,
            floating_profit_alarm: Decimal::ZERO,
            daily_report_days: default_daily_report_days(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_is_rejected() {
        let mut config = Config::default();
        config.grid.scale_in_distance = Decimal::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_growing_step_stage_is_rejected() {
        let mut config = Config::default();
        config.grid.step_stages = vec![
            StepStage {
                loss_beyond: dec!(100),
                step_volume: dec!(0.03),
            },
            StepStage {
                loss_beyond: dec!(200),
                step_volume: dec!(0.04), // grows again; must be refused
            },
        ];
        assert!(config.validate().is_err());

        config.grid.step_stages[1].step_volume = dec!(0.02);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_single_shot_backoff_must_undercut_activation() {
        let mut config = Config::default();
        config.variant = VariantKind::SingleShot;
        config.single_shot.trail_activation_distance = dec!(0.5);
        config.single_shot.trail_backoff_distance = dec!(0.5);
        assert!(config.validate().is_err());
    }
}
