//! GridPilot - Main Entry Point
//!
//! Paper-trading harness: drives the tick runner against the in-memory
//! broker with a random-walk quote, which is enough to exercise every
//! policy and gate end to end. A live deployment replaces the broker
//! handles with a real connector and feeds real ticks.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use gridpilot::broker::{Direction, InstrumentInfo, MockBroker};
use gridpilot::config::{Config, VariantKind};
use gridpilot::engine::{
    BreakoutPolicy, GridPolicy, Policy, RunnerHandles, SingleShotPolicy, TickOutcome, TickRunner,
};
use gridpilot::governor::RiskGovernor;
use gridpilot::notify::{LogNotifier, Notifier};
use gridpilot::persistence::SqliteFlagStore;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// GridPilot CLI
#[derive(Parser)]
#[command(name = "gridpilot")]
#[command(version, about = "Tick-driven grid/martingale expert advisor engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine in paper-trading mode against the mock broker
    Run {
        /// Path to the SQLite flag store
        #[arg(long, default_value = "data/flags.db")]
        db: String,

        /// Starting quote for the simulated instrument
        #[arg(long, default_value = "1900.0")]
        start_price: f64,

        /// Initial paper balance
        #[arg(long, default_value = "5000")]
        balance: f64,

        /// Milliseconds between simulated ticks
        #[arg(long, default_value = "200")]
        interval_ms: u64,

        /// Stop after this many ticks (default: run until Ctrl-C)
        #[arg(long)]
        ticks: Option<u64>,

        /// Queue a discretionary entry at startup (breakout variant)
        #[arg(long, value_enum)]
        entry: Option<EntrySide>,
    },

    /// Show persisted engine flags (cooldown state, equity floor)
    Status {
        /// Path to the SQLite flag store
        #[arg(long, default_value = "data/flags.db")]
        db: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum EntrySide {
    Long,
    Short,
}

impl From<EntrySide> for Direction {
    fn from(side: EntrySide) -> Self {
        match side {
            EntrySide::Long => Direction::Long,
            EntrySide::Short => Direction::Short,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Status { db }) => show_status(&db),
        Some(Commands::Run {
            db,
            start_price,
            balance,
            interval_ms,
            ticks,
            entry,
        }) => {
            run_paper(
                &db,
                Decimal::try_from(start_price)?,
                Decimal::try_from(balance)?,
                interval_ms,
                ticks,
                entry.map(Direction::from),
            )
            .await
        }
        None => {
            run_paper(
                "data/flags.db",
                dec!(1900.0),
                dec!(5000),
                200,
                None,
                None,
            )
            .await
        }
    }
}

async fn run_paper(
    db: &str,
    start_price: Decimal,
    balance: Decimal,
    interval_ms: u64,
    max_ticks: Option<u64>,
    entry: Option<Direction>,
) -> Result<()> {
    let config = Config::load()?;
    config.validate()?;
    log_config(&config);

    if let Some(parent) = std::path::Path::new(db).parent() {
        std::fs::create_dir_all(parent)?;
    }
    let flags = Arc::new(SqliteFlagStore::new(db)?);

    let instrument = InstrumentInfo {
        symbol: config.instrument.symbol.clone(),
        point: config.instrument.point,
        min_volume: config.instrument.min_volume,
        volume_step: config.instrument.volume_step,
        digits: config.instrument.digits,
    };
    let spread = config.instrument.point * dec!(3);
    let broker = Arc::new(MockBroker::new(
        instrument.clone(),
        balance,
        start_price,
        start_price + spread,
    ));

    let policy: Box<dyn Policy> = match config.variant {
        VariantKind::Grid => Box::new(GridPolicy::new(config.grid.clone())),
        VariantKind::Breakout => {
            let policy = BreakoutPolicy::new(config.breakout.clone());
            if let Some(direction) = entry {
                policy.trigger().fire(direction);
            }
            Box::new(policy)
        }
        VariantKind::SingleShot => Box::new(SingleShotPolicy::new(config.single_shot.clone())),
    };
    if entry.is_some() && config.variant != VariantKind::Breakout {
        warn!("--entry is only meaningful for the breakout variant; ignored");
    }

    let handles = RunnerHandles {
        execution: broker.clone(),
        market: broker.clone(),
        account: broker.clone(),
        positions: broker.clone(),
        flags,
    };
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let mut runner = TickRunner::new(
        handles,
        instrument,
        policy,
        RiskGovernor::new(config.governor.clone()),
        config.equity.clone(),
        &config.notify,
        notifier,
        balance,
    );

    info!(
        symbol = %config.instrument.symbol,
        variant = ?config.variant,
        "🚀 paper trading started"
    );

    let report =
        gridpilot::notify::daily_range_report(broker.as_ref(), config.notify.daily_report_days)
            .await;
    if !report.is_empty() {
        info!("daily range report:\n{report}");
    }

    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    let mut tick_count: u64 = 0;
    let mut price = start_price;

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }

        // Random-walk quote: one point either way per tick.
        let step = {
            let mut rng = rand::thread_rng();
            let direction = if rng.gen::<bool>() {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            config.instrument.point * direction
        };
        price += step;
        broker.set_price(price, price + spread);
        broker.advance(chrono::Duration::milliseconds(interval_ms as i64));

        if runner.on_tick().await == TickOutcome::Halt {
            warn!("engine halted by equity floor");
            break;
        }

        tick_count += 1;
        if let Some(limit) = max_ticks {
            if tick_count >= limit {
                info!(tick_count, "tick limit reached");
                break;
            }
        }
    }

    info!("👋 paper trading stopped");
    Ok(())
}

fn show_status(db: &str) -> Result<()> {
    let store = SqliteFlagStore::new(db)?;
    let flags = store.all()?;
    if flags.is_empty() {
        println!("no persisted flags (no completed round yet)");
        return Ok(());
    }
    for (key, value) in flags {
        println!("{key} = {value}");
    }
    Ok(())
}

/// Initialize logging with file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", "gridpilot.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep the writer alive for the program duration
    Box::leak(Box::new(guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("gridpilot=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!("   Instrument: {}", config.instrument.symbol);
    info!("   Variant: {:?}", config.variant);
    info!(
        "   Grid: tp {} / scale-in {} / hedge {} / start {} + step {}",
        config.grid.take_profit_distance,
        config.grid.scale_in_distance,
        config.grid.hedge_trigger_distance,
        config.grid.start_volume,
        config.grid.step_volume
    );
    info!(
        "   Governor: spread ceiling {}pt, max positions {}, {} blackout windows",
        config.governor.max_spread_points,
        config.governor.max_positions,
        config.governor.blackout_windows.len()
    );
    info!(
        "   Equity: floor {} + {} per round, cooldown {}h, hard floor {}",
        config.equity.initial_floor,
        config.equity.profit_increment,
        config.equity.cooldown_wait_hours,
        config.equity.min_equity
    );
}
