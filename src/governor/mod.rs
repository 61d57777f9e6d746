//! Risk governance: cross-cutting gates that veto new risk, the persistent
//! cooldown latch, and drawdown bookkeeping.

mod blackout;
mod cooldown;
mod drawdown;
#[allow(clippy::module_inception)]
mod governor;
mod volatility;

pub use blackout::BlackoutCalendar;
pub use cooldown::CooldownLatch;
pub use drawdown::DrawdownTracker;
pub use governor::{GateReason, RiskGovernor};
pub use volatility::VolatilityPause;
