//! Runtime risk control: barriers, circuit breakers, tunneling and recovery.
//!
//! [`RiskController`] owns one of each and is the only writer of
//! [`SystemState`]. It is driven by the monitoring loop, but is a plain
//! synchronous type and can be ticked directly (backtests, tests).

mod barrier;
mod circuit_breaker;
mod controller;
mod recovery;
mod state;
mod tunneling;

pub use barrier::{
    Barrier, BarrierBreach, BarrierId, BarrierKind, EnergyBarrierManager, RESTORE_RATIO,
};
pub use circuit_breaker::{BreakerLevel, BreakerTrip, CircuitBreaker, CircuitBreakerRegistry};
pub use controller::{RiskController, TickOutcome, ALERT_REARM_RATIO};
pub use recovery::{RecoveryBlock, RecoveryController, RecoveryOutcome};
pub use state::SystemState;
pub use tunneling::{
    RandomSource, SeededRandom, TunnelingEvaluator, TunnelingEvent, TunnelingStats,
};
