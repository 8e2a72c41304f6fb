#![deny(unreachable_pub)]

// Core modules
mod errors;
mod helpers;

// Shared infrastructure
pub mod config;
pub mod events;
pub mod infra;

// Feature modules
pub mod engine;
pub mod monitoring;
pub mod risk;
pub mod validation;


// Re-exports
pub use config::{LimitUpdate, RiskControlConfig};
pub use engine::{
    CovarianceRiskEngine, EigenDecomposition, GroundState, MarketSnapshot, PortfolioSnapshot,
    Position, RiskEngine,
};
pub use errors::{ensure_finite, Error, Result};
pub use events::{ChannelSink, EventLog, RiskAction, RiskEvent, RiskEventSink, SharedSink};
pub use monitoring::{MonitorHandle, MonitoringLoop, StatusSnapshot};
pub use risk::{
    BarrierId, BreakerLevel, CircuitBreakerRegistry, EnergyBarrierManager, RecoveryController,
    RiskController, SeededRandom, SystemState, TunnelingEvaluator,
};
pub use validation::{QualityRating, ValidationHarness, ValidationResult};
