//! On-demand statistical validation of the risk engine.
//!
//! Three independent checks feed one [`ValidationResult`]:
//! - minimality of the ground energy over supplied and random configurations
//! - consistency of the eigen-decomposition with the ground state
//! - normal-mode stability of the spectrum
//!
//! Runs are CPU bound; from async code call the harness inside
//! `tokio::task::spawn_blocking`.

mod ground_state;
mod harness;
mod minimality;
mod result;
mod stability;

pub use harness::{HarnessState, ValidationHarness};
pub use result::{
    GroundStateReport, MinimalityReport, NormalMode, QualityRating, StabilityReport,
    ValidationResult,
};
