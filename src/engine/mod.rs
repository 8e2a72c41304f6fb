//! Risk engine contract.
//!
//! The engine turns a portfolio into a scalar risk "energy". The monitoring
//! loop only needs [`RiskEngine::calculate_total_energy`]; the validation
//! harness additionally needs the ground state and the eigen-decomposition.
//! Engines that cannot provide those keep the default methods, which fail with
//! [`Error::EngineUnavailable`].

mod covariance;

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

pub use covariance::CovarianceRiskEngine;

/// Signed holding in one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub asset: String,
    pub quantity: f64,
}

impl Position {
    pub fn new(asset: impl Into<String>, quantity: f64) -> Self {
        Self {
            asset: asset.into(),
            quantity,
        }
    }
}

/// Market inputs for an energy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketSnapshot {
    pub timestamp_ms: u64,
    /// Mark price per asset. Missing assets are marked at 1.0, i.e. the
    /// quantity is already a notional.
    pub marks: HashMap<String, f64>,
    /// Multiplier on the covariance (regime / volatility scaling).
    pub volatility_scale: f64,
}

impl Default for MarketSnapshot {
    fn default() -> Self {
        Self {
            timestamp_ms: 0,
            marks: HashMap::new(),
            volatility_scale: 1.0,
        }
    }
}

impl MarketSnapshot {
    pub fn mark(&self, asset: &str) -> f64 {
        self.marks.get(asset).copied().unwrap_or(1.0)
    }

    pub fn with_mark(mut self, asset: impl Into<String>, mark: f64) -> Self {
        self.marks.insert(asset.into(), mark);
        self
    }
}

/// Positions together with the market they are evaluated under.
///
/// This is what the monitoring loop samples each tick and what the
/// validation harness compares against the ground state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub positions: Vec<Position>,
    pub market: MarketSnapshot,
}

impl PortfolioSnapshot {
    pub fn new(positions: Vec<Position>, market: MarketSnapshot) -> Self {
        Self { positions, market }
    }

    pub fn energy(&self, engine: &dyn RiskEngine) -> f64 {
        engine.calculate_total_energy(&self.positions, &self.market)
    }
}

/// Lowest-energy configuration the engine knows of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundState {
    pub energy: f64,
    pub configuration: PortfolioSnapshot,
}

/// Eigen-decomposition of the engine's Hamiltonian, eigenvalues ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct EigenDecomposition {
    pub eigenvalues: Vec<f64>,
    /// `eigenvectors[i]` belongs to `eigenvalues[i]`.
    pub eigenvectors: Vec<DVector<f64>>,
    /// The matrix itself, when the engine exposes it. Without it the
    /// `H v = lambda v` residual check cannot run.
    pub hamiltonian: Option<DMatrix<f64>>,
}

impl EigenDecomposition {
    /// Gap between the two lowest eigenvalues.
    pub fn energy_gap(&self) -> Option<f64> {
        match self.eigenvalues.as_slice() {
            [first, second, ..] => Some(second - first),
            _ => None,
        }
    }
}

/// External risk/scoring engine.
pub trait RiskEngine: Send + Sync {
    /// Total risk energy of `positions` under `market`.
    ///
    /// May return a non-finite value when the energy is undefined (empty
    /// exposure, unknown asset); callers treat that as numeric instability.
    fn calculate_total_energy(&self, positions: &[Position], market: &MarketSnapshot) -> f64;

    fn find_ground_state(&self) -> Result<GroundState> {
        Err(Error::EngineUnavailable {
            capability: "find_ground_state",
        })
    }

    fn diagonalize_hamiltonian(&self) -> Result<EigenDecomposition> {
        Err(Error::EngineUnavailable {
            capability: "diagonalize_hamiltonian",
        })
    }
}
