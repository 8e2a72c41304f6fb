//! Reference engine over a symmetric covariance matrix.
//!
//! Energy is the Rayleigh quotient of the notional vector `w`:
//!
//! ```text
//! E(w) = s * (w' S w) / (w' w)
//! ```
//!
//! with `s` the market's volatility scale. For `s = 1` it is bounded below by
//! the smallest eigenvalue of `S`, attained at the matching eigenvector, which
//! is therefore the ground state.

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::errors::{Error, Result};

use super::{
    EigenDecomposition, GroundState, MarketSnapshot, PortfolioSnapshot, Position, RiskEngine,
};

/// Allowed asymmetry `|S_ij - S_ji|`.
const SYMMETRY_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct CovarianceRiskEngine {
    assets: Vec<String>,
    index: HashMap<String, usize>,
    covariance: DMatrix<f64>,
    eigen: EigenDecomposition,
}

impl CovarianceRiskEngine {
    /// Build from asset names and their covariance matrix.
    pub fn new(assets: Vec<String>, covariance: DMatrix<f64>) -> Result<Self> {
        let n = assets.len();
        if n == 0 {
            return Err(Error::Configuration("covariance engine needs at least one asset".into()));
        }
        if covariance.nrows() != n || covariance.ncols() != n {
            return Err(Error::Configuration(format!(
                "covariance must be {n}x{n}, got {}x{}",
                covariance.nrows(),
                covariance.ncols()
            )));
        }
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(Error::Configuration("covariance has non-finite entries".into()));
        }
        for i in 0..n {
            for j in (i + 1)..n {
                if (covariance[(i, j)] - covariance[(j, i)]).abs() > SYMMETRY_TOLERANCE {
                    return Err(Error::Configuration(format!(
                        "covariance not symmetric at ({i}, {j})"
                    )));
                }
            }
        }

        let mut index = HashMap::with_capacity(n);
        for (i, asset) in assets.iter().enumerate() {
            if index.insert(asset.clone(), i).is_some() {
                return Err(Error::Configuration(format!("duplicate asset '{asset}'")));
            }
        }

        let eigen = decompose(&covariance)?;
        tracing::debug!(
            assets = n,
            ground = %format!("{:.6}", eigen.eigenvalues[0]),
            gap = ?eigen.energy_gap(),
            "Covariance engine built"
        );

        Ok(Self {
            assets,
            index,
            covariance,
            eigen,
        })
    }

    /// Constant-correlation covariance: `S_ij = rho * vol_i * vol_j`, `S_ii = vol_i^2`.
    pub fn from_volatilities(
        assets: Vec<String>,
        volatilities: &[f64],
        correlation: f64,
    ) -> Result<Self> {
        if volatilities.len() != assets.len() {
            return Err(Error::Configuration(format!(
                "{} volatilities for {} assets",
                volatilities.len(),
                assets.len()
            )));
        }
        if !(correlation.abs() < 1.0) {
            return Err(Error::Configuration(format!(
                "correlation must be in (-1, 1), got {correlation}"
            )));
        }
        let n = assets.len();
        let covariance = DMatrix::from_fn(n, n, |i, j| {
            let rho = if i == j { 1.0 } else { correlation };
            rho * volatilities[i] * volatilities[j]
        });
        Self::new(assets, covariance)
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.covariance
    }

    fn notionals(&self, positions: &[Position], market: &MarketSnapshot) -> Option<DVector<f64>> {
        let mut w = DVector::zeros(self.assets.len());
        for position in positions {
            let i = *self.index.get(&position.asset)?;
            w[i] += position.quantity * market.mark(&position.asset);
        }
        Some(w)
    }
}

impl RiskEngine for CovarianceRiskEngine {
    fn calculate_total_energy(&self, positions: &[Position], market: &MarketSnapshot) -> f64 {
        let Some(w) = self.notionals(positions, market) else {
            return f64::NAN;
        };
        let norm_sq = w.dot(&w);
        if !(norm_sq > 0.0) {
            return f64::NAN;
        }
        market.volatility_scale * w.dot(&(&self.covariance * &w)) / norm_sq
    }

    fn find_ground_state(&self) -> Result<GroundState> {
        let vector = &self.eigen.eigenvectors[0];
        let positions = self
            .assets
            .iter()
            .zip(vector.iter())
            .map(|(asset, q)| Position::new(asset.clone(), *q))
            .collect();
        Ok(GroundState {
            energy: self.eigen.eigenvalues[0],
            configuration: PortfolioSnapshot::new(positions, MarketSnapshot::default()),
        })
    }

    fn diagonalize_hamiltonian(&self) -> Result<EigenDecomposition> {
        Ok(self.eigen.clone())
    }
}

/// Symmetric eigen-decomposition sorted by ascending eigenvalue.
fn decompose(matrix: &DMatrix<f64>) -> Result<EigenDecomposition> {
    let eigen = SymmetricEigen::new(matrix.clone());
    if let Some(bad) = eigen.eigenvalues.iter().find(|v| !v.is_finite()) {
        return Err(Error::numeric("covariance eigenvalue", *bad));
    }

    let mut order: Vec<usize> = (0..eigen.eigenvalues.len()).collect();
    order.sort_by(|&a, &b| eigen.eigenvalues[a].total_cmp(&eigen.eigenvalues[b]));

    Ok(EigenDecomposition {
        eigenvalues: order.iter().map(|&i| eigen.eigenvalues[i]).collect(),
        eigenvectors: order
            .iter()
            .map(|&i| eigen.eigenvectors.column(i).into_owned())
            .collect(),
        hamiltonian: Some(matrix.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn diagonal_engine() -> CovarianceRiskEngine {
        let cov = DMatrix::from_diagonal(&DVector::from_vec(vec![0.30, 0.12, 0.50]));
        CovarianceRiskEngine::new(assets(&["A", "B", "C"]), cov).unwrap()
    }

    #[test]
    fn test_eigenvalues_sorted_ascending() {
        let eig = diagonal_engine().diagonalize_hamiltonian().unwrap();
        assert_eq!(eig.eigenvalues.len(), 3);
        assert!((eig.eigenvalues[0] - 0.12).abs() < 1e-12);
        assert!((eig.eigenvalues[1] - 0.30).abs() < 1e-12);
        assert!((eig.eigenvalues[2] - 0.50).abs() < 1e-12);
        assert!(eig.hamiltonian.is_some());
    }

    #[test]
    fn test_ground_state_is_smallest_eigenvector() {
        let engine = diagonal_engine();
        let ground = engine.find_ground_state().unwrap();
        assert!((ground.energy - 0.12).abs() < 1e-12);

        let b = ground
            .configuration
            .positions
            .iter()
            .find(|p| p.asset == "B")
            .unwrap();
        assert!((b.quantity.abs() - 1.0).abs() < 1e-9);
        assert!((ground.configuration.energy(&engine) - 0.12).abs() < 1e-9);
    }

    #[test]
    fn test_rayleigh_quotient_bounded_by_ground() {
        let engine = diagonal_engine();
        let market = MarketSnapshot::default();
        for q in [[1.0, 1.0, 1.0], [0.0, 2.0, 0.1], [-3.0, 0.5, 0.0]] {
            let positions: Vec<Position> = ["A", "B", "C"]
                .iter()
                .zip(q)
                .map(|(a, q)| Position::new(*a, q))
                .collect();
            let e = engine.calculate_total_energy(&positions, &market);
            assert!(e >= 0.12 - 1e-12 && e <= 0.50 + 1e-12, "{e}");
        }
    }

    #[test]
    fn test_correlated_pair() {
        let cov = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 2.0]);
        let engine = CovarianceRiskEngine::new(assets(&["X", "Y"]), cov).unwrap();
        let market = MarketSnapshot::default();

        let long_both = [Position::new("X", 1.0), Position::new("Y", 1.0)];
        assert!((engine.calculate_total_energy(&long_both, &market) - 3.0).abs() < 1e-12);

        let ground = engine.find_ground_state().unwrap();
        assert!((ground.energy - 1.0).abs() < 1e-9);
        let eig = engine.diagonalize_hamiltonian().unwrap();
        assert!((eig.energy_gap().unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_marks_and_volatility_scale() {
        let engine = diagonal_engine();
        let positions = [Position::new("A", 2.0)];
        let market = MarketSnapshot {
            volatility_scale: 2.0,
            ..MarketSnapshot::default().with_mark("A", 50.0)
        };
        // single-asset exposure: quotient is S_AA regardless of size
        assert!((engine.calculate_total_energy(&positions, &market) - 0.60).abs() < 1e-12);
    }

    #[test]
    fn test_undefined_energy_is_nan() {
        let engine = diagonal_engine();
        let market = MarketSnapshot::default();
        assert!(engine.calculate_total_energy(&[], &market).is_nan());
        assert!(engine
            .calculate_total_energy(&[Position::new("ZZZ", 1.0)], &market)
            .is_nan());
    }

    #[test]
    fn test_rejects_bad_matrices() {
        let asym = DMatrix::from_row_slice(2, 2, &[1.0, 0.5, 0.2, 1.0]);
        assert!(CovarianceRiskEngine::new(assets(&["X", "Y"]), asym).is_err());

        let wrong_dim = DMatrix::identity(3, 3);
        assert!(CovarianceRiskEngine::new(assets(&["X", "Y"]), wrong_dim).is_err());

        let dup = DMatrix::identity(2, 2);
        assert!(CovarianceRiskEngine::new(assets(&["X", "X"]), dup).is_err());

        assert!(CovarianceRiskEngine::from_volatilities(assets(&["X"]), &[0.2], 1.0).is_err());
    }

    #[test]
    fn test_from_volatilities() {
        let engine =
            CovarianceRiskEngine::from_volatilities(assets(&["X", "Y"]), &[0.5, 0.2], 0.5).unwrap();
        let cov = engine.covariance();
        assert!((cov[(0, 0)] - 0.25).abs() < 1e-12);
        assert!((cov[(0, 1)] - 0.05).abs() < 1e-12);
        assert_eq!(engine.assets().len(), 2);
    }
}
