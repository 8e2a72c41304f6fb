//! Validation reports and the overall quality rating.

use serde::{Deserialize, Serialize};

/// Overall grade of a validation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityRating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl QualityRating {
    /// Grade from the ground-energy deviation, the minimality success rate and
    /// the stability index.
    ///
    /// | rating    | deviation      | success | stability |
    /// |-----------|----------------|---------|-----------|
    /// | EXCELLENT | < tol          | >= 0.99 | >= 0.9    |
    /// | GOOD      | < 10 * tol     | >= 0.95 | >= 0.7    |
    /// | FAIR      | any            | >= 0.90 | >= 0.5    |
    /// | POOR      | otherwise      |         |           |
    pub fn classify(
        energy_deviation: f64,
        success_rate: f64,
        stability_index: f64,
        tolerance: f64,
    ) -> Self {
        if energy_deviation < tolerance && success_rate >= 0.99 && stability_index >= 0.9 {
            QualityRating::Excellent
        } else if energy_deviation < 10.0 * tolerance
            && success_rate >= 0.95
            && stability_index >= 0.7
        {
            QualityRating::Good
        } else if success_rate >= 0.90 && stability_index >= 0.5 {
            QualityRating::Fair
        } else {
            QualityRating::Poor
        }
    }
}

impl std::fmt::Display for QualityRating {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QualityRating::Excellent => write!(f, "EXCELLENT"),
            QualityRating::Good => write!(f, "GOOD"),
            QualityRating::Fair => write!(f, "FAIR"),
            QualityRating::Poor => write!(f, "POOR"),
        }
    }
}

/// Outcome of the minimality test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimalityReport {
    pub ground_energy: f64,
    pub supplied_tests: usize,
    pub random_tests: usize,
    pub passed: usize,
    /// Configurations whose energy was NaN/Inf. Counted as failures.
    pub non_finite: usize,
    pub success_rate: f64,
    /// Largest `ground - energy` among failing configurations.
    pub worst_violation: f64,
    pub passed_threshold: bool,
}

impl MinimalityReport {
    pub fn total_tests(&self) -> usize {
        self.supplied_tests + self.random_tests
    }
}

/// Outcome of the eigen-decomposition checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundStateReport {
    pub lowest_eigenvalue: Option<f64>,
    /// `|lambda_0 - ground energy|`; None for an empty spectrum.
    pub energy_deviation: Option<f64>,
    pub eigenvalue_matches_ground: bool,
    pub within_physical_range: bool,
    pub eigenvectors_normalized: bool,
    /// False when the engine did not expose its Hamiltonian.
    pub eigen_equation_checked: bool,
    pub eigen_equation_satisfied: bool,
    pub eigenvectors_orthogonal: bool,
    pub max_norm_error: f64,
    /// Largest relative `|H v - lambda v|`; None when not computed.
    pub max_residual: Option<f64>,
    /// Largest `|v_i . v_j|`; None when the vectors differ in dimension.
    pub max_overlap: Option<f64>,
    pub checks_passed: usize,
    pub checks_run: usize,
    pub success_rate: f64,
    pub passed: bool,
}

/// One normal mode of the Hamiltonian.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalMode {
    pub index: usize,
    pub eigenvalue: f64,
    /// `sqrt(max(lambda, 0))`
    pub frequency: f64,
    /// `c / (2 * omega)`; None for a zero frequency.
    pub damping_ratio: Option<f64>,
    pub stable: bool,
}

/// Outcome of the normal-mode stability analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StabilityReport {
    pub modes: Vec<NormalMode>,
    pub unstable_modes: Vec<usize>,
    /// Mean of `1 / (1 + zeta)` over stable modes, 0 for unstable ones.
    pub stability_index: f64,
    pub success_rate: f64,
    pub passed: bool,
}

/// Full result of [`ValidationHarness::validate_principle`](super::ValidationHarness::validate_principle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub principle_validated: bool,
    pub overall_success_rate: f64,
    pub quality_rating: QualityRating,
    pub minimality: MinimalityReport,
    pub ground_state: GroundStateReport,
    pub stability: StabilityReport,
    pub started_ms: u64,
    pub duration_ms: u64,
}
