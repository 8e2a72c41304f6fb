//! Minimality: no configuration should sit below the ground state.

use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};

use crate::config::ValidationConfig;
use crate::engine::{GroundState, PortfolioSnapshot, Position, RiskEngine};

use super::result::MinimalityReport;

/// Compare every supplied configuration and `num_random_tests` perturbations
/// of the ground configuration against the ground energy.
///
/// A configuration passes when `energy >= ground - tolerance`. Non-finite
/// energies fail.
pub(crate) fn check_minimality(
    engine: &dyn RiskEngine,
    ground: &GroundState,
    supplied: &[PortfolioSnapshot],
    config: &ValidationConfig,
    rng: &mut StdRng,
) -> MinimalityReport {
    let floor = ground.energy - config.energy_tolerance;
    let mut tally = Tally::default();

    for snapshot in supplied {
        tally.record(snapshot.energy(engine), floor, ground.energy);
    }
    for _ in 0..config.num_random_tests {
        let sample = perturb(&ground.configuration, config.perturbation_scale, rng);
        tally.record(sample.energy(engine), floor, ground.energy);
    }

    let total = supplied.len() + config.num_random_tests;
    let success_rate = if total > 0 {
        tally.passed as f64 / total as f64
    } else {
        0.0
    };

    tracing::debug!(
        total,
        passed = tally.passed,
        non_finite = tally.non_finite,
        success_rate = %format!("{:.4}", success_rate),
        worst_violation = %format!("{:.6}", tally.worst_violation),
        "Minimality test finished"
    );

    MinimalityReport {
        ground_energy: ground.energy,
        supplied_tests: supplied.len(),
        random_tests: config.num_random_tests,
        passed: tally.passed,
        non_finite: tally.non_finite,
        success_rate,
        worst_violation: tally.worst_violation,
        passed_threshold: total > 0 && success_rate >= config.success_threshold,
    }
}

#[derive(Default)]
struct Tally {
    passed: usize,
    non_finite: usize,
    worst_violation: f64,
}

impl Tally {
    fn record(&mut self, energy: f64, floor: f64, ground: f64) {
        if !energy.is_finite() {
            self.non_finite += 1;
        } else if energy >= floor {
            self.passed += 1;
        } else {
            self.worst_violation = self.worst_violation.max(ground - energy);
        }
    }
}

/// Gaussian perturbation of every quantity, scaled by the configuration norm.
fn perturb(base: &PortfolioSnapshot, scale: f64, rng: &mut StdRng) -> PortfolioSnapshot {
    let norm = base
        .positions
        .iter()
        .map(|p| p.quantity * p.quantity)
        .sum::<f64>()
        .sqrt();
    let sigma = scale * if norm > 0.0 { norm } else { 1.0 };

    let positions = base
        .positions
        .iter()
        .map(|p| {
            let z: f64 = StandardNormal.sample(&mut *rng);
            Position::new(p.asset.clone(), p.quantity + sigma * z)
        })
        .collect();
    PortfolioSnapshot::new(positions, base.market.clone())
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::engine::MarketSnapshot;

    /// Energy is `0.12 + |sum of quantities|`, never below 0.12.
    struct Bowl;

    impl RiskEngine for Bowl {
        fn calculate_total_energy(&self, positions: &[Position], _: &MarketSnapshot) -> f64 {
            0.12 + positions.iter().map(|p| p.quantity).sum::<f64>().abs()
        }
    }

    /// Energy is the first quantity as-is, so perturbations go below ground half the time.
    struct Linear;

    impl RiskEngine for Linear {
        fn calculate_total_energy(&self, positions: &[Position], _: &MarketSnapshot) -> f64 {
            positions.first().map(|p| p.quantity).unwrap_or(f64::NAN)
        }
    }

    fn ground(energy: f64) -> GroundState {
        GroundState {
            energy,
            configuration: PortfolioSnapshot::new(
                vec![Position::new("A", 0.0)],
                MarketSnapshot::default(),
            ),
        }
    }

    #[test]
    fn test_all_samples_above_ground_pass() {
        let config = ValidationConfig::default().with_num_random_tests(200);
        let mut rng = StdRng::seed_from_u64(1);
        let supplied = vec![PortfolioSnapshot::new(
            vec![Position::new("A", 0.3)],
            MarketSnapshot::default(),
        )];

        let report = check_minimality(&Bowl, &ground(0.12), &supplied, &config, &mut rng);
        assert_eq!(report.total_tests(), 201);
        assert_eq!(report.passed, 201);
        assert_eq!(report.success_rate, 1.0);
        assert!(report.passed_threshold);
        assert_eq!(report.worst_violation, 0.0);
    }

    #[test]
    fn test_violations_reduce_success_rate() {
        let config = ValidationConfig::default().with_num_random_tests(400);
        let mut rng = StdRng::seed_from_u64(2);

        let report = check_minimality(&Linear, &ground(0.0), &[], &config, &mut rng);
        assert!(report.success_rate > 0.3 && report.success_rate < 0.7);
        assert!(!report.passed_threshold);
        assert!(report.worst_violation > 0.0);
    }

    #[test]
    fn test_non_finite_counts_as_failure() {
        let config = ValidationConfig::default().with_num_random_tests(0);
        let mut rng = StdRng::seed_from_u64(3);
        let supplied = vec![
            PortfolioSnapshot::default(),
            PortfolioSnapshot::new(vec![Position::new("A", 1.0)], MarketSnapshot::default()),
        ];

        let report = check_minimality(&Linear, &ground(0.0), &supplied, &config, &mut rng);
        assert_eq!(report.non_finite, 1);
        assert_eq!(report.passed, 1);
        assert_eq!(report.success_rate, 0.5);
    }

    #[test]
    fn test_no_tests_never_passes() {
        let config = ValidationConfig::default().with_num_random_tests(0);
        let mut rng = StdRng::seed_from_u64(4);
        let report = check_minimality(&Bowl, &ground(0.12), &[], &config, &mut rng);
        assert!(!report.passed_threshold);
    }

    #[test]
    fn test_tolerance_slack() {
        let config = ValidationConfig::default().with_num_random_tests(0);
        let mut rng = StdRng::seed_from_u64(5);
        let just_below = vec![PortfolioSnapshot::new(
            vec![Position::new("A", 1.0 - 1e-9)],
            MarketSnapshot::default(),
        )];
        let report = check_minimality(&Linear, &ground(1.0), &just_below, &config, &mut rng);
        assert_eq!(report.passed, 1);
    }
}
