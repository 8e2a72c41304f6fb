//! Per-component configuration sections.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::events::RiskAction;

fn config_err<T>(msg: String) -> Result<T> {
    Err(Error::Configuration(msg))
}

/// Barrier heights and geometry.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BarrierConfig {
    /// Height of the protective barrier (deviation units).
    pub default_barrier_height: f64,
    /// Height of the critical barrier. Must be >= default height.
    pub critical_barrier_height: f64,
    /// Fraction below a barrier where it counts as "approached".
    /// The warning barrier sits at `default_barrier_height * (1 - safety_margin)`.
    pub safety_margin: f64,
    /// Barrier width used by the tunneling exponent.
    pub barrier_width: f64,
    /// Multiplier on width; 1.0 = plain barrier.
    pub penetration_resistance: f64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            default_barrier_height: 0.15,
            critical_barrier_height: 0.30,
            safety_margin: 0.20,
            barrier_width: 0.10,
            penetration_resistance: 1.0,
        }
    }
}

impl BarrierConfig {
    /// Height of the warning barrier derived from the safety margin.
    pub fn warning_height(&self) -> f64 {
        self.default_barrier_height * (1.0 - self.safety_margin)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.default_barrier_height > 0.0) || !self.default_barrier_height.is_finite() {
            return config_err(format!(
                "default_barrier_height must be > 0.0, got {}",
                self.default_barrier_height
            ));
        }
        if !(self.critical_barrier_height >= self.default_barrier_height)
            || !self.critical_barrier_height.is_finite()
        {
            return config_err(format!(
                "critical_barrier_height must be >= default_barrier_height ({}), got {}",
                self.default_barrier_height, self.critical_barrier_height
            ));
        }
        if !(0.0..1.0).contains(&self.safety_margin) {
            return config_err(format!(
                "safety_margin must be in [0.0, 1.0), got {}",
                self.safety_margin
            ));
        }
        if !(self.barrier_width > 0.0) {
            return config_err(format!(
                "barrier_width must be > 0.0, got {}",
                self.barrier_width
            ));
        }
        if !(self.penetration_resistance > 0.0) {
            return config_err(format!(
                "penetration_resistance must be > 0.0, got {}",
                self.penetration_resistance
            ));
        }
        Ok(())
    }
}

/// Tunneling probability model.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TunnelingConfig {
    pub enable_quantum_tunneling: bool,
    pub tunneling_coefficient: f64,
    /// Upper clamp on the final probability.
    pub max_tunneling_probability: f64,
    pub mass: f64,
    /// Reduced Planck constant of the model (not the physical one).
    pub hbar: f64,
    /// Scale of the thermal adjustment `1 + exp(-dV / thermal_energy)`.
    pub thermal_energy: f64,
    /// Number of tunneling events retained.
    pub history_capacity: usize,
}

impl Default for TunnelingConfig {
    fn default() -> Self {
        Self {
            enable_quantum_tunneling: true,
            tunneling_coefficient: 2.0,
            max_tunneling_probability: 0.95,
            mass: 1.0,
            hbar: 1.0,
            thermal_energy: 0.01,
            history_capacity: 100,
        }
    }
}

impl TunnelingConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.max_tunneling_probability) {
            return config_err(format!(
                "max_tunneling_probability must be in [0.0, 1.0], got {}",
                self.max_tunneling_probability
            ));
        }
        if !(self.tunneling_coefficient >= 0.0) {
            return config_err(format!(
                "tunneling_coefficient must be >= 0.0, got {}",
                self.tunneling_coefficient
            ));
        }
        if !(self.mass > 0.0) || !(self.hbar > 0.0) || !(self.thermal_energy > 0.0) {
            return config_err(format!(
                "mass, hbar and thermal_energy must be > 0.0, got {}, {}, {}",
                self.mass, self.hbar, self.thermal_energy
            ));
        }
        if self.history_capacity == 0 {
            return config_err("history_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

/// One rung of the escalation ladder.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BreakerLevelConfig {
    /// Deviation that trips this level.
    pub threshold: f64,
    pub action: RiskAction,
}

impl BreakerLevelConfig {
    pub fn new(threshold: f64, action: RiskAction) -> Self {
        Self { threshold, action }
    }
}

/// Circuit breaker ladder.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enable_circuit_breakers: bool,
    /// Levels in escalation order; thresholds strictly increasing.
    pub levels: Vec<BreakerLevelConfig>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enable_circuit_breakers: true,
            levels: vec![
                BreakerLevelConfig::new(0.05, RiskAction::ReducePositions { percentage: 10.0 }),
                BreakerLevelConfig::new(0.10, RiskAction::ReducePositions { percentage: 25.0 }),
                BreakerLevelConfig::new(0.15, RiskAction::ReducePositions { percentage: 50.0 }),
                BreakerLevelConfig::new(0.20, RiskAction::EmergencyStop),
                BreakerLevelConfig::new(0.25, RiskAction::CompleteHalt),
            ],
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<()> {
        let mut previous: Option<f64> = None;
        for (i, level) in self.levels.iter().enumerate() {
            if !(level.threshold > 0.0) || !level.threshold.is_finite() {
                return config_err(format!(
                    "circuit breaker level {} threshold must be > 0.0, got {}",
                    i + 1,
                    level.threshold
                ));
            }
            if let Some(prev) = previous {
                if level.threshold <= prev {
                    return config_err(format!(
                        "circuit breaker thresholds must be strictly ascending: level {} ({}) <= level {} ({})",
                        i + 1,
                        level.threshold,
                        i,
                        prev
                    ));
                }
            }
            if let RiskAction::ReducePositions { percentage } = level.action {
                if !(percentage > 0.0 && percentage <= 100.0) {
                    return config_err(format!(
                        "circuit breaker level {} reduction must be in (0, 100], got {}",
                        i + 1,
                        percentage
                    ));
                }
            }
            previous = Some(level.threshold);
        }
        Ok(())
    }
}

/// Monitoring loop cadence and alerting.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub monitoring_interval_ms: u64,
    /// Deviation above which an ALERT is dispatched (edge-triggered).
    pub alert_threshold: f64,
    /// Ground energy used when the engine cannot provide one.
    pub reference_energy: f64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_ms: 1_000,
            alert_threshold: 0.08,
            reference_energy: 0.0,
        }
    }
}

impl MonitoringConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitoring_interval_ms == 0 {
            return config_err("monitoring_interval_ms must be > 0".to_string());
        }
        if !(self.alert_threshold > 0.0) || !self.alert_threshold.is_finite() {
            return config_err(format!(
                "alert_threshold must be > 0.0, got {}",
                self.alert_threshold
            ));
        }
        if !self.reference_energy.is_finite() {
            return config_err(format!(
                "reference_energy must be finite, got {}",
                self.reference_energy
            ));
        }
        Ok(())
    }
}

/// Automatic recovery gating.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RecoveryConfig {
    pub auto_recovery: bool,
    /// Deviation at or below which recovery is allowed.
    pub recovery_threshold: f64,
    /// Minimum time between two successful recoveries.
    pub min_cooldown_ms: u64,
    /// Time in emergency/halt after which an operator alert is raised.
    pub max_cooldown_ms: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            auto_recovery: true,
            recovery_threshold: 0.05,
            min_cooldown_ms: 30_000,
            max_cooldown_ms: 300_000,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.recovery_threshold >= 0.0) || !self.recovery_threshold.is_finite() {
            return config_err(format!(
                "recovery_threshold must be >= 0.0, got {}",
                self.recovery_threshold
            ));
        }
        if self.min_cooldown_ms > self.max_cooldown_ms {
            return config_err(format!(
                "min_cooldown_ms ({}) must be <= max_cooldown_ms ({})",
                self.min_cooldown_ms, self.max_cooldown_ms
            ));
        }
        Ok(())
    }
}

/// Validation harness parameters.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Random configurations sampled on top of the supplied ones.
    pub num_random_tests: usize,
    /// Minimum pass fraction for the minimality test.
    pub success_threshold: f64,
    pub energy_tolerance: f64,
    pub vector_tolerance: f64,
    /// Inclusive bounds the ground eigenvalue must fall in.
    pub min_physical_energy: f64,
    pub max_physical_energy: f64,
    /// Relative size of random perturbations around the ground configuration.
    pub perturbation_scale: f64,
    /// Damping coefficient used for per-mode damping ratios.
    pub damping_coefficient: f64,
    /// Fixed seed for reproducible runs; entropy when absent.
    pub seed: Option<u64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            num_random_tests: 1_000,
            success_threshold: 0.98,
            energy_tolerance: 1e-6,
            vector_tolerance: 1e-6,
            min_physical_energy: -1e3,
            max_physical_energy: 1e3,
            perturbation_scale: 0.5,
            damping_coefficient: 0.1,
            seed: None,
        }
    }
}

impl ValidationConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_num_random_tests(mut self, n: usize) -> Self {
        self.num_random_tests = n;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.success_threshold > 0.0 && self.success_threshold <= 1.0) {
            return config_err(format!(
                "success_threshold must be in (0.0, 1.0], got {}",
                self.success_threshold
            ));
        }
        if !(self.energy_tolerance > 0.0) || !(self.vector_tolerance > 0.0) {
            return config_err(format!(
                "tolerances must be > 0.0, got energy {} vector {}",
                self.energy_tolerance, self.vector_tolerance
            ));
        }
        if !(self.min_physical_energy < self.max_physical_energy) {
            return config_err(format!(
                "physical energy range is empty: [{}, {}]",
                self.min_physical_energy, self.max_physical_energy
            ));
        }
        if !(self.perturbation_scale > 0.0) || !(self.damping_coefficient > 0.0) {
            return config_err(format!(
                "perturbation_scale and damping_coefficient must be > 0.0, got {} and {}",
                self.perturbation_scale, self.damping_coefficient
            ));
        }
        Ok(())
    }
}
