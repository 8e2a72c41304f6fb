//! The validation harness: proves on demand that the engine's ground state is
//! risk-minimal and dynamically stable.
//!
//! State machine: `Idle -> Running -> {Validated, Failed}`. A finished
//! harness can be run again. The harness never touches runtime risk state.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::config::ValidationConfig;
use crate::engine::{PortfolioSnapshot, RiskEngine};
use crate::errors::{ensure_finite, Result};
use crate::events::{RiskEvent, SharedSink};
use crate::helpers::now_ms;

use super::ground_state::verify_ground_state;
use super::minimality::check_minimality;
use super::result::{QualityRating, ValidationResult};
use super::stability::analyze_stability;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessState {
    Idle,
    Running,
    Validated,
    Failed,
}

pub struct ValidationHarness {
    config: ValidationConfig,
    state: HarnessState,
    sink: Option<SharedSink>,
    last_result: Option<ValidationResult>,
}

impl ValidationHarness {
    pub fn new(config: ValidationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: HarnessState::Idle,
            sink: None,
            last_result: None,
        })
    }

    /// Emit `validation_completed` to this sink after each run.
    pub fn with_sink(mut self, sink: SharedSink) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn state(&self) -> HarnessState {
        self.state
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    pub fn last_result(&self) -> Option<&ValidationResult> {
        self.last_result.as_ref()
    }

    /// Run minimality, ground-state and stability checks.
    ///
    /// An engine missing a capability, or returning a non-finite ground energy
    /// or eigenvalue, fails the run with an error. A failed check is a normal
    /// outcome reported as `principle_validated = false`.
    pub fn validate_principle(
        &mut self,
        engine: &dyn RiskEngine,
        test_configs: &[PortfolioSnapshot],
    ) -> Result<ValidationResult> {
        self.state = HarnessState::Running;
        match self.run(engine, test_configs) {
            Ok(result) => {
                self.state = if result.principle_validated {
                    HarnessState::Validated
                } else {
                    HarnessState::Failed
                };
                if let Some(sink) = &self.sink {
                    sink.emit(RiskEvent::ValidationCompleted {
                        principle_validated: result.principle_validated,
                        overall_success_rate: result.overall_success_rate,
                        quality: result.quality_rating,
                    });
                }
                self.last_result = Some(result.clone());
                Ok(result)
            }
            Err(e) => {
                tracing::error!(error = %e, "Validation aborted");
                self.state = HarnessState::Failed;
                Err(e)
            }
        }
    }

    fn run(
        &self,
        engine: &dyn RiskEngine,
        test_configs: &[PortfolioSnapshot],
    ) -> Result<ValidationResult> {
        let started_ms = now_ms();
        let clock = Instant::now();
        let mut rng = match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            supplied = test_configs.len(),
            random = self.config.num_random_tests,
            seed = ?self.config.seed,
            "Validating risk-minimality principle"
        );

        let ground = engine.find_ground_state()?;
        ensure_finite("ground energy", ground.energy)?;
        let minimality = check_minimality(engine, &ground, test_configs, &self.config, &mut rng);

        let decomposition = engine.diagonalize_hamiltonian()?;
        let ground_state = verify_ground_state(&decomposition, ground.energy, &self.config)?;
        let stability =
            analyze_stability(&decomposition.eigenvalues, self.config.damping_coefficient);

        let principle_validated =
            minimality.passed_threshold && ground_state.passed && stability.passed;
        let overall_success_rate =
            (minimality.success_rate + ground_state.success_rate + stability.success_rate) / 3.0;
        let quality_rating = QualityRating::classify(
            ground_state.energy_deviation.unwrap_or(f64::INFINITY),
            minimality.success_rate,
            stability.stability_index,
            self.config.energy_tolerance,
        );

        let result = ValidationResult {
            principle_validated,
            overall_success_rate,
            quality_rating,
            minimality,
            ground_state,
            stability,
            started_ms,
            duration_ms: clock.elapsed().as_millis() as u64,
        };

        if principle_validated {
            tracing::info!(
                success_rate = %format!("{:.4}", overall_success_rate),
                quality = %quality_rating,
                duration_ms = result.duration_ms,
                "Risk-minimality principle validated"
            );
        } else {
            tracing::warn!(
                success_rate = %format!("{:.4}", overall_success_rate),
                quality = %quality_rating,
                minimality = result.minimality.passed_threshold,
                ground_state = result.ground_state.passed,
                stability = result.stability.passed,
                "Risk-minimality principle NOT validated"
            );
        }
        Ok(result)
    }
}

impl std::fmt::Debug for ValidationHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidationHarness")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("has_sink", &self.sink.is_some())
            .finish()
    }
}
