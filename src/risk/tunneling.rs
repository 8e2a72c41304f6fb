//! Probabilistic barrier tunneling.
//!
//! Near a barrier the core does not rely on a hard threshold alone: the
//! evaluator assigns a bounded probability that the signal "tunnels" through
//! the barrier, rising as the energy approaches the barrier from below.
//!
//! ```text
//! dV       = V - E                       (0 if E >= V)
//! exponent = k * sqrt(2 m dV / hbar^2) * width
//! p        = clamp(exp(-exponent) * (1 + exp(-dV / kT)), 0, p_max)
//! ```
//!
//! The thermal factor is applied before the clamp, so the unclamped value may
//! exceed 1.0.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::config::TunnelingConfig;
use crate::errors::{ensure_finite, Result};
use crate::events::{RiskEvent, RiskEventSink};

use super::barrier::{Barrier, BarrierId};

/// Source of uniform draws in `[0, 1)`.
///
/// Injected so that runs can be replayed from a seed.
pub trait RandomSource: Send {
    fn next_unit(&mut self) -> f64;
}

/// [`RandomSource`] backed by a seedable `StdRng`.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_unit(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Record of one tunneling attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TunnelingEvent {
    pub timestamp_ms: u64,
    pub barrier_id: BarrierId,
    pub current_energy: f64,
    pub barrier_height: f64,
    pub probability: f64,
    pub random_value: f64,
    pub successful: bool,
    /// Energy bypassed on success (`height - energy`), 0 on failure.
    pub energy_change: f64,
}

/// Aggregate tunneling counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TunnelingStats {
    pub attempts: u64,
    pub successes: u64,
    pub success_rate: f64,
}

/// Computes tunneling probabilities and performs seeded attempts.
pub struct TunnelingEvaluator {
    config: TunnelingConfig,
    default_width: f64,
    rng: Box<dyn RandomSource>,
    history: VecDeque<TunnelingEvent>,
    attempts: u64,
    successes: u64,
}

impl TunnelingEvaluator {
    /// `default_width` is used by [`compute_probability`](Self::compute_probability)
    /// when no barrier geometry is given.
    pub fn new(config: TunnelingConfig, default_width: f64, rng: Box<dyn RandomSource>) -> Self {
        let capacity = config.history_capacity.max(1);
        Self {
            config,
            default_width,
            rng,
            history: VecDeque::with_capacity(capacity),
            attempts: 0,
            successes: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enable_quantum_tunneling
    }

    pub fn config(&self) -> &TunnelingConfig {
        &self.config
    }

    /// Probability of tunneling from energy `energy` through a barrier of
    /// height `barrier_height` with the default width.
    pub fn compute_probability(&self, energy: f64, barrier_height: f64) -> f64 {
        self.probability_with_width(energy, barrier_height, self.default_width)
    }

    /// Probability using the barrier's own width and penetration resistance.
    pub fn compute_probability_for(&self, energy: f64, barrier: &Barrier) -> f64 {
        self.probability_with_width(
            energy,
            barrier.height,
            barrier.width * barrier.penetration_resistance,
        )
    }

    fn probability_with_width(&self, energy: f64, barrier_height: f64, width: f64) -> f64 {
        if !energy.is_finite() || !barrier_height.is_finite() || energy >= barrier_height {
            return 0.0;
        }
        let c = &self.config;
        let potential_difference = barrier_height - energy;

        let exponent = c.tunneling_coefficient
            * (2.0 * c.mass * potential_difference / (c.hbar * c.hbar)).sqrt()
            * width;
        let base = (-exponent).exp();
        let thermal = 1.0 + (-potential_difference / c.thermal_energy).exp();

        let p = base * thermal;
        if p.is_nan() {
            return 0.0;
        }
        p.clamp(0.0, c.max_tunneling_probability)
    }

    /// Draw once against the barrier and record the outcome.
    ///
    /// Emits `quantum_tunneling_success` on success.
    pub fn attempt_tunneling(
        &mut self,
        energy: f64,
        barrier: &Barrier,
        now_ms: u64,
        sink: &dyn RiskEventSink,
    ) -> Result<TunnelingEvent> {
        let energy = ensure_finite("tunneling energy", energy)?;
        let probability = self.compute_probability_for(energy, barrier);
        let random_value = self.rng.next_unit();
        let successful = random_value < probability;

        let event = TunnelingEvent {
            timestamp_ms: now_ms,
            barrier_id: barrier.id,
            current_energy: energy,
            barrier_height: barrier.height,
            probability,
            random_value,
            successful,
            energy_change: if successful {
                barrier.height - energy
            } else {
                0.0
            },
        };

        self.attempts += 1;
        if successful {
            self.successes += 1;
            tracing::info!(
                barrier = %barrier.name,
                energy = %format!("{:.4}", energy),
                height = %format!("{:.4}", barrier.height),
                probability = %format!("{:.4}", probability),
                random_value = %format!("{:.4}", random_value),
                "Quantum tunneling succeeded"
            );
            sink.emit_at(
                RiskEvent::QuantumTunnelingSuccess {
                    barrier_id: barrier.id,
                    energy,
                    barrier_height: barrier.height,
                    probability,
                    random_value,
                },
                now_ms,
            );
        } else {
            tracing::debug!(
                barrier = %barrier.name,
                probability = %format!("{:.4}", probability),
                random_value = %format!("{:.4}", random_value),
                "Tunneling attempt failed"
            );
        }

        if self.history.len() == self.config.history_capacity.max(1) {
            self.history.pop_front();
        }
        self.history.push_back(event.clone());
        Ok(event)
    }

    /// Retained events, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TunnelingEvent> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn stats(&self) -> TunnelingStats {
        TunnelingStats {
            attempts: self.attempts,
            successes: self.successes,
            success_rate: if self.attempts > 0 {
                self.successes as f64 / self.attempts as f64
            } else {
                0.0
            },
        }
    }
}

impl std::fmt::Debug for TunnelingEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelingEvaluator")
            .field("config", &self.config)
            .field("default_width", &self.default_width)
            .field("history_len", &self.history.len())
            .field("attempts", &self.attempts)
            .field("successes", &self.successes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RecordingSink, RiskAction};
    use crate::risk::barrier::{BarrierKind, EnergyBarrierManager};

    /// Replays a fixed list of draws.
    struct Scripted(Vec<f64>, usize);

    impl RandomSource for Scripted {
        fn next_unit(&mut self) -> f64 {
            let v = self.0[self.1 % self.0.len()];
            self.1 += 1;
            v
        }
    }

    fn evaluator(rng: Box<dyn RandomSource>) -> TunnelingEvaluator {
        TunnelingEvaluator::new(TunnelingConfig::default(), 0.1, rng)
    }

    fn barrier(height: f64) -> Barrier {
        let mut manager = EnergyBarrierManager::new(0.0, 0.1, 1.0);
        let id = manager
            .create_barrier("b", height, BarrierKind::Protective, RiskAction::EmergencyStop)
            .unwrap();
        manager.get(id).unwrap().clone()
    }

    #[test]
    fn test_zero_when_at_or_above_barrier() {
        let eval = evaluator(Box::new(SeededRandom::seeded(1)));
        assert_eq!(eval.compute_probability(0.16, 0.16), 0.0);
        assert_eq!(eval.compute_probability(0.5, 0.16), 0.0);
        assert_eq!(eval.compute_probability(f64::NAN, 0.16), 0.0);
        assert_eq!(eval.compute_probability(0.1, f64::INFINITY), 0.0);
    }

    #[test]
    fn test_probability_bounded_everywhere() {
        let eval = evaluator(Box::new(SeededRandom::seeded(1)));
        let max = eval.config().max_tunneling_probability;
        for i in 0..200 {
            let e = -1.0 + i as f64 * 0.01;
            for v in [0.0, 0.05, 0.16, 0.5, 1.0, 10.0] {
                let p = eval.compute_probability(e, v);
                assert!((0.0..=max).contains(&p), "p({e}, {v}) = {p}");
            }
        }
    }

    #[test]
    fn test_reference_computation() {
        let eval = evaluator(Box::new(SeededRandom::seeded(1)));
        // dV = 0.06, exponent = 2 * sqrt(0.12) * 0.1
        let exponent: f64 = 2.0 * 0.12_f64.sqrt() * 0.1;
        assert!((exponent - 0.0693).abs() < 1e-4);
        let base = (-exponent).exp();
        assert!((base - 0.933).abs() < 1e-3);

        let expected = (base * (1.0 + (-0.06_f64 / 0.01).exp())).min(0.95);
        let p = eval.compute_probability(0.10, 0.16);
        assert!((p - expected).abs() < 1e-12);
        assert!(p <= 0.95);
    }

    #[test]
    fn test_clamp_after_thermal_multiply() {
        let eval = evaluator(Box::new(SeededRandom::seeded(1)));
        // dV -> 0: base ~1, thermal ~2, raw ~2 gets clamped
        let p = eval.compute_probability(0.159_999, 0.16);
        assert_eq!(p, 0.95);
    }

    #[test]
    fn test_rises_towards_barrier() {
        let eval = evaluator(Box::new(SeededRandom::seeded(1)));
        let far = eval.compute_probability(0.0, 0.16);
        let mid = eval.compute_probability(0.08, 0.16);
        let near = eval.compute_probability(0.15, 0.16);
        assert!(far < mid && mid < near, "{far} {mid} {near}");
    }

    #[test]
    fn test_seeded_attempts_are_reproducible() {
        let b = barrier(0.16);
        let sink = RecordingSink::new();

        let run = |seed: u64| -> Vec<bool> {
            let mut eval = evaluator(Box::new(SeededRandom::seeded(seed)));
            (0..50)
                .map(|_| eval.attempt_tunneling(0.10, &b, 0, &sink).unwrap().successful)
                .collect()
        };
        assert_eq!(run(42), run(42));
    }

    #[test]
    fn test_success_emits_event() {
        let b = barrier(0.16);
        let sink = RecordingSink::new();
        let mut eval = evaluator(Box::new(Scripted(vec![0.01, 0.99], 0)));

        let hit = eval.attempt_tunneling(0.10, &b, 7, &sink).unwrap();
        assert!(hit.successful);
        assert!((hit.energy_change - 0.06).abs() < 1e-12);
        assert_eq!(hit.timestamp_ms, 7);

        let miss = eval.attempt_tunneling(0.10, &b, 8, &sink).unwrap();
        assert!(!miss.successful);
        assert_eq!(miss.energy_change, 0.0);

        assert_eq!(sink.named("quantum_tunneling_success").len(), 1);
        let stats = eval.stats();
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.success_rate, 0.5);
    }

    #[test]
    fn test_never_succeeds_above_barrier() {
        let b = barrier(0.16);
        let sink = RecordingSink::new();
        let mut eval = evaluator(Box::new(Scripted(vec![0.0], 0)));
        let event = eval.attempt_tunneling(0.2, &b, 0, &sink).unwrap();
        assert_eq!(event.probability, 0.0);
        assert!(!event.successful);
    }

    #[test]
    fn test_history_ring_buffer() {
        let b = barrier(0.16);
        let sink = RecordingSink::new();
        let mut eval = evaluator(Box::new(SeededRandom::seeded(3)));
        for i in 0..150 {
            eval.attempt_tunneling(0.10, &b, i, &sink).unwrap();
        }
        assert_eq!(eval.history_len(), 100);
        assert_eq!(eval.history().next().unwrap().timestamp_ms, 50);
        assert_eq!(eval.stats().attempts, 150);
    }

    #[test]
    fn test_rejects_non_finite_energy() {
        let b = barrier(0.16);
        let sink = RecordingSink::new();
        let mut eval = evaluator(Box::new(SeededRandom::seeded(3)));
        assert!(eval.attempt_tunneling(f64::NAN, &b, 0, &sink).is_err());
        assert_eq!(eval.history_len(), 0);
    }
}
