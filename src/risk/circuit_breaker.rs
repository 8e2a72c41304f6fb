//! Tiered circuit breakers on the energy deviation.
//!
//! Levels form an escalation ladder with strictly increasing thresholds:
//! - reduce positions 10% / 25% / 50%
//! - emergency stop
//! - complete halt
//!
//! A tripped breaker is latched. Falling deviation never clears it; only the
//! recovery controller (or an operator reset) does.

use serde::{Deserialize, Serialize};

use crate::config::CircuitBreakerConfig;
use crate::errors::{ensure_finite, Error, Result};
use crate::events::{ActionOrigin, RiskAction, RiskEvent, RiskEventSink};

/// 1-based rung on the escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BreakerLevel(pub u8);

impl std::fmt::Display for BreakerLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// One breaker on the ladder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreaker {
    pub level: BreakerLevel,
    pub threshold: f64,
    pub action: RiskAction,
    pub active: bool,
    /// Latched trip flag.
    pub triggered: bool,
    pub trigger_count: u64,
    pub last_trigger_ms: Option<u64>,
}

/// A breaker that tripped on the current check.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerTrip {
    pub level: BreakerLevel,
    pub threshold: f64,
    pub action: RiskAction,
}

/// Escalation ladder of latched breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerRegistry {
    enabled: bool,
    /// Sorted by threshold (validated ascending at construction).
    breakers: Vec<CircuitBreaker>,
    ground_energy: f64,
}

impl CircuitBreakerRegistry {
    /// Build the ladder from configuration.
    ///
    /// Fails with a configuration error if thresholds are not strictly ascending.
    pub fn new(config: &CircuitBreakerConfig, ground_energy: f64) -> Result<Self> {
        config.validate()?;
        if config.levels.len() > u8::MAX as usize {
            return Err(Error::Configuration(format!(
                "at most {} circuit breaker levels supported, got {}",
                u8::MAX,
                config.levels.len()
            )));
        }

        let breakers = config
            .levels
            .iter()
            .enumerate()
            .map(|(i, level)| CircuitBreaker {
                level: BreakerLevel(i as u8 + 1),
                threshold: level.threshold,
                action: level.action.clone(),
                active: true,
                triggered: false,
                trigger_count: 0,
                last_trigger_ms: None,
            })
            .collect();

        Ok(Self {
            enabled: config.enable_circuit_breakers,
            breakers,
            ground_energy,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get(&self, level: BreakerLevel) -> Option<&CircuitBreaker> {
        self.breakers.iter().find(|b| b.level == level)
    }

    /// Breakers in ascending threshold order.
    pub fn iter(&self) -> impl Iterator<Item = &CircuitBreaker> {
        self.breakers.iter()
    }

    pub fn set_active(&mut self, level: BreakerLevel, active: bool) -> Result<()> {
        let breaker = self
            .breakers
            .iter_mut()
            .find(|b| b.level == level)
            .ok_or(Error::UnknownBreaker(level))?;
        breaker.active = active;
        tracing::info!(%level, active, "Circuit breaker activation changed");
        Ok(())
    }

    pub fn is_triggered(&self, level: BreakerLevel) -> bool {
        self.get(level).map(|b| b.triggered).unwrap_or(false)
    }

    pub fn any_triggered(&self) -> bool {
        self.breakers.iter().any(|b| b.triggered)
    }

    /// Levels currently latched, ascending.
    pub fn triggered_levels(&self) -> Vec<BreakerLevel> {
        self.breakers
            .iter()
            .filter(|b| b.triggered)
            .map(|b| b.level)
            .collect()
    }

    /// Most severe action among latched breakers.
    pub fn most_severe_action(&self) -> Option<&RiskAction> {
        self.breakers
            .iter()
            .filter(|b| b.triggered)
            .map(|b| &b.action)
            .fold(None, |worst: Option<&RiskAction>, action| match worst {
                Some(w) if !action.is_more_severe_than(w) => Some(w),
                _ => Some(action),
            })
    }

    /// Trip every active, untriggered breaker whose threshold the deviation exceeds.
    ///
    /// Each trip is latched, emitted as `circuit_breaker_triggered` and its
    /// action dispatched. Trips are returned in ascending threshold order.
    pub fn check_breakers(
        &mut self,
        current_energy: f64,
        now_ms: u64,
        sink: &dyn RiskEventSink,
    ) -> Result<Vec<BreakerTrip>> {
        let current_energy = ensure_finite("circuit breaker energy", current_energy)?;
        if !self.enabled {
            return Ok(Vec::new());
        }

        let deviation = (current_energy - self.ground_energy).abs();
        let mut trips = Vec::new();

        for breaker in self
            .breakers
            .iter_mut()
            .filter(|b| b.active && !b.triggered && deviation > b.threshold)
        {
            breaker.triggered = true;
            breaker.trigger_count += 1;
            breaker.last_trigger_ms = Some(now_ms);

            if breaker.action.is_terminal() {
                tracing::error!(
                    level = %breaker.level,
                    deviation = %format!("{:.4}", deviation),
                    threshold = %format!("{:.4}", breaker.threshold),
                    action = %breaker.action,
                    "Circuit breaker triggered"
                );
            } else {
                tracing::warn!(
                    level = %breaker.level,
                    deviation = %format!("{:.4}", deviation),
                    threshold = %format!("{:.4}", breaker.threshold),
                    action = %breaker.action,
                    "Circuit breaker triggered"
                );
            }

            sink.emit_at(
                RiskEvent::CircuitBreakerTriggered {
                    level: breaker.level,
                    threshold: breaker.threshold,
                    action: breaker.action.clone(),
                },
                now_ms,
            );
            sink.dispatch_at(
                breaker.action.clone(),
                ActionOrigin::CircuitBreaker(breaker.level),
                now_ms,
            );
            trips.push(BreakerTrip {
                level: breaker.level,
                threshold: breaker.threshold,
                action: breaker.action.clone(),
            });
        }

        Ok(trips)
    }

    /// Unlatch every breaker. Returns how many were latched.
    pub(crate) fn reset_all(&mut self) -> usize {
        let mut reset = 0;
        for breaker in self.breakers.iter_mut().filter(|b| b.triggered) {
            breaker.triggered = false;
            reset += 1;
        }
        reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerLevelConfig;
    use crate::events::RecordingSink;

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(&CircuitBreakerConfig::default(), 0.0).unwrap()
    }

    #[test]
    fn test_default_ladder() {
        let registry = registry();
        let thresholds: Vec<f64> = registry.iter().map(|b| b.threshold).collect();
        assert_eq!(thresholds, vec![0.05, 0.10, 0.15, 0.20, 0.25]);
        assert_eq!(
            registry.get(BreakerLevel(5)).unwrap().action,
            RiskAction::CompleteHalt
        );
    }

    #[test]
    fn test_rejects_non_ascending_thresholds() {
        let config = CircuitBreakerConfig {
            enable_circuit_breakers: true,
            levels: vec![
                BreakerLevelConfig::new(0.2, RiskAction::EmergencyStop),
                BreakerLevelConfig::new(0.1, RiskAction::CompleteHalt),
            ],
        };
        let err = CircuitBreakerRegistry::new(&config, 0.0).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_fires_in_ascending_order_and_latches() {
        let mut registry = registry();
        let sink = RecordingSink::new();

        let mut fired = Vec::new();
        let mut energy = 0.0;
        while energy < 0.30 {
            for trip in registry.check_breakers(energy, 0, &sink).unwrap() {
                fired.push(trip.level);
            }
            energy += 0.01;
        }
        assert_eq!(
            fired,
            (1..=5).map(BreakerLevel).collect::<Vec<_>>(),
            "each level fires exactly once, in order"
        );

        // Deviation falls: everything stays latched, nothing re-fires
        for energy in [0.2, 0.1, 0.0] {
            assert!(registry.check_breakers(energy, 0, &sink).unwrap().is_empty());
        }
        assert_eq!(registry.triggered_levels().len(), 5);
        assert_eq!(sink.named("circuit_breaker_triggered").len(), 5);
        assert_eq!(
            sink.actions(),
            vec![
                RiskAction::ReducePositions { percentage: 10.0 },
                RiskAction::ReducePositions { percentage: 25.0 },
                RiskAction::ReducePositions { percentage: 50.0 },
                RiskAction::EmergencyStop,
                RiskAction::CompleteHalt,
            ]
        );
    }

    #[test]
    fn test_jump_trips_several_levels_in_order() {
        let mut registry = registry();
        let sink = RecordingSink::new();

        let trips = registry.check_breakers(0.17, 5, &sink).unwrap();
        let levels: Vec<u8> = trips.iter().map(|t| t.level.0).collect();
        assert_eq!(levels, vec![1, 2, 3]);
        assert_eq!(registry.get(BreakerLevel(3)).unwrap().last_trigger_ms, Some(5));
        assert_eq!(
            registry.most_severe_action(),
            Some(&RiskAction::ReducePositions { percentage: 50.0 })
        );
    }

    #[test]
    fn test_reset_unlatches() {
        let mut registry = registry();
        let sink = RecordingSink::new();
        registry.check_breakers(0.22, 0, &sink).unwrap();
        assert_eq!(registry.most_severe_action(), Some(&RiskAction::EmergencyStop));

        assert_eq!(registry.reset_all(), 4);
        assert!(!registry.any_triggered());

        // Re-arms after reset
        let trips = registry.check_breakers(0.06, 0, &sink).unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(registry.get(BreakerLevel(1)).unwrap().trigger_count, 2);
    }

    #[test]
    fn test_disabled_registry_never_trips() {
        let config = CircuitBreakerConfig {
            enable_circuit_breakers: false,
            ..Default::default()
        };
        let mut registry = CircuitBreakerRegistry::new(&config, 0.0).unwrap();
        let sink = RecordingSink::new();
        assert!(registry.check_breakers(1.0, 0, &sink).unwrap().is_empty());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_inactive_level_skipped() {
        let mut registry = registry();
        let sink = RecordingSink::new();
        registry.set_active(BreakerLevel(1), false).unwrap();

        let trips = registry.check_breakers(0.12, 0, &sink).unwrap();
        assert_eq!(trips.len(), 1);
        assert_eq!(trips[0].level, BreakerLevel(2));
        assert!(registry.set_active(BreakerLevel(9), true).is_err());
    }

    #[test]
    fn test_nan_energy_preserves_latches() {
        let mut registry = registry();
        let sink = RecordingSink::new();
        registry.check_breakers(0.07, 0, &sink).unwrap();

        assert!(registry.check_breakers(f64::INFINITY, 0, &sink).is_err());
        assert!(registry.is_triggered(BreakerLevel(1)));
        assert!(!registry.is_triggered(BreakerLevel(2)));
    }
}
