//! The risk controller: one owned service composing barriers, breakers,
//! tunneling and recovery around a single [`SystemState`].
//!
//! Tick order:
//! 1. barriers (breach/restore, barrier actions dispatched here)
//! 2. circuit breakers (actions dispatched by the registry)
//! 3. alert threshold
//! 4. tunneling on approached barriers
//! 5. auto recovery, then the operator timeout check
//!
//! A non-finite energy reading fails the tick before anything is touched.

use std::sync::Arc;

use crate::config::{
    check_recovery_threshold, BarrierConfig, LimitUpdate, MonitoringConfig, RiskControlConfig,
};
use crate::errors::{ensure_finite, Result};
use crate::events::{ActionOrigin, RiskAction, SharedSink};

use super::barrier::{BarrierBreach, BarrierId, BarrierKind, EnergyBarrierManager};
use super::circuit_breaker::{BreakerLevel, BreakerTrip, CircuitBreakerRegistry};
use super::recovery::{RecoveryController, RecoveryOutcome};
use super::state::SystemState;
use super::tunneling::{RandomSource, SeededRandom, TunnelingEvaluator, TunnelingEvent};

/// Deviation must fall below `alert_threshold * ALERT_REARM_RATIO` to re-arm the alert.
pub const ALERT_REARM_RATIO: f64 = 0.9;

/// What happened on one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub deviation: f64,
    pub breaches: Vec<BarrierBreach>,
    pub trips: Vec<BreakerTrip>,
    pub tunneling: Vec<TunnelingEvent>,
    pub alert_raised: bool,
    pub recovered: bool,
    pub timeout_alerted: bool,
}

/// Owned risk service driven by the monitoring loop.
pub struct RiskController {
    barriers: EnergyBarrierManager,
    breakers: CircuitBreakerRegistry,
    tunneling: TunnelingEvaluator,
    recovery: RecoveryController,
    state: SystemState,
    barrier_config: BarrierConfig,
    monitoring: MonitoringConfig,
    sink: SharedSink,
    alert_armed: bool,
}

impl RiskController {
    /// Build the controller and register the default warning / protective /
    /// critical barriers.
    ///
    /// Tunneling draws from entropy; use [`with_random_source`](Self::with_random_source)
    /// for reproducible runs.
    pub fn new(
        config: &RiskControlConfig,
        ground_energy: f64,
        energy_gap: f64,
        sink: SharedSink,
    ) -> Result<Self> {
        config.validate()?;
        let ground_energy = ensure_finite("ground energy", ground_energy)?;
        let b = &config.barriers;

        let mut barriers =
            EnergyBarrierManager::new(ground_energy, b.barrier_width, b.penetration_resistance);
        barriers.create_barrier(
            "warning",
            b.warning_height(),
            BarrierKind::Warning,
            RiskAction::alert("energy deviation approaching protective barrier"),
        )?;
        barriers.create_barrier(
            "protective",
            b.default_barrier_height,
            BarrierKind::Protective,
            RiskAction::ReducePositions { percentage: 50.0 },
        )?;
        barriers.create_barrier(
            "critical",
            b.critical_barrier_height,
            BarrierKind::Critical,
            RiskAction::EmergencyStop,
        )?;

        let breakers = CircuitBreakerRegistry::new(&config.circuit_breakers, ground_energy)?;
        let tunneling = TunnelingEvaluator::new(
            config.tunneling.clone(),
            b.barrier_width,
            Box::new(SeededRandom::from_entropy()),
        );

        tracing::info!(
            ground_energy = %format!("{:.6}", ground_energy),
            energy_gap = %format!("{:.6}", energy_gap),
            barriers = barriers.len(),
            breaker_levels = config.circuit_breakers.levels.len(),
            tunneling = config.tunneling.enable_quantum_tunneling,
            auto_recovery = config.recovery.auto_recovery,
            "Risk controller initialized"
        );

        Ok(Self {
            barriers,
            breakers,
            tunneling,
            recovery: RecoveryController::new(config.recovery.clone()),
            state: SystemState::new(ground_energy, energy_gap),
            barrier_config: b.clone(),
            monitoring: config.monitoring.clone(),
            sink,
            alert_armed: true,
        })
    }

    /// Replace the tunneling random source.
    pub fn with_random_source(mut self, rng: Box<dyn RandomSource>) -> Self {
        self.tunneling = TunnelingEvaluator::new(
            self.tunneling.config().clone(),
            self.barrier_config.barrier_width,
            rng,
        );
        self
    }

    /// Register an additional barrier before the loop starts.
    pub fn add_barrier(
        &mut self,
        name: impl Into<String>,
        height: f64,
        kind: BarrierKind,
        action: RiskAction,
    ) -> Result<BarrierId> {
        check_recovery_threshold(
            self.recovery.config().recovery_threshold,
            std::iter::empty::<f64>(),
            [height],
        )?;
        self.barriers.create_barrier(name, height, kind, action)
    }

    pub fn state(&self) -> &SystemState {
        &self.state
    }

    pub fn barriers(&self) -> &EnergyBarrierManager {
        &self.barriers
    }

    pub fn breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn tunneling(&self) -> &TunnelingEvaluator {
        &self.tunneling
    }

    pub fn recovery(&self) -> &RecoveryController {
        &self.recovery
    }

    pub fn monitoring_config(&self) -> &MonitoringConfig {
        &self.monitoring
    }

    /// Evaluate one energy reading.
    pub fn tick(&mut self, energy: f64, now_ms: u64) -> Result<TickOutcome> {
        let energy = ensure_finite("monitored energy", energy)?;
        self.state.observe_energy(energy);
        let deviation = self.state.energy_deviation;
        let sink = Arc::clone(&self.sink);
        let sink = sink.as_ref();

        let breaches = self.barriers.check_barriers(energy, now_ms, sink)?;
        for breach in &breaches {
            sink.dispatch_at(breach.action.clone(), ActionOrigin::Barrier(breach.id), now_ms);
            self.apply_action(&breach.action, now_ms);
        }

        let trips = self.breakers.check_breakers(energy, now_ms, sink)?;
        for trip in &trips {
            self.apply_action(&trip.action, now_ms);
        }

        let alert_raised = self.check_alert(deviation, now_ms);

        let mut tunneling = Vec::new();
        if self.tunneling.is_enabled() {
            for barrier in self
                .barriers
                .approached(deviation, self.barrier_config.safety_margin)
            {
                tunneling.push(
                    self.tunneling
                        .attempt_tunneling(deviation, barrier, now_ms, sink)?,
                );
            }
        }

        let recovered = self.state.is_restricted()
            && self.recovery.config().auto_recovery
            && self.recovery.attempt_recovery(
                &mut self.state,
                &mut self.barriers,
                &mut self.breakers,
                now_ms,
                sink,
            );
        if recovered {
            self.alert_armed = deviation < self.monitoring.alert_threshold * ALERT_REARM_RATIO;
        }

        let timeout_alerted = self.recovery.check_timeout(&self.state, now_ms, sink);

        tracing::trace!(
            energy = %format!("{:.6}", energy),
            deviation = %format!("{:.6}", deviation),
            breached = self.barriers.breached_count(),
            emergency = self.state.emergency_mode,
            halted = self.state.system_halted,
            "Tick evaluated"
        );

        Ok(TickOutcome {
            deviation,
            breaches,
            trips,
            tunneling,
            alert_raised,
            recovered,
            timeout_alerted,
        })
    }

    /// Recovery attempt outside the tick, still subject to every gate.
    pub fn attempt_recovery(&mut self, now_ms: u64) -> bool {
        self.recovery.attempt_recovery(
            &mut self.state,
            &mut self.barriers,
            &mut self.breakers,
            now_ms,
            self.sink.as_ref(),
        )
    }

    /// Clear all latched state regardless of cooldown and deviation.
    pub fn operator_reset(&mut self, now_ms: u64) -> RecoveryOutcome {
        let outcome = self.recovery.operator_reset(
            &mut self.state,
            &mut self.barriers,
            &mut self.breakers,
            now_ms,
            self.sink.as_ref(),
        );
        self.alert_armed = true;
        outcome
    }

    pub fn set_barrier_active(&mut self, id: BarrierId, active: bool) -> Result<()> {
        self.barriers.set_active(id, active)
    }

    pub fn set_breaker_active(&mut self, level: BreakerLevel, active: bool) -> Result<()> {
        self.breakers.set_active(level, active)
    }

    /// Apply a runtime limit change. Nothing changes if validation fails.
    pub fn update_limits(&mut self, update: &LimitUpdate) -> Result<()> {
        let (monitoring, recovery) = update.apply(&self.monitoring, self.recovery.config())?;
        check_recovery_threshold(
            recovery.recovery_threshold,
            self.breakers.iter().map(|b| b.threshold),
            self.barriers.iter().map(|b| b.height),
        )?;
        tracing::info!(
            alert_threshold = %format!("{:.4}", monitoring.alert_threshold),
            recovery_threshold = %format!("{:.4}", recovery.recovery_threshold),
            min_cooldown_ms = recovery.min_cooldown_ms,
            max_cooldown_ms = recovery.max_cooldown_ms,
            auto_recovery = recovery.auto_recovery,
            "Risk limits updated"
        );
        self.monitoring = monitoring;
        self.recovery.set_config(recovery);
        Ok(())
    }

    fn apply_action(&mut self, action: &RiskAction, now_ms: u64) {
        match action {
            RiskAction::EmergencyStop => {
                if !self.state.emergency_mode {
                    tracing::error!(
                        deviation = %format!("{:.4}", self.state.energy_deviation),
                        "Entering emergency mode"
                    );
                }
                self.state.enter_emergency(now_ms);
            }
            RiskAction::CompleteHalt => {
                if !self.state.system_halted {
                    tracing::error!(
                        deviation = %format!("{:.4}", self.state.energy_deviation),
                        "System halted"
                    );
                }
                self.state.enter_halt(now_ms);
            }
            RiskAction::ReducePositions { .. } | RiskAction::Alert { .. } => {}
        }
    }

    /// Edge-triggered alert on the deviation threshold.
    fn check_alert(&mut self, deviation: f64, now_ms: u64) -> bool {
        let threshold = self.monitoring.alert_threshold;
        if self.alert_armed && deviation > threshold {
            self.alert_armed = false;
            tracing::warn!(
                deviation = %format!("{:.4}", deviation),
                threshold = %format!("{:.4}", threshold),
                "Energy deviation above alert threshold"
            );
            self.sink.dispatch_at(
                RiskAction::alert(format!(
                    "energy deviation {deviation:.4} above alert threshold {threshold:.4}"
                )),
                ActionOrigin::AlertThreshold,
                now_ms,
            );
            return true;
        }
        if !self.alert_armed && deviation < threshold * ALERT_REARM_RATIO {
            self.alert_armed = true;
        }
        false
    }
}

impl std::fmt::Debug for RiskController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskController")
            .field("state", &self.state)
            .field("barriers", &self.barriers.len())
            .field("breached", &self.barriers.breached_count())
            .field("triggered", &self.breakers.triggered_levels())
            .field("alert_armed", &self.alert_armed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::events::{RecordingSink, RiskEvent};

    fn controller() -> (RiskController, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let mut config = RiskControlConfig::default();
        config.tunneling.enable_quantum_tunneling = false;
        let ctl = RiskController::new(&config, 0.0, 0.0, sink.clone()).unwrap();
        (ctl, sink)
    }

    fn origins(sink: &RecordingSink) -> Vec<ActionOrigin> {
        sink.events()
            .into_iter()
            .filter_map(|e| match e {
                RiskEvent::ActionDispatched { origin, .. } => Some(origin),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_default_barrier_set() {
        let (ctl, _) = controller();
        let heights: Vec<(String, f64)> = ctl
            .barriers()
            .iter()
            .map(|b| (b.name.clone(), b.height))
            .collect();
        assert_eq!(heights.len(), 3);
        assert_eq!(heights[0].0, "warning");
        assert!((heights[0].1 - 0.12).abs() < 1e-12);
        assert_eq!(heights[1], ("protective".to_string(), 0.15));
        assert_eq!(heights[2], ("critical".to_string(), 0.30));
    }

    #[test]
    fn test_quiet_tick_emits_nothing() {
        let (mut ctl, sink) = controller();
        let outcome = ctl.tick(0.01, 0).unwrap();
        assert!(outcome.breaches.is_empty() && outcome.trips.is_empty());
        assert!(!outcome.alert_raised);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_halt_then_auto_recovery() {
        let (mut ctl, sink) = controller();

        let outcome = ctl.tick(0.32, 0).unwrap();
        assert_eq!(outcome.trips.len(), 5);
        assert_eq!(outcome.breaches.len(), 3);
        assert!(outcome.alert_raised);
        assert!(ctl.state().emergency_mode && ctl.state().system_halted);

        // deviation 0.10 is above the recovery threshold
        let outcome = ctl.tick(0.10, 1_000).unwrap();
        assert!(!outcome.recovered);
        assert!(ctl.state().system_halted);

        let outcome = ctl.tick(0.02, 2_000).unwrap();
        assert!(outcome.recovered);
        assert!(!ctl.state().is_restricted());
        assert!(!ctl.breakers().any_triggered());
        assert_eq!(ctl.barriers().breached_count(), 0);
        assert_eq!(sink.named("system_recovery").len(), 1);
    }

    #[test]
    fn test_barrier_actions_are_dispatched_with_origin() {
        let (mut ctl, sink) = controller();
        ctl.tick(0.13, 0).unwrap();

        let origins = origins(&sink);
        // warning barrier, L1 + L2 breakers, alert threshold
        assert!(origins.contains(&ActionOrigin::Barrier(BarrierId(0))));
        assert!(origins.contains(&ActionOrigin::CircuitBreaker(BreakerLevel(1))));
        assert!(origins.contains(&ActionOrigin::CircuitBreaker(BreakerLevel(2))));
        assert!(origins.contains(&ActionOrigin::AlertThreshold));
        assert!(!ctl.state().is_restricted());
    }

    #[test]
    fn test_alert_rearms_below_ratio() {
        let (mut ctl, _) = controller();
        assert!(ctl.tick(0.09, 0).unwrap().alert_raised);
        assert!(!ctl.tick(0.10, 1).unwrap().alert_raised);
        // 0.075 is below 0.08 but above the re-arm level 0.072
        assert!(!ctl.tick(0.075, 2).unwrap().alert_raised);
        assert!(!ctl.tick(0.09, 3).unwrap().alert_raised);
        ctl.tick(0.05, 4).unwrap();
        assert!(ctl.tick(0.09, 5).unwrap().alert_raised);
    }

    #[test]
    fn test_nan_tick_is_noop() {
        let (mut ctl, sink) = controller();
        ctl.tick(0.22, 0).unwrap();
        let before = ctl.state().clone();
        let events = sink.events().len();

        let err = ctl.tick(f64::NAN, 1).unwrap_err();
        assert!(matches!(err, Error::NumericInstability { .. }));
        assert_eq!(ctl.state(), &before);
        assert_eq!(sink.events().len(), events);
    }

    #[test]
    fn test_tunneling_attempted_in_approach_band() {
        let sink = Arc::new(RecordingSink::new());
        let mut ctl = RiskController::new(&RiskControlConfig::default(), 0.0, 0.0, sink.clone())
            .unwrap()
            .with_random_source(Box::new(SeededRandom::seeded(7)));

        // protective band (0.12, 0.15]; warning barrier breaches at 0.12
        let outcome = ctl.tick(0.14, 0).unwrap();
        assert_eq!(outcome.tunneling.len(), 1);
        assert_eq!(outcome.tunneling[0].barrier_id, BarrierId(1));
        assert_eq!(ctl.tunneling().stats().attempts, 1);
        // Tunneling never touches barrier state
        assert!(!ctl.barriers().get(BarrierId(1)).unwrap().breached);
    }

    #[test]
    fn test_operator_reset_and_limit_update() {
        let (mut ctl, _) = controller();
        ctl.update_limits(&LimitUpdate {
            auto_recovery: Some(false),
            ..Default::default()
        })
        .unwrap();

        ctl.tick(0.4, 0).unwrap();
        assert!(!ctl.tick(0.0, 1_000).unwrap().recovered);
        assert!(ctl.state().system_halted);

        let outcome = ctl.operator_reset(2_000);
        assert_eq!(outcome.breakers_reset, 5);
        assert!(!ctl.state().is_restricted());

        let bad = LimitUpdate {
            alert_threshold: Some(-1.0),
            ..Default::default()
        };
        assert!(ctl.update_limits(&bad).is_err());
        assert_eq!(ctl.monitoring_config().alert_threshold, 0.08);
    }

    #[test]
    fn test_recovery_threshold_cannot_reach_latches() {
        let mut config = RiskControlConfig::default();
        config.recovery.recovery_threshold = 0.3;
        config.recovery.min_cooldown_ms = 0;
        assert!(matches!(
            RiskController::new(&config, 0.0, 0.0, Arc::new(RecordingSink::new())),
            Err(Error::Configuration(_))
        ));

        let (mut ctl, _) = controller();
        let raise = LimitUpdate {
            recovery_threshold: Some(0.3),
            min_cooldown_ms: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            ctl.update_limits(&raise),
            Err(Error::Configuration(_))
        ));
        assert_eq!(ctl.recovery().config().recovery_threshold, 0.05);
        assert_eq!(ctl.recovery().config().min_cooldown_ms, 30_000);

        // restore level 0.045 would sit below the recovery threshold
        assert!(matches!(
            ctl.add_barrier("tight", 0.05, BarrierKind::Warning, RiskAction::alert("tight")),
            Err(Error::Configuration(_))
        ));
        ctl.add_barrier("loose", 0.06, BarrierKind::Warning, RiskAction::alert("loose"))
            .unwrap();

        // latches set this tick survive it
        let outcome = ctl.tick(0.22, 1_000).unwrap();
        assert_eq!(outcome.trips.len(), 4);
        assert!(!outcome.recovered);
        assert!(ctl.state().emergency_mode);
        assert!(ctl.breakers().any_triggered());
    }

    #[test]
    fn test_barriers_and_breakers_share_ground() {
        let sink = Arc::new(RecordingSink::new());
        let mut config = RiskControlConfig::default();
        config.tunneling.enable_quantum_tunneling = false;
        let mut ctl = RiskController::new(&config, 0.5, 0.0, sink).unwrap();
        assert_eq!(ctl.barriers().ground_energy(), ctl.state().ground_energy);

        let outcome = ctl.tick(0.5, 0).unwrap();
        assert_eq!(outcome.deviation, 0.0);
        assert!(outcome.breaches.is_empty() && outcome.trips.is_empty());

        // deviation 0.25: warning + protective, breakers up to 0.20
        let outcome = ctl.tick(0.75, 1).unwrap();
        assert_eq!(outcome.breaches.len(), 2);
        assert_eq!(outcome.trips.len(), 4);
        assert_eq!(ctl.state().energy_deviation, 0.25);
    }
}
