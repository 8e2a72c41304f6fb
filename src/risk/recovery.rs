//! Cooldown-gated recovery from latched risk state.
//!
//! Recovery clears every breached barrier and latched breaker at once, and
//! lifts emergency mode / halt. It is allowed only when:
//! 1. auto recovery is enabled
//! 2. at least `min_cooldown` has passed since the last recovery
//! 3. the deviation is back at or below `recovery_threshold`
//!
//! A refused attempt is a normal outcome, not an error.

use crate::config::RecoveryConfig;
use crate::events::{ActionOrigin, RiskAction, RiskEvent, RiskEventSink};

use super::barrier::EnergyBarrierManager;
use super::circuit_breaker::CircuitBreakerRegistry;
use super::state::SystemState;

/// Why an attempt was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryBlock {
    AutoRecoveryDisabled,
    CoolingDown { remaining_ms: u64 },
    DeviationTooHigh,
}

impl std::fmt::Display for RecoveryBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecoveryBlock::AutoRecoveryDisabled => write!(f, "auto recovery disabled"),
            RecoveryBlock::CoolingDown { remaining_ms } => {
                write!(f, "cooling down ({remaining_ms}ms remaining)")
            }
            RecoveryBlock::DeviationTooHigh => write!(f, "deviation above recovery threshold"),
        }
    }
}

/// Counts of what a recovery cleared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecoveryOutcome {
    pub barriers_restored: usize,
    pub breakers_reset: usize,
}

/// Automatic reset of latched state.
#[derive(Debug, Clone)]
pub struct RecoveryController {
    config: RecoveryConfig,
    timeout_alerted: bool,
}

impl RecoveryController {
    pub fn new(config: RecoveryConfig) -> Self {
        Self {
            config,
            timeout_alerted: false,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub(crate) fn set_config(&mut self, config: RecoveryConfig) {
        self.config = config;
    }

    /// Check the gates without changing anything.
    pub fn blocked_by(&self, state: &SystemState, now_ms: u64) -> Option<RecoveryBlock> {
        if !self.config.auto_recovery {
            return Some(RecoveryBlock::AutoRecoveryDisabled);
        }
        if let Some(last) = state.last_recovery_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < self.config.min_cooldown_ms {
                return Some(RecoveryBlock::CoolingDown {
                    remaining_ms: self.config.min_cooldown_ms - elapsed,
                });
            }
        }
        if !(state.energy_deviation <= self.config.recovery_threshold) {
            return Some(RecoveryBlock::DeviationTooHigh);
        }
        None
    }

    /// Try to clear all latched state. Returns `false` when a gate refuses.
    pub fn attempt_recovery(
        &mut self,
        state: &mut SystemState,
        barriers: &mut EnergyBarrierManager,
        breakers: &mut CircuitBreakerRegistry,
        now_ms: u64,
        sink: &dyn RiskEventSink,
    ) -> bool {
        if let Some(block) = self.blocked_by(state, now_ms) {
            tracing::debug!(
                reason = %block,
                deviation = %format!("{:.4}", state.energy_deviation),
                "Recovery refused"
            );
            return false;
        }
        let outcome = self.clear(state, barriers, breakers, now_ms);
        tracing::info!(
            barriers_restored = outcome.barriers_restored,
            breakers_reset = outcome.breakers_reset,
            recovery_attempts = state.recovery_attempts,
            "System recovered"
        );
        sink.emit_at(
            RiskEvent::SystemRecovery {
                barriers_restored: outcome.barriers_restored,
                breakers_reset: outcome.breakers_reset,
                operator: false,
            },
            now_ms,
        );
        true
    }

    /// Operator override: clears everything regardless of gates.
    pub fn operator_reset(
        &mut self,
        state: &mut SystemState,
        barriers: &mut EnergyBarrierManager,
        breakers: &mut CircuitBreakerRegistry,
        now_ms: u64,
        sink: &dyn RiskEventSink,
    ) -> RecoveryOutcome {
        let outcome = self.clear(state, barriers, breakers, now_ms);
        tracing::warn!(
            barriers_restored = outcome.barriers_restored,
            breakers_reset = outcome.breakers_reset,
            "Operator reset of risk state"
        );
        sink.emit_at(
            RiskEvent::SystemRecovery {
                barriers_restored: outcome.barriers_restored,
                breakers_reset: outcome.breakers_reset,
                operator: true,
            },
            now_ms,
        );
        outcome
    }

    /// Raise one operator alert when the system has been restricted for longer
    /// than `max_cooldown`. Returns true if the alert was dispatched now.
    pub fn check_timeout(
        &mut self,
        state: &SystemState,
        now_ms: u64,
        sink: &dyn RiskEventSink,
    ) -> bool {
        if self.timeout_alerted || !state.is_restricted() {
            return false;
        }
        let Some(since) = state.restricted_since_ms else {
            return false;
        };
        let elapsed = now_ms.saturating_sub(since);
        if elapsed < self.config.max_cooldown_ms {
            return false;
        }

        self.timeout_alerted = true;
        tracing::error!(
            elapsed_ms = elapsed,
            max_cooldown_ms = self.config.max_cooldown_ms,
            halted = state.system_halted,
            "Recovery window exceeded, operator intervention required"
        );
        sink.dispatch_at(
            RiskAction::alert(format!(
                "risk state restricted for {}s without recovery; operator intervention required",
                elapsed / 1_000
            )),
            ActionOrigin::RecoveryTimeout,
            now_ms,
        );
        true
    }

    fn clear(
        &mut self,
        state: &mut SystemState,
        barriers: &mut EnergyBarrierManager,
        breakers: &mut CircuitBreakerRegistry,
        now_ms: u64,
    ) -> RecoveryOutcome {
        let outcome = RecoveryOutcome {
            barriers_restored: barriers.restore_all(),
            breakers_reset: breakers.reset_all(),
        };
        state.emergency_mode = false;
        state.system_halted = false;
        state.restricted_since_ms = None;
        state.recovery_attempts += 1;
        state.last_recovery_ms = Some(now_ms);
        self.timeout_alerted = false;
        outcome
    }
}
