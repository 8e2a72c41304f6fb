//! Risk events and risk actions.
//!
//! Everything the core tells the outside world flows through these two types:
//! - [`RiskEvent`]: state transitions (breach, restore, trigger, recovery, ...)
//! - [`RiskAction`]: instructions for the external risk-action dispatcher

use serde::{Deserialize, Serialize};

use crate::risk::{BarrierId, BreakerLevel};
use crate::validation::QualityRating;

/// Instruction emitted to the external dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskAction {
    /// Reduce all open positions by the given percentage (0-100).
    ReducePositions { percentage: f64 },
    /// Stop opening new risk, cancel resting orders.
    EmergencyStop,
    /// Stop everything. Terminal until recovery or operator reset.
    CompleteHalt,
    /// Notify an operator.
    Alert { message: String },
}

impl RiskAction {
    /// Returns the severity level (higher = more severe).
    pub fn severity(&self) -> u8 {
        match self {
            RiskAction::Alert { .. } => 0,
            RiskAction::ReducePositions { .. } => 1,
            RiskAction::EmergencyStop => 2,
            RiskAction::CompleteHalt => 3,
        }
    }

    /// Returns true if this action is more severe than another.
    ///
    /// Reductions compare by percentage.
    pub fn is_more_severe_than(&self, other: &RiskAction) -> bool {
        match (self, other) {
            (
                RiskAction::ReducePositions { percentage: a },
                RiskAction::ReducePositions { percentage: b },
            ) => a > b,
            _ => self.severity() > other.severity(),
        }
    }

    /// Emergency stop or complete halt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RiskAction::EmergencyStop | RiskAction::CompleteHalt)
    }

    pub fn alert(message: impl Into<String>) -> Self {
        RiskAction::Alert {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RiskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskAction::ReducePositions { percentage } => {
                write!(f, "REDUCE_POSITIONS({:.0}%)", percentage)
            }
            RiskAction::EmergencyStop => write!(f, "EMERGENCY_STOP"),
            RiskAction::CompleteHalt => write!(f, "COMPLETE_HALT"),
            RiskAction::Alert { message } => write!(f, "ALERT({})", message),
        }
    }
}

/// Where a dispatched action originated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOrigin {
    Barrier(BarrierId),
    CircuitBreaker(BreakerLevel),
    AlertThreshold,
    RecoveryTimeout,
}

/// State transition observed by the risk core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RiskEvent {
    BarrierBreached {
        barrier_id: BarrierId,
        name: String,
        deviation: f64,
        action: RiskAction,
    },
    BarrierRestored {
        barrier_id: BarrierId,
        name: String,
    },
    CircuitBreakerTriggered {
        level: BreakerLevel,
        threshold: f64,
        action: RiskAction,
    },
    QuantumTunnelingSuccess {
        barrier_id: BarrierId,
        energy: f64,
        barrier_height: f64,
        probability: f64,
        random_value: f64,
    },
    SystemRecovery {
        barriers_restored: usize,
        breakers_reset: usize,
        operator: bool,
    },
    ValidationCompleted {
        principle_validated: bool,
        overall_success_rate: f64,
        quality: QualityRating,
    },
    /// A risk action handed to the dispatcher.
    ActionDispatched {
        action: RiskAction,
        origin: ActionOrigin,
    },
}

impl RiskEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            RiskEvent::BarrierBreached { .. } => "barrier_breached",
            RiskEvent::BarrierRestored { .. } => "barrier_restored",
            RiskEvent::CircuitBreakerTriggered { .. } => "circuit_breaker_triggered",
            RiskEvent::QuantumTunnelingSuccess { .. } => "quantum_tunneling_success",
            RiskEvent::SystemRecovery { .. } => "system_recovery",
            RiskEvent::ValidationCompleted { .. } => "validation_completed",
            RiskEvent::ActionDispatched { .. } => "action_dispatched",
        }
    }

    /// The dispatched action, if this event carries one for execution.
    pub fn dispatched_action(&self) -> Option<&RiskAction> {
        match self {
            RiskEvent::ActionDispatched { action, .. } => Some(action),
            _ => None,
        }
    }
}
