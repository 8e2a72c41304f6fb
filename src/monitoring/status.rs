//! Status snapshots published by the monitoring loop.

use serde::{Deserialize, Serialize};

use crate::risk::{Barrier, CircuitBreaker, RiskController, SystemState, TunnelingStats};

/// Loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Initializing,
    Active,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Critical,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl HealthStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            HealthStatus::Excellent
        } else if score >= 60.0 {
            HealthStatus::Good
        } else if score >= 40.0 {
            HealthStatus::Fair
        } else if score >= 20.0 {
            HealthStatus::Poor
        } else {
            HealthStatus::Critical
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Excellent => "EXCELLENT",
            HealthStatus::Good => "GOOD",
            HealthStatus::Fair => "FAIR",
            HealthStatus::Poor => "POOR",
            HealthStatus::Critical => "CRITICAL",
        };
        write!(f, "{s}")
    }
}

/// Score-based health in `[0, 100]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemHealth {
    pub score: f64,
    pub status: HealthStatus,
}

impl SystemHealth {
    const EMERGENCY_PENALTY: f64 = 30.0;
    const HALT_PENALTY: f64 = 30.0;
    const BREACH_PENALTY: f64 = 10.0;
    const BREAKER_PENALTY: f64 = 5.0;
    const ALERT_PENALTY: f64 = 20.0;

    /// Start at 100 and subtract per restriction, breach, latched breaker and
    /// a deviation above the alert threshold.
    pub fn assess(controller: &RiskController) -> Self {
        let state = controller.state();
        let mut score = 100.0;
        if state.emergency_mode {
            score -= Self::EMERGENCY_PENALTY;
        }
        if state.system_halted {
            score -= Self::HALT_PENALTY;
        }
        score -= Self::BREACH_PENALTY * controller.barriers().breached_count() as f64;
        score -= Self::BREAKER_PENALTY * controller.breakers().triggered_levels().len() as f64;
        if state.energy_deviation > controller.monitoring_config().alert_threshold {
            score -= Self::ALERT_PENALTY;
        }
        let score = f64::max(score, 0.0);
        Self {
            score,
            status: HealthStatus::from_score(score),
        }
    }
}

/// Everything an operator dashboard needs, in one serializable value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub lifecycle: Lifecycle,
    pub timestamp_ms: u64,
    pub ticks: u64,
    /// Ticks dropped because the energy reading was unusable.
    pub rejected_ticks: u64,
    pub state: SystemState,
    pub barriers: Vec<Barrier>,
    pub breakers: Vec<CircuitBreaker>,
    pub tunneling: TunnelingStats,
    pub health: SystemHealth,
    pub last_error: Option<String>,
}

impl StatusSnapshot {
    pub(crate) fn capture(
        controller: &RiskController,
        lifecycle: Lifecycle,
        timestamp_ms: u64,
        ticks: u64,
        rejected_ticks: u64,
        last_error: Option<String>,
    ) -> Self {
        Self {
            lifecycle,
            timestamp_ms,
            ticks,
            rejected_ticks,
            state: controller.state().clone(),
            barriers: controller.barriers().iter().cloned().collect(),
            breakers: controller.breakers().iter().cloned().collect(),
            tunneling: controller.tunneling().stats(),
            health: SystemHealth::assess(controller),
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::RiskControlConfig;
    use crate::events::NullSink;

    fn controller() -> RiskController {
        let mut config = RiskControlConfig::default();
        config.tunneling.enable_quantum_tunneling = false;
        RiskController::new(&config, 0.0, 0.0, Arc::new(NullSink)).unwrap()
    }

    #[test]
    fn test_score_thresholds() {
        assert_eq!(HealthStatus::from_score(100.0), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(80.0), HealthStatus::Excellent);
        assert_eq!(HealthStatus::from_score(79.9), HealthStatus::Good);
        assert_eq!(HealthStatus::from_score(40.0), HealthStatus::Fair);
        assert_eq!(HealthStatus::from_score(20.0), HealthStatus::Poor);
        assert_eq!(HealthStatus::from_score(0.0), HealthStatus::Critical);
    }

    #[test]
    fn test_quiet_system_is_excellent() {
        let ctl = controller();
        let health = SystemHealth::assess(&ctl);
        assert_eq!(health.score, 100.0);
        assert_eq!(health.status, HealthStatus::Excellent);
    }

    #[test]
    fn test_halted_system_is_critical() {
        let mut ctl = controller();
        ctl.tick(0.4, 0).unwrap();
        let health = SystemHealth::assess(&ctl);
        assert_eq!(health.score, 0.0);
        assert_eq!(health.status, HealthStatus::Critical);
    }

    #[test]
    fn test_mild_stress_scores() {
        let mut ctl = controller();
        // L1 breaker only: 100 - 5
        ctl.tick(0.06, 0).unwrap();
        assert_eq!(SystemHealth::assess(&ctl).score, 95.0);
        // L1 + L2, warning barrier, above alert: 100 - 10 - 10 - 20
        ctl.tick(0.125, 0).unwrap();
        let health = SystemHealth::assess(&ctl);
        assert_eq!(health.score, 60.0);
        assert_eq!(health.status, HealthStatus::Good);
    }

    #[test]
    fn test_snapshot_serializes() {
        let ctl = controller();
        let snap = StatusSnapshot::capture(&ctl, Lifecycle::Active, 1, 0, 0, None);
        assert_eq!(snap.barriers.len(), 3);
        assert_eq!(snap.breakers.len(), 5);
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["lifecycle"], "active");
        assert_eq!(json["health"]["status"], "EXCELLENT");
    }
}
