//! Configuration for the risk-control core.
//!
//! All sections deserialize from TOML with per-field defaults, so an empty
//! file yields [`RiskControlConfig::default`].
//!
//! ```toml
//! [barriers]
//! default_barrier_height = 0.16
//!
//! [[circuit_breakers.levels]]
//! threshold = 0.05
//! action = { type = "REDUCE_POSITIONS", percentage = 10.0 }
//! ```

mod sections;

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use crate::infra::logging::LogConfig;
use crate::risk::RESTORE_RATIO;

pub use sections::{
    BarrierConfig, BreakerLevelConfig, CircuitBreakerConfig, MonitoringConfig, RecoveryConfig,
    TunnelingConfig, ValidationConfig,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RiskControlConfig {
    #[serde(default)]
    pub barriers: BarrierConfig,
    #[serde(default)]
    pub tunneling: TunnelingConfig,
    #[serde(default)]
    pub circuit_breakers: CircuitBreakerConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

impl RiskControlConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigIo(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Render as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Validate every section. Fails on the first violation.
    pub fn validate(&self) -> Result<()> {
        self.barriers.validate()?;
        self.tunneling.validate()?;
        self.circuit_breakers.validate()?;
        self.monitoring.validate()?;
        self.recovery.validate()?;
        self.validation.validate()?;
        let b = &self.barriers;
        check_recovery_threshold(
            self.recovery.recovery_threshold,
            self.circuit_breakers.levels.iter().map(|l| l.threshold),
            [
                b.warning_height(),
                b.default_barrier_height,
                b.critical_barrier_height,
            ],
        )
    }
}

/// Recovery must not clear a latch in the tick that set it.
///
/// Breakers trip strictly above their threshold, so the recovery threshold may
/// equal the lowest one. It must stay strictly below every barrier's restore
/// level (`height * RESTORE_RATIO`).
pub(crate) fn check_recovery_threshold(
    recovery_threshold: f64,
    breaker_thresholds: impl IntoIterator<Item = f64>,
    barrier_heights: impl IntoIterator<Item = f64>,
) -> Result<()> {
    if let Some(lowest) = breaker_thresholds.into_iter().reduce(f64::min) {
        if recovery_threshold > lowest {
            return Err(Error::Configuration(format!(
                "recovery_threshold ({recovery_threshold}) must be <= lowest breaker threshold ({lowest})"
            )));
        }
    }
    if let Some(restore) = barrier_heights
        .into_iter()
        .map(|h| h * RESTORE_RATIO)
        .reduce(f64::min)
    {
        if recovery_threshold >= restore {
            return Err(Error::Configuration(format!(
                "recovery_threshold ({recovery_threshold}) must be < lowest barrier restore level ({restore})"
            )));
        }
    }
    Ok(())
}

/// Limits that may be changed while the monitoring loop runs.
///
/// `None` leaves the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LimitUpdate {
    pub alert_threshold: Option<f64>,
    pub recovery_threshold: Option<f64>,
    pub min_cooldown_ms: Option<u64>,
    pub max_cooldown_ms: Option<u64>,
    pub auto_recovery: Option<bool>,
}

impl LimitUpdate {
    /// Apply onto copies of the live sections; the originals are untouched on error.
    pub fn apply(
        &self,
        monitoring: &MonitoringConfig,
        recovery: &RecoveryConfig,
    ) -> Result<(MonitoringConfig, RecoveryConfig)> {
        let mut monitoring = monitoring.clone();
        let mut recovery = recovery.clone();
        if let Some(v) = self.alert_threshold {
            monitoring.alert_threshold = v;
        }
        if let Some(v) = self.recovery_threshold {
            recovery.recovery_threshold = v;
        }
        if let Some(v) = self.min_cooldown_ms {
            recovery.min_cooldown_ms = v;
        }
        if let Some(v) = self.max_cooldown_ms {
            recovery.max_cooldown_ms = v;
        }
        if let Some(v) = self.auto_recovery {
            recovery.auto_recovery = v;
        }
        monitoring.validate()?;
        recovery.validate()?;
        Ok((monitoring, recovery))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RiskAction;

    #[test]
    fn test_empty_toml_is_default() {
        let cfg = RiskControlConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, RiskControlConfig::default());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let cfg = RiskControlConfig::from_toml_str(
            r#"
            [barriers]
            default_barrier_height = 0.16

            [recovery]
            auto_recovery = false

            [[circuit_breakers.levels]]
            threshold = 0.1
            action = { type = "REDUCE_POSITIONS", percentage = 20.0 }

            [[circuit_breakers.levels]]
            threshold = 0.2
            action = { type = "COMPLETE_HALT" }
            "#,
        )
        .unwrap();

        assert_eq!(cfg.barriers.default_barrier_height, 0.16);
        assert_eq!(cfg.barriers.critical_barrier_height, 0.30);
        assert!(!cfg.recovery.auto_recovery);
        assert_eq!(cfg.circuit_breakers.levels.len(), 2);
        assert_eq!(cfg.circuit_breakers.levels[1].action, RiskAction::CompleteHalt);
    }

    #[test]
    fn test_invalid_toml_fails_validation() {
        let err = RiskControlConfig::from_toml_str(
            r#"
            [[circuit_breakers.levels]]
            threshold = 0.2
            action = { type = "EMERGENCY_STOP" }

            [[circuit_breakers.levels]]
            threshold = 0.1
            action = { type = "COMPLETE_HALT" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = RiskControlConfig::from_toml_str("[barriers\n").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_toml_round_trip_of_defaults() {
        let cfg = RiskControlConfig::default();
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(RiskControlConfig::from_toml_str(&text).unwrap(), cfg);
    }

    #[test]
    fn test_limit_update_validates() {
        let monitoring = MonitoringConfig::default();
        let recovery = RecoveryConfig::default();

        let update = LimitUpdate {
            alert_threshold: Some(0.1),
            auto_recovery: Some(false),
            ..Default::default()
        };
        let (m, r) = update.apply(&monitoring, &recovery).unwrap();
        assert_eq!(m.alert_threshold, 0.1);
        assert!(!r.auto_recovery);

        let bad = LimitUpdate {
            min_cooldown_ms: Some(1_000_000),
            ..Default::default()
        };
        assert!(bad.apply(&monitoring, &recovery).is_err());
    }

    #[test]
    fn test_recovery_threshold_bounded_by_breakers_and_barriers() {
        // equal to the lowest breaker threshold is allowed: trips are strict
        assert_eq!(RiskControlConfig::default().recovery.recovery_threshold, 0.05);
        RiskControlConfig::default().validate().unwrap();

        let mut above_breakers = RiskControlConfig::default();
        above_breakers.recovery.recovery_threshold = 0.3;
        above_breakers.recovery.min_cooldown_ms = 0;
        assert!(matches!(
            above_breakers.validate(),
            Err(Error::Configuration(_))
        ));

        // breakers out of the way; warning barrier 0.08 restores below 0.072
        let err = RiskControlConfig::from_toml_str(
            r#"
            [barriers]
            default_barrier_height = 0.10

            [recovery]
            recovery_threshold = 0.075

            [[circuit_breakers.levels]]
            threshold = 0.2
            action = { type = "COMPLETE_HALT" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Configuration(msg) if msg.contains("restore level")));
    }
}
