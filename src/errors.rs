use thiserror::Error;

use crate::risk::{BarrierId, BreakerLevel};

/// Main error type for the risk-control core.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Invalid configuration (non-positive barrier height, unordered breaker ladder, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The risk engine does not provide a capability the caller needs
    #[error("Risk engine unavailable: missing capability `{capability}`")]
    EngineUnavailable { capability: &'static str },

    /// NaN or infinite value observed in an energy or eigenvalue
    #[error("Numeric instability in {context}: {value}")]
    NumericInstability { context: String, value: f64 },

    /// Barrier id not present in the registry
    #[error("Unknown barrier: {0}")]
    UnknownBarrier(BarrierId),

    /// Barrier name registered twice
    #[error("Barrier already registered: {0}")]
    DuplicateBarrier(String),

    /// Circuit breaker level not present in the ladder
    #[error("Unknown circuit breaker level: {0}")]
    UnknownBreaker(BreakerLevel),

    /// Config file could not be read or written
    #[error("Config IO error: {0}")]
    ConfigIo(String),

    /// Config file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    /// The monitoring loop is no longer running
    #[error("Monitoring loop stopped")]
    MonitorStopped,
}

impl Error {
    /// Build a numeric-instability error for a non-finite value.
    pub fn numeric(context: impl Into<String>, value: f64) -> Self {
        Error::NumericInstability {
            context: context.into(),
            value,
        }
    }
}

/// Reject NaN/Inf values before they reach any comparison.
pub fn ensure_finite(context: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(Error::numeric(context, value))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_finite() {
        assert_eq!(ensure_finite("energy", 0.12), Ok(0.12));
        assert!(matches!(
            ensure_finite("energy", f64::NAN),
            Err(Error::NumericInstability { .. })
        ));
        assert!(ensure_finite("energy", f64::INFINITY).is_err());
    }

    #[test]
    fn test_error_display() {
        let err = Error::EngineUnavailable {
            capability: "diagonalize_hamiltonian",
        };
        assert_eq!(
            err.to_string(),
            "Risk engine unavailable: missing capability `diagonalize_hamiltonian`"
        );
    }
}
