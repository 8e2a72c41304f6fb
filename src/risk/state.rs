//! Live system state of the risk core.

use serde::{Deserialize, Serialize};

/// Snapshot-able risk state. Written only by the monitoring loop and the
/// recovery controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemState {
    pub current_energy: f64,
    pub ground_energy: f64,
    /// Gap between the ground and first excited eigenvalue (0 if unknown).
    pub energy_gap: f64,
    /// `|current_energy - ground_energy|`
    pub energy_deviation: f64,
    pub emergency_mode: bool,
    pub system_halted: bool,
    pub recovery_attempts: u64,
    pub last_recovery_ms: Option<u64>,
    /// When emergency/halt was entered, for the operator timeout.
    pub restricted_since_ms: Option<u64>,
}

impl SystemState {
    pub fn new(ground_energy: f64, energy_gap: f64) -> Self {
        Self {
            current_energy: ground_energy,
            ground_energy,
            energy_gap,
            energy_deviation: 0.0,
            emergency_mode: false,
            system_halted: false,
            recovery_attempts: 0,
            last_recovery_ms: None,
            restricted_since_ms: None,
        }
    }

    /// Record a new energy reading. Caller guarantees it is finite.
    pub(crate) fn observe_energy(&mut self, energy: f64) {
        self.current_energy = energy;
        self.energy_deviation = (energy - self.ground_energy).abs();
    }

    pub(crate) fn enter_emergency(&mut self, now_ms: u64) {
        if !self.is_restricted() {
            self.restricted_since_ms = Some(now_ms);
        }
        self.emergency_mode = true;
    }

    pub(crate) fn enter_halt(&mut self, now_ms: u64) {
        self.enter_emergency(now_ms);
        self.system_halted = true;
    }

    /// In emergency mode or halted.
    pub fn is_restricted(&self) -> bool {
        self.emergency_mode || self.system_halted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_energy_tracks_deviation() {
        let mut state = SystemState::new(0.12, 0.0);
        state.observe_energy(0.30);
        assert!((state.energy_deviation - 0.18).abs() < 1e-12);
        state.observe_energy(0.0);
        assert!((state.energy_deviation - 0.12).abs() < 1e-12);
    }

    #[test]
    fn test_restriction_timestamps_first_entry() {
        let mut state = SystemState::new(0.0, 0.0);
        state.enter_emergency(100);
        state.enter_halt(200);
        assert!(state.emergency_mode && state.system_halted);
        assert_eq!(state.restricted_since_ms, Some(100));
    }
}
