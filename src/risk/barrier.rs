//! Energy barriers - thresholds on the deviation of the risk energy from ground.
//!
//! A barrier breaches when `|E - ground| > height` and restores only once the
//! deviation falls below `height * 0.9`. The band in between absorbs noise:
//! a signal hovering just under the barrier after a breach stays breached.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{ensure_finite, Error, Result};
use crate::events::{RiskAction, RiskEvent, RiskEventSink};

/// Fraction of the barrier height the deviation must fall below to restore.
pub const RESTORE_RATIO: f64 = 0.9;

/// Stable arena index of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BarrierId(pub usize);

impl std::fmt::Display for BarrierId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "barrier#{}", self.0)
    }
}

/// Role of a barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierKind {
    /// Early notice, usually bound to an alert.
    Warning,
    /// Main position-reducing barrier.
    Protective,
    /// Last line; bound to a stop.
    Critical,
}

impl std::fmt::Display for BarrierKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BarrierKind::Warning => write!(f, "warning"),
            BarrierKind::Protective => write!(f, "protective"),
            BarrierKind::Critical => write!(f, "critical"),
        }
    }
}

/// A registered barrier. Only `active`, `breached`, `breach_count` and
/// `last_breach_ms` change after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Barrier {
    pub id: BarrierId,
    pub name: String,
    pub height: f64,
    pub kind: BarrierKind,
    pub action: RiskAction,
    pub active: bool,
    pub breached: bool,
    pub breach_count: u64,
    pub last_breach_ms: Option<u64>,
    pub width: f64,
    pub penetration_resistance: f64,
}

impl Barrier {
    /// Deviation below which a breached barrier restores.
    pub fn restore_level(&self) -> f64 {
        self.height * RESTORE_RATIO
    }

    /// Active, not breached, and within the approach band below the barrier.
    pub fn is_approached(&self, deviation: f64, safety_margin: f64) -> bool {
        self.active
            && !self.breached
            && deviation > self.height * (1.0 - safety_margin)
            && deviation <= self.height
    }
}

/// A breach detected on the current tick.
#[derive(Debug, Clone, PartialEq)]
pub struct BarrierBreach {
    pub id: BarrierId,
    pub deviation: f64,
    pub action: RiskAction,
}

/// Registry of barriers with breach/restore hysteresis.
#[derive(Debug, Clone)]
pub struct EnergyBarrierManager {
    barriers: Vec<Barrier>,
    by_name: HashMap<String, BarrierId>,
    ground_energy: f64,
    default_width: f64,
    default_resistance: f64,
}

impl EnergyBarrierManager {
    /// Create an empty registry measuring deviation from `ground_energy`.
    pub fn new(ground_energy: f64, default_width: f64, default_resistance: f64) -> Self {
        Self {
            barriers: Vec::new(),
            by_name: HashMap::new(),
            ground_energy,
            default_width,
            default_resistance,
        }
    }

    /// Register a barrier.
    ///
    /// Fails with a configuration error on a non-positive or non-finite
    /// height, and on a duplicate name.
    pub fn create_barrier(
        &mut self,
        name: impl Into<String>,
        height: f64,
        kind: BarrierKind,
        action: RiskAction,
    ) -> Result<BarrierId> {
        let name = name.into();
        if !(height > 0.0) || !height.is_finite() {
            return Err(Error::Configuration(format!(
                "barrier '{name}' height must be > 0.0, got {height}"
            )));
        }
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateBarrier(name));
        }

        let id = BarrierId(self.barriers.len());
        tracing::debug!(
            barrier = %name,
            %id,
            height = %format!("{:.4}", height),
            %kind,
            %action,
            "Barrier registered"
        );
        self.by_name.insert(name.clone(), id);
        self.barriers.push(Barrier {
            id,
            name,
            height,
            kind,
            action,
            active: true,
            breached: false,
            breach_count: 0,
            last_breach_ms: None,
            width: self.default_width,
            penetration_resistance: self.default_resistance,
        });
        Ok(id)
    }

    pub fn ground_energy(&self) -> f64 {
        self.ground_energy
    }

    /// `|energy - ground|`.
    pub fn deviation(&self, energy: f64) -> f64 {
        (energy - self.ground_energy).abs()
    }

    pub fn get(&self, id: BarrierId) -> Option<&Barrier> {
        self.barriers.get(id.0)
    }

    pub fn id_of(&self, name: &str) -> Option<BarrierId> {
        self.by_name.get(name).copied()
    }

    /// Barriers in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Barrier> {
        self.barriers.iter()
    }

    pub fn len(&self) -> usize {
        self.barriers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.barriers.is_empty()
    }

    pub fn breached_count(&self) -> usize {
        self.barriers.iter().filter(|b| b.breached).count()
    }

    pub fn set_active(&mut self, id: BarrierId, active: bool) -> Result<()> {
        let barrier = self
            .barriers
            .get_mut(id.0)
            .ok_or(Error::UnknownBarrier(id))?;
        barrier.active = active;
        tracing::info!(barrier = %barrier.name, active, "Barrier activation changed");
        Ok(())
    }

    /// Evaluate all active barriers against the current energy.
    ///
    /// Emits `barrier_breached` / `barrier_restored` only on state changes and
    /// returns the barriers that breached on this call, in registration order.
    pub fn check_barriers(
        &mut self,
        current_energy: f64,
        now_ms: u64,
        sink: &dyn RiskEventSink,
    ) -> Result<Vec<BarrierBreach>> {
        let current_energy = ensure_finite("barrier check energy", current_energy)?;
        let deviation = self.deviation(current_energy);
        let mut breaches = Vec::new();

        for barrier in self.barriers.iter_mut().filter(|b| b.active) {
            if !barrier.breached && deviation > barrier.height {
                barrier.breached = true;
                barrier.breach_count += 1;
                barrier.last_breach_ms = Some(now_ms);

                tracing::warn!(
                    barrier = %barrier.name,
                    kind = %barrier.kind,
                    deviation = %format!("{:.4}", deviation),
                    height = %format!("{:.4}", barrier.height),
                    action = %barrier.action,
                    breach_count = barrier.breach_count,
                    "Barrier breached"
                );
                sink.emit_at(
                    RiskEvent::BarrierBreached {
                        barrier_id: barrier.id,
                        name: barrier.name.clone(),
                        deviation,
                        action: barrier.action.clone(),
                    },
                    now_ms,
                );
                breaches.push(BarrierBreach {
                    id: barrier.id,
                    deviation,
                    action: barrier.action.clone(),
                });
            } else if barrier.breached && deviation < barrier.restore_level() {
                barrier.breached = false;

                tracing::info!(
                    barrier = %barrier.name,
                    deviation = %format!("{:.4}", deviation),
                    restore_level = %format!("{:.4}", barrier.restore_level()),
                    "Barrier restored"
                );
                sink.emit_at(
                    RiskEvent::BarrierRestored {
                        barrier_id: barrier.id,
                        name: barrier.name.clone(),
                    },
                    now_ms,
                );
            }
        }

        Ok(breaches)
    }

    /// Barriers in the approach band for this deviation.
    pub fn approached(&self, deviation: f64, safety_margin: f64) -> Vec<&Barrier> {
        self.barriers
            .iter()
            .filter(|b| b.is_approached(deviation, safety_margin))
            .collect()
    }

    /// Clear every breach flag. Returns how many were cleared.
    pub(crate) fn restore_all(&mut self) -> usize {
        let mut restored = 0;
        for barrier in self.barriers.iter_mut().filter(|b| b.breached) {
            barrier.breached = false;
            restored += 1;
        }
        restored
    }
}
