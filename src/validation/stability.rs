//! Normal-mode stability of the Hamiltonian spectrum.
//!
//! Each eigenvalue is treated as the stiffness of a damped oscillator:
//! `omega = sqrt(max(lambda, 0))`, `zeta = c / (2 omega)`. A mode is stable
//! when `lambda > 0` (and therefore `omega > 0`).

use super::result::{NormalMode, StabilityReport};

pub(crate) fn analyze_stability(eigenvalues: &[f64], damping_coefficient: f64) -> StabilityReport {
    let modes: Vec<NormalMode> = eigenvalues
        .iter()
        .enumerate()
        .map(|(index, &eigenvalue)| {
            let frequency = eigenvalue.max(0.0).sqrt();
            let stable = eigenvalue > 0.0 && frequency > 0.0;
            let damping_ratio =
                (frequency > 0.0).then(|| damping_coefficient / (2.0 * frequency));
            NormalMode {
                index,
                eigenvalue,
                frequency,
                damping_ratio,
                stable,
            }
        })
        .collect();

    let unstable_modes: Vec<usize> = modes.iter().filter(|m| !m.stable).map(|m| m.index).collect();
    for mode in modes.iter().filter(|m| !m.stable) {
        tracing::warn!(
            mode = mode.index,
            eigenvalue = %format!("{:.6}", mode.eigenvalue),
            "Unstable normal mode"
        );
    }

    let (stability_index, success_rate) = if modes.is_empty() {
        (0.0, 0.0)
    } else {
        let n = modes.len() as f64;
        let index = modes
            .iter()
            .map(|m| match m.damping_ratio {
                Some(zeta) if m.stable => 1.0 / (1.0 + zeta),
                _ => 0.0,
            })
            .sum::<f64>()
            / n;
        let stable = (modes.len() - unstable_modes.len()) as f64;
        (index, stable / n)
    };

    StabilityReport {
        passed: !modes.is_empty() && unstable_modes.is_empty(),
        modes,
        unstable_modes,
        stability_index,
        success_rate,
    }
}
