use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Relative comparison with an absolute floor, for energies of arbitrary scale.
pub(crate) fn approx_eq(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs()).max(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_approx_eq() {
        assert!(approx_eq(0.12, 0.12 + 1e-9, 1e-6));
        assert!(!approx_eq(0.12, 0.13, 1e-6));
        assert!(approx_eq(1_000.0, 1_000.0005, 1e-6));
    }

    #[test]
    fn test_now_ms_is_monotone_enough() {
        let a = now_ms();
        let b = now_ms();
        assert!(b >= a);
        assert!(a > 1_600_000_000_000);
    }
}
