//! Small numeric helpers for KPI reporting

/// Round `value` to `decimals` decimal places (half away from zero).
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Majority vote: true when strictly more than half (integer division) are set.
///
/// Ties on an even count resolve to `false`, so `[true, false]` is not loaded.
pub fn majority(flags: &[bool]) -> bool {
    let set = flags.iter().filter(|f| **f).count();
    set > flags.len() / 2
}

/// Arithmetic mean of signed register values. Returns 0.0 for an empty slice.
pub fn mean_i16(values: &[i16]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().map(|v| f64::from(*v)).sum::<f64>() / values.len() as f64
}

/// Largest magnitude in the slice, widened so `i16::MIN` does not overflow.
pub fn peak_abs(values: &[i16]) -> i32 {
    values.iter().map(|v| i32::from(*v).abs()).max().unwrap_or(0)
}
