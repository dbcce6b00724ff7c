//! Flap detector: classifies connection stability from recent session
//! durations. Pure, synchronous, and trivially unit-testable in isolation —
//! no connection state needed.

use std::collections::VecDeque;

/// `durations` in milliseconds. Returns `true` iff the length is a positive
/// multiple of 3 and the population standard deviation of all durations is
/// under 1000ms — the signature of a relay that accepts and immediately
/// drops the connection.
pub fn is_flapping(durations: &VecDeque<u64>) -> bool {
    let len = durations.len();
    if len == 0 || len % 3 != 0 {
        return false;
    }

    let values: Vec<f64> = durations.iter().map(|&d| d as f64).collect();
    let mean = values.iter().sum::<f64>() / len as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / len as f64;
    let stddev = variance.sqrt();

    stddev < 1000.0
}
