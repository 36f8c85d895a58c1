// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
// MACD line   = EMA(fast) - EMA(slow)
// Signal line = EMA(signal_period) of the MACD line
// Histogram   = MACD line - Signal line
//
// Default periods: fast=12, slow=26, signal=9.
// =============================================================================

use super::ema::calculate_ema;

/// MACD line, signal line, and histogram at the most recent bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdValue {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Compute the most recent MACD value for the given closes.
///
/// Returns `None` when there is insufficient data for either EMA or for the
/// signal line (which itself needs `signal_period` MACD values), or when any
/// intermediate value is non-finite.
pub fn calculate_macd(
    closes: &[f64],
    fast_period: usize,
    slow_period: usize,
    signal_period: usize,
) -> Option<MacdValue> {
    if fast_period == 0 || slow_period == 0 || signal_period == 0 || fast_period >= slow_period {
        return None;
    }

    let fast = calculate_ema(closes, fast_period);
    let slow = calculate_ema(closes, slow_period);

    if fast.is_empty() || slow.is_empty() {
        return None;
    }

    // Align the two EMA series on their tail: `fast` starts `slow_period -
    // fast_period` bars earlier than `slow`, since it was seeded sooner.
    let offset = slow_period - fast_period;
    if fast.len() <= offset {
        return None;
    }
    let macd_line: Vec<f64> = fast[offset..]
        .iter()
        .zip(slow.iter())
        .map(|(f, s)| f - s)
        .collect();

    if macd_line.len() < signal_period {
        return None;
    }

    let signal_series = calculate_ema(&macd_line, signal_period);
    let signal = *signal_series.last()?;
    let line = *macd_line.last()?;
    let histogram = line - signal;

    if !line.is_finite() || !signal.is_finite() || !histogram.is_finite() {
        return None;
    }

    Some(MacdValue {
        line,
        signal,
        histogram,
    })
}

/// Convenience wrapper using the canonical (12, 26, 9) parameters.
pub fn calculate(closes: &[f64]) -> Option<MacdValue> {
    calculate_macd(closes, 12, 26, 9)
}
