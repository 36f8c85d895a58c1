// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
// %K = (close - lowestLow) / (highestHigh - lowestLow) * 100, over `k_period`
// %D = SMA of the last `d_period` %K values.
//
// Readings above 80 are considered overbought, below 20 oversold.

use crate::domain::Bar;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StochasticValue {
    pub k: f64,
    pub d: f64,
}

/// Compute the most recent %K/%D pair.
///
/// Requires at least `k_period + d_period - 1` bars so a full `%K` series can
/// be smoothed into `%D`.
pub fn calculate_stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> Option<StochasticValue> {
    if k_period == 0 || d_period == 0 {
        return None;
    }
    let needed = k_period + d_period - 1;
    if bars.len() < needed {
        return None;
    }

    let mut k_values = Vec::with_capacity(d_period);
    for offset in (0..d_period).rev() {
        let end = bars.len() - offset;
        let window = &bars[end - k_period..end];
        let highest = window.iter().fold(f64::MIN, |acc, b| acc.max(b.high));
        let lowest = window.iter().fold(f64::MAX, |acc, b| acc.min(b.low));
        let close = window.last()?.close;
        let range = highest - lowest;
        let k = if range == 0.0 {
            50.0
        } else {
            (close - lowest) / range * 100.0
        };
        if !k.is_finite() {
            return None;
        }
        k_values.push(k);
    }

    let d = k_values.iter().sum::<f64>() / k_values.len() as f64;
    let k = *k_values.last()?;

    if k.is_finite() && d.is_finite() {
        Some(StochasticValue { k, d })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(high: f64, low: f64, close: f64) -> Bar {
        Bar {
            time: Utc::now(),
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn stochastic_insufficient_data() {
        let bars = vec![bar(10.0, 5.0, 7.0); 3];
        assert!(calculate_stochastic(&bars, 14, 3).is_none());
    }

    #[test]
    fn stochastic_at_high_is_100() {
        let mut bars: Vec<Bar> = (0..20).map(|_| bar(10.0, 5.0, 7.0)).collect();
        bars.push(bar(10.0, 5.0, 10.0));
        let result = calculate_stochastic(&bars[bars.len() - 16..], 14, 3).unwrap();
        assert!(result.k > 90.0, "expected %K near 100, got {}", result.k);
    }

    #[test]
    fn stochastic_range_bounded() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.4).sin() * 5.0;
                bar(base + 2.0, base - 2.0, base)
            })
            .collect();
        let result = calculate_stochastic(&bars, 14, 3).unwrap();
        assert!((0.0..=100.0).contains(&result.k));
        assert!((0.0..=100.0).contains(&result.d));
    }
}
