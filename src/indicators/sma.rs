// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================

/// Calculate the simple moving average of the last `period` closes.
///
/// Returns `None` when there are fewer than `period` closes or `period` is
/// zero.
pub fn calculate_sma(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let window = &closes[closes.len() - period..];
    let sum: f64 = window.iter().sum();
    let sma = sum / period as f64;
    if sma.is_finite() {
        Some(sma)
    } else {
        None
    }
}

/// Full SMA series, one value per window ending at each index >= period - 1.
pub fn sma_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(closes.len() - period + 1);
    let mut window_sum: f64 = closes[..period].iter().sum();
    out.push(window_sum / period as f64);
    for i in period..closes.len() {
        window_sum += closes[i] - closes[i - period];
        out.push(window_sum / period as f64);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_basic() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(calculate_sma(&closes, 5), Some(3.0));
    }

    #[test]
    fn sma_insufficient_data() {
        assert_eq!(calculate_sma(&[1.0, 2.0], 5), None);
    }

    #[test]
    fn sma_series_matches_scalar_at_end() {
        let closes: Vec<f64> = (1..=30).map(|x| x as f64).collect();
        let series = sma_series(&closes, 20);
        let scalar = calculate_sma(&closes, 20).unwrap();
        assert!((series.last().unwrap() - scalar).abs() < 1e-9);
    }
}
