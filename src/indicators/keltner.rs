// =============================================================================
// Keltner Channel
// =============================================================================
//
// Middle line is an EMA of closes; upper/lower bands are offset by a
// multiple of ATR rather than standard deviation, which makes the channel
// less sensitive to price spikes than Bollinger Bands.

use crate::domain::Bar;
use crate::indicators::atr::calculate_atr;
use crate::indicators::ema::calculate_ema;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeltnerChannel {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

pub fn calculate_keltner(bars: &[Bar], ema_period: usize, atr_period: usize, atr_mult: f64) -> Option<KeltnerChannel> {
    if bars.len() < ema_period.max(atr_period + 1) {
        return None;
    }
    let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
    let ema = calculate_ema(&closes, ema_period);
    let middle = *ema.last()?;
    let atr = calculate_atr(bars, atr_period)?;

    let upper = middle + atr_mult * atr;
    let lower = middle - atr_mult * atr;
    if upper.is_finite() && lower.is_finite() && middle.is_finite() {
        Some(KeltnerChannel { upper, middle, lower })
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
    fn keltner_basic() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.2;
                bar(base + 1.0, base - 1.0, base)
            })
            .collect();
        let kc = calculate_keltner(&bars, 20, 10, 2.0).unwrap();
        assert!(kc.upper > kc.middle);
        assert!(kc.lower < kc.middle);
    }

    #[test]
    fn keltner_insufficient_data() {
        let bars = vec![bar(101.0, 99.0, 100.0); 5];
        assert!(calculate_keltner(&bars, 20, 10, 2.0).is_none());
    }
}
