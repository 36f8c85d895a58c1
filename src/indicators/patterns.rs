// =============================================================================
// Candlestick Pattern Recognition
// =============================================================================
//
// Single- and two-bar reversal/indecision patterns consulted by the
// mean-reversion and scalping strategies as confluence, never as a
// standalone signal.

use crate::domain::Bar;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandlePattern {
    Doji,
    Hammer,
    InvertedHammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
    MorningStar,
    EveningStar,
    BullishPinBar,
    BearishPinBar,
}

impl std::fmt::Display for CandlePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Doji => "DOJI",
            Self::Hammer => "HAMMER",
            Self::InvertedHammer => "INVERTED_HAMMER",
            Self::ShootingStar => "SHOOTING_STAR",
            Self::BullishEngulfing => "BULLISH_ENGULFING",
            Self::BearishEngulfing => "BEARISH_ENGULFING",
            Self::MorningStar => "MORNING_STAR",
            Self::EveningStar => "EVENING_STAR",
            Self::BullishPinBar => "BULLISH_PIN_BAR",
            Self::BearishPinBar => "BEARISH_PIN_BAR",
        };
        write!(f, "{s}")
    }
}

fn body(b: &Bar) -> f64 {
    (b.close - b.open).abs()
}

fn range(b: &Bar) -> f64 {
    b.high - b.low
}

fn upper_wick(b: &Bar) -> f64 {
    b.high - b.open.max(b.close)
}

fn lower_wick(b: &Bar) -> f64 {
    b.open.min(b.close) - b.low
}

fn is_bullish(b: &Bar) -> bool {
    b.close > b.open
}

/// Detect single- or two-bar patterns ending at the last bar in `bars`.
///
/// `bars` must contain at least 3 bars to evaluate three-bar patterns;
/// fewer bars limit detection to single-bar patterns only.
pub fn detect_patterns(bars: &[Bar]) -> Vec<CandlePattern> {
    let mut found = Vec::new();
    let Some(last) = bars.last() else { return found };
    let r = range(*last);
    if r <= 0.0 {
        return found;
    }

    let b = body(*last);
    let uw = upper_wick(*last);
    let lw = lower_wick(*last);

    if b / r < 0.1 {
        found.push(CandlePattern::Doji);
    }
    if lw >= 2.0 * b && uw <= b * 0.5 && b / r < 0.35 {
        found.push(CandlePattern::Hammer);
        found.push(CandlePattern::BullishPinBar);
    }
    if uw >= 2.0 * b && lw <= b * 0.5 && b / r < 0.35 {
        found.push(CandlePattern::InvertedHammer);
        found.push(CandlePattern::ShootingStar);
        found.push(CandlePattern::BearishPinBar);
    }

    if bars.len() >= 2 {
        let prev = &bars[bars.len() - 2];
        if !is_bullish(prev) && is_bullish(last) && last.close >= prev.open && last.open <= prev.close {
            found.push(CandlePattern::BullishEngulfing);
        }
        if is_bullish(prev) && !is_bullish(last) && last.open >= prev.close && last.close <= prev.open {
            found.push(CandlePattern::BearishEngulfing);
        }
    }

    if bars.len() >= 3 {
        let first = &bars[bars.len() - 3];
        let middle = &bars[bars.len() - 2];
        let small_middle_body = body(*middle) < body(*first) * 0.5;
        if !is_bullish(first) && small_middle_body && is_bullish(last) && last.close > (first.open + first.close) / 2.0
        {
            found.push(CandlePattern::MorningStar);
        }
        if is_bullish(first) && small_middle_body && !is_bullish(last) && last.close < (first.open + first.close) / 2.0
        {
            found.push(CandlePattern::EveningStar);
        }
    }

    found
}
