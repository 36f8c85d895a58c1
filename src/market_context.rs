// =============================================================================
// Market Context Engine
// =============================================================================
//
// Builds the macro read strategies consult before proposing a trade:
// multi-timeframe trend agreement folded into a seven-level macro direction,
// a volatility/trend regime classification, and the active news blackout
// flag. Output is an immutable snapshot — callers hold an `Arc<MarketContext>`
// rather than mutate it in place.

use std::sync::Arc;

use tracing::debug;

use crate::analyzer::TechnicalAnalyzer;
use crate::domain::{IndicatorFrame, MacroDirection, MarketContext, MarketRegime, NewsView, TrendVerdict};
use crate::error::EngineError;
use crate::types::{Side, Timeframe};

const HTF: Timeframe = Timeframe::D1;
const MTF: Timeframe = Timeframe::H4;
const LTF: Timeframe = Timeframe::H1;

/// Bollinger width at or below this percentile of its own history counts as
/// a squeeze.
const SQUEEZE_PERCENTILE: f64 = 0.20;

pub struct MarketContextEngine {
    analyzer: Arc<TechnicalAnalyzer>,
}

impl MarketContextEngine {
    pub fn new(analyzer: Arc<TechnicalAnalyzer>) -> Self {
        Self { analyzer }
    }

    /// Build the market context for `symbol`, folding in the latest news
    /// view for the blackout flag. D1/H4 degrade to "no read" rather than
    /// failing the whole context when that timeframe isn't backfilled yet;
    /// H1 is the one timeframe this algorithm strictly requires.
    pub fn build(&self, symbol: &str, news: &NewsView) -> Result<MarketContext, EngineError> {
        let d1_frame = self.analyzer.analyze(symbol, HTF).ok();
        let h4_frame = self.analyzer.analyze(symbol, MTF).ok();
        let h1_frame = self.analyzer.analyze(symbol, LTF)?;

        let d1_trend = d1_frame.as_ref().map(TechnicalAnalyzer::trend_verdict).unwrap_or(TrendVerdict::Neutral);
        let h4_trend = h4_frame.as_ref().map(TechnicalAnalyzer::trend_verdict).unwrap_or(TrendVerdict::Neutral);
        let h1_trend = TechnicalAnalyzer::trend_verdict(&h1_frame);

        let macro_direction = classify_macro_direction(d1_frame.as_ref(), h4_frame.as_ref());
        let short_term_direction = tf_direction(&h1_frame);

        // Regime reads off H4, falling back to H1 when H4 isn't available.
        let regime_frame = h4_frame.as_ref().unwrap_or(&h1_frame);
        let regime = classify_regime(regime_frame);
        let regime_strength = regime_strength(regime_frame);

        let recommended_strategies = recommend_strategies(regime);
        let allowed_directions = allowed_directions(macro_direction, short_term_direction, regime, news.blackout_active);
        let risk_multiplier = risk_multiplier_for(regime);
        let max_positions = max_positions_for(regime);

        let ctx = MarketContext {
            symbol: symbol.to_string(),
            computed_at: chrono::Utc::now(),
            macro_direction,
            short_term_direction,
            regime,
            regime_strength,
            htf_trend: d1_trend,
            mtf_trend: h4_trend,
            ltf_trend: h1_trend,
            volatility_pct: h1_frame.atr_pct,
            recommended_strategies,
            news_blackout: news.blackout_active,
            allowed_directions,
            risk_multiplier,
            max_positions,
        };

        debug!(symbol, %macro_direction, %regime, regime_strength, max_positions, "market context built");
        Ok(ctx)
    }
}

/// Weighted directional score for a single timeframe: ADX+DI (weight 3), EMA
/// stack alignment (2), RSI lean (1), MACD histogram sign (2), price vs
/// EMA200 (2). Range is roughly -10..10.
fn tf_direction_score(frame: &IndicatorFrame) -> f64 {
    let mut score = 0.0;

    if frame.adx14 >= 20.0 {
        if frame.di_plus > frame.di_minus {
            score += 3.0;
        } else if frame.di_minus > frame.di_plus {
            score -= 3.0;
        }
    }

    if frame.ema9 > frame.ema21 && frame.ema21 > frame.ema50 {
        score += 2.0;
    } else if frame.ema9 < frame.ema21 && frame.ema21 < frame.ema50 {
        score -= 2.0;
    }

    if frame.rsi14 > 55.0 {
        score += 1.0;
    } else if frame.rsi14 < 45.0 {
        score -= 1.0;
    }

    if frame.macd_histogram > 0.0 {
        score += 2.0;
    } else if frame.macd_histogram < 0.0 {
        score -= 2.0;
    }

    if frame.close > frame.ema200 {
        score += 2.0;
    } else if frame.close < frame.ema200 {
        score -= 2.0;
    }

    score
}

/// Remap a weighted score onto the seven-level macro-direction enum.
fn direction_from_score(score: f64) -> MacroDirection {
    match score {
        s if s >= 8.0 => MacroDirection::StrongBull,
        s if s >= 5.0 => MacroDirection::Bull,
        s if s >= 2.0 => MacroDirection::WeakBull,
        s if s > -2.0 => MacroDirection::Sideways,
        s if s > -5.0 => MacroDirection::WeakBear,
        s if s > -8.0 => MacroDirection::Bear,
        _ => MacroDirection::StrongBear,
    }
}

/// Directional read for a single frame. Used directly as the short-term
/// tiebreaker when the combined macro direction lands on `Sideways`.
fn tf_direction(frame: &IndicatorFrame) -> MacroDirection {
    direction_from_score(tf_direction_score(frame))
}

/// Fold D1 (weight 0.6) + H4 (weight 0.4) directional scores into the
/// engine's seven-level macro read. Agreement in sign between the two
/// timeframes amplifies the combined score by 1.2 before remapping.
fn classify_macro_direction(d1: Option<&IndicatorFrame>, h4: Option<&IndicatorFrame>) -> MacroDirection {
    let d1_score = d1.map(tf_direction_score);
    let h4_score = h4.map(tf_direction_score);

    let combined = match (d1_score, h4_score) {
        (Some(d), Some(h)) => {
            let mut combined = d * 0.6 + h * 0.4;
            if d != 0.0 && h != 0.0 && d.signum() == h.signum() {
                combined *= 1.2;
            }
            combined
        }
        (Some(d), None) => d,
        (None, Some(h)) => h,
        (None, None) => 0.0,
    };

    direction_from_score(combined)
}

/// 0..1 measure of how decisively the regime classification fired, from how
/// far ADX and the ATR-vs-average ratio sit past their thresholds.
fn regime_strength(frame: &IndicatorFrame) -> f64 {
    let adx_push = (frame.adx14 / 50.0).clamp(0.0, 1.0);
    let vol_ratio = if frame.atr_avg > 0.0 { frame.atr14 / frame.atr_avg } else { 1.0 };
    let vol_push = (vol_ratio - 1.0).abs().clamp(0.0, 1.0);
    adx_push.max(vol_push)
}

/// Directions a strategy may signal this tick. Ranging markets leave both
/// directions open; a clear macro lean restricts to trading with it; a
/// `Sideways` macro read falls back to the short-term direction; low
/// volatility or an active news blackout close both.
fn allowed_directions(
    macro_direction: MacroDirection,
    short_term_direction: MacroDirection,
    regime: MarketRegime,
    news_blackout: bool,
) -> Vec<Side> {
    use MacroDirection::*;

    if news_blackout || regime == MarketRegime::LowVolatility {
        return Vec::new();
    }

    if regime == MarketRegime::Ranging {
        return vec![Side::Buy, Side::Sell];
    }

    match macro_direction {
        StrongBull | Bull | WeakBull => vec![Side::Buy],
        StrongBear | Bear | WeakBear => vec![Side::Sell],
        Sideways => match short_term_direction {
            StrongBull | Bull | WeakBull => vec![Side::Buy],
            _ => Vec::new(),
        },
    }
}

fn risk_multiplier_for(regime: MarketRegime) -> f64 {
    match regime {
        MarketRegime::TrendingStrong => 1.2,
        MarketRegime::TrendingWeak => 1.0,
        MarketRegime::Ranging => 0.8,
        MarketRegime::HighVolatility => 0.5,
        MarketRegime::LowVolatility => 0.3,
        MarketRegime::Breakout => 0.9,
    }
}

fn max_positions_for(regime: MarketRegime) -> u32 {
    match regime {
        MarketRegime::TrendingStrong => 4,
        MarketRegime::TrendingWeak => 3,
        MarketRegime::Ranging => 2,
        MarketRegime::HighVolatility => 1,
        MarketRegime::LowVolatility => 0,
        MarketRegime::Breakout => 2,
    }
}

/// Classify the current regime from ATR relative to its own historical
/// average, ADX tiering, and a Bollinger-squeeze override.
fn classify_regime(frame: &IndicatorFrame) -> MarketRegime {
    let base = if frame.atr_avg > 0.0 && frame.atr14 > 2.0 * frame.atr_avg {
        MarketRegime::HighVolatility
    } else if frame.atr_avg > 0.0 && frame.atr14 < 0.5 * frame.atr_avg {
        MarketRegime::LowVolatility
    } else if frame.adx14 >= 35.0 {
        MarketRegime::TrendingStrong
    } else if frame.adx14 >= 25.0 {
        MarketRegime::TrendingWeak
    } else {
        MarketRegime::Ranging
    };

    let squeezed = frame.bb_width_percentile <= SQUEEZE_PERCENTILE;
    let within_bands = frame.close <= frame.bb_upper && frame.close >= frame.bb_lower;

    if squeezed && within_bands {
        MarketRegime::Breakout
    } else {
        base
    }
}

fn recommend_strategies(regime: MarketRegime) -> Vec<String> {
    use MarketRegime::*;

    match regime {
        TrendingStrong | TrendingWeak => vec!["trend_following".to_string(), "breakout".to_string()],
        Ranging => vec!["mean_reversion".to_string(), "range_trading".to_string()],
        Breakout => vec!["breakout".to_string(), "trend_following".to_string()],
        HighVolatility => vec!["scalping".to_string()],
        LowVolatility => Vec::new(),
    }
}
