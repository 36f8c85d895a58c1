// Scalping: primary timeframe M5, with mandatory H1 directional
// confirmation so a scalp is never taken against the higher-timeframe
// trend. Gated on a 0-100 session-quality score folding spread tightness,
// how well ATR sits inside its normal band, and H1 alignment strength —
// below 60 the spread/slippage cost isn't worth the edge.

use crate::domain::Signal;
use crate::types::{Side, Timeframe};

use super::{Strategy, StrategyContext};

const SESSION_QUALITY_THRESHOLD: f64 = 60.0;
const MAX_SPREAD: f64 = 0.00020;
const ATR_BAND_LOW_PCT: f64 = 0.05;
const ATR_BAND_HIGH_PCT: f64 = 0.8;
const ATR_MULT_SL: f64 = 0.8;
const REWARD_RISK: f64 = 1.2;

pub struct ScalpingStrategy;

impl Strategy for ScalpingStrategy {
    fn name(&self) -> &'static str {
        "scalping"
    }

    fn analyze(&self, ctx: &StrategyContext<'_>) -> Signal {
        let Some(m5) = ctx.frame(Timeframe::M5) else {
            return Signal::hold(ctx.symbol, self.name(), "no_data");
        };
        let Some(h1) = ctx.frame(Timeframe::H1) else {
            return Signal::hold(ctx.symbol, self.name(), "no_h1_confirmation");
        };

        if ctx.spread > MAX_SPREAD {
            return Signal::hold(ctx.symbol, self.name(), "spread_too_wide");
        }

        let quality = session_quality(ctx.spread, m5.atr_pct, h1);
        if quality < SESSION_QUALITY_THRESHOLD {
            return Signal::hold(ctx.symbol, self.name(), "session_quality_below_threshold");
        }

        let h1_bullish = h1.ema9 > h1.ema21;
        let h1_bearish = h1.ema9 < h1.ema21;

        let m5_bullish = m5.ema9 > m5.ema21 && m5.macd_histogram > 0.0;
        let m5_bearish = m5.ema9 < m5.ema21 && m5.macd_histogram < 0.0;

        let side = if m5_bullish && h1_bullish {
            Side::Buy
        } else if m5_bearish && h1_bearish {
            Side::Sell
        } else {
            return Signal::hold(ctx.symbol, self.name(), "m5_h1_not_aligned");
        };

        if !ctx.market.allows(side) {
            return Signal::hold(ctx.symbol, self.name(), "macro_direction_disagrees");
        }

        let entry = m5.close;
        let stop_distance = m5.atr14 * ATR_MULT_SL;
        let (stop_loss, take_profit) = match side {
            Side::Buy => (entry - stop_distance, entry + stop_distance * REWARD_RISK),
            Side::Sell => (entry + stop_distance, entry - stop_distance * REWARD_RISK),
        };

        let confidence = (quality / 100.0).clamp(0.3, 0.85);

        Signal::trade(ctx.symbol, self.name(), side, confidence, entry, stop_loss, take_profit, "scalp_m5_h1_confirmed")
    }
}

/// 0-100 session-quality score: tighter spread, ATR sitting inside its
/// normal band, and stronger H1 alignment all push the score up.
fn session_quality(spread: f64, atr_pct: f64, h1: &crate::domain::IndicatorFrame) -> f64 {
    let spread_score = (1.0 - (spread / MAX_SPREAD).min(1.0)) * 40.0;
    let atr_in_band = atr_pct >= ATR_BAND_LOW_PCT && atr_pct <= ATR_BAND_HIGH_PCT;
    let atr_score = if atr_in_band { 30.0 } else { 0.0 };
    let h1_alignment = if h1.adx14 > 20.0 { 30.0 } else { 30.0 * (h1.adx14 / 20.0).clamp(0.0, 1.0) };
    spread_score + atr_score + h1_alignment
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::{IndicatorFrame, MacroDirection, MarketContext, MarketRegime, NewsView};

    fn frame(tf: Timeframe, ema9: f64, ema21: f64, macd_hist: f64, adx: f64, atr_pct: f64, close: f64) -> IndicatorFrame {
        IndicatorFrame {
            symbol: "EURUSD".into(),
            timeframe: tf,
            computed_at: chrono::Utc::now(),
            close,
            ema9,
            ema21,
            ema50: ema21,
            ema200: ema21,
            sma20: close,
            rsi14: 55.0,
            macd_line: macd_hist,
            macd_signal: 0.0,
            macd_histogram: macd_hist,
            atr14: 0.0005,
            atr_pct,
            adx14: adx,
            di_plus: 20.0,
            di_minus: 10.0,
            bb_upper: close,
            bb_middle: close,
            bb_lower: close,
            bb_width: 1.0,
            stoch_k: 50.0,
            stoch_d: 50.0,
            donchian_upper: close,
            donchian_lower: close,
            keltner_upper: close,
            keltner_lower: close,
        }
    }

    fn market(allowed: Vec<Side>) -> MarketContext {
        MarketContext {
            symbol: "EURUSD".into(),
            computed_at: chrono::Utc::now(),
            macro_direction: MacroDirection::Bull,
            short_term_direction: MacroDirection::Bull,
            regime: MarketRegime::LowVolatility,
            regime_strength: 0.2,
            htf_trend: crate::domain::TrendVerdict::Up,
            mtf_trend: crate::domain::TrendVerdict::Up,
            ltf_trend: crate::domain::TrendVerdict::Up,
            volatility_pct: 0.2,
            recommended_strategies: vec!["scalping".into()],
            news_blackout: false,
            allowed_directions: allowed,
            risk_multiplier: 0.3,
            max_positions: 0,
        }
    }

    #[test]
    fn aligned_m5_h1_with_good_session_signals_buy() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::M5, frame(Timeframe::M5, 1.1012, 1.1010, 0.0002, 15.0, 0.3, 1.1015));
        frames.insert(Timeframe::H1, frame(Timeframe::H1, 1.1030, 1.1020, 0.0005, 25.0, 0.3, 1.1040));
        let news = NewsView::default();
        let mkt = market(vec![Side::Buy, Side::Sell]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.00005 };
        let sig = ScalpingStrategy.analyze(&ctx);
        assert_eq!(sig.side(), Some(Side::Buy));
    }

    #[test]
    fn wide_spread_holds() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::M5, frame(Timeframe::M5, 1.1012, 1.1010, 0.0002, 15.0, 0.3, 1.1015));
        frames.insert(Timeframe::H1, frame(Timeframe::H1, 1.1030, 1.1020, 0.0005, 25.0, 0.3, 1.1040));
        let news = NewsView::default();
        let mkt = market(vec![Side::Buy, Side::Sell]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.00025 };
        let sig = ScalpingStrategy.analyze(&ctx);
        assert_eq!(sig.reason, "spread_too_wide");
    }

    #[test]
    fn missing_h1_holds() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::M5, frame(Timeframe::M5, 1.1012, 1.1010, 0.0002, 15.0, 0.3, 1.1015));
        let news = NewsView::default();
        let mkt = market(vec![Side::Buy, Side::Sell]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.00005 };
        let sig = ScalpingStrategy.analyze(&ctx);
        assert_eq!(sig.reason, "no_h1_confirmation");
    }

    #[test]
    fn contradicting_h1_holds() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::M5, frame(Timeframe::M5, 1.1012, 1.1010, 0.0002, 15.0, 0.3, 1.1015));
        frames.insert(Timeframe::H1, frame(Timeframe::H1, 1.1010, 1.1020, -0.0005, 25.0, 0.3, 1.1000));
        let news = NewsView::default();
        let mkt = market(vec![Side::Buy, Side::Sell]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.00005 };
        let sig = ScalpingStrategy.analyze(&ctx);
        assert_eq!(sig.reason, "m5_h1_not_aligned");
    }
}
