// Trend-following: primary timeframe H1, gated on ADX strength and D1/H4
// macro alignment (carried pre-folded into `MarketContext.macro_direction`
// by the Market Context Engine). Entry requires the EMA9/21/50 stack and
// MACD histogram to agree with the allowed direction, with RSI kept off
// the extremes so entries aren't chasing an exhausted move.

use crate::domain::Signal;
use crate::types::{Side, Timeframe};

use super::{Strategy, StrategyContext};

const ADX_THRESHOLD: f64 = 25.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const RSI_OVERSOLD: f64 = 30.0;
const ATR_MULT_SL: f64 = 1.5;
const REWARD_RISK: f64 = 2.0;

pub struct TrendFollowingStrategy;

impl Strategy for TrendFollowingStrategy {
    fn name(&self) -> &'static str {
        "trend_following"
    }

    fn analyze(&self, ctx: &StrategyContext<'_>) -> Signal {
        let Some(h1) = ctx.frame(Timeframe::H1) else {
            return Signal::hold(ctx.symbol, self.name(), "no_data");
        };

        if h1.adx14 < ADX_THRESHOLD {
            return Signal::hold(ctx.symbol, self.name(), "adx_below_threshold");
        }

        let ema_bullish = h1.ema9 > h1.ema21 && h1.ema21 > h1.ema50;
        let ema_bearish = h1.ema9 < h1.ema21 && h1.ema21 < h1.ema50;

        let side = if ema_bullish && h1.macd_histogram > 0.0 && h1.rsi14 < RSI_OVERBOUGHT {
            Side::Buy
        } else if ema_bearish && h1.macd_histogram < 0.0 && h1.rsi14 > RSI_OVERSOLD {
            Side::Sell
        } else {
            return Signal::hold(ctx.symbol, self.name(), "ema_macd_not_aligned");
        };

        if !ctx.market.allows(side) {
            return Signal::hold(ctx.symbol, self.name(), "macro_direction_disagrees");
        }

        let confidence = (h1.adx14 / 50.0).clamp(0.4, 0.95);
        let entry = h1.close;
        let stop_distance = h1.atr14 * ATR_MULT_SL;
        let (stop_loss, take_profit) = match side {
            Side::Buy => (entry - stop_distance, entry + stop_distance * REWARD_RISK),
            Side::Sell => (entry + stop_distance, entry - stop_distance * REWARD_RISK),
        };

        Signal::trade(ctx.symbol, self.name(), side, confidence, entry, stop_loss, take_profit, "trend_aligned")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::{IndicatorFrame, MacroDirection, MarketContext, MarketRegime, NewsView};

    fn frame(adx: f64, ema9: f64, ema21: f64, ema50: f64, macd_hist: f64, rsi: f64, close: f64) -> IndicatorFrame {
        IndicatorFrame {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::H1,
            computed_at: chrono::Utc::now(),
            close,
            ema9,
            ema21,
            ema50,
            ema200: ema50,
            sma20: close,
            rsi14: rsi,
            macd_line: macd_hist,
            macd_signal: 0.0,
            macd_histogram: macd_hist,
            atr14: 0.0010,
            atr_pct: 0.5,
            adx14: adx,
            di_plus: if macd_hist > 0.0 { 30.0 } else { 10.0 },
            di_minus: if macd_hist > 0.0 { 10.0 } else { 30.0 },
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
            regime: MarketRegime::TrendingStrong,
            regime_strength: 0.8,
            htf_trend: crate::domain::TrendVerdict::Up,
            mtf_trend: crate::domain::TrendVerdict::Up,
            ltf_trend: crate::domain::TrendVerdict::Up,
            volatility_pct: 1.0,
            recommended_strategies: vec!["trend_following".into()],
            news_blackout: false,
            allowed_directions: allowed,
            risk_multiplier: 1.2,
            max_positions: 4,
        }
    }

    #[test]
    fn bullish_alignment_with_allowed_direction_signals_buy() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::H1, frame(30.0, 1.21, 1.20, 1.19, 0.001, 55.0, 1.2150));
        let news = NewsView::default();
        let mkt = market(vec![Side::Buy]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.0001 };
        let sig = TrendFollowingStrategy.analyze(&ctx);
        assert_eq!(sig.side(), Some(Side::Buy));
    }

    #[test]
    fn weak_adx_holds() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::H1, frame(15.0, 1.21, 1.20, 1.19, 0.001, 55.0, 1.2150));
        let news = NewsView::default();
        let mkt = market(vec![Side::Buy, Side::Sell]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.0001 };
        let sig = TrendFollowingStrategy.analyze(&ctx);
        assert_eq!(sig.reason, "adx_below_threshold");
    }

    #[test]
    fn disallowed_direction_holds_even_when_aligned() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::H1, frame(30.0, 1.21, 1.20, 1.19, 0.001, 55.0, 1.2150));
        let news = NewsView::default();
        let mkt = market(vec![Side::Sell]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.0001 };
        let sig = TrendFollowingStrategy.analyze(&ctx);
        assert_eq!(sig.reason, "macro_direction_disagrees");
    }
}
