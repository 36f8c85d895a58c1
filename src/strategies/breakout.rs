// Breakout: primary timeframe M30, falling back to M15 when M30 isn't
// cached yet. Signals when price clears the Donchian channel with
// confirming Bollinger-width expansion (volatility actually picking up,
// not just touching the band on noise).

use crate::domain::Signal;
use crate::types::{Side, Timeframe};

use super::{Strategy, StrategyContext};

const MIN_BB_WIDTH_PCT: f64 = 1.5;
const ATR_MULT_SL: f64 = 1.2;
const REWARD_RISK: f64 = 2.5;

pub struct BreakoutStrategy;

impl Strategy for BreakoutStrategy {
    fn name(&self) -> &'static str {
        "breakout"
    }

    fn analyze(&self, ctx: &StrategyContext<'_>) -> Signal {
        let (tf, frame) = match ctx.frame(Timeframe::M30) {
            Some(f) => (Timeframe::M30, f),
            None => match ctx.frame(Timeframe::M15) {
                Some(f) => (Timeframe::M15, f),
                None => return Signal::hold(ctx.symbol, self.name(), "no_data"),
            },
        };
        let _ = tf;

        if frame.bb_width < MIN_BB_WIDTH_PCT {
            return Signal::hold(ctx.symbol, self.name(), "volatility_not_expanding");
        }

        let side = if frame.close > frame.donchian_upper {
            Side::Buy
        } else if frame.close < frame.donchian_lower {
            Side::Sell
        } else {
            return Signal::hold(ctx.symbol, self.name(), "inside_channel");
        };

        if !ctx.market.allows(side) {
            return Signal::hold(ctx.symbol, self.name(), "macro_direction_disagrees");
        }

        let entry = frame.close;
        let stop_distance = frame.atr14 * ATR_MULT_SL;
        let (stop_loss, take_profit) = match side {
            Side::Buy => (entry - stop_distance, entry + stop_distance * REWARD_RISK),
            Side::Sell => (entry + stop_distance, entry - stop_distance * REWARD_RISK),
        };

        let confidence = (frame.bb_width / (MIN_BB_WIDTH_PCT * 3.0)).clamp(0.4, 0.9);

        Signal::trade(ctx.symbol, self.name(), side, confidence, entry, stop_loss, take_profit, "channel_breakout")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::{IndicatorFrame, MacroDirection, MarketContext, MarketRegime, NewsView};

    fn frame(tf: Timeframe, close: f64, donchian_upper: f64, donchian_lower: f64, bb_width: f64) -> IndicatorFrame {
        IndicatorFrame {
            symbol: "EURUSD".into(),
            timeframe: tf,
            computed_at: chrono::Utc::now(),
            close,
            ema9: close,
            ema21: close,
            ema50: close,
            ema200: close,
            sma20: close,
            rsi14: 55.0,
            macd_line: 0.0,
            macd_signal: 0.0,
            macd_histogram: 0.0,
            atr14: 0.0020,
            atr_pct: 1.0,
            adx14: 28.0,
            di_plus: 20.0,
            di_minus: 10.0,
            bb_upper: close,
            bb_middle: close,
            bb_lower: close,
            bb_width,
            stoch_k: 50.0,
            stoch_d: 50.0,
            donchian_upper,
            donchian_lower,
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
            regime: MarketRegime::HighVolatility,
            regime_strength: 0.7,
            htf_trend: crate::domain::TrendVerdict::Up,
            mtf_trend: crate::domain::TrendVerdict::Up,
            ltf_trend: crate::domain::TrendVerdict::Up,
            volatility_pct: 3.5,
            recommended_strategies: vec!["breakout".into()],
            news_blackout: false,
            allowed_directions: allowed,
            risk_multiplier: 0.5,
            max_positions: 1,
        }
    }

    #[test]
    fn close_above_donchian_upper_signals_buy() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::M30, frame(Timeframe::M30, 1.2050, 1.2040, 1.1980, 2.5));
        let news = NewsView::default();
        let mkt = market(vec![Side::Buy]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.0001 };
        let sig = BreakoutStrategy.analyze(&ctx);
        assert_eq!(sig.side(), Some(Side::Buy));
    }

    #[test]
    fn falls_back_to_m15_when_m30_missing() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::M15, frame(Timeframe::M15, 1.2050, 1.2040, 1.1980, 2.5));
        let news = NewsView::default();
        let mkt = market(vec![Side::Buy]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.0001 };
        let sig = BreakoutStrategy.analyze(&ctx);
        assert_eq!(sig.side(), Some(Side::Buy));
    }

    #[test]
    fn narrow_bands_hold() {
        let mut frames = HashMap::new();
        frames.insert(Timeframe::M30, frame(Timeframe::M30, 1.2050, 1.2040, 1.1980, 0.5));
        let news = NewsView::default();
        let mkt = market(vec![Side::Buy]);
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.0001 };
        let sig = BreakoutStrategy.analyze(&ctx);
        assert_eq!(sig.reason, "volatility_not_expanding");
    }
}
