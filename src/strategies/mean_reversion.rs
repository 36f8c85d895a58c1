// Mean reversion: primary timeframe M5. Fades price back toward the
// Bollinger midline when RSI/Stochastic are in an extreme and ADX shows no
// strong trend underway — trading a range snap-back, not a breakout.

use crate::domain::Signal;
use crate::types::{Side, Timeframe};

use super::{Strategy, StrategyContext};

const ADX_CEILING: f64 = 25.0;
const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
const STOCH_OVERSOLD: f64 = 20.0;
const STOCH_OVERBOUGHT: f64 = 80.0;
const REWARD_RISK: f64 = 1.5;

pub struct MeanReversionStrategy;

impl Strategy for MeanReversionStrategy {
    fn name(&self) -> &'static str {
        "mean_reversion"
    }

    fn analyze(&self, ctx: &StrategyContext<'_>) -> Signal {
        let Some(m5) = ctx.frame(Timeframe::M5) else {
            return Signal::hold(ctx.symbol, self.name(), "no_data");
        };

        if m5.adx14 >= ADX_CEILING {
            return Signal::hold(ctx.symbol, self.name(), "trending_not_ranging");
        }

        let oversold = m5.rsi14 < RSI_OVERSOLD && m5.stoch_k < STOCH_OVERSOLD && m5.close <= m5.bb_lower;
        let overbought = m5.rsi14 > RSI_OVERBOUGHT && m5.stoch_k > STOCH_OVERBOUGHT && m5.close >= m5.bb_upper;

        let side = if oversold {
            Side::Buy
        } else if overbought {
            Side::Sell
        } else {
            return Signal::hold(ctx.symbol, self.name(), "no_extreme");
        };

        if !ctx.market.allows(side) {
            return Signal::hold(ctx.symbol, self.name(), "macro_direction_disagrees");
        }

        let entry = m5.close;
        let stop_distance = (m5.bb_upper - m5.bb_lower).abs().max(m5.atr14);
        let (stop_loss, take_profit) = match side {
            Side::Buy => (entry - stop_distance * 0.5, m5.bb_middle),
            Side::Sell => (entry + stop_distance * 0.5, m5.bb_middle),
        };
        let take_profit = match side {
            Side::Buy => take_profit.max(entry + stop_distance * 0.5 * REWARD_RISK),
            Side::Sell => take_profit.min(entry - stop_distance * 0.5 * REWARD_RISK),
        };

        let extremity = match side {
            Side::Buy => (RSI_OVERSOLD - m5.rsi14).max(0.0) / RSI_OVERSOLD,
            Side::Sell => (m5.rsi14 - RSI_OVERBOUGHT).max(0.0) / (100.0 - RSI_OVERBOUGHT),
        };
        let confidence = extremity.clamp(0.3, 0.9);

        Signal::trade(ctx.symbol, self.name(), side, confidence, entry, stop_loss, take_profit, "mean_reversion_extreme")
    }
}
