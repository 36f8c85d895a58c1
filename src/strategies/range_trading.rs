// Range trading: primary timeframe M5. Fades the Donchian channel edges
// while the market is genuinely range-bound — gated on M5 ADX staying low
// and the H1-derived regime strength staying below the point where a
// breakout strategy should be taking the trade instead.

use crate::domain::Signal;
use crate::types::{Side, Timeframe};

use super::{Strategy, StrategyContext};

const ADX_CEILING: f64 = 25.0;
const H1_STRENGTH_CEILING: f64 = 0.6;
const STOCH_OVERSOLD: f64 = 25.0;
const STOCH_OVERBOUGHT: f64 = 75.0;
const REWARD_RISK: f64 = 1.5;

pub struct RangeTradingStrategy;

impl Strategy for RangeTradingStrategy {
    fn name(&self) -> &'static str {
        "range_trading"
    }

    fn analyze(&self, ctx: &StrategyContext<'_>) -> Signal {
        if ctx.market.regime_strength > H1_STRENGTH_CEILING {
            return Signal::hold(ctx.symbol, self.name(), "h1_strength_too_high");
        }

        let Some(m5) = ctx.frame(Timeframe::M5) else {
            return Signal::hold(ctx.symbol, self.name(), "no_data");
        };

        if m5.adx14 >= ADX_CEILING {
            return Signal::hold(ctx.symbol, self.name(), "trending_not_ranging");
        }

        let near_lower = m5.close <= m5.donchian_lower * 1.001 && m5.stoch_k < STOCH_OVERSOLD;
        let near_upper = m5.close >= m5.donchian_upper * 0.999 && m5.stoch_k > STOCH_OVERBOUGHT;

        let side = if near_lower {
            Side::Buy
        } else if near_upper {
            Side::Sell
        } else {
            return Signal::hold(ctx.symbol, self.name(), "mid_range");
        };

        if !ctx.market.allows(side) {
            return Signal::hold(ctx.symbol, self.name(), "macro_direction_disagrees");
        }

        let entry = m5.close;
        let range_width = (m5.donchian_upper - m5.donchian_lower).abs().max(m5.atr14);
        let target = (m5.donchian_upper + m5.donchian_lower) / 2.0;
        let (stop_loss, take_profit) = match side {
            Side::Buy => (entry - range_width * 0.3, target.max(entry + range_width * 0.3 * REWARD_RISK)),
            Side::Sell => (entry + range_width * 0.3, target.min(entry - range_width * 0.3 * REWARD_RISK)),
        };

        Signal::trade(ctx.symbol, self.name(), side, 0.55, entry, stop_loss, take_profit, "range_edge_fade")
    }
}
