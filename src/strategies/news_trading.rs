// News trading: the one strategy allowed to act purely on sentiment.
// Blocked outright during a calendar blocking window (own dedicated
// `news_blocking_window` reason, independent of `MarketContext`'s
// allowed-direction gating) and otherwise requires a decisive, well
// sampled sentiment read before trading the headline flow.

use crate::domain::Signal;
use crate::types::{Side, Timeframe};

use super::{Strategy, StrategyContext};

const MIN_ARTICLES: u32 = 5;
const SENTIMENT_THRESHOLD: f64 = 0.3;
const ATR_MULT_SL: f64 = 1.0;
const REWARD_RISK: f64 = 1.8;

pub struct NewsTradingStrategy;

impl Strategy for NewsTradingStrategy {
    fn name(&self) -> &'static str {
        "news_trading"
    }

    fn analyze(&self, ctx: &StrategyContext<'_>) -> Signal {
        if ctx.news.blackout_active {
            return Signal::hold(ctx.symbol, self.name(), "news_blocking_window");
        }

        if ctx.news.total_analyzed < MIN_ARTICLES {
            return Signal::hold(ctx.symbol, self.name(), "insufficient_article_sample");
        }

        let side = if ctx.news.overall_sentiment >= SENTIMENT_THRESHOLD {
            Side::Buy
        } else if ctx.news.overall_sentiment <= -SENTIMENT_THRESHOLD {
            Side::Sell
        } else {
            return Signal::hold(ctx.symbol, self.name(), "sentiment_inconclusive");
        };

        if !ctx.market.allows(side) {
            return Signal::hold(ctx.symbol, self.name(), "macro_direction_disagrees");
        }

        let entry_frame = ctx.frame(Timeframe::M15).or_else(|| ctx.frame(Timeframe::H1));
        let Some(frame) = entry_frame else {
            return Signal::hold(ctx.symbol, self.name(), "no_data");
        };

        let entry = frame.close;
        let stop_distance = frame.atr14 * ATR_MULT_SL;
        let (stop_loss, take_profit) = match side {
            Side::Buy => (entry - stop_distance, entry + stop_distance * REWARD_RISK),
            Side::Sell => (entry + stop_distance, entry - stop_distance * REWARD_RISK),
        };

        let confidence = ctx.news.overall_sentiment.abs().clamp(0.3, 0.9);

        Signal::trade(ctx.symbol, self.name(), side, confidence, entry, stop_loss, take_profit, "news_sentiment_driven")
    }
}
