// =============================================================================
// Strategy Set
// =============================================================================
//
// Each strategy is a pure, self-contained `Analyze(ctx) -> Signal` rule. A
// strategy never errors and never touches the broker or position book — it
// reads the indicator frames/market context/news view handed to it in
// `StrategyContext` and returns a `Signal`, HOLD included. The Strategy
// Manager owns selection, direction filtering and consensus across the set;
// strategies here are deliberately ignorant of each other.

use std::collections::HashMap;

use crate::domain::{MarketContext, NewsView, Position, Signal};
use crate::types::Timeframe;

pub mod breakout;
pub mod catamilho;
pub mod mean_reversion;
pub mod news_trading;
pub mod range_trading;
pub mod scalping;
pub mod trend_following;

pub use breakout::BreakoutStrategy;
pub use catamilho::CatamilhoStrategy;
pub use mean_reversion::MeanReversionStrategy;
pub use news_trading::NewsTradingStrategy;
pub use range_trading::RangeTradingStrategy;
pub use scalping::ScalpingStrategy;
pub use trend_following::TrendFollowingStrategy;

/// Everything a strategy needs to produce a `Signal` for one symbol on one
/// tick. Borrowed, not owned — built fresh by the Strategy Manager each tick
/// and handed to every strategy in the active set.
pub struct StrategyContext<'a> {
    pub symbol: &'a str,
    pub frames: &'a HashMap<Timeframe, crate::domain::IndicatorFrame>,
    pub market: &'a MarketContext,
    pub news: &'a NewsView,
    pub open_positions: &'a [Position],
    pub spread: f64,
}

impl<'a> StrategyContext<'a> {
    pub fn frame(&self, tf: Timeframe) -> Option<&crate::domain::IndicatorFrame> {
        self.frames.get(&tf)
    }

    pub fn has_open_position(&self) -> bool {
        self.open_positions.iter().any(|p| p.symbol == self.symbol && p.is_open())
    }
}

/// A single rule-based trading strategy. Implementors must be stateless or
/// hold only their own internal bookkeeping (e.g. Catamilho's state
/// machine) — never shared mutable state owned by another component.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy participates at all, independent of the
    /// per-tick market context (a static config switch).
    fn is_enabled(&self) -> bool {
        true
    }

    fn analyze(&self, ctx: &StrategyContext<'_>) -> Signal;
}
