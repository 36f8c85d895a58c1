// Catamilho: an optional, ultra-active M1 scalper restricted to a
// configured low-spread symbol allowlist. Runs its own
// IDLE -> ARMED -> IN_TRADE -> COOLDOWN state machine gated on a 0-100
// session-viability score (>= 60 to even arm), with a progressive cooldown
// that lengthens on back-to-back exits and decays after a quiet spell.
// Disabled by default — callers opt a symbol in via `allowed_symbols`.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::domain::Signal;
use crate::types::{Side, Timeframe};

use super::{Strategy, StrategyContext};

const VIABILITY_THRESHOLD: f64 = 60.0;
const BASE_COOLDOWN_MINUTES: i64 = 5;
const MAX_COOLDOWN_MINUTES: i64 = 30;
const STRIKE_DECAY_AFTER_MINUTES: i64 = 60;
const ATR_MULT_SL: f64 = 0.5;
const REWARD_RISK: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Armed(Side),
    InTrade,
    Cooldown,
}

struct State {
    phase: Phase,
    cooldown_until: Option<DateTime<Utc>>,
    last_exit_at: Option<DateTime<Utc>>,
    strikes: u32,
}

impl Default for State {
    fn default() -> Self {
        Self { phase: Phase::Idle, cooldown_until: None, last_exit_at: None, strikes: 0 }
    }
}

pub struct CatamilhoStrategy {
    enabled: bool,
    allowed_symbols: Vec<String>,
    state: Mutex<State>,
}

impl CatamilhoStrategy {
    pub fn new(enabled: bool, allowed_symbols: Vec<String>) -> Self {
        Self { enabled, allowed_symbols, state: Mutex::new(State::default()) }
    }
}

impl Strategy for CatamilhoStrategy {
    fn name(&self) -> &'static str {
        "catamilho"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn analyze(&self, ctx: &StrategyContext<'_>) -> Signal {
        if !self.allowed_symbols.iter().any(|s| s == ctx.symbol) {
            return Signal::hold(ctx.symbol, self.name(), "symbol_not_allowlisted");
        }

        let Some(m1) = ctx.frame(Timeframe::M1) else {
            return Signal::hold(ctx.symbol, self.name(), "no_data");
        };

        let in_trade = ctx.open_positions.iter().any(|p| p.symbol == ctx.symbol && p.strategy == self.name() && p.is_open());

        let mut state = self.state.lock();
        let now = Utc::now();

        if in_trade {
            state.phase = Phase::InTrade;
            return Signal::hold(ctx.symbol, self.name(), "in_trade_managed_by_supervisor");
        }

        if state.phase == Phase::InTrade {
            // Position just closed: enter a progressive cooldown.
            if let Some(last_exit) = state.last_exit_at {
                if now - last_exit > Duration::minutes(STRIKE_DECAY_AFTER_MINUTES) {
                    state.strikes = 0;
                }
            }
            state.strikes += 1;
            let minutes = (BASE_COOLDOWN_MINUTES * state.strikes as i64).min(MAX_COOLDOWN_MINUTES);
            state.cooldown_until = Some(now + Duration::minutes(minutes));
            state.last_exit_at = Some(now);
            state.phase = Phase::Cooldown;
            return Signal::hold(ctx.symbol, self.name(), "cooldown_started");
        }

        if state.phase == Phase::Cooldown {
            match state.cooldown_until {
                Some(until) if now < until => return Signal::hold(ctx.symbol, self.name(), "cooldown_active"),
                _ => state.phase = Phase::Idle,
            }
        }

        let viability = session_viability(ctx.spread, m1.atr_pct, m1.adx14);
        if viability < VIABILITY_THRESHOLD {
            state.phase = Phase::Idle;
            return Signal::hold(ctx.symbol, self.name(), "session_viability_below_threshold");
        }

        let momentum_side = if m1.ema9 > m1.ema21 && m1.macd_histogram > 0.0 {
            Some(Side::Buy)
        } else if m1.ema9 < m1.ema21 && m1.macd_histogram < 0.0 {
            Some(Side::Sell)
        } else {
            None
        };

        match (state.phase, momentum_side) {
            (Phase::Idle, Some(side)) => {
                state.phase = Phase::Armed(side);
                Signal::hold(ctx.symbol, self.name(), "armed_awaiting_confirmation")
            }
            (Phase::Idle, None) => Signal::hold(ctx.symbol, self.name(), "idle_no_setup"),
            (Phase::Armed(armed_side), Some(side)) if side == armed_side => {
                if !ctx.market.allows(side) {
                    state.phase = Phase::Idle;
                    return Signal::hold(ctx.symbol, self.name(), "macro_direction_disagrees");
                }
                state.phase = Phase::InTrade;
                let entry = m1.close;
                let stop_distance = m1.atr14 * ATR_MULT_SL;
                let (stop_loss, take_profit) = match side {
                    Side::Buy => (entry - stop_distance, entry + stop_distance * REWARD_RISK),
                    Side::Sell => (entry + stop_distance, entry - stop_distance * REWARD_RISK),
                };
                Signal::trade(ctx.symbol, self.name(), side, 0.5, entry, stop_loss, take_profit, "momentum_confirmed")
            }
            (Phase::Armed(_), _) => {
                state.phase = Phase::Idle;
                Signal::hold(ctx.symbol, self.name(), "setup_invalidated")
            }
            _ => Signal::hold(ctx.symbol, self.name(), "idle_no_setup"),
        }
    }
}

/// 0-100 score: tight spread and ATR/ADX sitting in the band this scalper
/// needs to clear its costs.
fn session_viability(spread: f64, atr_pct: f64, adx: f64) -> f64 {
    let spread_score = (1.0 - (spread / 0.00015).min(1.0)) * 50.0;
    let atr_score = if (0.05..=0.6).contains(&atr_pct) { 30.0 } else { 0.0 };
    let adx_score = if adx < 30.0 { 20.0 } else { 10.0 };
    spread_score + atr_score + adx_score
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::domain::{IndicatorFrame, MacroDirection, MarketContext, MarketRegime, NewsView};

    fn frame(ema9: f64, ema21: f64, macd_hist: f64, atr_pct: f64, adx: f64, close: f64) -> IndicatorFrame {
        IndicatorFrame {
            symbol: "EURUSD".into(),
            timeframe: Timeframe::M1,
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
            atr14: 0.0003,
            atr_pct,
            adx14: adx,
            di_plus: 15.0,
            di_minus: 15.0,
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

    fn market() -> MarketContext {
        MarketContext {
            symbol: "EURUSD".into(),
            computed_at: chrono::Utc::now(),
            macro_direction: MacroDirection::Sideways,
            short_term_direction: MacroDirection::Sideways,
            regime: MarketRegime::LowVolatility,
            regime_strength: 0.2,
            htf_trend: crate::domain::TrendVerdict::Neutral,
            mtf_trend: crate::domain::TrendVerdict::Neutral,
            ltf_trend: crate::domain::TrendVerdict::Neutral,
            volatility_pct: 0.2,
            recommended_strategies: vec![],
            news_blackout: false,
            allowed_directions: vec![Side::Buy, Side::Sell],
            risk_multiplier: 0.3,
            max_positions: 1,
        }
    }

    #[test]
    fn symbol_not_allowlisted_holds() {
        let strat = CatamilhoStrategy::new(true, vec!["GBPUSD".into()]);
        let frames = HashMap::new();
        let news = NewsView::default();
        let mkt = market();
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.0001 };
        let sig = strat.analyze(&ctx);
        assert_eq!(sig.reason, "symbol_not_allowlisted");
    }

    #[test]
    fn arms_then_confirms_into_a_trade() {
        let strat = CatamilhoStrategy::new(true, vec!["EURUSD".into()]);
        let mut frames = HashMap::new();
        frames.insert(Timeframe::M1, frame(1.1012, 1.1010, 0.0002, 0.2, 15.0, 1.1015));
        let news = NewsView::default();
        let mkt = market();
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.00002 };

        let first = strat.analyze(&ctx);
        assert_eq!(first.reason, "armed_awaiting_confirmation");

        let second = strat.analyze(&ctx);
        assert_eq!(second.side(), Some(Side::Buy));
    }

    #[test]
    fn low_viability_never_arms() {
        let strat = CatamilhoStrategy::new(true, vec!["EURUSD".into()]);
        let mut frames = HashMap::new();
        frames.insert(Timeframe::M1, frame(1.1012, 1.1010, 0.0002, 0.2, 15.0, 1.1015));
        let news = NewsView::default();
        let mkt = market();
        // Wide spread tanks the viability score below threshold.
        let ctx = StrategyContext { symbol: "EURUSD", frames: &frames, market: &mkt, news: &news, open_positions: &[], spread: 0.0005 };
        let sig = strat.analyze(&ctx);
        assert_eq!(sig.reason, "session_viability_below_threshold");
    }
}
