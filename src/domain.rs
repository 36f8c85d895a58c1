// =============================================================================
// Core domain model for the trading engine
// =============================================================================
//
// These types are the vocabulary shared by the analyzer, market context
// engine, strategies, risk manager and execution supervisor. Centralising
// them here keeps every component speaking the same shapes instead of each
// module growing its own bar/position/signal structs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Action, Side, Timeframe};

/// A single OHLCV bar. `time` is the bar's open time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Static instrument metadata needed for position sizing and order validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub pip_size: f64,
    pub lot_step: f64,
    pub min_lot: f64,
    pub max_lot: f64,
    pub contract_size: f64,
}

/// Snapshot of every indicator value the analyzer produces for one symbol on
/// one timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorFrame {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub computed_at: DateTime<Utc>,
    pub close: f64,
    pub ema9: f64,
    pub ema21: f64,
    pub ema50: f64,
    pub ema200: f64,
    pub sma20: f64,
    pub rsi14: f64,
    pub macd_line: f64,
    pub macd_signal: f64,
    pub macd_histogram: f64,
    pub atr14: f64,
    pub atr_pct: f64,
    /// Mean ATR14 over the available bar history, used to scale the current
    /// reading into the regime classifier's relative-volatility bands.
    pub atr_avg: f64,
    /// Percentile rank (0.0-1.0) of the current Bollinger width within its
    /// own historical distribution; low values flag a volatility squeeze.
    pub bb_width_percentile: f64,
    pub adx14: f64,
    pub di_plus: f64,
    pub di_minus: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub bb_width: f64,
    pub stoch_k: f64,
    pub stoch_d: f64,
    pub donchian_upper: f64,
    pub donchian_lower: f64,
    pub keltner_upper: f64,
    pub keltner_lower: f64,
}

/// Per-timeframe directional verdict produced by the analyzer's voting step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrendVerdict {
    StrongUp,
    Up,
    Neutral,
    Down,
    StrongDown,
}

impl TrendVerdict {
    pub fn score(self) -> i32 {
        match self {
            Self::StrongUp => 2,
            Self::Up => 1,
            Self::Neutral => 0,
            Self::Down => -1,
            Self::StrongDown => -2,
        }
    }

    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 2 => Self::StrongUp,
            1 => Self::Up,
            0 => Self::Neutral,
            -1 => Self::Down,
            _ => Self::StrongDown,
        }
    }
}

impl std::fmt::Display for TrendVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StrongUp => "STRONG_UP",
            Self::Up => "UP",
            Self::Neutral => "NEUTRAL",
            Self::Down => "DOWN",
            Self::StrongDown => "STRONG_DOWN",
        };
        write!(f, "{s}")
    }
}

/// The engine's seven-level macro-direction read, used to gate strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacroDirection {
    StrongBull,
    Bull,
    WeakBull,
    Sideways,
    WeakBear,
    Bear,
    StrongBear,
}

impl std::fmt::Display for MacroDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StrongBull => "STRONG_BULL",
            Self::Bull => "BULL",
            Self::WeakBull => "WEAK_BULL",
            Self::Sideways => "SIDEWAYS",
            Self::WeakBear => "WEAK_BEAR",
            Self::Bear => "BEAR",
            Self::StrongBear => "STRONG_BEAR",
        };
        write!(f, "{s}")
    }
}

/// Volatility/trend regime classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    TrendingStrong,
    TrendingWeak,
    Ranging,
    HighVolatility,
    LowVolatility,
    Breakout,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::TrendingStrong => "TRENDING_STRONG",
            Self::TrendingWeak => "TRENDING_WEAK",
            Self::Ranging => "RANGING",
            Self::HighVolatility => "HIGH_VOLATILITY",
            Self::LowVolatility => "LOW_VOLATILITY",
            Self::Breakout => "BREAKOUT",
        };
        write!(f, "{s}")
    }
}

/// Output of the Market Context Engine: the macro read a strategy consults
/// before proposing a trade. Immutable once built for a given tick — callers
/// hold an `Arc<MarketContext>` snapshot rather than mutating it in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContext {
    pub symbol: String,
    pub computed_at: DateTime<Utc>,
    pub macro_direction: MacroDirection,
    /// Direction read off the lower timeframe alone (`tf_direction` on H1);
    /// consulted when `macro_direction` is `Sideways`.
    pub short_term_direction: MacroDirection,
    pub regime: MarketRegime,
    pub regime_strength: f64,
    pub htf_trend: TrendVerdict,
    pub mtf_trend: TrendVerdict,
    pub ltf_trend: TrendVerdict,
    pub volatility_pct: f64,
    pub recommended_strategies: Vec<String>,
    pub news_blackout: bool,
    /// Directions a strategy is permitted to signal this tick. Empty means
    /// no BUY/SELL signal may be produced regardless of strategy confidence.
    pub allowed_directions: Vec<Side>,
    /// Scales the base per-trade risk percentage; fixed by regime.
    pub risk_multiplier: f64,
    /// Ceiling on concurrently open positions for this symbol; fixed by regime.
    pub max_positions: u32,
}

impl MarketContext {
    pub fn allows(&self, side: Side) -> bool {
        self.allowed_directions.contains(&side)
    }
}

/// A proposed trade emitted by a strategy, before risk sizing is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub strategy_name: String,
    pub action: Action,
    pub confidence: f64,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    pub fn side(&self) -> Option<Side> {
        self.action.as_side()
    }

    /// A no-trade verdict carrying a machine-readable reason code. Every
    /// strategy returns this instead of an error when it has nothing to do.
    pub fn hold(symbol: &str, strategy_name: &str, reason: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            strategy_name: strategy_name.to_string(),
            action: Action::Hold,
            confidence: 0.0,
            entry_price: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn trade(
        symbol: &str,
        strategy_name: &str,
        side: Side,
        confidence: f64,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            strategy_name: strategy_name.to_string(),
            action: Action::from(side),
            confidence: confidence.clamp(0.0, 1.0),
            entry_price,
            stop_loss,
            take_profit,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle stage of a managed position's protective stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopState {
    Open,
    AtBreakeven,
    Trailing,
    Closed,
}

/// An open (or just-closed) position under the supervisor's management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub ticket: String,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub entry_price: f64,
    pub current_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub open_time: DateTime<Utc>,
    pub strategy: String,
    pub stop_state: StopState,
    pub highest_favorable_price: f64,
    pub unrealized_pnl: f64,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<f64>,
    pub close_reason: Option<String>,
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.stop_state != StopState::Closed
    }

    /// Mark-to-market the position at `price`. Returns the new unrealized PnL.
    pub fn mark(&mut self, price: f64) -> f64 {
        self.current_price = price;
        let direction = match self.side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };
        self.unrealized_pnl = (price - self.entry_price) * direction * self.volume;
        let favorable = match self.side {
            Side::Buy => price,
            Side::Sell => -price,
        };
        let current_best = match self.side {
            Side::Buy => self.highest_favorable_price,
            Side::Sell => -self.highest_favorable_price,
        };
        if favorable > current_best {
            self.highest_favorable_price = price;
        }
        self.unrealized_pnl
    }
}

/// Rolling risk-engine state for one trading day, per spec's monotonic
/// peak-balance / daily-reset split: `peak_balance` only ever resets on a new
/// equity high, `daily_pnl*` resets at UTC midnight rollover.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskState {
    pub date: chrono::NaiveDate,
    pub peak_balance: f64,
    pub daily_starting_balance: f64,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub consecutive_losses: i32,
    pub daily_trades: i32,
    pub trading_halted: bool,
    pub halt_reason: Option<String>,
}

/// Macro/news calendar read consulted by the context engine and news-aware
/// strategies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsView {
    pub fetched_at: DateTime<Utc>,
    pub upcoming_high_impact: Vec<NewsEvent>,
    pub blackout_active: bool,
    /// Aggregated sentiment across recently analyzed news articles, used by
    /// the News Trading strategy. `-1.0` (bearish) .. `1.0` (bullish).
    pub overall_sentiment: f64,
    pub polarity_avg: f64,
    pub sentiment_counts: SentimentCounts,
    pub total_analyzed: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct SentimentCounts {
    pub bullish: u32,
    pub bearish: u32,
    pub neutral: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsEvent {
    pub title: String,
    pub currency: String,
    pub impact: NewsImpact,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NewsImpact {
    Low,
    Medium,
    High,
}

impl Default for NewsView {
    fn default() -> Self {
        Self {
            fetched_at: Utc::now(),
            upcoming_high_impact: Vec::new(),
            blackout_active: false,
            overall_sentiment: 0.0,
            polarity_avg: 0.0,
            sentiment_counts: SentimentCounts::default(),
            total_analyzed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_verdict_roundtrip() {
        for v in [
            TrendVerdict::StrongUp,
            TrendVerdict::Up,
            TrendVerdict::Neutral,
            TrendVerdict::Down,
            TrendVerdict::StrongDown,
        ] {
            assert_eq!(TrendVerdict::from_score(v.score()), v);
        }
    }

    #[test]
    fn position_mark_buy_pnl() {
        let mut pos = Position {
            ticket: "t1".into(),
            symbol: "EURUSD".into(),
            side: Side::Buy,
            volume: 1.0,
            entry_price: 1.1000,
            current_price: 1.1000,
            stop_loss: 1.0950,
            take_profit: 1.1100,
            open_time: Utc::now(),
            strategy: "trend_following".into(),
            stop_state: StopState::Open,
            highest_favorable_price: 1.1000,
            unrealized_pnl: 0.0,
            closed_at: None,
            realized_pnl: None,
            close_reason: None,
        };
        let pnl = pos.mark(1.1050);
        assert!((pnl - 0.0050).abs() < 1e-9);
        assert!((pos.highest_favorable_price - 1.1050).abs() < 1e-9);
    }

    #[test]
    fn position_mark_sell_pnl() {
        let mut pos = Position {
            ticket: "t2".into(),
            symbol: "EURUSD".into(),
            side: Side::Sell,
            volume: 1.0,
            entry_price: 1.1000,
            current_price: 1.1000,
            stop_loss: 1.1050,
            take_profit: 1.0900,
            open_time: Utc::now(),
            strategy: "mean_reversion".into(),
            stop_state: StopState::Open,
            highest_favorable_price: 1.1000,
            unrealized_pnl: 0.0,
            closed_at: None,
            realized_pnl: None,
            close_reason: None,
        };
        let pnl = pos.mark(1.0950);
        assert!((pnl - 0.0050).abs() < 1e-9);
        assert!((pos.highest_favorable_price - 1.0950).abs() < 1e-9);
    }
}
