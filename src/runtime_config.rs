// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the Aegis trading engine. Every tunable
// parameter lives here so that the engine can be reconfigured at runtime
// without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file. `${VAR}` placeholders in any
// string value are substituted from the process environment before JSON
// parsing, so broker credentials and webhook URLs never need to live in the
// file itself.
//
// =============================================================================

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::risk::RiskLimits;
use crate::types::{AccountMode, TradingMode};

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_symbols() -> Vec<String> {
    vec!["EURUSD".to_string(), "GBPUSD".to_string(), "USDJPY".to_string(), "XAUUSD".to_string()]
}

fn default_max_open_positions() -> u32 {
    4
}

fn default_max_lot_size() -> f64 {
    5.0
}

fn default_default_lot_size() -> f64 {
    0.1
}

fn default_spread_threshold_pips() -> f64 {
    3.0
}

fn default_max_risk_per_trade() -> f64 {
    1.0
}

fn default_max_drawdown() -> f64 {
    10.0
}

fn default_max_daily_loss() -> f64 {
    3.0
}

fn default_stop_loss_pips() -> f64 {
    30.0
}

fn default_take_profit_rr() -> f64 {
    2.0
}

fn default_trailing_stop_distance() -> f64 {
    15.0
}

fn default_breakeven_trigger_pips() -> f64 {
    20.0
}

fn default_max_consecutive_losses() -> i32 {
    4
}

fn default_max_daily_trades() -> i32 {
    20
}

fn default_trailing_trigger_rr() -> f64 {
    1.5
}

fn default_min_confidence() -> f64 {
    0.55
}

fn default_adx_strong() -> f64 {
    35.0
}

fn default_adx_trend() -> f64 {
    25.0
}

fn default_atr_high_ratio() -> f64 {
    2.0
}

fn default_atr_low_ratio() -> f64 {
    0.5
}

fn default_buffer_minutes() -> i64 {
    15
}

fn default_news_keywords() -> Vec<String> {
    vec!["NFP".to_string(), "CPI".to_string(), "FOMC".to_string(), "ECB".to_string(), "BOE".to_string()]
}

// =============================================================================
// RiskConfig
// =============================================================================

/// Risk manager tunables, keyed `risk.*` in the on-disk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Percentage of balance risked per trade, before the market context's
    /// regime multiplier is applied.
    #[serde(default = "default_max_risk_per_trade")]
    pub max_risk_per_trade: f64,

    /// Drawdown from peak balance, as a percentage, that trips the halt.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,

    /// Cumulative daily loss, as a percentage of the day's starting
    /// balance, that blocks further entries.
    #[serde(default = "default_max_daily_loss")]
    pub max_daily_loss: f64,

    /// Fallback stop-loss distance in pips, used only when a strategy's
    /// signal doesn't carry its own stop.
    #[serde(default = "default_stop_loss_pips")]
    pub stop_loss_pips: f64,

    /// Reward-to-risk ratio used to derive a fallback take-profit.
    #[serde(default = "default_take_profit_rr")]
    pub take_profit_rr: f64,

    /// Trailing stop distance in pips once trailing has activated.
    #[serde(default = "default_trailing_stop_distance")]
    pub trailing_stop_distance: f64,

    /// Whether the breakeven stop move is enabled at all.
    #[serde(default = "default_true")]
    pub breakeven_enabled: bool,

    /// Reward-to-risk, expressed in pips of favorable move, that triggers
    /// the breakeven stop.
    #[serde(default = "default_breakeven_trigger_pips")]
    pub breakeven_trigger_pips: f64,

    /// Losing streak length that blocks further entries until a win resets it.
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: i32,

    /// Ceiling on trades opened in a single trading day.
    #[serde(default = "default_max_daily_trades")]
    pub max_daily_trades: i32,

    /// Reward-to-risk, in multiples of the initial stop distance, that
    /// activates trailing (as opposed to the flat breakeven move above).
    #[serde(default = "default_trailing_trigger_rr")]
    pub trailing_trigger_rr: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_risk_per_trade: default_max_risk_per_trade(),
            max_drawdown: default_max_drawdown(),
            max_daily_loss: default_max_daily_loss(),
            stop_loss_pips: default_stop_loss_pips(),
            take_profit_rr: default_take_profit_rr(),
            trailing_stop_distance: default_trailing_stop_distance(),
            breakeven_enabled: true,
            breakeven_trigger_pips: default_breakeven_trigger_pips(),
            max_consecutive_losses: default_max_consecutive_losses(),
            max_daily_trades: default_max_daily_trades(),
            trailing_trigger_rr: default_trailing_trigger_rr(),
        }
    }
}

impl RiskConfig {
    /// Convert this config section into the `RiskLimits` the risk engine
    /// is built from. `breakeven_trigger_pips`/`stop_loss_pips` are carried
    /// as reward-to-risk multiples since the engine's own pure functions
    /// work in RR space, not raw pips.
    pub fn to_limits(&self) -> RiskLimits {
        let breakeven_trigger_rr = if self.breakeven_enabled {
            (self.breakeven_trigger_pips / self.stop_loss_pips.max(1.0)).max(0.1)
        } else {
            f64::INFINITY
        };
        RiskLimits {
            max_daily_loss_pct: self.max_daily_loss,
            max_consecutive_losses: self.max_consecutive_losses,
            max_drawdown_pct: self.max_drawdown,
            max_daily_trades: self.max_daily_trades,
            risk_per_trade_pct: self.max_risk_per_trade,
            breakeven_trigger_rr,
            trailing_trigger_rr: self.trailing_trigger_rr,
            trailing_distance_atr_mult: self.trailing_stop_distance / self.stop_loss_pips.max(1.0),
        }
    }
}

// =============================================================================
// TradingConfig
// =============================================================================

/// Symbol universe and per-order bounds, keyed `trading.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Symbols the engine watches and trades — one Execution Supervisor
    /// task is spawned per entry.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Ceiling on concurrently open positions across the account, on top
    /// of the market context's own per-regime ceiling.
    #[serde(default = "default_max_open_positions")]
    pub max_open_positions: u32,

    #[serde(default = "default_max_lot_size")]
    pub max_lot_size: f64,

    #[serde(default = "default_default_lot_size")]
    pub default_lot_size: f64,

    /// Spread, in pips, above which admission control blocks new entries.
    #[serde(default = "default_spread_threshold_pips")]
    pub spread_threshold_pips: f64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            max_open_positions: default_max_open_positions(),
            max_lot_size: default_max_lot_size(),
            default_lot_size: default_default_lot_size(),
            spread_threshold_pips: default_spread_threshold_pips(),
        }
    }
}

// =============================================================================
// StrategyConfig
// =============================================================================

/// Per-strategy switch and confidence floor, keyed `strategies.<name>.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Catamilho-only: the low-spread symbol allowlist it's permitted to
    /// scalp. Ignored by every other strategy.
    #[serde(default)]
    pub allowed_symbols: Vec<String>,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self { enabled: true, min_confidence: default_min_confidence(), allowed_symbols: Vec::new() }
    }
}

fn default_strategies() -> HashMap<String, StrategyConfig> {
    let mut m = HashMap::new();
    for name in ["trend_following", "mean_reversion", "breakout", "range_trading", "scalping", "news_trading"] {
        m.insert(name.to_string(), StrategyConfig::default());
    }
    // Catamilho is an optional, ultra-active scalper — opt-in per symbol.
    m.insert("catamilho".to_string(), StrategyConfig { enabled: false, ..StrategyConfig::default() });
    m
}

// =============================================================================
// MarketContextConfig
// =============================================================================

/// Regime-classification thresholds, keyed `market_context.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketContextConfig {
    #[serde(default = "default_adx_strong")]
    pub adx_strong: f64,

    #[serde(default = "default_adx_trend")]
    pub adx_trend: f64,

    #[serde(default = "default_atr_high_ratio")]
    pub atr_high_ratio: f64,

    #[serde(default = "default_atr_low_ratio")]
    pub atr_low_ratio: f64,
}

impl Default for MarketContextConfig {
    fn default() -> Self {
        Self {
            adx_strong: default_adx_strong(),
            adx_trend: default_adx_trend(),
            atr_high_ratio: default_atr_high_ratio(),
            atr_low_ratio: default_atr_low_ratio(),
        }
    }
}

// =============================================================================
// NewsConfig
// =============================================================================

/// News/calendar feed settings, keyed `news.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewsConfig {
    /// Minutes of blackout held before and after a high-impact event.
    #[serde(default = "default_buffer_minutes")]
    pub buffer_minutes: i64,

    /// Headline keywords the news-trading strategy treats as high-impact
    /// even absent an explicit calendar entry.
    #[serde(default = "default_news_keywords")]
    pub keywords: Vec<String>,

    #[serde(default)]
    pub feed_url: String,

    #[serde(default)]
    pub sentiment_feed_url: Option<String>,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            buffer_minutes: default_buffer_minutes(),
            keywords: default_news_keywords(),
            feed_url: String::new(),
            sentiment_feed_url: None,
        }
    }
}

// =============================================================================
// Per-symbol overrides
// =============================================================================

/// Sparse override shallow-merged onto the defaults above for one symbol.
/// Every field is optional; an absent field means "use the default".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolOverride {
    #[serde(default)]
    pub spread_threshold_pips: Option<f64>,
    #[serde(default)]
    pub max_lot_size: Option<f64>,
    #[serde(default)]
    pub max_risk_per_trade: Option<f64>,
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the Aegis engine.
///
/// Every field has a serde default so that older JSON files missing new
/// fields will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Current trading mode: Live, Paused, or Killed.
    #[serde(default)]
    pub trading_mode: TradingMode,

    /// Whether running against real funds or simulated: Demo or Live.
    #[serde(default)]
    pub account_mode: AccountMode,

    #[serde(default)]
    pub risk: RiskConfig,

    #[serde(default)]
    pub trading: TradingConfig,

    #[serde(default = "default_strategies")]
    pub strategies: HashMap<String, StrategyConfig>,

    #[serde(default)]
    pub market_context: MarketContextConfig,

    #[serde(default)]
    pub news: NewsConfig,

    /// Per-symbol overrides, shallow-merged onto the defaults above.
    #[serde(default)]
    pub symbol_overrides: HashMap<String, SymbolOverride>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_mode: TradingMode::Paused,
            account_mode: AccountMode::Demo,
            risk: RiskConfig::default(),
            trading: TradingConfig::default(),
            strategies: default_strategies(),
            market_context: MarketContextConfig::default(),
            news: NewsConfig::default(),
            symbol_overrides: HashMap::new(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`, substituting any
    /// `${VAR}` placeholder from the environment before parsing.
    ///
    /// Fails closed on a structurally invalid document or an empty symbol
    /// list; every other field is fail-open via its serde default.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read runtime config from {}", path.display()))?;
        let substituted = substitute_env_vars(&raw);

        let config: Self = serde_json::from_str(&substituted)
            .with_context(|| format!("failed to parse runtime config from {}", path.display()))?;

        if config.trading.symbols.is_empty() {
            bail!("runtime config at {} has an empty symbol list", path.display());
        }

        info!(
            path = %path.display(),
            symbols = ?config.trading.symbols,
            trading_mode = %config.trading_mode,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    ///
    /// This prevents corruption if the process crashes mid-write.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self).context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Resolve the effective spread threshold for `symbol`, honoring its
    /// override if present.
    pub fn spread_threshold_pips_for(&self, symbol: &str) -> f64 {
        self.symbol_overrides
            .get(symbol)
            .and_then(|o| o.spread_threshold_pips)
            .unwrap_or(self.trading.spread_threshold_pips)
    }

    /// Resolve the effective max lot size for `symbol`, honoring its
    /// override if present.
    pub fn max_lot_size_for(&self, symbol: &str) -> f64 {
        self.symbol_overrides.get(symbol).and_then(|o| o.max_lot_size).unwrap_or(self.trading.max_lot_size)
    }

    /// Resolve the effective per-trade risk percentage for `symbol`,
    /// honoring its override if present.
    pub fn max_risk_per_trade_for(&self, symbol: &str) -> f64 {
        self.symbol_overrides.get(symbol).and_then(|o| o.max_risk_per_trade).unwrap_or(self.risk.max_risk_per_trade)
    }
}

/// Replace every `${VAR}` placeholder with the value of the matching
/// environment variable, leaving the placeholder untouched if the variable
/// isn't set. Runs before JSON parsing so secrets never need to live in the
/// file on disk.
fn substitute_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i..].starts_with("${") {
            if let Some(rel_end) = input[i + 2..].find('}') {
                let end = i + 2 + rel_end;
                let var_name = &input[i + 2..end];
                match std::env::var(var_name) {
                    Ok(val) => out.push_str(&val),
                    Err(_) => out.push_str(&input[i..=end]),
                }
                i = end + 1;
                continue;
            }
        }
        let ch = input[i..].chars().next().expect("non-empty slice has a first char");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}
