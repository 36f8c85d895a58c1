// =============================================================================
// Central Application State — Aegis Trading Engine
// =============================================================================
//
// The single source of truth tying every subsystem together: configuration,
// the broker gateway, the technical analyzer and market context engine, the
// strategy set, risk manager, position book, news view and event log. All
// subsystems hold `Arc` references to their own internal state; `AppState`
// is the thing a dashboard handler or `main.rs` reaches for.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking.
//   - parking_lot::RwLock for mutable shared collections.
//   - Arc wrappers for subsystem engines that manage their own interior
//     mutability.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use crate::analyzer::TechnicalAnalyzer;
use crate::broker::BrokerGateway;
use crate::domain::{MarketContext, NewsView, Position};
use crate::events::EventRecord;
use crate::events::EventSink;
use crate::execution_supervisor::SupervisorCommand;
use crate::market_context::MarketContextEngine;
use crate::market_data::BarCache;
use crate::news::NewsService;
use crate::position::PositionManager;
use crate::risk::RiskEngine;
use crate::runtime_config::RuntimeConfig;
use crate::strategies::{
    BreakoutStrategy, CatamilhoStrategy, MeanReversionStrategy, NewsTradingStrategy, RangeTradingStrategy,
    ScalpingStrategy, Strategy, TrendFollowingStrategy,
};
use crate::strategy_manager::StrategyManager;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

const MAX_RECENT_ERRORS: usize = 50;
const BAR_CACHE_CAPACITY: usize = 500;

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    pub state_version: AtomicU64,
    pub ws_sequence_number: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub broker: Arc<dyn BrokerGateway>,

    pub bar_cache: Arc<BarCache>,
    pub analyzer: Arc<TechnicalAnalyzer>,
    pub market_context: Arc<MarketContextEngine>,
    pub strategy_manager: Arc<StrategyManager>,
    pub risk_engine: Arc<RiskEngine>,
    pub position_manager: Arc<PositionManager>,
    pub news: Arc<NewsService>,
    pub events: Arc<EventSink>,

    /// Per-symbol command channel into that symbol's Execution Supervisor
    /// task, populated once `execution_supervisor::spawn_all` has run.
    pub supervisor_commands: RwLock<HashMap<String, UnboundedSender<SupervisorCommand>>>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub last_reconcile_ok: RwLock<Option<Instant>>,
    pub last_reconcile_error: RwLock<Option<String>>,

    /// Whether a dashboard WebSocket client is currently attached.
    pub ws_user_connected: RwLock<bool>,
    pub last_ws_user_event: RwLock<Instant>,

    pub start_time: Instant,
}

impl AppState {
    /// Construct a new `AppState` from the given runtime configuration,
    /// broker gateway, and starting ledger balance (typically the broker's
    /// reported equity at startup).
    pub fn new(config: RuntimeConfig, broker: Arc<dyn BrokerGateway>, starting_balance: f64) -> Self {
        let bar_cache = Arc::new(BarCache::new(BAR_CACHE_CAPACITY));
        let analyzer = Arc::new(TechnicalAnalyzer::new(bar_cache.clone()));
        let market_context = Arc::new(MarketContextEngine::new(analyzer.clone()));
        let risk_engine = Arc::new(RiskEngine::new(starting_balance, config.risk.to_limits()));
        let position_manager = Arc::new(PositionManager::new());
        let events = Arc::new(EventSink::new());

        let mut news_service = NewsService::new(config.news.feed_url.clone());
        if let Some(sentiment_url) = &config.news.sentiment_feed_url {
            news_service = news_service.with_sentiment_feed(sentiment_url.clone());
        }
        let news = Arc::new(news_service);

        let strategies = build_strategies(&config);
        let strategy_manager = Arc::new(StrategyManager::new(strategies));

        Self {
            state_version: AtomicU64::new(1),
            ws_sequence_number: AtomicU64::new(0),

            runtime_config: Arc::new(RwLock::new(config)),
            broker,

            bar_cache,
            analyzer,
            market_context,
            strategy_manager,
            risk_engine,
            position_manager,
            news,
            events,

            supervisor_commands: RwLock::new(HashMap::new()),
            recent_errors: RwLock::new(Vec::new()),

            last_reconcile_ok: RwLock::new(None),
            last_reconcile_error: RwLock::new(None),

            ws_user_connected: RwLock::new(false),
            last_ws_user_event: RwLock::new(Instant::now()),

            start_time: Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord { message: msg, code, at: Utc::now().to_rfc3339() };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the engine's state. This
    /// is the payload sent to the dashboard via the REST `GET /api/v1/state`
    /// endpoint and the WebSocket push feed.
    pub fn build_snapshot(&self) -> StateSnapshot {
        let now = Utc::now();
        let config = self.runtime_config.read();
        let version = self.current_state_version();

        let risk_state = self.risk_engine.state();

        let truth = TruthHeader {
            reconcile_last_ok_age_s: self.last_reconcile_ok.read().map(|t| t.elapsed().as_secs()),
            reconcile_last_error: self.last_reconcile_error.read().clone(),
            state_version: version,
            ws_sequence_number: self.ws_sequence_number.load(Ordering::Relaxed),
            trading_mode: config.trading_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            trading_halted: risk_state.trading_halted,
            halt_reason: risk_state.halt_reason.clone(),
            server_time: now.timestamp_millis(),
        };

        let positions = self.position_manager.get_open();
        let recent_events = self.events.recent(100);

        let risk = RiskSnapshot {
            balance: self.risk_engine.balance(),
            peak_balance: risk_state.peak_balance,
            daily_pnl: risk_state.daily_pnl,
            daily_pnl_pct: risk_state.daily_pnl_pct,
            consecutive_losses: risk_state.consecutive_losses,
            daily_trades: risk_state.daily_trades,
            trading_halted: risk_state.trading_halted,
            halt_reason: risk_state.halt_reason,
        };

        let news_view = self.news.current();
        let market_context = self.build_market_context_snapshot(&config.trading.symbols, &news_view);

        let runtime_config_summary = RuntimeConfigSummary {
            trading_mode: config.trading_mode.to_string(),
            account_mode: config.account_mode.to_string(),
            symbols: config.trading.symbols.clone(),
            max_open_positions: config.trading.max_open_positions,
            max_risk_per_trade: config.risk.max_risk_per_trade,
            max_drawdown: config.risk.max_drawdown,
        };

        let recent_errors = self.recent_errors.read().clone();

        let closed_positions = self.position_manager.get_closed(500);
        let journal_stats = build_journal_stats(&closed_positions);

        StateSnapshot {
            state_version: version,
            server_time: now.timestamp_millis(),
            truth,
            positions,
            recent_events,
            risk,
            runtime_config: runtime_config_summary,
            recent_errors,
            market_context,
            news: news_view,
            journal_stats,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }

    fn build_market_context_snapshot(&self, symbols: &[String], news: &NewsView) -> HashMap<String, MarketContext> {
        let mut out = HashMap::new();
        for symbol in symbols {
            if let Ok(ctx) = self.market_context.build(symbol, news) {
                out.insert(symbol.clone(), ctx);
            }
        }
        out
    }
}

/// Build the concrete strategy set from configuration: strategies whose
/// config entry is disabled (or absent) are left out entirely rather than
/// built and filtered at evaluation time — an unconfigured strategy never
/// runs.
fn build_strategies(config: &RuntimeConfig) -> Vec<Box<dyn Strategy>> {
    let mut strategies: Vec<Box<dyn Strategy>> = Vec::new();
    let enabled = |name: &str| config.strategies.get(name).map(|s| s.enabled).unwrap_or(false);

    if enabled("trend_following") {
        strategies.push(Box::new(TrendFollowingStrategy));
    }
    if enabled("mean_reversion") {
        strategies.push(Box::new(MeanReversionStrategy));
    }
    if enabled("breakout") {
        strategies.push(Box::new(BreakoutStrategy));
    }
    if enabled("range_trading") {
        strategies.push(Box::new(RangeTradingStrategy));
    }
    if enabled("scalping") {
        strategies.push(Box::new(ScalpingStrategy));
    }
    if enabled("news_trading") {
        strategies.push(Box::new(NewsTradingStrategy));
    }
    if let Some(catamilho_cfg) = config.strategies.get("catamilho") {
        if catamilho_cfg.enabled {
            strategies.push(Box::new(CatamilhoStrategy::new(true, catamilho_cfg.allowed_symbols.clone())));
        }
    }

    strategies
}

fn build_journal_stats(closed: &[Position]) -> Option<JournalStats> {
    if closed.is_empty() {
        return None;
    }
    let total_trades = closed.len();
    let wins = closed.iter().filter(|p| p.realized_pnl.unwrap_or(0.0) > 0.0).count();
    let win_rate = wins as f64 / total_trades as f64;
    let total_net_pnl: f64 = closed.iter().filter_map(|p| p.realized_pnl).sum();
    let gross_profit: f64 = closed.iter().filter_map(|p| p.realized_pnl).filter(|&pnl| pnl > 0.0).sum();
    let gross_loss: f64 = closed.iter().filter_map(|p| p.realized_pnl).filter(|&pnl| pnl < 0.0).map(f64::abs).sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    Some(JournalStats { total_trades, win_rate, total_net_pnl, profit_factor })
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

/// Full engine state snapshot sent to the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub truth: TruthHeader,
    pub positions: Vec<Position>,
    pub recent_events: Vec<EventRecord>,
    pub risk: RiskSnapshot,
    pub runtime_config: RuntimeConfigSummary,
    pub recent_errors: Vec<ErrorRecord>,
    pub market_context: HashMap<String, MarketContext>,
    pub news: NewsView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub journal_stats: Option<JournalStats>,
    pub uptime_seconds: u64,
}

/// Operational truth header — the dashboard's primary status banner.
#[derive(Debug, Clone, Serialize)]
pub struct TruthHeader {
    pub reconcile_last_ok_age_s: Option<u64>,
    pub reconcile_last_error: Option<String>,
    pub state_version: u64,
    pub ws_sequence_number: u64,
    pub trading_mode: String,
    pub account_mode: String,
    pub trading_halted: bool,
    pub halt_reason: Option<String>,
    pub server_time: i64,
}

/// Risk engine snapshot for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSnapshot {
    pub balance: f64,
    pub peak_balance: f64,
    pub daily_pnl: f64,
    pub daily_pnl_pct: f64,
    pub consecutive_losses: i32,
    pub daily_trades: i32,
    pub trading_halted: bool,
    pub halt_reason: Option<String>,
}

/// Summary of runtime config for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfigSummary {
    pub trading_mode: String,
    pub account_mode: String,
    pub symbols: Vec<String>,
    pub max_open_positions: u32,
    pub max_risk_per_trade: f64,
    pub max_drawdown: f64,
}

/// Trade journal aggregate statistics.
#[derive(Debug, Clone, Serialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub total_net_pnl: f64,
    pub profit_factor: f64,
}
