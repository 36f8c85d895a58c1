// =============================================================================
// Execution Supervisor
// =============================================================================
//
// Owns the process-wide per-symbol main loop: refreshes indicators and
// market context, asks the strategy manager for a signal, sizes and admits
// it through the risk manager, submits orders through the broker gateway,
// and manages the stop lifecycle (breakeven/trailing) of every open
// position on the symbol. One supervisor instance per symbol; ticks for the
// same symbol are strictly serial, ticks across symbols run concurrently
// under tokio.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

use crate::analyzer::TechnicalAnalyzer;
use crate::broker::BrokerGateway;
use crate::domain::{NewsView, StopState};
use crate::events::{Event, EventSink};
use crate::market_context::MarketContextEngine;
use crate::news::NewsService;
use crate::position::PositionManager;
use crate::risk::{AdmissionCheck, RiskEngine};
use crate::strategies::StrategyContext;
use crate::strategy_manager::StrategyManager;
use crate::types::Timeframe;

/// Timeframes every tick asks the analyzer to refresh. The strategy set
/// reaches for a subset of these per signal; keeping one fixed list here
/// means a new strategy never needs a supervisor change to get its data.
const TICK_TIMEFRAMES: &[Timeframe] =
    &[Timeframe::M1, Timeframe::M5, Timeframe::M15, Timeframe::M30, Timeframe::H1, Timeframe::H4, Timeframe::D1];

/// Minimum strategy confidence required before a signal is sized and sent
/// to admission control.
const MIN_CONFIDENCE: f64 = 0.55;

/// Operator commands accepted between ticks. Never interrupts an in-flight
/// order submission.
#[derive(Debug, Clone)]
pub enum SupervisorCommand {
    Pause,
    Resume,
    CloseAll,
    Stop,
}

struct ReconnectPolicy {
    max_attempts: u32,
    base_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(500) }
    }
}

/// Per-symbol supervisor. Holds no state of its own beyond the command
/// channel and pause flag — positions/risk live in the shared engines it is
/// handed at construction.
pub struct ExecutionSupervisor {
    symbol: String,
    broker: Arc<dyn BrokerGateway>,
    analyzer: Arc<TechnicalAnalyzer>,
    market_context: Arc<MarketContextEngine>,
    strategy_manager: Arc<StrategyManager>,
    risk: Arc<RiskEngine>,
    positions: Arc<PositionManager>,
    news: Arc<NewsService>,
    events: Arc<EventSink>,
    spread_threshold: f64,
    tick_interval: Duration,
    paused: AtomicBool,
    reconnect: ReconnectPolicy,
}

impl ExecutionSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        broker: Arc<dyn BrokerGateway>,
        analyzer: Arc<TechnicalAnalyzer>,
        market_context: Arc<MarketContextEngine>,
        strategy_manager: Arc<StrategyManager>,
        risk: Arc<RiskEngine>,
        positions: Arc<PositionManager>,
        news: Arc<NewsService>,
        events: Arc<EventSink>,
        spread_threshold: f64,
        tick_interval: Duration,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            broker,
            analyzer,
            market_context,
            strategy_manager,
            risk,
            positions,
            news,
            events,
            spread_threshold,
            tick_interval,
            paused: AtomicBool::new(false),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Run ticks on `tick_interval` until `commands` receives `Stop` or is
    /// dropped. Each tick awaits completion before the next is scheduled —
    /// within a symbol there is never more than one in-flight tick.
    pub async fn run(self: Arc<Self>, mut commands: mpsc::UnboundedReceiver<SupervisorCommand>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if self.paused.load(Ordering::Relaxed) {
                        continue;
                    }
                    if let Err(err) = self.tick().await {
                        error!(symbol = %self.symbol, %err, "tick failed");
                        self.events.push(Event::BrokerError { symbol: self.symbol.clone(), message: err.to_string() });
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(SupervisorCommand::Pause) => self.paused.store(true, Ordering::Relaxed),
                        Some(SupervisorCommand::Resume) => self.paused.store(false, Ordering::Relaxed),
                        Some(SupervisorCommand::CloseAll) => self.close_all("operator_close_all").await,
                        Some(SupervisorCommand::Stop) | None => {
                            info!(symbol = %self.symbol, "supervisor stopping");
                            return;
                        }
                    }
                }
            }
        }
    }

    #[instrument(skip(self), name = "supervisor::tick", fields(symbol = %self.symbol))]
    async fn tick(&self) -> anyhow::Result<()> {
        self.ensure_connected().await?;

        let news = self.news.current();
        let signal_result = self.evaluate_signal(&news).await;
        match signal_result {
            Ok(Some(())) => {}
            Ok(None) => {}
            Err(err) => warn!(symbol = %self.symbol, %err, "signal evaluation failed this tick"),
        }

        self.manage_open_positions().await?;
        Ok(())
    }

    /// Steps 2-6 of the per-tick algorithm: refresh news-driven view is the
    /// caller's job (news refresh runs on its own background cadence),
    /// recompute indicators/context, ask the strategy manager, and admit or
    /// reject the resulting signal.
    async fn evaluate_signal(&self, news: &NewsView) -> anyhow::Result<Option<()>> {
        let frames = self.analyzer.analyze_multi(&self.symbol, TICK_TIMEFRAMES);
        let market = self.market_context.build(&self.symbol, news)?;

        let open_positions = self.positions.get_open_for_symbol(&self.symbol);
        let spread = self.broker.spread(&self.symbol).await.unwrap_or(self.spread_threshold);

        let ctx = StrategyContext {
            symbol: &self.symbol,
            frames: &frames,
            market: &market,
            news,
            open_positions: &open_positions,
            spread,
        };
        let signal = self.strategy_manager.evaluate(&ctx);

        let Some(side) = signal.side() else {
            return Ok(None);
        };
        if signal.confidence < MIN_CONFIDENCE {
            self.events.push(Event::SignalRejected {
                symbol: self.symbol.clone(),
                strategy: signal.strategy_name.clone(),
                reason: "confidence_below_threshold".to_string(),
            });
            return Ok(None);
        }

        // Strategies normally derive their own stops, but a consensus signal
        // built from a single HOLD-filtered vote can still arrive without
        // one; fall back to an ATR-derived stop/target in that case.
        let (stop_loss, take_profit) = if signal.stop_loss > 0.0 && signal.take_profit > 0.0 {
            (signal.stop_loss, signal.take_profit)
        } else {
            let atr = frames.get(&Timeframe::H1).map(|f| f.atr14).unwrap_or(0.0);
            let sl = self.risk.stop_loss(side, signal.entry_price, atr, 1.5);
            let tp = self.risk.take_profit(side, signal.entry_price, sl, 1.5);
            (sl, tp)
        };

        let symbol_info = self.broker.symbol_info(&self.symbol).await?;
        let lots =
            self.risk.position_size_for_symbol(signal.entry_price, stop_loss, &symbol_info, market.risk_multiplier);
        if lots <= 0.0 {
            self.events.push(Event::SignalRejected {
                symbol: self.symbol.clone(),
                strategy: signal.strategy_name.clone(),
                reason: "position_size_zero".to_string(),
            });
            return Ok(None);
        }

        let account = self.broker.account().await?;
        let admission = AdmissionCheck {
            open_positions: open_positions.len() as u32,
            max_positions: market.max_positions,
            estimated_margin: lots * symbol_info.contract_size * signal.entry_price / 100.0,
            free_margin: (account.equity - account.margin_used).max(0.0),
            spread,
            spread_threshold: self.spread_threshold,
        };
        let (can_open, reason) = self.risk.can_open_position(&admission);
        if !can_open {
            let reason = reason.unwrap_or_else(|| "unknown".to_string());
            self.events.push(Event::SignalRejected {
                symbol: self.symbol.clone(),
                strategy: signal.strategy_name.clone(),
                reason,
            });
            return Ok(None);
        }

        let ticket = self.broker.open_position(&self.symbol, side, lots, stop_loss, take_profit).await?;

        self.positions.open_position(
            &self.symbol,
            side,
            ticket.volume,
            ticket.fill_price,
            stop_loss,
            take_profit,
            &signal.strategy_name,
        );
        info!(symbol = %self.symbol, strategy = %signal.strategy_name, ticket = %ticket.ticket, "position opened");
        self.events.push(Event::PositionOpened { ticket: ticket.ticket, symbol: self.symbol.clone() });
        Ok(Some(()))
    }

    /// Step 7: mark every open position to market, advance its protective
    /// stop, and detect broker-reported closure.
    async fn manage_open_positions(&self) -> anyhow::Result<()> {
        let open = self.positions.get_open_for_symbol(&self.symbol);
        if open.is_empty() {
            return Ok(());
        }

        let price = self.broker.current_price(&self.symbol).await?;
        let sl_tp_hits = self.positions.mark_price(&self.symbol, price);
        let broker_positions = self.broker.open_positions().await?;
        let broker_tickets: std::collections::HashSet<&str> =
            broker_positions.iter().map(|p| p.ticket.as_str()).collect();

        for pos in &open {
            if !broker_tickets.contains(pos.ticket.as_str()) {
                self.close_and_register(&pos.ticket, price, exit_reason(pos, price)).await;
                continue;
            }
            if sl_tp_hits.contains(&pos.ticket) {
                self.close_and_register(&pos.ticket, price, exit_reason(pos, price)).await;
                continue;
            }

            let initial_stop_distance = (pos.entry_price - pos.stop_loss).abs();
            let frame = self.analyzer.analyze(&self.symbol, Timeframe::H1).ok();
            let atr = frame.as_ref().map(|f| f.atr14).unwrap_or(0.0);

            if pos.stop_state != StopState::AtBreakeven && self.risk.should_move_to_breakeven(pos, initial_stop_distance) {
                self.move_stop(&pos.ticket, pos.entry_price, StopState::AtBreakeven, "breakeven").await;
            } else if let Some(new_stop) = self.risk.trailing_stop(pos, initial_stop_distance, atr) {
                self.move_stop(&pos.ticket, new_stop, StopState::Trailing, "trailing").await;
            }
        }
        Ok(())
    }

    async fn move_stop(&self, ticket: &str, new_stop: f64, state: StopState, stage: &str) {
        match self.broker.modify_stop(ticket, new_stop).await {
            Ok(()) => {
                self.positions.apply_stop(ticket, new_stop, state);
                self.events.push(Event::StopAdjusted { ticket: ticket.to_string(), new_stop, stage: stage.to_string() });
            }
            Err(err) if err.is_retryable() => {
                if self.broker.modify_stop(ticket, new_stop).await.is_ok() {
                    self.positions.apply_stop(ticket, new_stop, state);
                    self.events.push(Event::StopAdjusted { ticket: ticket.to_string(), new_stop, stage: stage.to_string() });
                } else {
                    warn!(ticket, stage, "stop modification failed after retry, keeping existing stop");
                }
            }
            Err(err) => warn!(ticket, stage, %err, "stop modification rejected"),
        }
    }

    async fn close_and_register(&self, ticket: &str, price: f64, reason: &str) {
        let close_price = self.broker.close_position(ticket).await.unwrap_or(price);
        if let Some(closed) = self.positions.close_position(ticket, close_price, reason) {
            let realized = closed.realized_pnl.unwrap_or(0.0);
            self.risk.register_trade_result(realized);
            self.events.push(Event::PositionClosed {
                ticket: ticket.to_string(),
                symbol: self.symbol.clone(),
                realized_pnl: realized,
                reason: reason.to_string(),
            });
        }
    }

    async fn close_all(&self, reason: &str) {
        for pos in self.positions.get_open_for_symbol(&self.symbol) {
            let price = self.broker.current_price(&self.symbol).await.unwrap_or(pos.current_price);
            self.close_and_register(&pos.ticket, price, reason).await;
        }
    }

    async fn ensure_connected(&self) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            match self.broker.current_price(&self.symbol).await {
                Ok(_) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < self.reconnect.max_attempts => {
                    attempt += 1;
                    let backoff = self.reconnect.base_delay * 2u32.pow(attempt - 1);
                    warn!(symbol = %self.symbol, attempt, ?backoff, "broker unreachable, retrying");
                    tokio::time::sleep(backoff).await;
                }
                Err(err) => {
                    self.events.push(Event::BrokerError {
                        symbol: self.symbol.clone(),
                        message: format!("reconnection exhausted: {err}"),
                    });
                    return Err(err.into());
                }
            }
        }
    }
}

/// Infer the exit reason from the closing price against the position's
/// stops — best effort, since the broker's own close reason (if any) isn't
/// surfaced by the gateway trait.
fn exit_reason(pos: &crate::domain::Position, price: f64) -> &'static str {
    use crate::types::Side;
    let hit_sl = match pos.side {
        Side::Buy => price <= pos.stop_loss,
        Side::Sell => price >= pos.stop_loss,
    };
    let hit_tp = match pos.side {
        Side::Buy => price >= pos.take_profit,
        Side::Sell => price <= pos.take_profit,
    };
    if hit_tp {
        "take_profit"
    } else if hit_sl {
        "stop_loss"
    } else {
        "broker_reported_closure"
    }
}

/// Build the per-symbol supervisor tasks for a running engine, returning a
/// command sender per symbol plus the join handles. Callers spawn the
/// returned handles on the runtime and keep the senders for operator
/// command dispatch.
pub fn spawn_all(
    symbols: &[String],
    broker: Arc<dyn BrokerGateway>,
    analyzer: Arc<TechnicalAnalyzer>,
    market_context: Arc<MarketContextEngine>,
    strategy_manager: Arc<StrategyManager>,
    risk: Arc<RiskEngine>,
    positions: Arc<PositionManager>,
    news: Arc<NewsService>,
    events: Arc<EventSink>,
    spread_threshold: f64,
    tick_interval: Duration,
) -> (HashMap<String, mpsc::UnboundedSender<SupervisorCommand>>, Vec<tokio::task::JoinHandle<()>>) {
    let mut senders = HashMap::new();
    let mut handles = Vec::new();
    for symbol in symbols {
        let (tx, rx) = mpsc::unbounded_channel();
        let supervisor = Arc::new(ExecutionSupervisor::new(
            symbol.clone(),
            broker.clone(),
            analyzer.clone(),
            market_context.clone(),
            strategy_manager.clone(),
            risk.clone(),
            positions.clone(),
            news.clone(),
            events.clone(),
            spread_threshold,
            tick_interval,
        ));
        handles.push(tokio::spawn(supervisor.run(rx)));
        senders.insert(symbol.clone(), tx);
    }
    (senders, handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    use crate::broker::{AccountSnapshot, BrokerPosition, OrderTicket};
    use crate::domain::{Bar, Position, Signal, SymbolInfo};
    use crate::error::EngineError;
    use crate::market_data::BarCache;
    use crate::risk::RiskLimits;
    use crate::strategies::Strategy;
    use crate::types::{AccountMode, Side};

    /// Deterministic in-memory broker double: fixed price/spread, accepts
    /// every order, reports no pre-existing positions.
    struct MockBroker {
        price: f64,
        spread_val: f64,
    }

    #[async_trait]
    impl BrokerGateway for MockBroker {
        async fn rates(&self, _symbol: &str, _timeframe: Timeframe, _count: usize) -> Result<Vec<Bar>, EngineError> {
            Ok(vec![])
        }
        async fn current_price(&self, _symbol: &str) -> Result<f64, EngineError> {
            Ok(self.price)
        }
        async fn spread(&self, _symbol: &str) -> Result<f64, EngineError> {
            Ok(self.spread_val)
        }
        async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, EngineError> {
            Ok(SymbolInfo {
                symbol: symbol.to_string(),
                pip_size: 0.0001,
                lot_step: 0.01,
                min_lot: 0.01,
                max_lot: 50.0,
                contract_size: 100_000.0,
            })
        }
        async fn account(&self) -> Result<AccountSnapshot, EngineError> {
            Ok(AccountSnapshot { mode: AccountMode::Demo, equity: 10_000.0, balance: 10_000.0, margin_used: 0.0, balances: vec![] })
        }
        async fn open_positions(&self) -> Result<Vec<BrokerPosition>, EngineError> {
            Ok(vec![])
        }
        async fn open_position(
            &self,
            symbol: &str,
            side: Side,
            volume: f64,
            _stop_loss: f64,
            _take_profit: f64,
        ) -> Result<OrderTicket, EngineError> {
            Ok(OrderTicket { ticket: "ticket-1".to_string(), symbol: symbol.to_string(), side, volume, fill_price: self.price })
        }
        async fn modify_stop(&self, _ticket: &str, _stop_loss: f64) -> Result<(), EngineError> {
            Ok(())
        }
        async fn close_position(&self, _ticket: &str) -> Result<f64, EngineError> {
            Ok(self.price)
        }
    }

    struct AlwaysBuy;

    impl Strategy for AlwaysBuy {
        fn name(&self) -> &'static str {
            "always_buy"
        }
        fn analyze(&self, ctx: &StrategyContext<'_>) -> Signal {
            Signal::trade(ctx.symbol, "always_buy", Side::Buy, 0.9, 1.1000, 1.0950, 1.1100, "test_fixture")
        }
    }

    fn make_bars(n: usize, start: f64, step: f64) -> Vec<Bar> {
        let base = Utc::now();
        (0..n)
            .map(|i| {
                let close = start + step * i as f64;
                Bar {
                    time: base + ChronoDuration::hours(i as i64),
                    open: close,
                    high: close + 0.001,
                    low: close - 0.001,
                    close,
                    volume: 10.0,
                }
            })
            .collect()
    }

    fn build_supervisor(price: f64, spread_val: f64) -> Arc<ExecutionSupervisor> {
        let bar_cache = Arc::new(BarCache::new(300));
        for tf in TICK_TIMEFRAMES {
            bar_cache.merge("EURUSD", *tf, make_bars(250, 1.0, 0.0005));
        }
        let analyzer = Arc::new(TechnicalAnalyzer::new(bar_cache));
        let market_context = Arc::new(MarketContextEngine::new(analyzer.clone()));
        let strategy_manager = Arc::new(StrategyManager::new(vec![Box::new(AlwaysBuy)]));
        let risk = Arc::new(RiskEngine::new(10_000.0, RiskLimits::default()));
        let positions = Arc::new(PositionManager::new());
        let news = Arc::new(NewsService::new("http://example.invalid/calendar"));
        let events = Arc::new(EventSink::new());
        let broker: Arc<dyn BrokerGateway> = Arc::new(MockBroker { price, spread_val });

        Arc::new(ExecutionSupervisor::new(
            "EURUSD",
            broker,
            analyzer,
            market_context,
            strategy_manager,
            risk,
            positions,
            news,
            events,
            0.0005,
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn admitted_signal_opens_a_position() {
        let sup = build_supervisor(1.1000, 0.0001);
        sup.tick().await.unwrap();
        assert_eq!(sup.positions.open_count(), 1);
    }

    #[tokio::test]
    async fn wide_spread_blocks_entry() {
        let sup = build_supervisor(1.1000, 0.01);
        sup.tick().await.unwrap();
        assert_eq!(sup.positions.open_count(), 0);
    }

    #[tokio::test]
    async fn close_all_command_flattens_open_positions() {
        let sup = build_supervisor(1.1000, 0.0001);
        sup.tick().await.unwrap();
        assert_eq!(sup.positions.open_count(), 1);
        sup.close_all("operator_close_all").await;
        assert_eq!(sup.positions.open_count(), 0);
    }

    #[test]
    fn exit_reason_detects_take_profit_for_buy() {
        let pos = Position {
            ticket: "t".into(),
            symbol: "EURUSD".into(),
            side: Side::Buy,
            volume: 1.0,
            entry_price: 1.1000,
            current_price: 1.1000,
            stop_loss: 1.0950,
            take_profit: 1.1100,
            open_time: Utc::now(),
            strategy: "x".into(),
            stop_state: StopState::Open,
            highest_favorable_price: 1.1000,
            unrealized_pnl: 0.0,
            closed_at: None,
            realized_pnl: None,
            close_reason: None,
        };
        assert_eq!(exit_reason(&pos, 1.1105), "take_profit");
        assert_eq!(exit_reason(&pos, 1.0940), "stop_loss");
        assert_eq!(exit_reason(&pos, 1.1000), "broker_reported_closure");
    }
}
