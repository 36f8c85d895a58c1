// =============================================================================
// Aegis Trading Engine — Main Entry Point
// =============================================================================
//
// The engine starts in Demo + Paused mode for safety. Users must explicitly
// switch to Live mode via the dashboard or API.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analyzer;
mod api;
mod app_state;
mod broker;
mod domain;
mod error;
mod events;
mod execution_supervisor;
mod indicators;
mod market_context;
mod market_data;
mod news;
mod position;
mod reconcile;
mod risk;
mod runtime_config;
mod strategies;
mod strategy_manager;
mod types;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::broker::TerminalClient;
use crate::runtime_config::RuntimeConfig;
use crate::types::AccountMode;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              Aegis Trading Engine — Starting Up           ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // SAFETY: force Demo + Paused on startup regardless of what was persisted.
    config.trading_mode = types::TradingMode::Paused;
    config.account_mode = AccountMode::Demo;

    if let Ok(syms) = std::env::var("AEGIS_SYMBOLS") {
        let overridden: Vec<String> = syms.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect();
        if !overridden.is_empty() {
            config.trading.symbols = overridden;
        }
    }

    info!(symbols = ?config.trading.symbols, "configured trading symbols");
    info!(
        trading_mode = %config.trading_mode,
        account_mode = %config.account_mode,
        "engine starting in SAFE mode (Demo + Paused)"
    );

    // ── 2. Broker gateway ─────────────────────────────────────────────────
    let api_key = std::env::var("AEGIS_API_KEY").unwrap_or_default();
    let api_secret = std::env::var("AEGIS_API_SECRET").unwrap_or_default();
    let base_url = std::env::var("AEGIS_BROKER_URL").unwrap_or_else(|_| "https://api.broker.example".to_string());
    let broker: Arc<dyn broker::BrokerGateway> =
        Arc::new(TerminalClient::new(api_key, api_secret, base_url, config.account_mode));

    // ── 3. Build shared state ─────────────────────────────────────────────
    let starting_balance = match broker.account().await {
        Ok(account) => account.equity,
        Err(e) => {
            warn!(error = %e, "failed to fetch starting account snapshot, defaulting balance to 10000");
            10_000.0
        }
    };
    let state = Arc::new(AppState::new(config, broker.clone(), starting_balance));

    // ── 4. Startup reconciliation ─────────────────────────────────────────
    match reconcile::reconcile_once(state.broker.as_ref(), &state.position_manager, &state.risk_engine, &state.events).await
    {
        Ok(result) => {
            *state.last_reconcile_ok.write() = Some(std::time::Instant::now());
            info!(
                adopted = result.positions_adopted,
                closed = result.positions_closed,
                matched = result.positions_matched,
                "startup reconciliation complete"
            );
        }
        Err(e) => {
            *state.last_reconcile_error.write() = Some(e.to_string());
            error!(error = %e, "startup reconciliation failed — continuing with local book only");
        }
    }

    // ── 5. News refresh background task ───────────────────────────────────
    let news_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            if let Err(e) = news_state.news.refresh().await {
                warn!(error = %e, "news refresh failed");
                news_state.push_error_with_code(format!("news refresh failed: {e}"), Some("news_refresh".to_string()));
            } else {
                news_state.increment_version();
            }
        }
    });

    // ── 6. Execution Supervisors (one task per symbol) ────────────────────
    let symbols = state.runtime_config.read().trading.symbols.clone();

    let (senders, handles) = execution_supervisor::spawn_all(
        &symbols,
        state.broker.clone(),
        state.analyzer.clone(),
        state.market_context.clone(),
        state.strategy_manager.clone(),
        state.risk_engine.clone(),
        state.position_manager.clone(),
        state.news.clone(),
        state.events.clone(),
        state.runtime_config.read().trading.spread_threshold_pips,
        tokio::time::Duration::from_secs(5),
    );

    {
        let mut supervisor_commands = state.supervisor_commands.write();
        for (symbol, tx) in senders {
            supervisor_commands.insert(symbol, tx);
        }
    }

    for handle in handles {
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                error!(error = %e, "execution supervisor task panicked");
            }
        });
    }

    info!(count = symbols.len(), "execution supervisors running");

    // ── 7. Periodic reconciliation loop ───────────────────────────────────
    let recon_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            match reconcile::reconcile_once(
                recon_state.broker.as_ref(),
                &recon_state.position_manager,
                &recon_state.risk_engine,
                &recon_state.events,
            )
            .await
            {
                Ok(_) => {
                    *recon_state.last_reconcile_ok.write() = Some(std::time::Instant::now());
                    *recon_state.last_reconcile_error.write() = None;
                }
                Err(e) => {
                    *recon_state.last_reconcile_error.write() = Some(format!("{e}"));
                    warn!(error = %e, "periodic reconciliation failed");
                }
            }
            recon_state.increment_version();
        }
    });

    // ── 8. Start the API server ────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = std::env::var("AEGIS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let bind_addr_clone = bind_addr.clone();

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone).await.expect("failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("all subsystems running. press ctrl+c to stop.");

    // ── 9. Graceful shutdown ────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping gracefully");

    {
        let mut supervisor_commands = state.supervisor_commands.write();
        for tx in supervisor_commands.values() {
            let _ = tx.send(execution_supervisor::SupervisorCommand::Stop);
        }
        supervisor_commands.clear();
    }

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("aegis trading engine shut down complete.");
    Ok(())
}
