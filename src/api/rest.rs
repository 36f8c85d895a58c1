// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked via
// the `AuthBearer` extractor.
//
// CORS is configured permissively for development; tighten `allowed_origins`
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::execution_supervisor::SupervisorCommand;
use crate::reconcile;
use crate::types::{AccountMode, TradingMode};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/events", get(events))
        .route("/api/v1/market-context", get(market_context))
        .route("/api/v1/control/pause", post(control_pause))
        .route("/api/v1/control/resume", post(control_resume))
        .route("/api/v1/control/kill", post(control_kill))
        .route("/api/v1/control/close-all/:symbol", post(control_close_all))
        .route("/api/v1/control/account-mode", post(control_account_mode))
        .route("/api/v1/control/reconcile", post(control_reconcile))
        .route("/api/v1/heartbeat", post(heartbeat))
        .route("/api/v1/trade-journal", get(trade_journal))
        .route("/api/v1/trade-journal/stats", get(trade_journal_stats))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        // ── Middleware & State ───────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = HealthResponse {
        status: "ok",
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    Json(resp)
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.build_snapshot();
    Json(snapshot)
}

// =============================================================================
// Positions (authenticated)
// =============================================================================

async fn positions(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.position_manager.get_open())
}

// =============================================================================
// Events (authenticated)
// =============================================================================

async fn events(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.events.recent(200))
}

// =============================================================================
// Market context (authenticated)
// =============================================================================

async fn market_context(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let symbols = state.runtime_config.read().trading.symbols.clone();
    let news = state.news.current();
    let mut out = serde_json::Map::new();
    for symbol in &symbols {
        match state.market_context.build(symbol, &news) {
            Ok(ctx) => {
                out.insert(symbol.clone(), serde_json::to_value(&ctx).unwrap_or_default());
            }
            Err(e) => {
                out.insert(symbol.clone(), serde_json::json!({ "error": e.to_string() }));
            }
        }
    }
    Json(serde_json::Value::Object(out))
}

// =============================================================================
// Control endpoints (authenticated)
// =============================================================================

#[derive(Serialize)]
struct ControlResponse {
    trading_mode: String,
    message: String,
}

async fn control_pause(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Paused;
    }
    broadcast_command(&state, SupervisorCommand::Pause);
    state.increment_version();
    info!("Trading PAUSED via API");

    Json(ControlResponse { trading_mode: "Paused".to_string(), message: "Trading paused".to_string() })
}

async fn control_resume(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Live;
    }
    broadcast_command(&state, SupervisorCommand::Resume);
    state.increment_version();
    info!("Trading RESUMED via API");

    Json(ControlResponse { trading_mode: "Live".to_string(), message: "Trading resumed".to_string() })
}

async fn control_kill(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    {
        let mut config = state.runtime_config.write();
        config.trading_mode = TradingMode::Killed;
    }
    broadcast_command(&state, SupervisorCommand::Stop);
    state.increment_version();
    warn!("Trading KILLED via API");

    Json(ControlResponse {
        trading_mode: "Killed".to_string(),
        message: "Trading killed — manual restart required".to_string(),
    })
}

async fn control_close_all(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> impl IntoResponse {
    let symbol = symbol.to_uppercase();
    let senders = state.supervisor_commands.read();
    match senders.get(&symbol) {
        Some(tx) => {
            let _ = tx.send(SupervisorCommand::CloseAll);
            warn!(symbol = %symbol, "operator requested close-all via API");
            Json(serde_json::json!({ "symbol": symbol, "message": "close-all requested" })).into_response()
        }
        None => (StatusCode::NOT_FOUND, Json(serde_json::json!({ "error": format!("unknown symbol '{symbol}'") })))
            .into_response(),
    }
}

fn broadcast_command(state: &AppState, command: SupervisorCommand) {
    let senders = state.supervisor_commands.read();
    for tx in senders.values() {
        let _ = tx.send(command.clone());
    }
}

#[derive(Deserialize)]
struct AccountModeRequest {
    account_mode: String,
    #[serde(default)]
    confirm_live: bool,
}

#[derive(Serialize)]
struct AccountModeResponse {
    account_mode: String,
}

async fn control_account_mode(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccountModeRequest>,
) -> Result<impl IntoResponse, (StatusCode, Json<serde_json::Value>)> {
    let mode = match req.account_mode.to_lowercase().as_str() {
        "demo" => AccountMode::Demo,
        "live" => {
            if !req.confirm_live {
                return Err((
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({ "error": "Switching to Live mode requires confirm_live: true" })),
                ));
            }
            warn!("Switching to LIVE account mode via API");
            AccountMode::Live
        }
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": format!("Invalid account mode: '{}'. Use 'demo' or 'live'.", req.account_mode) })),
            ));
        }
    };

    {
        let mut config = state.runtime_config.write();
        config.account_mode = mode;
    }
    state.increment_version();
    info!(account_mode = %mode, "Account mode changed via API");

    Ok(Json(AccountModeResponse { account_mode: mode.to_string() }))
}

async fn control_reconcile(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let result = reconcile::reconcile_once(
        state.broker.as_ref(),
        &state.position_manager,
        &state.risk_engine,
        &state.events,
    )
    .await;

    match result {
        Ok(summary) => {
            *state.last_reconcile_ok.write() = Some(std::time::Instant::now());
            *state.last_reconcile_error.write() = None;
            state.increment_version();
            Json(serde_json::to_value(&summary).unwrap_or_default()).into_response()
        }
        Err(e) => {
            *state.last_reconcile_error.write() = Some(e.to_string());
            state.increment_version();
            (StatusCode::INTERNAL_SERVER_ERROR, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
        }
    }
}

// =============================================================================
// Heartbeat (authenticated)
// =============================================================================

async fn heartbeat(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    *state.last_ws_user_event.write() = std::time::Instant::now();
    state.increment_version();

    Json(serde_json::json!({
        "status": "ok",
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Trade Journal (authenticated)
// =============================================================================

async fn trade_journal(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.position_manager.get_closed(500))
}

async fn trade_journal_stats(_auth: AuthBearer, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let closed = state.position_manager.get_closed(500);
    let total_trades = closed.len();
    if total_trades == 0 {
        return Json(serde_json::json!({
            "total_trades": 0,
            "win_rate": 0.0,
            "total_net_pnl": 0.0,
            "profit_factor": 0.0,
        }));
    }
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
    Json(serde_json::json!({
        "total_trades": total_trades,
        "win_rate": win_rate,
        "total_net_pnl": total_net_pnl,
        "profit_factor": profit_factor,
    }))
}
