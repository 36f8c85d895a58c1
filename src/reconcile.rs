// =============================================================================
// Reconciliation — compare internal position book against the broker
// =============================================================================
//
// SAFETY POLICY: this module logs and repairs bookkeeping drift but **never**
// cancels an order or closes a position at the broker. A broker position we
// have no local record of is adopted and tagged, never closed; a local
// position the broker no longer reports is treated as closed while we were
// offline and reconciled through the normal close path so risk counters and
// the closed-trade ledger stay correct.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::broker::BrokerGateway;
use crate::events::{Event, EventSink};
use crate::position::PositionManager;
use crate::risk::RiskEngine;

/// Relative equity drift, vs the risk engine's own ledger balance, that gets
/// flagged in the result and logged — never auto-corrected.
const BALANCE_DRIFT_TOLERANCE: f64 = 0.01;

/// Exit reason recorded on a position reconciled as closed while offline.
pub const RECONCILED_EXIT_REASON: &str = "reconciled";

/// Summary of a single reconciliation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Broker positions with no local record, adopted into the book.
    pub positions_adopted: u32,
    /// Local positions the broker no longer reports, closed as reconciled.
    pub positions_closed: u32,
    /// Local positions that matched a broker position directly.
    pub positions_matched: u32,
    /// Whether equity drifted from the risk engine's ledger balance beyond
    /// [`BALANCE_DRIFT_TOLERANCE`].
    pub balance_drift: bool,
    /// ISO 8601 timestamp of this reconciliation run.
    pub timestamp: String,
}

/// Run one reconciliation cycle against `broker`'s reported open positions.
///
/// Intended to run at startup and on an operator-triggered admin action —
/// the per-tick Execution Supervisor loop already detects broker-side
/// closure of positions it opened itself; this pass additionally catches
/// positions opened outside the engine (manual intervention, a crash
/// between submit and local registration).
pub async fn reconcile_once(
    broker: &dyn BrokerGateway,
    positions: &PositionManager,
    risk: &RiskEngine,
    events: &EventSink,
) -> Result<ReconcileResult> {
    let now = Utc::now().to_rfc3339();
    info!(timestamp = %now, "reconciliation cycle started");

    let broker_positions = broker.open_positions().await.context("reconcile: failed to fetch broker positions")?;
    let broker_by_ticket: HashMap<&str, _> = broker_positions.iter().map(|p| (p.ticket.as_str(), p)).collect();

    let local_open = positions.get_open();
    let local_by_ticket: HashMap<&str, _> = local_open.iter().map(|p| (p.ticket.as_str(), p)).collect();

    let mut matched = 0u32;
    let mut closed = 0u32;
    let mut adopted = 0u32;

    for local in &local_open {
        if broker_by_ticket.contains_key(local.ticket.as_str()) {
            matched += 1;
            continue;
        }
        warn!(ticket = %local.ticket, symbol = %local.symbol, "local position missing at broker, reconciling as closed");
        if let Some(closed_pos) = positions.close_position(&local.ticket, local.current_price, RECONCILED_EXIT_REASON) {
            let pnl = closed_pos.realized_pnl.unwrap_or(0.0);
            risk.register_trade_result(pnl);
            events.push(Event::PositionClosed {
                ticket: closed_pos.ticket,
                symbol: closed_pos.symbol,
                realized_pnl: pnl,
                reason: RECONCILED_EXIT_REASON.to_string(),
            });
            closed += 1;
        }
    }

    for broker_pos in &broker_positions {
        if local_by_ticket.contains_key(broker_pos.ticket.as_str()) {
            continue;
        }
        warn!(ticket = %broker_pos.ticket, symbol = %broker_pos.symbol, "orphan broker position detected, adopting");
        positions.adopt_position(&broker_pos.ticket, &broker_pos.symbol, broker_pos.side, broker_pos.volume, broker_pos.entry_price);
        events.push(Event::PositionOpened { ticket: broker_pos.ticket.clone(), symbol: broker_pos.symbol.clone() });
        adopted += 1;
    }

    let balance_drift = check_balance_drift(broker, risk).await?;

    let result = ReconcileResult {
        positions_adopted: adopted,
        positions_closed: closed,
        positions_matched: matched,
        balance_drift,
        timestamp: now,
    };

    info!(
        adopted,
        closed,
        matched,
        balance_drift,
        "reconciliation cycle completed"
    );

    Ok(result)
}

/// Compare the broker's reported equity against the risk engine's own
/// ledger balance. A mismatch beyond tolerance is flagged but never
/// corrected automatically — the ledger is the system of record for
/// position sizing, not the broker's point-in-time snapshot.
async fn check_balance_drift(broker: &dyn BrokerGateway, risk: &RiskEngine) -> Result<bool> {
    let account = broker.account().await.context("reconcile: failed to fetch broker account snapshot")?;
    let ledger_balance = risk.balance();

    if ledger_balance <= 0.0 {
        return Ok(false);
    }

    let drift = ((account.equity - ledger_balance) / ledger_balance).abs();
    let drifted = drift > BALANCE_DRIFT_TOLERANCE;
    if drifted {
        warn!(equity = account.equity, ledger_balance, drift_pct = drift * 100.0, "balance drift detected during reconciliation");
    }
    Ok(drifted)
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::broker::{AccountSnapshot, BrokerPosition, OrderTicket};
    use crate::domain::{Bar, SymbolInfo};
    use crate::error::EngineError;
    use crate::risk::RiskLimits;
    use crate::types::{AccountMode, Side, Timeframe};

    struct FakeBroker {
        positions: Vec<BrokerPosition>,
        equity: f64,
    }

    #[async_trait]
    impl BrokerGateway for FakeBroker {
        async fn rates(&self, _symbol: &str, _timeframe: Timeframe, _count: usize) -> Result<Vec<Bar>, EngineError> {
            Ok(vec![])
        }
        async fn current_price(&self, _symbol: &str) -> Result<f64, EngineError> {
            Ok(1.1000)
        }
        async fn spread(&self, _symbol: &str) -> Result<f64, EngineError> {
            Ok(0.0001)
        }
        async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, EngineError> {
            Ok(SymbolInfo { symbol: symbol.to_string(), pip_size: 0.0001, lot_step: 0.01, min_lot: 0.01, max_lot: 50.0, contract_size: 100_000.0 })
        }
        async fn account(&self) -> Result<AccountSnapshot, EngineError> {
            Ok(AccountSnapshot { mode: AccountMode::Demo, equity: self.equity, balance: self.equity, margin_used: 0.0, balances: vec![] })
        }
        async fn open_positions(&self) -> Result<Vec<BrokerPosition>, EngineError> {
            Ok(self.positions.clone())
        }
        async fn open_position(&self, symbol: &str, side: Side, volume: f64, _sl: f64, _tp: f64) -> Result<OrderTicket, EngineError> {
            Ok(OrderTicket { ticket: "x".into(), symbol: symbol.to_string(), side, volume, fill_price: 1.1000 })
        }
        async fn modify_stop(&self, _ticket: &str, _sl: f64) -> Result<(), EngineError> {
            Ok(())
        }
        async fn close_position(&self, _ticket: &str) -> Result<f64, EngineError> {
            Ok(1.1000)
        }
    }

    #[tokio::test]
    async fn orphan_broker_position_is_adopted_not_closed() {
        let broker = FakeBroker {
            positions: vec![BrokerPosition { ticket: "orphan-1".into(), symbol: "EURUSD".into(), side: Side::Buy, volume: 1.0, entry_price: 1.1000 }],
            equity: 10_000.0,
        };
        let positions = PositionManager::new();
        let risk = RiskEngine::new(10_000.0, RiskLimits::default());
        let events = EventSink::new();

        let result = reconcile_once(&broker, &positions, &risk, &events).await.unwrap();
        assert_eq!(result.positions_adopted, 1);
        assert_eq!(result.positions_closed, 0);
        assert_eq!(positions.open_count(), 1);
        assert_eq!(positions.get_open()[0].strategy, "reconciled_adopted");
    }

    #[tokio::test]
    async fn missing_local_position_is_closed_as_reconciled() {
        let broker = FakeBroker { positions: vec![], equity: 10_000.0 };
        let positions = PositionManager::new();
        positions.open_position("EURUSD", Side::Buy, 1.0, 1.1000, 1.0950, 1.1100, "trend_following");
        let risk = RiskEngine::new(10_000.0, RiskLimits::default());
        let events = EventSink::new();

        let result = reconcile_once(&broker, &positions, &risk, &events).await.unwrap();
        assert_eq!(result.positions_closed, 1);
        assert_eq!(positions.open_count(), 0);
        assert_eq!(positions.get_closed(10)[0].close_reason.as_deref(), Some(RECONCILED_EXIT_REASON));
    }

    #[tokio::test]
    async fn matching_positions_are_left_untouched() {
        let positions = PositionManager::new();
        let pos = positions.open_position("EURUSD", Side::Buy, 1.0, 1.1000, 1.0950, 1.1100, "trend_following");
        let broker = FakeBroker {
            positions: vec![BrokerPosition { ticket: pos.ticket.clone(), symbol: "EURUSD".into(), side: Side::Buy, volume: 1.0, entry_price: 1.1000 }],
            equity: 10_000.0,
        };
        let risk = RiskEngine::new(10_000.0, RiskLimits::default());
        let events = EventSink::new();

        let result = reconcile_once(&broker, &positions, &risk, &events).await.unwrap();
        assert_eq!(result.positions_matched, 1);
        assert_eq!(result.positions_adopted, 0);
        assert_eq!(result.positions_closed, 0);
        assert_eq!(positions.open_count(), 1);
    }

    #[tokio::test]
    async fn large_equity_mismatch_flags_drift() {
        let broker = FakeBroker { positions: vec![], equity: 20_000.0 };
        let positions = PositionManager::new();
        let risk = RiskEngine::new(10_000.0, RiskLimits::default());
        let events = EventSink::new();

        let result = reconcile_once(&broker, &positions, &risk, &events).await.unwrap();
        assert!(result.balance_drift);
    }
}
