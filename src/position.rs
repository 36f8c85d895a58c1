// =============================================================================
// Position Manager
// =============================================================================
//
// Tracks open and closed positions. Stop-loss/take-profit/trailing VALUES are
// computed by the risk manager as pure functions; this module only holds the
// book and applies whatever the supervisor tells it to apply — it never
// invents its own exit logic.

use parking_lot::RwLock;
use uuid::Uuid;

use crate::domain::{Position, StopState};
use crate::types::Side;

pub struct PositionManager {
    open: RwLock<Vec<Position>>,
    closed: RwLock<Vec<Position>>,
}

impl PositionManager {
    pub fn new() -> Self {
        Self {
            open: RwLock::new(Vec::new()),
            closed: RwLock::new(Vec::new()),
        }
    }

    pub fn open_position(
        &self,
        symbol: &str,
        side: Side,
        volume: f64,
        entry_price: f64,
        stop_loss: f64,
        take_profit: f64,
        strategy: &str,
    ) -> Position {
        let pos = Position {
            ticket: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            volume,
            entry_price,
            current_price: entry_price,
            stop_loss,
            take_profit,
            open_time: chrono::Utc::now(),
            strategy: strategy.to_string(),
            stop_state: StopState::Open,
            highest_favorable_price: entry_price,
            unrealized_pnl: 0.0,
            closed_at: None,
            realized_pnl: None,
            close_reason: None,
        };
        self.open.write().push(pos.clone());
        pos
    }

    /// Adopt a position the broker reports but we have no local record of
    /// (startup reconciliation orphan). Tagged with a synthetic strategy
    /// name and an unset stop/take-profit — the supervisor leaves it alone
    /// until an operator assigns real protective levels.
    pub fn adopt_position(&self, ticket: &str, symbol: &str, side: Side, volume: f64, entry_price: f64) -> Position {
        let pos = Position {
            ticket: ticket.to_string(),
            symbol: symbol.to_string(),
            side,
            volume,
            entry_price,
            current_price: entry_price,
            stop_loss: 0.0,
            take_profit: 0.0,
            open_time: chrono::Utc::now(),
            strategy: "reconciled_adopted".to_string(),
            stop_state: StopState::Open,
            highest_favorable_price: entry_price,
            unrealized_pnl: 0.0,
            closed_at: None,
            realized_pnl: None,
            close_reason: None,
        };
        self.open.write().push(pos.clone());
        pos
    }

    /// Mark every open position for `symbol` to the latest price. Returns
    /// tickets whose SL or TP has been crossed, for the supervisor to close.
    pub fn mark_price(&self, symbol: &str, price: f64) -> Vec<String> {
        let mut hits = Vec::new();
        let mut open = self.open.write();
        for pos in open.iter_mut().filter(|p| p.symbol == symbol) {
            pos.mark(price);
            let hit_sl = match pos.side {
                Side::Buy => price <= pos.stop_loss,
                Side::Sell => price >= pos.stop_loss,
            };
            let hit_tp = match pos.side {
                Side::Buy => price >= pos.take_profit,
                Side::Sell => price <= pos.take_profit,
            };
            if hit_sl || hit_tp {
                hits.push(pos.ticket.clone());
            }
        }
        hits
    }

    /// Apply a new stop-loss value computed by the risk manager.
    pub fn apply_stop(&self, ticket: &str, stop_loss: f64, new_state: StopState) {
        let mut open = self.open.write();
        if let Some(pos) = open.iter_mut().find(|p| p.ticket == ticket) {
            pos.stop_loss = stop_loss;
            pos.stop_state = new_state;
        }
    }

    pub fn close_position(&self, ticket: &str, close_price: f64, reason: &str) -> Option<Position> {
        let mut open = self.open.write();
        let idx = open.iter().position(|p| p.ticket == ticket)?;
        let mut pos = open.remove(idx);

        let direction = match pos.side {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        };
        pos.realized_pnl = Some((close_price - pos.entry_price) * direction * pos.volume);
        pos.current_price = close_price;
        pos.closed_at = Some(chrono::Utc::now());
        pos.close_reason = Some(reason.to_string());
        pos.stop_state = StopState::Closed;

        self.closed.write().push(pos.clone());
        Some(pos)
    }

    pub fn get_open(&self) -> Vec<Position> {
        self.open.read().clone()
    }

    pub fn get_open_for_symbol(&self, symbol: &str) -> Vec<Position> {
        self.open.read().iter().filter(|p| p.symbol == symbol).cloned().collect()
    }

    pub fn get_closed(&self, limit: usize) -> Vec<Position> {
        let closed = self.closed.read();
        let start = closed.len().saturating_sub(limit);
        closed[start..].to_vec()
    }

    pub fn open_count(&self) -> usize {
        self.open.read().len()
    }
}

impl Default for PositionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_close_moves_between_lists() {
        let mgr = PositionManager::new();
        let pos = mgr.open_position("EURUSD", Side::Buy, 1.0, 1.1000, 1.0950, 1.1100, "trend_following");
        assert_eq!(mgr.open_count(), 1);

        let closed = mgr.close_position(&pos.ticket, 1.1050, "take_profit").unwrap();
        assert_eq!(mgr.open_count(), 0);
        assert!((closed.realized_pnl.unwrap() - 0.0050).abs() < 1e-9);
        assert_eq!(mgr.get_closed(10).len(), 1);
    }

    #[test]
    fn mark_price_detects_stop_loss_hit() {
        let mgr = PositionManager::new();
        let pos = mgr.open_position("EURUSD", Side::Sell, 1.0, 1.1000, 1.1050, 1.0900, "mean_reversion");
        let hits = mgr.mark_price("EURUSD", 1.1060);
        assert_eq!(hits, vec![pos.ticket]);
    }

    #[test]
    fn mark_price_ignores_other_symbols() {
        let mgr = PositionManager::new();
        mgr.open_position("EURUSD", Side::Buy, 1.0, 1.1000, 1.0950, 1.1100, "trend_following");
        let hits = mgr.mark_price("GBPUSD", 1.3000);
        assert!(hits.is_empty());
    }

    #[test]
    fn apply_stop_updates_stop_and_state() {
        let mgr = PositionManager::new();
        let pos = mgr.open_position("EURUSD", Side::Buy, 1.0, 1.1000, 1.0950, 1.1100, "trend_following");
        mgr.apply_stop(&pos.ticket, 1.1000, StopState::AtBreakeven);
        let open = mgr.get_open();
        assert_eq!(open[0].stop_loss, 1.1000);
        assert_eq!(open[0].stop_state, StopState::AtBreakeven);
    }
}
