// =============================================================================
// Risk Manager
// =============================================================================
//
// Owns sizing, admission control, and the trailing/breakeven stop state
// machine. `RiskState` tracks `peak_balance` as a strictly monotonic
// high-water mark — unlike the daily PnL counters, it is never reset on a
// calendar rollover, only advanced when equity makes a new high.

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::domain::{Position, RiskState, SymbolInfo};
use crate::types::Side;

/// Fraction of free margin an open position's estimated margin may consume
/// before admission is denied.
const MAX_MARGIN_UTILIZATION: f64 = 0.8;

/// Static risk limits loaded from configuration.
#[derive(Debug, Clone)]
pub struct RiskLimits {
    pub max_daily_loss_pct: f64,
    pub max_consecutive_losses: i32,
    pub max_drawdown_pct: f64,
    pub max_daily_trades: i32,
    pub risk_per_trade_pct: f64,
    pub breakeven_trigger_rr: f64,
    pub trailing_trigger_rr: f64,
    pub trailing_distance_atr_mult: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss_pct: 3.0,
            max_consecutive_losses: 4,
            max_drawdown_pct: 10.0,
            max_daily_trades: 20,
            risk_per_trade_pct: 1.0,
            breakeven_trigger_rr: 1.0,
            trailing_trigger_rr: 1.5,
            trailing_distance_atr_mult: 1.5,
        }
    }
}

struct Inner {
    state: RiskState,
    balance: f64,
}

/// Everything `can_open_position` needs beyond the engine's own rolling
/// daily/drawdown state: the per-symbol position count and the live
/// margin/spread read at decision time.
#[derive(Debug, Clone, Copy)]
pub struct AdmissionCheck {
    pub open_positions: u32,
    pub max_positions: u32,
    pub estimated_margin: f64,
    pub free_margin: f64,
    pub spread: f64,
    pub spread_threshold: f64,
}

/// Risk manager: sizing, admission gating, and pure-function stop
/// computations. The execution supervisor is the sole writer applying the
/// values this module computes.
pub struct RiskEngine {
    inner: RwLock<Inner>,
    limits: RiskLimits,
}

impl RiskEngine {
    pub fn new(starting_balance: f64, limits: RiskLimits) -> Self {
        let today = Utc::now().date_naive();
        let state = RiskState {
            date: today,
            peak_balance: starting_balance,
            daily_starting_balance: starting_balance,
            daily_pnl: 0.0,
            daily_pnl_pct: 0.0,
            consecutive_losses: 0,
            daily_trades: 0,
            trading_halted: false,
            halt_reason: None,
        };
        Self {
            inner: RwLock::new(Inner { state, balance: starting_balance }),
            limits,
        }
    }

    pub fn state(&self) -> RiskState {
        self.maybe_roll_day();
        self.inner.read().state.clone()
    }

    pub fn balance(&self) -> f64 {
        self.inner.read().balance
    }

    /// Roll the daily counters over at UTC midnight. `peak_balance` is left
    /// untouched — it only advances on a new equity high, never on a
    /// calendar rollover.
    fn maybe_roll_day(&self) {
        let today = Utc::now().date_naive();
        let mut inner = self.inner.write();
        if inner.state.date != today {
            inner.state.date = today;
            inner.state.daily_starting_balance = inner.balance;
            inner.state.daily_pnl = 0.0;
            inner.state.daily_pnl_pct = 0.0;
            inner.state.daily_trades = 0;
            if !matches!(inner.state.halt_reason.as_deref(), Some("max_drawdown") | Some("killed")) {
                inner.state.trading_halted = false;
                inner.state.halt_reason = None;
            }
            info!("risk engine: daily counters rolled over");
        }
    }

    /// Position size in lots for a trade risking `risk_per_trade_pct` of
    /// balance given `stop_distance` (price units) and `pip_value` (account
    /// currency value of one unit of price movement per lot).
    ///
    /// Kept for callers that already know the account-currency pip value
    /// directly; `position_size_for_symbol` is preferred when a
    /// `SymbolInfo` is available since it also snaps to the broker's lot
    /// step and clamps to the instrument's min/max lot.
    pub fn position_size(&self, stop_distance: f64, pip_value: f64) -> f64 {
        if stop_distance <= 0.0 || pip_value <= 0.0 {
            return 0.0;
        }
        self.maybe_roll_day();
        let balance = self.inner.read().balance;
        let risk_amount = balance * (self.limits.risk_per_trade_pct / 100.0);
        risk_amount / (stop_distance * pip_value)
    }

    /// Position size in lots for `entry`/`stop_loss` against `symbol`'s
    /// contract metadata, scaled by `risk_multiplier` (the market context's
    /// regime-driven risk scaling). Snapped down to the nearest `lot_step`
    /// and clamped to `[min_lot, max_lot]`.
    pub fn position_size_for_symbol(
        &self,
        entry: f64,
        stop_loss: f64,
        symbol: &SymbolInfo,
        risk_multiplier: f64,
    ) -> f64 {
        let sl_distance = (entry - stop_loss).abs();
        if sl_distance <= 0.0 || symbol.pip_size <= 0.0 || symbol.lot_step <= 0.0 {
            return 0.0;
        }
        self.maybe_roll_day();
        let balance = self.inner.read().balance;
        let risk_amount = balance * (self.limits.risk_per_trade_pct / 100.0) * risk_multiplier;

        let sl_points = sl_distance / symbol.pip_size;
        let tick_value = symbol.contract_size * symbol.pip_size;
        if sl_points <= 0.0 || tick_value <= 0.0 {
            return 0.0;
        }
        let raw_lots = risk_amount / (sl_points * tick_value);

        let snapped = (raw_lots / symbol.lot_step).floor() * symbol.lot_step;
        snapped.clamp(symbol.min_lot, symbol.max_lot)
    }

    /// Derive the stop-loss price for a new position from `entry`, `atr`
    /// and a volatility multiplier.
    pub fn stop_loss(&self, side: Side, entry: f64, atr: f64, atr_mult: f64) -> f64 {
        let distance = atr * atr_mult;
        match side {
            Side::Buy => entry - distance,
            Side::Sell => entry + distance,
        }
    }

    /// Derive the take-profit price for a new position from `entry`,
    /// `stop_loss` and a reward-to-risk ratio.
    pub fn take_profit(&self, side: Side, entry: f64, stop_loss: f64, reward_risk_ratio: f64) -> f64 {
        let distance = (entry - stop_loss).abs() * reward_risk_ratio;
        match side {
            Side::Buy => entry + distance,
            Side::Sell => entry - distance,
        }
    }

    /// Whether a new position may be opened right now, and if not, why.
    /// Checks run in a fixed order and the first failing check wins:
    /// halted -> open-position count -> daily loss -> consecutive losses ->
    /// daily trade cap -> drawdown -> margin -> spread.
    pub fn can_open_position(&self, admission: &AdmissionCheck) -> (bool, Option<String>) {
        self.maybe_roll_day();
        let inner = self.inner.read();
        let s = &inner.state;

        if s.trading_halted {
            return (false, s.halt_reason.clone());
        }
        if admission.open_positions >= admission.max_positions {
            return (false, Some("max_open_positions".to_string()));
        }
        if s.daily_pnl_pct <= -self.limits.max_daily_loss_pct {
            return (false, Some("daily_loss_limit".to_string()));
        }
        if s.consecutive_losses >= self.limits.max_consecutive_losses {
            return (false, Some("consecutive_losses".to_string()));
        }
        if s.daily_trades >= self.limits.max_daily_trades {
            return (false, Some("daily_trade_cap".to_string()));
        }
        let drawdown_pct = if s.peak_balance > 0.0 {
            (s.peak_balance - inner.balance) / s.peak_balance * 100.0
        } else {
            0.0
        };
        if drawdown_pct >= self.limits.max_drawdown_pct {
            return (false, Some("max_drawdown".to_string()));
        }
        if admission.free_margin > 0.0 && admission.estimated_margin > MAX_MARGIN_UTILIZATION * admission.free_margin
        {
            return (false, Some("insufficient_margin".to_string()));
        }
        if admission.spread > admission.spread_threshold {
            return (false, Some("spread_blocked".to_string()));
        }

        (true, None)
    }

    /// Record a closed trade's realized PnL, updating daily counters, the
    /// monotonic peak balance, and consecutive-loss streak. Trips the
    /// drawdown halt when breached.
    pub fn register_trade_result(&self, realized_pnl: f64) {
        self.maybe_roll_day();
        let mut inner = self.inner.write();
        inner.balance += realized_pnl;
        inner.state.daily_pnl += realized_pnl;
        inner.state.daily_trades += 1;

        if inner.balance > inner.state.peak_balance {
            inner.state.peak_balance = inner.balance;
        }
        if inner.state.daily_starting_balance > 0.0 {
            inner.state.daily_pnl_pct = inner.state.daily_pnl / inner.state.daily_starting_balance * 100.0;
        }

        if realized_pnl < 0.0 {
            inner.state.consecutive_losses += 1;
        } else {
            inner.state.consecutive_losses = 0;
        }

        let drawdown_pct = if inner.state.peak_balance > 0.0 {
            (inner.state.peak_balance - inner.balance) / inner.state.peak_balance * 100.0
        } else {
            0.0
        };
        if drawdown_pct >= self.limits.max_drawdown_pct && !inner.state.trading_halted {
            inner.state.trading_halted = true;
            inner.state.halt_reason = Some("max_drawdown".to_string());
            warn!(drawdown_pct, "risk engine: max drawdown breached, trading halted");
        }
    }

    /// Kill switch: halt trading until manually resumed (survives daily
    /// rollover).
    pub fn kill(&self) {
        let mut inner = self.inner.write();
        inner.state.trading_halted = true;
        inner.state.halt_reason = Some("killed".to_string());
    }

    pub fn resume(&self) {
        let mut inner = self.inner.write();
        inner.state.trading_halted = false;
        inner.state.halt_reason = None;
    }

    /// Whether `position` has earned enough reward-to-risk to move its stop
    /// to breakeven. Pure function — the caller applies the result.
    pub fn should_move_to_breakeven(&self, position: &Position, initial_stop_distance: f64) -> bool {
        if initial_stop_distance <= 0.0 {
            return false;
        }
        let favorable = match position.side {
            Side::Buy => position.current_price - position.entry_price,
            Side::Sell => position.entry_price - position.current_price,
        };
        favorable / initial_stop_distance >= self.limits.breakeven_trigger_rr
    }

    /// Compute the trailing stop level for `position`, or `None` if trailing
    /// hasn't activated yet, or the candidate wouldn't tighten the existing
    /// stop. Pure function — never writes to the position.
    pub fn trailing_stop(&self, position: &Position, initial_stop_distance: f64, atr: f64) -> Option<f64> {
        if initial_stop_distance <= 0.0 {
            return None;
        }
        let favorable = match position.side {
            Side::Buy => position.highest_favorable_price - position.entry_price,
            Side::Sell => position.entry_price - position.highest_favorable_price,
        };
        if favorable / initial_stop_distance < self.limits.trailing_trigger_rr {
            return None;
        }

        let distance = atr * self.limits.trailing_distance_atr_mult;
        let candidate = match position.side {
            Side::Buy => position.highest_favorable_price - distance,
            Side::Sell => position.highest_favorable_price + distance,
        };

        let tightens = match position.side {
            Side::Buy => candidate > position.stop_loss,
            Side::Sell => candidate < position.stop_loss,
        };
        if tightens {
            Some(candidate)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_position(side: Side, entry: f64, current: f64, stop: f64, highest: f64) -> Position {
        Position {
            ticket: "t".into(),
            symbol: "EURUSD".into(),
            side,
            volume: 1.0,
            entry_price: entry,
            current_price: current,
            stop_loss: stop,
            take_profit: 0.0,
            open_time: Utc::now(),
            strategy: "trend_following".into(),
            stop_state: crate::domain::StopState::Open,
            highest_favorable_price: highest,
            unrealized_pnl: 0.0,
            closed_at: None,
            realized_pnl: None,
            close_reason: None,
        }
    }

    #[test]
    fn peak_balance_is_monotonic_across_losses() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        engine.register_trade_result(500.0);
        assert_eq!(engine.state().peak_balance, 10_500.0);
        engine.register_trade_result(-200.0);
        // Peak must not regress even though balance dropped.
        assert_eq!(engine.state().peak_balance, 10_500.0);
        assert_eq!(engine.balance(), 10_300.0);
    }

    fn open_admission() -> AdmissionCheck {
        AdmissionCheck {
            open_positions: 0,
            max_positions: 4,
            estimated_margin: 100.0,
            free_margin: 5_000.0,
            spread: 1.0,
            spread_threshold: 3.0,
        }
    }

    #[test]
    fn consecutive_losses_trip_admission() {
        let mut limits = RiskLimits::default();
        limits.max_consecutive_losses = 2;
        let engine = RiskEngine::new(10_000.0, limits);
        engine.register_trade_result(-100.0);
        engine.register_trade_result(-100.0);
        let (can_open, reason) = engine.can_open_position(&open_admission());
        assert!(!can_open);
        assert_eq!(reason.as_deref(), Some("consecutive_losses"));
    }

    #[test]
    fn winning_trade_resets_consecutive_losses() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        engine.register_trade_result(-100.0);
        engine.register_trade_result(50.0);
        assert_eq!(engine.state().consecutive_losses, 0);
    }

    #[test]
    fn max_drawdown_halts_trading() {
        let mut limits = RiskLimits::default();
        limits.max_drawdown_pct = 5.0;
        let engine = RiskEngine::new(10_000.0, limits);
        engine.register_trade_result(-600.0);
        let (can_open, reason) = engine.can_open_position(&open_admission());
        assert!(!can_open);
        assert_eq!(reason.as_deref(), Some("max_drawdown"));
    }

    #[test]
    fn max_open_positions_blocks_admission() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        let mut admission = open_admission();
        admission.open_positions = 4;
        let (can_open, reason) = engine.can_open_position(&admission);
        assert!(!can_open);
        assert_eq!(reason.as_deref(), Some("max_open_positions"));
    }

    #[test]
    fn excess_margin_usage_blocks_admission() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        let mut admission = open_admission();
        admission.estimated_margin = 4_500.0;
        admission.free_margin = 5_000.0;
        let (can_open, reason) = engine.can_open_position(&admission);
        assert!(!can_open);
        assert_eq!(reason.as_deref(), Some("insufficient_margin"));
    }

    #[test]
    fn wide_spread_blocks_admission() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        let mut admission = open_admission();
        admission.spread = 5.0;
        admission.spread_threshold = 3.0;
        let (can_open, reason) = engine.can_open_position(&admission);
        assert!(!can_open);
        assert_eq!(reason.as_deref(), Some("spread_blocked"));
    }

    #[test]
    fn healthy_state_admits_trade() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        let (can_open, reason) = engine.can_open_position(&open_admission());
        assert!(can_open);
        assert!(reason.is_none());
    }

    #[test]
    fn position_size_scales_with_balance_and_risk_pct() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        // risk 1% of 10,000 = 100 account currency; stop 0.0050 at pip_value 10/pip-lot
        let size = engine.position_size(0.0050, 10.0);
        assert!((size - 2.0).abs() < 1e-6);
    }

    #[test]
    fn position_size_for_symbol_matches_worked_example() {
        let mut limits = RiskLimits::default();
        limits.risk_per_trade_pct = 2.0;
        let engine = RiskEngine::new(10_000.0, limits);
        let symbol = SymbolInfo {
            symbol: "XAUUSD".into(),
            pip_size: 0.01,
            lot_step: 0.01,
            min_lot: 0.01,
            max_lot: 50.0,
            contract_size: 100.0,
        };
        // balance 10000, risk 2% = 200; sl distance 5.00 / point 0.01 = 500 points;
        // tick value = 100 * 0.01 = 1; lots = 200 / (500 * 1) = 0.40
        let lots = engine.position_size_for_symbol(1950.00, 1945.00, &symbol, 1.0);
        assert!((lots - 0.40).abs() < 1e-9);
    }

    #[test]
    fn position_size_for_symbol_clamps_to_max_lot() {
        let mut limits = RiskLimits::default();
        limits.risk_per_trade_pct = 50.0;
        let engine = RiskEngine::new(1_000_000.0, limits);
        let symbol = SymbolInfo {
            symbol: "XAUUSD".into(),
            pip_size: 0.01,
            lot_step: 0.01,
            min_lot: 0.01,
            max_lot: 5.0,
            contract_size: 100.0,
        };
        let lots = engine.position_size_for_symbol(1950.00, 1945.00, &symbol, 1.0);
        assert_eq!(lots, 5.0);
    }

    #[test]
    fn stop_loss_and_take_profit_derive_from_atr_and_rr() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        let sl = engine.stop_loss(Side::Buy, 1.1000, 0.0010, 1.5);
        assert!((sl - (1.1000 - 0.0015)).abs() < 1e-9);
        let tp = engine.take_profit(Side::Buy, 1.1000, sl, 2.0);
        assert!((tp - (1.1000 + 0.0030)).abs() < 1e-9);
    }

    #[test]
    fn breakeven_triggers_at_configured_rr() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        let pos = make_position(Side::Buy, 1.1000, 1.1050, 1.0950, 1.1050);
        // stop distance 0.0050, favorable move 0.0050 -> RR 1.0 triggers breakeven
        assert!(engine.should_move_to_breakeven(&pos, 0.0050));
    }

    #[test]
    fn trailing_stop_tightens_after_trigger() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        // favorable move 0.0100 vs stop distance 0.0050 -> RR 2.0, above trigger 1.5
        let pos = make_position(Side::Buy, 1.1000, 1.1100, 1.1060, 1.1100);
        let trail = engine.trailing_stop(&pos, 0.0050, 0.0020);
        // candidate = 1.1100 - 0.0020*1.5 = 1.1070, which is > current stop 1.1060
        assert!((trail.unwrap() - 1.1070).abs() < 1e-9);
    }

    #[test]
    fn trailing_stop_none_before_trigger() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        let pos = make_position(Side::Buy, 1.1000, 1.1020, 1.0950, 1.1020);
        assert!(engine.trailing_stop(&pos, 0.0050, 0.0020).is_none());
    }

    #[test]
    fn trailing_stop_none_when_candidate_would_loosen() {
        let engine = RiskEngine::new(10_000.0, RiskLimits::default());
        // Stop already tighter than what the trailing distance would produce.
        let pos = make_position(Side::Buy, 1.1000, 1.1100, 1.1090, 1.1100);
        assert!(engine.trailing_stop(&pos, 0.0050, 0.0020).is_none());
    }
}
