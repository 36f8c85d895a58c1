// =============================================================================
// Broker Gateway
// =============================================================================
//
// Abstracts away the concrete terminal/API this engine trades against. The
// execution supervisor and every strategy talk to a `BrokerGateway`, never to
// a specific vendor client, so a new venue is a new impl of this trait.

pub mod terminal_client;

use async_trait::async_trait;

use crate::domain::{Bar, SymbolInfo};
use crate::error::EngineError;
use crate::types::{AccountMode, BalanceInfo, Side, Timeframe};

pub use terminal_client::TerminalClient;

/// Broker-side order acknowledgement.
#[derive(Debug, Clone)]
pub struct OrderTicket {
    pub ticket: String,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub fill_price: f64,
}

/// Account-level snapshot returned by a broker gateway.
#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub mode: AccountMode,
    pub equity: f64,
    pub balance: f64,
    pub margin_used: f64,
    pub balances: Vec<BalanceInfo>,
}

/// A position as reported by the broker (used for startup reconciliation).
#[derive(Debug, Clone)]
pub struct BrokerPosition {
    pub ticket: String,
    pub symbol: String,
    pub side: Side,
    pub volume: f64,
    pub entry_price: f64,
}

/// Abstract trading venue. Every method may fail with a typed
/// [`EngineError::Broker`] so the supervisor's retry policy can distinguish
/// retryable network blips from hard rejections.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Fetch the most recent `count` closed bars for `symbol` at `timeframe`.
    async fn rates(&self, symbol: &str, timeframe: Timeframe, count: usize) -> Result<Vec<Bar>, EngineError>;

    /// Current bid/ask mid price for `symbol`.
    async fn current_price(&self, symbol: &str) -> Result<f64, EngineError>;

    /// Current spread for `symbol`, in price units (ask − bid).
    async fn spread(&self, symbol: &str) -> Result<f64, EngineError>;

    /// Static contract metadata the risk manager needs for position sizing.
    async fn symbol_info(&self, symbol: &str) -> Result<SymbolInfo, EngineError>;

    /// Account balances, equity and margin usage.
    async fn account(&self) -> Result<AccountSnapshot, EngineError>;

    /// Positions currently open at the broker, independent of our local book
    /// — used to detect orphans on startup.
    async fn open_positions(&self) -> Result<Vec<BrokerPosition>, EngineError>;

    /// Submit a market order with an initial stop loss / take profit.
    async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        volume: f64,
        stop_loss: f64,
        take_profit: f64,
    ) -> Result<OrderTicket, EngineError>;

    /// Modify the protective stop on an open position.
    async fn modify_stop(&self, ticket: &str, stop_loss: f64) -> Result<(), EngineError>;

    /// Close a position fully at market.
    async fn close_position(&self, ticket: &str) -> Result<f64, EngineError>;
}
