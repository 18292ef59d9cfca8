//! Trait definitions for the pluggable seams of the runtime
//!
//! - [`ExchangeAdapter`]: a broker or simulated venue
//! - [`OrderExecutor`]: what strategies submit orders to (live manager or backtest simulator)
//! - [`Store`]: the order/trade/run ledger
//! - [`RiskManager`]: order sizing

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use super::channels::ShutdownReceiver;
use super::errors::{EngineError, Result};
use super::types::{Candle, LedgerCounts, Order, OrderRequest, Position, RunRecord, Trade};

/// Trait for exchange/broker integrations
///
/// Errors must be classified: transient failures as
/// [`EngineError::TransientAdapter`] (or HTTP transport errors), terminal ones
/// such as [`EngineError::InsufficientFunds`] as their own variants, so the
/// order manager knows what to retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Place an order and return it with its exchange-assigned id
    async fn place_order(&self, request: &OrderRequest) -> Result<Order>;

    /// Cancel a resting order
    async fn cancel_order(&self, order_id: &str) -> Result<()>;

    /// Available balance per asset
    async fn get_balances(&self) -> Result<HashMap<String, Decimal>>;

    /// Current position in a symbol
    async fn get_position(&self, symbol: &str) -> Result<Position>;

    /// Open a candle stream for a symbol
    ///
    /// The returned receiver yields candles in time order and closes when the
    /// feed ends or `shutdown` fires.
    async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: Duration,
        shutdown: ShutdownReceiver,
    ) -> Result<mpsc::Receiver<Candle>>;

    /// Name used in logs
    fn adapter_name(&self) -> &'static str;
}

/// Outcome of a successful submission
#[derive(Debug)]
pub struct Submission {
    /// The order as filled/accepted by the backend
    pub order: Order,
    /// Set when the fill happened but the ledger write failed
    pub persist_error: Option<EngineError>,
    /// True when the intent resolved to an earlier order without a new placement
    pub deduplicated: bool,
}

impl Submission {
    pub fn fresh(order: Order, persist_error: Option<EngineError>) -> Self {
        Self {
            order,
            persist_error,
            deduplicated: false,
        }
    }

    pub fn deduplicated(order: Order) -> Self {
        Self {
            order,
            persist_error: None,
            deduplicated: true,
        }
    }
}

/// Execution backend that strategies submit order intents to
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn submit(&self, request: OrderRequest) -> Result<Submission>;
}

/// Ledger of orders, trades, runs and stored candles
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_order(&self, order: &Order) -> Result<()>;

    /// Record an execution; trades are immutable, so a known id is left untouched
    async fn save_trade(&self, trade: &Trade) -> Result<()>;

    /// Insert or replace a run record by id
    async fn save_run(&self, run: &RunRecord) -> Result<()>;

    async fn save_candle(&self, symbol: &str, candle: &Candle) -> Result<()>;

    /// Up to `limit` candles for `symbol`, ascending by time
    async fn load_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>>;

    async fn counts(&self) -> Result<LedgerCounts>;

    /// Realized PnL from replaying the symbol's live trades in order
    ///
    /// Backtest fills (trades carrying a run id) are excluded.
    async fn realized_pnl(&self, symbol: &str) -> Result<Decimal>;
}

/// Order sizing
pub trait RiskManager: Send + Sync {
    /// Quantity to trade; zero or negative means "do not trade"
    fn size(&self, symbol: &str, price: Decimal, account_balance: Decimal) -> Decimal;
}
