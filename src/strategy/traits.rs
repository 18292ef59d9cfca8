use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::common::types::Candle;

/// Core strategy trait
///
/// Strategies receive candles for one symbol and trade through the execution
/// backend they were built with. The same instance works against the live
/// order manager or the backtest simulator.
///
/// # Implementation Notes
///
/// - `on_candle` runs on the dispatch task that drains the candle feed, so it
///   must not block indefinitely
/// - Implementations serialize their own `on_candle` calls with an internal lock
/// - Order failures are logged, never propagated: a strategy keeps trading
///
/// # Example
///
/// ```ignore
/// struct Breakout { router: OrderRouter, state: Mutex<Vec<Decimal>> }
///
/// #[async_trait]
/// impl Strategy for Breakout {
///     fn name(&self) -> &str { "breakout" }
///     fn symbol(&self) -> &str { self.router.symbol() }
///
///     async fn on_candle(&self, candle: &Candle) {
///         let mut highs = self.state.lock().await;
///         // compute a Decision, then self.router.execute(...)
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait Strategy: Send + Sync {
    /// Unique identifier for this strategy
    fn name(&self) -> &str;

    /// Symbol whose candles this strategy consumes
    fn symbol(&self) -> &str;

    /// Called for every candle, in time order
    async fn on_candle(&self, candle: &Candle);

    /// Called once before the first candle of a run
    async fn on_start(&self) {}

    /// Called once after the last candle of a run
    async fn on_stop(&self) {}

    /// Set the balance orders are sized against
    async fn set_account_balance(&self, balance: Decimal);

    /// Balance orders are sized against
    async fn account_balance(&self) -> Decimal;
}

/// Shared strategy handle, cloned into dispatch tasks
pub type SharedStrategy = Arc<dyn Strategy>;
