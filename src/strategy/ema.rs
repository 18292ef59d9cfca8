//! EMA crossover strategy

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::info;

use super::indicators::ema;
use super::router::OrderRouter;
use super::traits::Strategy;
use super::types::Decision;
use crate::common::types::{Candle, Side};

pub const EMA_STRATEGY_NAME: &str = "ema_crossover";

/// Signal state: the full close history and the crossover test over it
#[derive(Debug, Clone)]
pub struct EmaCrossoverSignal {
    short_period: usize,
    long_period: usize,
    prices: Vec<Decimal>,
}

impl EmaCrossoverSignal {
    pub fn new(short_period: usize, long_period: usize) -> Self {
        Self {
            short_period,
            long_period,
            prices: Vec::new(),
        }
    }

    /// Record a close and report a cross between the last two samples
    ///
    /// Buys when the short EMA moves from at-or-below the long EMA to above
    /// it, sells on the symmetric downward cross. Needs `long + 2` closes.
    pub fn on_close(&mut self, close: Decimal) -> Decision {
        self.prices.push(close);
        if self.prices.len() < self.long_period + 2 {
            return Decision::no_go();
        }

        let short = ema(&self.prices, self.short_period);
        let long = ema(&self.prices, self.long_period);
        let n = short.len() - 1;
        let prev = n - 1;

        if short[prev] <= long[prev] && short[n] > long[n] {
            Decision::go(Side::Buy, close, "short EMA crossed above long EMA")
        } else if short[prev] >= long[prev] && short[n] < long[n] {
            Decision::go(Side::Sell, close, "short EMA crossed below long EMA")
        } else {
            Decision::no_go()
        }
    }

    pub fn history_len(&self) -> usize {
        self.prices.len()
    }
}

struct EmaState {
    signal: EmaCrossoverSignal,
    account_balance: Decimal,
}

/// Trades short/long exponential moving average crossovers on one symbol
pub struct EmaCrossover {
    router: OrderRouter,
    state: Mutex<EmaState>,
}

impl EmaCrossover {
    pub fn new(router: OrderRouter, short_period: usize, long_period: usize) -> Self {
        Self {
            router,
            state: Mutex::new(EmaState {
                signal: EmaCrossoverSignal::new(short_period, long_period),
                account_balance: Decimal::ZERO,
            }),
        }
    }
}

#[async_trait]
impl Strategy for EmaCrossover {
    fn name(&self) -> &str {
        EMA_STRATEGY_NAME
    }

    fn symbol(&self) -> &str {
        self.router.symbol()
    }

    async fn on_candle(&self, candle: &Candle) {
        let mut state = self.state.lock().await;
        let decision = state.signal.on_close(candle.close);
        let balance = state.account_balance;
        self.router.execute(EMA_STRATEGY_NAME, decision, balance).await;
    }

    async fn on_start(&self) {
        info!(strategy = EMA_STRATEGY_NAME, symbol = %self.symbol(), "strategy started");
    }

    async fn on_stop(&self) {
        let state = self.state.lock().await;
        info!(
            strategy = EMA_STRATEGY_NAME,
            candles = state.signal.history_len(),
            "strategy stopped"
        );
    }

    async fn set_account_balance(&self, balance: Decimal) {
        self.state.lock().await.account_balance = balance;
    }

    async fn account_balance(&self) -> Decimal {
        self.state.lock().await.account_balance
    }
}
