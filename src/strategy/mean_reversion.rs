//! Mean reversion strategy

use std::collections::VecDeque;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::indicators::mean_std;
use super::router::OrderRouter;
use super::traits::Strategy;
use super::types::Decision;
use crate::common::types::{Candle, Side};

pub const MEAN_REVERSION_STRATEGY_NAME: &str = "mean_reversion";

/// Rolling window of the most recent closes with a `k` standard deviation band
#[derive(Debug, Clone)]
pub struct MeanReversionSignal {
    window: usize,
    k: Decimal,
    prices: VecDeque<Decimal>,
}

impl MeanReversionSignal {
    pub fn new(window: usize, k: Decimal) -> Self {
        Self {
            window,
            k,
            prices: VecDeque::with_capacity(window),
        }
    }

    /// Record a close; buy below the lower band, sell above the upper band
    pub fn on_close(&mut self, close: Decimal) -> Decision {
        if self.prices.len() == self.window {
            self.prices.pop_front();
        }
        self.prices.push_back(close);
        if self.prices.len() < self.window {
            return Decision::no_go();
        }

        let (mean, sd) = mean_std(&self.prices);
        let band = self.k * sd;
        debug!(mean = %mean, sd = %sd, close = %close, "mean reversion band");

        if close < mean - band {
            Decision::go(Side::Buy, close, "close below lower band")
        } else if close > mean + band {
            Decision::go(Side::Sell, close, "close above upper band")
        } else {
            Decision::no_go()
        }
    }

    pub fn is_warm(&self) -> bool {
        self.prices.len() >= self.window
    }
}

struct MeanReversionState {
    signal: MeanReversionSignal,
    account_balance: Decimal,
}

/// Fades moves outside a rolling volatility band on one symbol
pub struct MeanReversion {
    router: OrderRouter,
    state: Mutex<MeanReversionState>,
}

impl MeanReversion {
    pub fn new(router: OrderRouter, window: usize, k: Decimal) -> Self {
        Self {
            router,
            state: Mutex::new(MeanReversionState {
                signal: MeanReversionSignal::new(window, k),
                account_balance: Decimal::ZERO,
            }),
        }
    }
}

#[async_trait]
impl Strategy for MeanReversion {
    fn name(&self) -> &str {
        MEAN_REVERSION_STRATEGY_NAME
    }

    fn symbol(&self) -> &str {
        self.router.symbol()
    }

    async fn on_candle(&self, candle: &Candle) {
        let mut state = self.state.lock().await;
        let decision = state.signal.on_close(candle.close);
        let balance = state.account_balance;
        self.router
            .execute(MEAN_REVERSION_STRATEGY_NAME, decision, balance)
            .await;
    }

    async fn on_start(&self) {
        info!(strategy = MEAN_REVERSION_STRATEGY_NAME, symbol = %self.symbol(), "strategy started");
    }

    async fn on_stop(&self) {
        info!(strategy = MEAN_REVERSION_STRATEGY_NAME, "strategy stopped");
    }

    async fn set_account_balance(&self, balance: Decimal) {
        self.state.lock().await.account_balance = balance;
    }

    async fn account_balance(&self) -> Decimal {
        self.state.lock().await.account_balance
    }
}
