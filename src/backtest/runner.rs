//! Candle replay loop

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::simulator::BacktestSimulator;
use crate::common::errors::{EngineError, Result};
use crate::common::traits::{RiskManager, Store};
use crate::common::types::{sort_candles, Candle, RunRecord};
use crate::config::types::AppConfig;
use crate::engine::FixedPercentRisk;
use crate::strategy::{build_strategies, SharedStrategy, StrategySelection};

/// Summary of one backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestStats {
    pub run_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub final_equity: Decimal,
    /// Equity after each candle, one sample per candle
    pub equity_curve: Vec<Decimal>,
}

/// Replays a candle set through strategies wired to a [`BacktestSimulator`]
pub struct Backtester {
    simulator: Arc<BacktestSimulator>,
    strategies: Vec<SharedStrategy>,
    store: Option<Arc<dyn Store>>,
}

impl Backtester {
    pub fn new(simulator: Arc<BacktestSimulator>) -> Self {
        Self {
            simulator,
            strategies: Vec::new(),
            store: None,
        }
    }

    /// Persist the run record on completion
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn add_strategy(&mut self, strategy: SharedStrategy) {
        self.strategies.push(strategy);
    }

    pub fn simulator(&self) -> &Arc<BacktestSimulator> {
        &self.simulator
    }

    /// Feed every candle, in time order, to every strategy
    #[instrument(skip(self, candles), fields(symbol = %self.simulator.symbol(), candles = candles.len()))]
    pub async fn run(&self, mut candles: Vec<Candle>) -> Result<BacktestStats> {
        if candles.is_empty() {
            return Err(EngineError::NoCandles(self.simulator.symbol().to_string()));
        }
        sort_candles(&mut candles);

        let names = self.strategies.iter().map(|s| s.name().to_string()).collect();
        let run = RunRecord::with_id(self.simulator.run_id(), names);
        let opening_balance = self.simulator.balance().await;

        for strategy in &self.strategies {
            strategy.set_account_balance(opening_balance).await;
            strategy.on_start().await;
        }

        let mut equity_curve = Vec::with_capacity(candles.len());
        for candle in &candles {
            self.simulator.mark(candle).await;
            for strategy in &self.strategies {
                strategy.on_candle(candle).await;
            }
            equity_curve.push(self.simulator.equity(candle.close).await);
        }

        for strategy in &self.strategies {
            strategy.on_stop().await;
        }

        let final_equity = equity_curve.last().copied().unwrap_or(opening_balance);
        let run = run.close(final_equity);
        if let Some(store) = self.store.as_ref() {
            if let Err(e) = store.save_run(&run).await {
                warn!(run_id = %run.id, error = %e, "failed to persist backtest run");
            }
        }

        info!(run_id = %run.id, final_equity = %final_equity, "backtest finished");
        Ok(BacktestStats {
            run_id: run.id,
            start: run.started_at,
            end: run.stopped_at.unwrap_or_else(Utc::now),
            final_equity,
            equity_curve,
        })
    }
}

/// Backtest the selected strategies over the stored candles of `symbol`
///
/// Strategy symbols are overridden with `symbol` so every strategy trades the
/// replayed series.
pub async fn run_backtest(
    config: &AppConfig,
    store: Arc<dyn Store>,
    selection: StrategySelection,
    symbol: &str,
) -> Result<BacktestStats> {
    let candles = store
        .load_candles(symbol, config.backtest.candle_limit)
        .await?;
    if candles.is_empty() {
        return Err(EngineError::NoCandles(symbol.to_string()));
    }
    info!(symbol, candles = candles.len(), selection = ?selection, "loaded candles for backtest");

    let simulator = Arc::new(
        BacktestSimulator::new(symbol, config.backtest.initial_balance).with_store(store.clone()),
    );
    let risk: Arc<dyn RiskManager> = Arc::new(FixedPercentRisk::new(config.risk.percent));

    let mut strategies_config = config.strategies.clone();
    strategies_config.ema.symbol = symbol.to_string();
    strategies_config.mean_reversion.symbol = symbol.to_string();

    let strategies = build_strategies(
        selection,
        &strategies_config,
        &config.risk,
        simulator.clone(),
        risk,
    )
    .await;

    let mut backtester = Backtester::new(simulator).with_store(store);
    for strategy in strategies {
        backtester.add_strategy(strategy);
    }
    backtester.run(candles).await
}
