//! Engine lifecycle and candle dispatch

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::common::channels::{
    cancelled, is_cancelled, shutdown_channel, ShutdownReceiver, ShutdownSender,
};
use crate::common::errors::{EngineError, Result};
use crate::common::traits::{ExchangeAdapter, Store};
use crate::common::types::{Candle, RunRecord};
use crate::strategy::SharedStrategy;

/// Candle granularity requested when none is configured
pub const DEFAULT_CANDLE_INTERVAL: Duration = Duration::from_secs(60);

/// Coarse lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineStatus {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineStatus::Idle => write!(f, "Idle"),
            EngineStatus::Running => write!(f, "Running"),
            EngineStatus::Stopping => write!(f, "Stopping"),
            EngineStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Mutable state of the current run
struct RunState {
    status: EngineStatus,
    shutdown: Option<ShutdownSender>,
    workers: Vec<JoinHandle<()>>,
    run: Option<RunRecord>,
    /// Ledger realized PnL per symbol when the run started
    pnl_baseline: HashMap<String, Decimal>,
}

/// Orchestrates strategies against an exchange candle feed
///
/// One dispatch task per strategy forwards candles from its subscription to
/// `on_candle` until the feed closes or the run is cancelled. [`Engine::stop`]
/// cancels, joins every task, and only then runs the strategies' stop hooks.
pub struct Engine {
    strategies: Vec<SharedStrategy>,
    exchange: Arc<dyn ExchangeAdapter>,
    store: Option<Arc<dyn Store>>,
    interval: Duration,
    state: Mutex<RunState>,
}

impl Engine {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>) -> Self {
        Self {
            strategies: Vec::new(),
            exchange,
            store: None,
            interval: DEFAULT_CANDLE_INTERVAL,
            state: Mutex::new(RunState {
                status: EngineStatus::Idle,
                shutdown: None,
                workers: Vec::new(),
                run: None,
                pnl_baseline: HashMap::new(),
            }),
        }
    }

    /// Record runs and realized PnL in a ledger
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_candle_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Register a strategy; must happen before the engine is shared
    pub fn register_strategy(&mut self, strategy: SharedStrategy) {
        info!(strategy = %strategy.name(), symbol = %strategy.symbol(), "registered strategy");
        self.strategies.push(strategy);
    }

    pub fn strategies(&self) -> &[SharedStrategy] {
        &self.strategies
    }

    pub fn exchange(&self) -> &Arc<dyn ExchangeAdapter> {
        &self.exchange
    }

    /// Snapshot of the lifecycle state
    pub async fn status(&self) -> EngineStatus {
        self.state.lock().await.status
    }

    /// Run until `parent` fires or [`Engine::stop`] is called
    ///
    /// Subscribes every strategy and launches its dispatch task, then blocks
    /// until cancellation. The state lock is only held to reserve the run and
    /// to register each worker, so `status` and `stop` stay responsive while
    /// subscriptions are opened. Workers may still be draining when this
    /// returns; call [`Engine::stop`] to join them.
    #[instrument(skip(self, parent))]
    pub async fn start(&self, mut parent: ShutdownReceiver) -> Result<()> {
        let mut own = {
            let mut state = self.state.lock().await;
            if matches!(state.status, EngineStatus::Running | EngineStatus::Stopping) {
                return Err(EngineError::Internal(format!(
                    "engine cannot start while {}",
                    state.status
                )));
            }

            let (shutdown_tx, shutdown_rx) = shutdown_channel();
            let names = self.strategies.iter().map(|s| s.name().to_string()).collect();
            let run = RunRecord::open("run", names);
            info!(run_id = %run.id, strategies = self.strategies.len(), "loading strategies");

            state.status = EngineStatus::Running;
            state.shutdown = Some(shutdown_tx);
            state.workers = Vec::new();
            state.run = Some(run);
            state.pnl_baseline = HashMap::new();
            shutdown_rx
        };

        self.record_run_start().await;

        for strategy in &self.strategies {
            if is_cancelled(&parent) || is_cancelled(&own) {
                info!("cancelled while subscribing, remaining strategies not started");
                break;
            }
            strategy.on_start().await;

            let symbol = strategy.symbol().to_string();
            let candles = match self
                .exchange
                .subscribe_candles(&symbol, self.interval, own.clone())
                .await
            {
                Ok(candles) => candles,
                Err(e) => {
                    error!(strategy = %strategy.name(), symbol = %symbol, error = %e, "failed to subscribe candles, skipping strategy");
                    continue;
                }
            };

            // stop() fires the signal under this lock before taking the workers,
            // so a worker is either registered in time to be joined or not spawned
            let mut state = self.state.lock().await;
            if is_cancelled(&own) {
                break;
            }
            state.workers.push(tokio::spawn(dispatch(
                strategy.clone(),
                candles,
                self.store.clone(),
                own.clone(),
            )));
        }
        info!(exchange = self.exchange.adapter_name(), "engine started");

        tokio::select! {
            _ = cancelled(&mut parent) => {
                info!("parent cancellation received");
                if let Some(tx) = self.state.lock().await.shutdown.as_ref() {
                    let _ = tx.send(true);
                }
            }
            _ = cancelled(&mut own) => {
                info!("engine cancellation received");
            }
        }
        Ok(())
    }

    /// Persist the opened run and snapshot the ledger PnL it will be measured against
    async fn record_run_start(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let mut baseline = HashMap::new();
        for symbol in self.symbols() {
            match store.realized_pnl(symbol).await {
                Ok(realized) => {
                    baseline.insert(symbol.to_string(), realized);
                }
                Err(e) => warn!(symbol = %symbol, error = %e, "could not read realized pnl at start"),
            }
        }

        let run = {
            let mut state = self.state.lock().await;
            state.pnl_baseline = baseline;
            state.run.clone()
        };
        if let Some(run) = run {
            if let Err(e) = store.save_run(&run).await {
                warn!(run_id = %run.id, error = %e, "failed to persist run start");
            }
        }
    }

    fn symbols(&self) -> Vec<&str> {
        let mut symbols: Vec<&str> = self.strategies.iter().map(|s| s.symbol()).collect();
        symbols.sort_unstable();
        symbols.dedup();
        symbols
    }

    /// Cancel the run, join every dispatch task, then run the stop hooks
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        let (workers, run, baseline) = {
            let mut state = self.state.lock().await;
            if !matches!(state.status, EngineStatus::Running) {
                info!(status = %state.status, "stop requested while not running");
                return;
            }
            state.status = EngineStatus::Stopping;
            if let Some(tx) = state.shutdown.take() {
                let _ = tx.send(true);
            }
            (
                std::mem::take(&mut state.workers),
                state.run.take(),
                std::mem::take(&mut state.pnl_baseline),
            )
        };

        for result in join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "dispatch task ended abnormally");
            }
        }

        for strategy in &self.strategies {
            strategy.on_stop().await;
        }

        if let Some(run) = run {
            self.close_run(run, baseline).await;
        }

        self.state.lock().await.status = EngineStatus::Stopped;
        info!("engine stopped");
    }

    /// Close `run` with the PnL realized since it started
    ///
    /// Symbols whose starting PnL could not be read are left out rather than
    /// crediting the run with earlier history.
    async fn close_run(&self, run: RunRecord, baseline: HashMap<String, Decimal>) {
        let Some(store) = self.store.as_ref() else {
            return;
        };

        let mut pnl = Decimal::ZERO;
        for symbol in self.symbols() {
            let Some(start) = baseline.get(symbol) else {
                continue;
            };
            match store.realized_pnl(symbol).await {
                Ok(realized) => pnl += realized - start,
                Err(e) => warn!(symbol = %symbol, error = %e, "could not compute realized pnl"),
            }
        }

        let run = run.close(pnl);
        if let Err(e) = store.save_run(&run).await {
            warn!(run_id = %run.id, error = %e, "failed to persist run record");
        } else {
            info!(run_id = %run.id, final_pnl = %pnl, "run recorded");
        }
    }
}

/// Forward candles to one strategy until the feed closes or the run is cancelled
///
/// Each candle is written to the ledger first so later backtests can replay it.
async fn dispatch(
    strategy: SharedStrategy,
    mut candles: mpsc::Receiver<Candle>,
    store: Option<Arc<dyn Store>>,
    mut shutdown: ShutdownReceiver,
) {
    let name = strategy.name().to_string();
    info!(strategy = %name, "candle dispatch started");
    let mut delivered: u64 = 0;
    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => {
                info!(strategy = %name, delivered, "candle dispatch cancelled");
                return;
            }
            next = candles.recv() => match next {
                Some(candle) => {
                    delivered += 1;
                    if let Some(store) = store.as_ref() {
                        if let Err(e) = store.save_candle(strategy.symbol(), &candle).await {
                            warn!(strategy = %name, error = %e, "failed to record candle");
                        }
                    }
                    strategy.on_candle(&candle).await;
                }
                None => {
                    info!(strategy = %name, delivered, "candle feed closed");
                    return;
                }
            }
        }
    }
}
