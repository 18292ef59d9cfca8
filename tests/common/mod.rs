//! Common test utilities and fixtures

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use candle_trader::common::channels::{cancelled, create_candle_channel, ShutdownReceiver};
use candle_trader::common::errors::{EngineError, Result};
use candle_trader::common::traits::{ExchangeAdapter, OrderExecutor, Store};
use candle_trader::common::types::{
    Candle, LedgerCounts, Order, OrderRequest, Position, RunRecord, Side, Trade,
};
use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, Mutex};

/// Poll `check` until it holds, failing the test after five seconds
pub async fn wait_until<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let polled = tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not reached within 5s");
}

/// Fixed epoch for deterministic candle timestamps
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// One flat candle per close, one minute apart
pub fn candles_from_closes(closes: &[Decimal]) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| Candle::flat(t0() + chrono::Duration::minutes(i as i64), *close))
        .collect()
}

/// Exchange fake with scripted placement failures and scripted feeds
///
/// Placement fails `failures` times with a transient error, then fills at the
/// request price. Every placement attempt is timestamped with the tokio clock.
pub struct ScriptedExchange {
    failures: AtomicUsize,
    terminal_error: bool,
    placement_delay: Duration,
    attempts: Mutex<Vec<tokio::time::Instant>>,
    placed: AtomicUsize,
    feeds: HashMap<String, Vec<Candle>>,
    feed_pacing: Duration,
    subscribe_delay: Duration,
    subscribed: AtomicUsize,
    broken_symbols: HashSet<String>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self {
            failures: AtomicUsize::new(0),
            terminal_error: false,
            placement_delay: Duration::ZERO,
            attempts: Mutex::new(Vec::new()),
            placed: AtomicUsize::new(0),
            feeds: HashMap::new(),
            feed_pacing: Duration::ZERO,
            subscribe_delay: Duration::ZERO,
            subscribed: AtomicUsize::new(0),
            broken_symbols: HashSet::new(),
        }
    }

    pub fn failing(mut self, times: usize) -> Self {
        self.failures = AtomicUsize::new(times);
        self
    }

    /// Fail with insufficient funds instead of a transient error
    pub fn terminal(mut self) -> Self {
        self.terminal_error = true;
        self
    }

    pub fn with_placement_delay(mut self, delay: Duration) -> Self {
        self.placement_delay = delay;
        self
    }

    pub fn with_feed(mut self, symbol: &str, candles: Vec<Candle>) -> Self {
        self.feeds.insert(symbol.to_string(), candles);
        self
    }

    pub fn with_feed_pacing(mut self, pacing: Duration) -> Self {
        self.feed_pacing = pacing;
        self
    }

    /// Each subscription takes `delay` to open
    pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = delay;
        self
    }

    /// Subscriptions for `symbol` fail
    pub fn with_broken_symbol(mut self, symbol: &str) -> Self {
        self.broken_symbols.insert(symbol.to_string());
        self
    }

    /// Tokio-clock instant of every `place_order` call, failed or not
    pub async fn attempts(&self) -> Vec<tokio::time::Instant> {
        self.attempts.lock().await.clone()
    }

    /// Number of subscriptions opened
    pub fn subscribed(&self) -> usize {
        self.subscribed.load(Ordering::SeqCst)
    }

    /// Number of successful placements
    pub fn placed(&self) -> usize {
        self.placed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExchangeAdapter for ScriptedExchange {
    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        self.attempts.lock().await.push(tokio::time::Instant::now());
        if !self.placement_delay.is_zero() {
            tokio::time::sleep(self.placement_delay).await;
        }

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(if self.terminal_error {
                EngineError::InsufficientFunds("USD".to_string())
            } else {
                EngineError::TransientAdapter(format!("scripted failure, {} left", remaining - 1))
            });
        }

        let n = self.placed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Order::accepted(format!("scripted-{}", n), request, Utc::now()).fill(request.price))
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        Err(EngineError::OrderNotFound(order_id.to_string()))
    }

    async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        Ok(HashMap::new())
    }

    async fn get_position(&self, symbol: &str) -> Result<Position> {
        Ok(Position::new(symbol))
    }

    async fn subscribe_candles(
        &self,
        symbol: &str,
        _interval: Duration,
        mut shutdown: ShutdownReceiver,
    ) -> Result<mpsc::Receiver<Candle>> {
        if !self.subscribe_delay.is_zero() {
            tokio::time::sleep(self.subscribe_delay).await;
        }
        if self.broken_symbols.contains(symbol) {
            return Err(EngineError::Subscription {
                symbol: symbol.to_string(),
                message: "scripted subscription failure".to_string(),
            });
        }

        self.subscribed.fetch_add(1, Ordering::SeqCst);
        let candles = self.feeds.get(symbol).cloned().unwrap_or_default();
        let pacing = self.feed_pacing;
        let (tx, rx) = create_candle_channel();
        tokio::spawn(async move {
            for candle in candles {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => return,
                    sent = tx.send(candle) => if sent.is_err() { return },
                }
                if !pacing.is_zero() {
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut shutdown) => return,
                        _ = tokio::time::sleep(pacing) => {}
                    }
                }
            }
            // Keep the feed open like a live subscription until cancelled
            cancelled(&mut shutdown).await;
        });
        Ok(rx)
    }

    fn adapter_name(&self) -> &'static str {
        "scripted"
    }
}

/// Strategy that records its lifecycle and can submit scripted orders
pub struct RecordingStrategy {
    name: String,
    symbol: String,
    executor: Option<Arc<dyn OrderExecutor>>,
    /// Order submitted on the candle at each index
    script: HashMap<usize, OrderRequest>,
    seen: Mutex<Vec<Candle>>,
    stopped: AtomicBool,
    candle_after_stop: AtomicBool,
    started: AtomicBool,
    balance: Mutex<Decimal>,
}

impl RecordingStrategy {
    pub fn new(name: &str, symbol: &str) -> Self {
        Self {
            name: name.to_string(),
            symbol: symbol.to_string(),
            executor: None,
            script: HashMap::new(),
            seen: Mutex::new(Vec::new()),
            stopped: AtomicBool::new(false),
            candle_after_stop: AtomicBool::new(false),
            started: AtomicBool::new(false),
            balance: Mutex::new(Decimal::ZERO),
        }
    }

    /// Submit `side`/`quantity` on the candle with index `at`
    pub fn trading(
        mut self,
        executor: Arc<dyn OrderExecutor>,
        script: Vec<(usize, Side, Decimal)>,
    ) -> Self {
        for (at, side, quantity) in script {
            self.script.insert(
                at,
                OrderRequest::market(self.symbol.clone(), side, Decimal::ZERO, quantity),
            );
        }
        self.executor = Some(executor);
        self
    }

    pub async fn candles_seen(&self) -> usize {
        self.seen.lock().await.len()
    }

    pub async fn seen(&self) -> Vec<Candle> {
        self.seen.lock().await.clone()
    }

    pub fn was_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn saw_candle_after_stop(&self) -> bool {
        self.candle_after_stop.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl candle_trader::strategy::Strategy for RecordingStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    fn symbol(&self) -> &str {
        &self.symbol
    }

    async fn on_candle(&self, candle: &Candle) {
        if self.stopped.load(Ordering::SeqCst) {
            self.candle_after_stop.store(true, Ordering::SeqCst);
        }
        let index = {
            let mut seen = self.seen.lock().await;
            seen.push(candle.clone());
            seen.len() - 1
        };
        if let (Some(executor), Some(request)) = (&self.executor, self.script.get(&index)) {
            let mut request = request.clone();
            request.price = candle.close;
            let _ = executor.submit(request).await;
        }
    }

    async fn on_start(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    async fn on_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn set_account_balance(&self, balance: Decimal) {
        *self.balance.lock().await = balance;
    }

    async fn account_balance(&self) -> Decimal {
        *self.balance.lock().await
    }
}

/// Store whose writes always fail
pub struct FailingStore;

#[async_trait]
impl Store for FailingStore {
    async fn save_order(&self, _order: &Order) -> Result<()> {
        Err(EngineError::Persistence("disk full".to_string()))
    }

    async fn save_trade(&self, _trade: &Trade) -> Result<()> {
        Err(EngineError::Persistence("disk full".to_string()))
    }

    async fn save_run(&self, _run: &RunRecord) -> Result<()> {
        Err(EngineError::Persistence("disk full".to_string()))
    }

    async fn save_candle(&self, _symbol: &str, _candle: &Candle) -> Result<()> {
        Err(EngineError::Persistence("disk full".to_string()))
    }

    async fn load_candles(&self, _symbol: &str, _limit: usize) -> Result<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn counts(&self) -> Result<LedgerCounts> {
        Ok(LedgerCounts::default())
    }

    async fn realized_pnl(&self, _symbol: &str) -> Result<Decimal> {
        Ok(Decimal::ZERO)
    }
}
