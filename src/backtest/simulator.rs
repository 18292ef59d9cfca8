//! Deterministic fill simulation against replayed candles

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::common::errors::{EngineError, Result};
use crate::common::traits::{OrderExecutor, Store, Submission};
use crate::common::types::{new_run_id, Candle, Order, OrderRequest, Position, Side, Trade};
use crate::engine::{IdempotencyKey, IdempotencyRegistry};

#[derive(Debug)]
struct SimLedger {
    cash: Decimal,
    position: Position,
    last_close: Option<Decimal>,
    last_time: Option<DateTime<Utc>>,
}

/// Execution backend for backtests
///
/// Every order fills at the close of the most recently marked candle. Cash
/// and the position follow the cost-basis rules; a sell credits its proceeds
/// plus the realized PnL. There is no funds check.
///
/// Intents are deduplicated by [`IdempotencyKey`] exactly as the live order
/// manager does, so a repeated intent fills once. One simulator backs one run:
/// order ids are `{run_id}-{n}` and recorded trades carry the run id.
pub struct BacktestSimulator {
    symbol: String,
    run_id: String,
    ledger: Mutex<SimLedger>,
    registry: IdempotencyRegistry,
    store: Option<Arc<dyn Store>>,
    next_id: AtomicU64,
}

impl BacktestSimulator {
    pub fn new(symbol: impl Into<String>, initial_balance: Decimal) -> Self {
        let symbol = symbol.into();
        Self {
            ledger: Mutex::new(SimLedger {
                cash: initial_balance,
                position: Position::new(symbol.clone()),
                last_close: None,
                last_time: None,
            }),
            symbol,
            run_id: new_run_id("backtest"),
            registry: IdempotencyRegistry::new(),
            store: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Persist every fill as an order and a trade
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Id of the run this simulator records fills under
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Make `candle` the price reference for subsequent fills
    pub async fn mark(&self, candle: &Candle) {
        let mut ledger = self.ledger.lock().await;
        ledger.last_close = Some(candle.close);
        ledger.last_time = Some(candle.time);
    }

    pub async fn balance(&self) -> Decimal {
        self.ledger.lock().await.cash
    }

    pub async fn position(&self) -> Position {
        self.ledger.lock().await.position.clone()
    }

    /// Cash plus unrealized PnL of the open position at `close`
    pub async fn equity(&self, close: Decimal) -> Decimal {
        let ledger = self.ledger.lock().await;
        ledger.cash + ledger.position.unrealized_pnl(close)
    }

    async fn persist(&self, order: &Order) -> Option<EngineError> {
        let store = self.store.as_ref()?;
        if let Err(e) = store.save_order(order).await {
            return Some(e);
        }
        store
            .save_trade(&Trade::from_order(order).in_run(self.run_id.as_str()))
            .await
            .err()
    }
}

#[async_trait]
impl OrderExecutor for BacktestSimulator {
    async fn submit(&self, request: OrderRequest) -> Result<Submission> {
        if request.symbol != self.symbol {
            return Err(EngineError::OrderRejected(format!(
                "simulator replays {}, got order for {}",
                self.symbol, request.symbol
            )));
        }

        let order = {
            let mut ledger = self.ledger.lock().await;
            let key = IdempotencyKey::from_request(&request);
            let slot = self.registry.slot(&key).await;
            if let Some(order) = slot.get() {
                debug!(key = %key, order_id = %order.id, "duplicate intent, reusing order");
                return Ok(Submission::deduplicated(order.clone()));
            }

            let (price, time) = match (ledger.last_close, ledger.last_time) {
                (Some(price), Some(time)) => (price, time),
                _ => {
                    return Err(EngineError::Internal(
                        "no candle marked before the first order".to_string(),
                    ))
                }
            };

            let quantity = request.quantity;
            let notional = quantity * price;
            let realized = ledger.position.apply_fill(request.side, quantity, price);
            match request.side {
                Side::Buy => ledger.cash -= notional,
                Side::Sell => ledger.cash += notional + realized,
            }

            let id = format!("{}-{}", self.run_id, self.next_id.fetch_add(1, Ordering::SeqCst));
            debug!(
                order_id = %id,
                side = %request.side,
                price = %price,
                quantity = %quantity,
                cash = %ledger.cash,
                "simulated fill"
            );
            let order = Order::accepted(id, &request, time).fill(price);
            // the ledger lock serializes submits, so the slot is still empty
            let _ = slot.set(order.clone());
            order
        };

        let persist_error = self.persist(&order).await;
        if let Some(ref e) = persist_error {
            warn!(order_id = %order.id, error = %e, "simulated fill not recorded");
        }
        Ok(Submission::fresh(order, persist_error))
    }
}
