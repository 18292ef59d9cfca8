//! In-process exchange with immediate market fills and a synthetic candle feed

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument};

use super::symbol::parse_symbol;
use crate::common::channels::{cancelled, create_candle_channel, ShutdownReceiver};
use crate::common::errors::{EngineError, Result};
use crate::common::traits::ExchangeAdapter;
use crate::common::types::{Candle, Order, OrderRequest, OrderType, Position, Side};
use crate::config::types::ExchangeConfig;

/// Settings for [`MockExchange`]
#[derive(Debug, Clone)]
pub struct MockExchangeConfig {
    pub usd_balance: Decimal,
    /// Candles produced per subscription
    pub feed_length: usize,
    /// Delay between generated candles
    pub pacing: Duration,
    pub start_price: Decimal,
}

impl Default for MockExchangeConfig {
    fn default() -> Self {
        Self {
            usd_balance: dec!(100000),
            feed_length: 200,
            pacing: Duration::from_secs(2),
            start_price: dec!(30000),
        }
    }
}

impl From<&ExchangeConfig> for MockExchangeConfig {
    fn from(config: &ExchangeConfig) -> Self {
        Self {
            usd_balance: config.mock_usd_balance,
            feed_length: config.mock_feed_length,
            pacing: Duration::from_millis(config.mock_feed_pacing_ms),
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    balances: HashMap<String, Decimal>,
    positions: HashMap<String, Position>,
    orders: HashMap<String, Order>,
}

/// Simulated venue
///
/// Market orders fill at the request price after a balance check, limit orders
/// rest until cancelled. Each subscription gets its own generator task.
pub struct MockExchange {
    config: MockExchangeConfig,
    state: RwLock<MockState>,
    next_id: AtomicU64,
    scripted_feed: Option<Vec<Candle>>,
}

impl MockExchange {
    pub fn new(config: MockExchangeConfig) -> Self {
        let mut balances = HashMap::new();
        balances.insert("USD".to_string(), config.usd_balance);
        balances.insert("USDT".to_string(), dec!(10000));
        balances.insert("BTC".to_string(), dec!(1000));

        Self {
            config,
            state: RwLock::new(MockState {
                balances,
                ..MockState::default()
            }),
            next_id: AtomicU64::new(1),
            scripted_feed: None,
        }
    }

    /// Replay `candles` on every subscription instead of generating a feed
    pub fn with_scripted_feed(mut self, candles: Vec<Candle>) -> Self {
        self.scripted_feed = Some(candles);
        self
    }

    /// Overwrite one asset balance
    pub async fn set_balance(&self, asset: &str, amount: Decimal) {
        self.state
            .write()
            .await
            .balances
            .insert(asset.to_uppercase(), amount);
    }

    /// Orders placed so far, filled or resting
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    fn next_order_id(&self) -> String {
        format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// The synthetic random-walk feed, timestamps spaced by `interval`
    ///
    /// Fails when the configured length cannot be laid out in time or the
    /// walk outgrows the decimal range.
    fn generate_feed(&self, symbol: &str, interval: Duration) -> Result<Vec<Candle>> {
        let unrepresentable = || EngineError::Subscription {
            symbol: symbol.to_string(),
            message: format!("cannot generate a mock feed of {} candles", self.config.feed_length),
        };

        let n = i32::try_from(self.config.feed_length).map_err(|_| unrepresentable())?;
        let step = chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::minutes(1));
        let start = step
            .checked_mul(n)
            .and_then(|span| Utc::now().checked_sub_signed(span))
            .ok_or_else(unrepresentable)?;
        let mut price = self.config.start_price;

        let mut candles = Vec::new();
        for i in 0..n {
            let drift = dec!(0.0005) - dec!(0.0002) * Decimal::from(i % 3);
            price = price
                .checked_mul(Decimal::ONE + drift)
                .ok_or_else(unrepresentable)?;
            let high = price.checked_mul(dec!(1.001)).ok_or_else(unrepresentable)?;
            let time = step
                .checked_mul(i)
                .and_then(|offset| start.checked_add_signed(offset))
                .ok_or_else(unrepresentable)?;
            candles.push(Candle {
                time,
                open: price * dec!(0.999),
                high,
                low: price * dec!(0.998),
                close: price,
                volume: Decimal::from(10 + i % 5),
            });
        }
        Ok(candles)
    }
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new(MockExchangeConfig::default())
    }
}

fn debit(balances: &mut HashMap<String, Decimal>, asset: &str, amount: Decimal) -> Result<()> {
    let available = balances.get(asset).copied().unwrap_or(Decimal::ZERO);
    if available < amount {
        return Err(EngineError::InsufficientFunds(format!(
            "{} balance {} below required {}",
            asset, available, amount
        )));
    }
    balances.insert(asset.to_string(), available - amount);
    Ok(())
}

fn credit(balances: &mut HashMap<String, Decimal>, asset: &str, amount: Decimal) {
    *balances.entry(asset.to_string()).or_insert(Decimal::ZERO) += amount;
}

#[async_trait]
impl ExchangeAdapter for MockExchange {
    #[instrument(skip(self, request), fields(symbol = %request.symbol, side = %request.side))]
    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        let (base, quote) = parse_symbol(&request.symbol)?;
        let mut state = self.state.write().await;
        let order = Order::accepted(self.next_order_id(), request, Utc::now());

        if request.order_type == OrderType::Limit {
            debug!(order_id = %order.id, price = %request.price, "limit order resting");
            state.orders.insert(order.id.clone(), order.clone());
            return Ok(order);
        }

        let cost = request.quantity * request.price;
        match request.side {
            Side::Buy => {
                debit(&mut state.balances, &quote, cost)?;
                credit(&mut state.balances, &base, request.quantity);
            }
            Side::Sell => {
                debit(&mut state.balances, &base, request.quantity)?;
                credit(&mut state.balances, &quote, cost);
            }
        }

        state
            .positions
            .entry(request.symbol.clone())
            .or_insert_with(|| Position::new(request.symbol.clone()))
            .apply_fill(request.side, request.quantity, request.price);

        let order = order.fill(request.price);
        state.orders.insert(order.id.clone(), order.clone());
        debug!(order_id = %order.id, cost = %cost, "market order filled");
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        match state.orders.get(order_id) {
            None => Err(EngineError::OrderNotFound(order_id.to_string())),
            Some(order) if order.filled => Err(EngineError::OrderRejected(format!(
                "order {} already filled",
                order_id
            ))),
            Some(_) => {
                state.orders.remove(order_id);
                Ok(())
            }
        }
    }

    async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        Ok(self.state.read().await.balances.clone())
    }

    async fn get_position(&self, symbol: &str) -> Result<Position> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| Position::new(symbol)))
    }

    async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: Duration,
        mut shutdown: ShutdownReceiver,
    ) -> Result<mpsc::Receiver<Candle>> {
        let candles = match &self.scripted_feed {
            Some(feed) => feed.clone(),
            None => self.generate_feed(symbol, interval)?,
        };
        let pacing = if self.scripted_feed.is_some() {
            Duration::ZERO
        } else {
            self.config.pacing
        };
        info!(symbol, candles = candles.len(), "mock candle feed subscribed");

        let (tx, rx) = create_candle_channel();
        let symbol = symbol.to_string();
        tokio::spawn(async move {
            for candle in candles {
                tokio::select! {
                    biased;
                    _ = cancelled(&mut shutdown) => break,
                    sent = tx.send(candle) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                if !pacing.is_zero() {
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut shutdown) => break,
                        _ = tokio::time::sleep(pacing) => {}
                    }
                }
            }
            debug!(symbol = %symbol, "mock candle feed finished");
        });

        Ok(rx)
    }

    fn adapter_name(&self) -> &'static str {
        "mock"
    }
}
