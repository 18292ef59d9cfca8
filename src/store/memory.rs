//! Process-local ledger

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use super::replay_realized_pnl;
use crate::common::errors::Result;
use crate::common::traits::Store;
use crate::common::types::{Candle, LedgerCounts, Order, RunRecord, Trade};

#[derive(Debug, Default)]
struct Ledger {
    orders: HashMap<String, Order>,
    /// Insertion order doubles as execution order for PnL replay
    trades: Vec<Trade>,
    runs: HashMap<String, RunRecord>,
    candles: HashMap<String, BTreeMap<DateTime<Utc>, Candle>>,
}

/// Ledger held in memory, used by tests and by runs without a database
#[derive(Debug, Default)]
pub struct InMemoryStore {
    ledger: RwLock<Ledger>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn orders(&self) -> Vec<Order> {
        self.ledger.read().await.orders.values().cloned().collect()
    }

    pub async fn trades(&self) -> Vec<Trade> {
        self.ledger.read().await.trades.clone()
    }

    pub async fn run(&self, id: &str) -> Option<RunRecord> {
        self.ledger.read().await.runs.get(id).cloned()
    }

    pub async fn runs(&self) -> Vec<RunRecord> {
        self.ledger.read().await.runs.values().cloned().collect()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_order(&self, order: &Order) -> Result<()> {
        self.ledger
            .write()
            .await
            .orders
            .insert(order.id.clone(), order.clone());
        Ok(())
    }

    async fn save_trade(&self, trade: &Trade) -> Result<()> {
        let mut ledger = self.ledger.write().await;
        if !ledger.trades.iter().any(|t| t.id == trade.id) {
            ledger.trades.push(trade.clone());
        }
        Ok(())
    }

    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        self.ledger
            .write()
            .await
            .runs
            .insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn save_candle(&self, symbol: &str, candle: &Candle) -> Result<()> {
        self.ledger
            .write()
            .await
            .candles
            .entry(symbol.to_string())
            .or_default()
            .insert(candle.time, candle.clone());
        Ok(())
    }

    async fn load_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        let ledger = self.ledger.read().await;
        let Some(series) = ledger.candles.get(symbol) else {
            return Ok(Vec::new());
        };
        let skip = series.len().saturating_sub(limit);
        Ok(series.values().skip(skip).cloned().collect())
    }

    async fn counts(&self) -> Result<LedgerCounts> {
        let ledger = self.ledger.read().await;
        Ok(LedgerCounts {
            orders: ledger.orders.len() as u64,
            trades: ledger.trades.len() as u64,
            runs: ledger.runs.len() as u64,
        })
    }

    async fn realized_pnl(&self, symbol: &str) -> Result<Decimal> {
        let ledger = self.ledger.read().await;
        let trades: Vec<Trade> = ledger
            .trades
            .iter()
            .filter(|t| t.symbol == symbol && t.run_id.is_none())
            .cloned()
            .collect();
        Ok(replay_realized_pnl(&trades))
    }
}
