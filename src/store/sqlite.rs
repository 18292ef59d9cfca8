//! SQLite ledger via sqlx
//!
//! Decimals are stored as TEXT so no precision is lost. Candle times are
//! stored as epoch milliseconds to keep range ordering exact.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use tracing::{debug, info};

use super::replay_realized_pnl;
use crate::common::errors::{EngineError, Result};
use crate::common::traits::Store;
use crate::common::types::{Candle, LedgerCounts, Order, RunRecord, Side, Trade};

const SCHEMA: [&str; 4] = [
    "CREATE TABLE IF NOT EXISTS orders (
        id TEXT PRIMARY KEY,
        symbol TEXT NOT NULL,
        side TEXT NOT NULL,
        order_type TEXT NOT NULL,
        price TEXT NOT NULL,
        filled_price TEXT NOT NULL,
        quantity TEXT NOT NULL,
        filled INTEGER NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS trades (
        id TEXT PRIMARY KEY,
        order_id TEXT NOT NULL,
        symbol TEXT NOT NULL,
        side TEXT NOT NULL,
        price TEXT NOT NULL,
        quantity TEXT NOT NULL,
        executed_at TEXT NOT NULL,
        run_id TEXT
    )",
    "CREATE TABLE IF NOT EXISTS runs (
        id TEXT PRIMARY KEY,
        strategies TEXT NOT NULL,
        started_at TEXT NOT NULL,
        stopped_at TEXT,
        final_value TEXT
    )",
    "CREATE TABLE IF NOT EXISTS candles (
        symbol TEXT NOT NULL,
        time_ms INTEGER NOT NULL,
        open TEXT NOT NULL,
        high TEXT NOT NULL,
        low TEXT NOT NULL,
        close TEXT NOT NULL,
        volume TEXT NOT NULL,
        PRIMARY KEY (symbol, time_ms)
    )",
];

#[derive(Debug, FromRow)]
struct TradeRow {
    id: String,
    order_id: String,
    symbol: String,
    side: String,
    price: String,
    quantity: String,
    executed_at: DateTime<Utc>,
    run_id: Option<String>,
}

#[derive(Debug, FromRow)]
struct CandleRow {
    time_ms: i64,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

fn decimal(raw: &str) -> Result<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| EngineError::Persistence(format!("bad decimal {:?}: {}", raw, e)))
}

fn side(raw: &str) -> Result<Side> {
    match raw {
        "BUY" => Ok(Side::Buy),
        "SELL" => Ok(Side::Sell),
        other => Err(EngineError::Persistence(format!("bad side {:?}", other))),
    }
}

impl TryFrom<TradeRow> for Trade {
    type Error = EngineError;

    fn try_from(row: TradeRow) -> Result<Self> {
        Ok(Trade {
            side: side(&row.side)?,
            price: decimal(&row.price)?,
            quantity: decimal(&row.quantity)?,
            id: row.id,
            order_id: row.order_id,
            symbol: row.symbol,
            executed_at: row.executed_at,
            run_id: row.run_id,
        })
    }
}

impl TryFrom<CandleRow> for Candle {
    type Error = EngineError;

    fn try_from(row: CandleRow) -> Result<Self> {
        Ok(Candle {
            time: DateTime::from_timestamp_millis(row.time_ms).ok_or_else(|| {
                EngineError::Persistence(format!("bad candle time {}", row.time_ms))
            })?,
            open: decimal(&row.open)?,
            high: decimal(&row.high)?,
            low: decimal(&row.low)?,
            close: decimal(&row.close)?,
            volume: decimal(&row.volume)?,
        })
    }
}

/// Ledger backed by a SQLite database file (or `sqlite::memory:`)
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database, creating its directory and schema when missing
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let filename = options.clone().get_filename();
        if let Some(parent) = filename.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    EngineError::Persistence(format!("creating {}: {}", parent.display(), e))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        info!(url, "sqlite ledger ready");
        Ok(store)
    }

    /// Private in-memory database; a single connection keeps every query on the same data
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", 1).await
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("schema ensured");
        Ok(())
    }

    async fn count(&self, table: &str) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn save_order(&self, order: &Order) -> Result<()> {
        sqlx::query(
            "INSERT INTO orders
                (id, symbol, side, order_type, price, filled_price, quantity, filled, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                filled_price = excluded.filled_price,
                filled = excluded.filled",
        )
        .bind(&order.id)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.price.to_string())
        .bind(order.filled_price.to_string())
        .bind(order.quantity.to_string())
        .bind(order.filled)
        .bind(order.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_trade(&self, trade: &Trade) -> Result<()> {
        sqlx::query(
            "INSERT INTO trades (id, order_id, symbol, side, price, quantity, executed_at, run_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&trade.id)
        .bind(&trade.order_id)
        .bind(&trade.symbol)
        .bind(trade.side.to_string())
        .bind(trade.price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.executed_at)
        .bind(trade.run_id.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_run(&self, run: &RunRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs (id, strategies, started_at, stopped_at, final_value)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                stopped_at = excluded.stopped_at,
                final_value = excluded.final_value",
        )
        .bind(&run.id)
        .bind(serde_json::to_string(&run.strategies)?)
        .bind(run.started_at)
        .bind(run.stopped_at)
        .bind(run.final_value.map(|p| p.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_candle(&self, symbol: &str, candle: &Candle) -> Result<()> {
        sqlx::query(
            "INSERT INTO candles (symbol, time_ms, open, high, low, close, volume)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(symbol, time_ms) DO UPDATE SET
                open = excluded.open,
                high = excluded.high,
                low = excluded.low,
                close = excluded.close,
                volume = excluded.volume",
        )
        .bind(symbol)
        .bind(candle.time.timestamp_millis())
        .bind(candle.open.to_string())
        .bind(candle.high.to_string())
        .bind(candle.low.to_string())
        .bind(candle.close.to_string())
        .bind(candle.volume.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_candles(&self, symbol: &str, limit: usize) -> Result<Vec<Candle>> {
        let rows: Vec<CandleRow> = sqlx::query_as(
            "SELECT time_ms, open, high, low, close, volume FROM (
                SELECT * FROM candles WHERE symbol = ? ORDER BY time_ms DESC LIMIT ?
             ) ORDER BY time_ms ASC",
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Candle::try_from).collect()
    }

    async fn counts(&self) -> Result<LedgerCounts> {
        Ok(LedgerCounts {
            orders: self.count("orders").await?,
            trades: self.count("trades").await?,
            runs: self.count("runs").await?,
        })
    }

    async fn realized_pnl(&self, symbol: &str) -> Result<Decimal> {
        let rows: Vec<TradeRow> = sqlx::query_as(
            "SELECT id, order_id, symbol, side, price, quantity, executed_at, run_id
             FROM trades WHERE symbol = ? AND run_id IS NULL ORDER BY rowid ASC",
        )
        .bind(symbol)
        .fetch_all(&self.pool)
        .await?;
        let trades = rows
            .into_iter()
            .map(Trade::try_from)
            .collect::<Result<Vec<_>>>()?;
        Ok(replay_realized_pnl(&trades))
    }
}
