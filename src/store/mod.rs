//! Order, trade, run and candle ledgers

pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use rust_decimal::Decimal;

pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;

use crate::common::errors::Result;
use crate::common::traits::Store;
use crate::common::types::{Position, Trade};
use crate::config::types::DatabaseConfig;

/// Realized PnL of a trade sequence under the volume-weighted cost basis
pub fn replay_realized_pnl(trades: &[Trade]) -> Decimal {
    let Some(first) = trades.first() else {
        return Decimal::ZERO;
    };
    let mut position = Position::new(first.symbol.clone());
    trades
        .iter()
        .map(|t| position.apply_fill(t.side, t.quantity, t.price))
        .sum()
}

/// Open the configured ledger; the URL `memory` selects [`InMemoryStore`]
pub async fn open_store(config: &DatabaseConfig) -> Result<Arc<dyn Store>> {
    if config.url == "memory" {
        return Ok(Arc::new(InMemoryStore::new()));
    }
    Ok(Arc::new(
        SqliteStore::connect(&config.url, config.max_connections).await?,
    ))
}
