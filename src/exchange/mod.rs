//! Exchange adapters
//!
//! - [`MockExchange`]: in-process venue with a synthetic candle feed
//! - [`BinanceAdapter`]: Binance spot over REST
//! - [`AlpacaAdapter`]: Alpaca crypto over REST

pub mod alpaca;
pub mod binance;
pub mod mock;
pub mod polling;
pub mod symbol;

use std::sync::Arc;

use tracing::info;

pub use alpaca::{AlpacaAdapter, AlpacaCredentials};
pub use binance::{BinanceAdapter, BinanceCredentials};
pub use mock::{MockExchange, MockExchangeConfig};
pub use symbol::parse_symbol;

use crate::common::errors::Result;
use crate::common::traits::ExchangeAdapter;
use crate::config::types::{ExchangeConfig, ExchangeKind};

/// Construct the adapter selected in configuration
pub fn build_exchange(config: &ExchangeConfig) -> Result<Arc<dyn ExchangeAdapter>> {
    let exchange: Arc<dyn ExchangeAdapter> = match config.kind {
        ExchangeKind::Mock => Arc::new(MockExchange::new(MockExchangeConfig::from(config))),
        ExchangeKind::Binance => Arc::new(BinanceAdapter::from_config(config)?),
        ExchangeKind::Alpaca => Arc::new(AlpacaAdapter::from_config(config)?),
    };
    info!(adapter = exchange.adapter_name(), "exchange adapter ready");
    Ok(exchange)
}
