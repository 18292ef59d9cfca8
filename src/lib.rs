//! CandleTrader Library
//!
//! A candle-driven trading runtime: strategies consume OHLCV candles from an
//! exchange adapter and submit orders either to a live, idempotent order
//! manager or to a deterministic backtest simulator.

pub mod backtest;
pub mod common;
pub mod config;
pub mod engine;
pub mod exchange;
pub mod store;
pub mod strategy;

// Re-export commonly used types
pub use backtest::{BacktestSimulator, BacktestStats, Backtester};
pub use common::errors::{EngineError, Result};
pub use common::traits::{ExchangeAdapter, OrderExecutor, RiskManager, Store, Submission};
pub use common::types::{Candle, Order, OrderRequest, OrderType, Position, RunRecord, Side, Trade};
pub use config::types::AppConfig;
pub use engine::{Engine, EngineStatus, FixedPercentRisk, LiveOrderManager};
pub use exchange::{BinanceAdapter, MockExchange};
pub use store::{InMemoryStore, SqliteStore};
pub use strategy::{Decision, EmaCrossover, MeanReversion, SharedStrategy, Strategy};
