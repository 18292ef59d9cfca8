//! Backtesting: candle replay against a simulated execution backend

pub mod runner;
pub mod simulator;

pub use runner::{run_backtest, BacktestStats, Backtester};
pub use simulator::BacktestSimulator;
