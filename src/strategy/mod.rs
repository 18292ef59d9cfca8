//! Strategy module for candle-driven trade decisions
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Dispatch task (one per strategy)                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Candle arrives                                             │
//! │       │                                                     │
//! │       ▼                                                     │
//! │  Signal.on_close() → Go/NoGo          (pure, under lock)    │
//! │       │                                                     │
//! │       ▼ (if Go)                                             │
//! │  OrderRouter                                                │
//! │    - RiskManager sizes the intent                           │
//! │    - OrderExecutor.submit (live manager or backtest sim)    │
//! │    - failures logged, never raised                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`Strategy`]: trait implemented by every strategy
//! - [`Decision`]: Go/NoGo output of a signal
//! - [`OrderRouter`]: sizing + submission shared by strategies
//! - [`EmaCrossover`], [`MeanReversion`]: built-in strategies

mod ema;
mod factory;
mod indicators;
mod mean_reversion;
mod router;
mod traits;
mod types;

pub use ema::{EmaCrossover, EmaCrossoverSignal, EMA_STRATEGY_NAME};
pub use factory::{build_strategies, StrategySelection};
pub use indicators::{ema, mean_std};
pub use mean_reversion::{MeanReversion, MeanReversionSignal, MEAN_REVERSION_STRATEGY_NAME};
pub use router::OrderRouter;
pub use traits::{SharedStrategy, Strategy};
pub use types::{Decision, TradeIntent};
