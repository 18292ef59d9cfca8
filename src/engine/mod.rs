//! Live execution pipeline
//!
//! - [`Engine`]: strategy lifecycle and per-strategy candle dispatch
//! - [`LiveOrderManager`]: idempotent, retrying order submission
//! - [`FixedPercentRisk`]: order sizing

pub mod idempotency;
pub mod lifecycle;
pub mod order_manager;
pub mod retry;
pub mod risk;

pub use idempotency::{IdempotencyKey, IdempotencyRegistry};
pub use lifecycle::{Engine, EngineStatus, DEFAULT_CANDLE_INTERVAL};
pub use order_manager::LiveOrderManager;
pub use retry::RetryPolicy;
pub use risk::FixedPercentRisk;
