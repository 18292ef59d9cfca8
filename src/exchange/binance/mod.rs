//! Binance spot REST integration

pub mod auth;
pub mod messages;
pub mod rest;

pub use auth::BinanceCredentials;
pub use rest::BinanceAdapter;
