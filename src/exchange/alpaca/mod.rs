//! Alpaca crypto REST integration

pub mod messages;
pub mod rest;

pub use rest::{AlpacaAdapter, AlpacaCredentials};
