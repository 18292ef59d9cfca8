use rust_decimal::Decimal;

use crate::common::types::Side;

/// A directional trade a strategy wants to make
///
/// Carries no size: quantity is computed by the risk manager at execution time.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub side: Side,
    /// Reference price, the close of the candle that produced the signal
    pub price: Decimal,
    pub reason: String,
}

/// Strategy decision output
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// No action should be taken
    NoGo,
    /// Execute the trade intent
    Go(TradeIntent),
}

impl Decision {
    /// Create a NoGo decision
    pub fn no_go() -> Self {
        Self::NoGo
    }

    /// Create a Go decision
    pub fn go(side: Side, price: Decimal, reason: impl Into<String>) -> Self {
        Self::Go(TradeIntent {
            side,
            price,
            reason: reason.into(),
        })
    }

    /// Side of a Go decision
    pub fn side(&self) -> Option<Side> {
        match self {
            Self::Go(intent) => Some(intent.side),
            Self::NoGo => None,
        }
    }
}
