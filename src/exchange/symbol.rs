//! Trading pair parsing

use crate::common::errors::{EngineError, Result};

/// Quote assets recognised in concatenated symbols, checked in this order
pub const KNOWN_QUOTES: [&str; 8] = ["USDT", "USDC", "BTC", "ETH", "USD", "EUR", "BUSD", "SOL"];

/// Split a symbol into upper-cased `(base, quote)`
///
/// Accepts `BTC/USDT`, `BTC-USDT` and `BTCUSDT`. The concatenated form needs a
/// known quote suffix and a non-empty base.
pub fn parse_symbol(symbol: &str) -> Result<(String, String)> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(EngineError::SymbolParse("empty symbol".to_string()));
    }

    for separator in ['/', '-'] {
        if let Some((base, quote)) = symbol.split_once(separator) {
            if base.is_empty() || quote.is_empty() {
                return Err(EngineError::SymbolParse(symbol.to_string()));
            }
            return Ok((base.to_uppercase(), quote.to_uppercase()));
        }
    }

    let upper = symbol.to_uppercase();
    KNOWN_QUOTES
        .iter()
        .find_map(|quote| {
            upper
                .strip_suffix(quote)
                .filter(|base| !base.is_empty())
                .map(|base| (base.to_string(), quote.to_string()))
        })
        .ok_or_else(|| EngineError::SymbolParse(symbol.to_string()))
}
