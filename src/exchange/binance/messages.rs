//! Binance REST payloads

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::common::errors::{EngineError, Result};
use crate::common::types::Candle;

/// Response of `POST /api/v3/order` and `GET /api/v3/order`
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: i64,
    pub status: String,
    #[serde(rename = "executedQty", default)]
    pub executed_qty: Option<String>,
    #[serde(rename = "cummulativeQuoteQty", default)]
    pub cumulative_quote_qty: Option<String>,
}

impl OrderResponse {
    pub fn is_filled(&self) -> bool {
        self.status == "FILLED"
    }

    /// Volume-weighted fill price, when the response carries the executed amounts
    pub fn average_price(&self) -> Option<Decimal> {
        let qty = Decimal::from_str(self.executed_qty.as_deref()?).ok()?;
        let quote = Decimal::from_str(self.cumulative_quote_qty.as_deref()?).ok()?;
        if qty.is_zero() {
            None
        } else {
            Some(quote / qty)
        }
    }
}

/// Response of `GET /api/v3/account`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub balances: Vec<BalanceEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceEntry {
    pub asset: String,
    pub free: String,
    #[serde(default)]
    pub locked: String,
}

/// Error body returned with 4xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub code: i64,
    pub msg: String,
}

/// Error code for an order the account balance cannot cover
pub const INSUFFICIENT_BALANCE_CODE: i64 = -2010;

/// Error code for cancelling an unknown order
pub const UNKNOWN_ORDER_CODE: i64 = -2011;

/// Error code for querying an order the venue does not hold
pub const NO_SUCH_ORDER_CODE: i64 = -2013;

/// One kline with its close time, used to skip the still-open interval
#[derive(Debug, Clone, PartialEq)]
pub struct Kline {
    pub candle: Candle,
    pub close_time: DateTime<Utc>,
}

fn millis(value: &serde_json::Value, field: &str) -> Result<DateTime<Utc>> {
    value
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .ok_or_else(|| EngineError::InvalidResponse(format!("kline {} is not a timestamp", field)))
}

fn decimal(value: &serde_json::Value, field: &str) -> Result<Decimal> {
    value
        .as_str()
        .and_then(|s| Decimal::from_str(s).ok())
        .ok_or_else(|| EngineError::InvalidResponse(format!("kline {} is not a decimal", field)))
}

/// Parse the positional array form `[openTime, open, high, low, close, volume, closeTime, ...]`
pub fn parse_kline(row: &[serde_json::Value]) -> Result<Kline> {
    if row.len() < 7 {
        return Err(EngineError::InvalidResponse(format!(
            "kline has {} fields, expected at least 7",
            row.len()
        )));
    }
    Ok(Kline {
        candle: Candle {
            time: millis(&row[0], "open time")?,
            open: decimal(&row[1], "open")?,
            high: decimal(&row[2], "high")?,
            low: decimal(&row[3], "low")?,
            close: decimal(&row[4], "close")?,
            volume: decimal(&row[5], "volume")?,
        },
        close_time: millis(&row[6], "close time")?,
    })
}

/// Binance interval code for a candle duration
pub fn interval_code(interval: Duration) -> Option<&'static str> {
    let code = match interval.as_secs() {
        60 => "1m",
        180 => "3m",
        300 => "5m",
        900 => "15m",
        1800 => "30m",
        3600 => "1h",
        7200 => "2h",
        14400 => "4h",
        21600 => "6h",
        28800 => "8h",
        43200 => "12h",
        86400 => "1d",
        _ => return None,
    };
    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_kline_row() {
        let row = json!([
            1499040000000i64,
            "0.01634790",
            "0.80000000",
            "0.01575800",
            "0.01577100",
            "148976.11427815",
            1499644799999i64,
            "2434.19055334",
            308,
            "1756.87402397",
            "28.46694368",
            "0"
        ]);
        let kline = parse_kline(row.as_array().unwrap()).unwrap();
        assert_eq!(kline.candle.close, dec!(0.01577100));
        assert_eq!(kline.candle.time.timestamp_millis(), 1499040000000);
        assert_eq!(kline.close_time.timestamp_millis(), 1499644799999);
    }

    #[test]
    fn test_parse_kline_rejects_short_row() {
        let row = json!([1499040000000i64, "1", "2"]);
        assert!(matches!(
            parse_kline(row.as_array().unwrap()),
            Err(EngineError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_average_fill_price() {
        let response: OrderResponse = serde_json::from_value(json!({
            "orderId": 28,
            "status": "FILLED",
            "executedQty": "2.0",
            "cummulativeQuoteQty": "61000.0"
        }))
        .unwrap();
        assert!(response.is_filled());
        assert_eq!(response.average_price(), Some(dec!(30500)));
    }

    #[test]
    fn test_interval_codes() {
        assert_eq!(interval_code(Duration::from_secs(60)), Some("1m"));
        assert_eq!(interval_code(Duration::from_secs(3600)), Some("1h"));
        assert_eq!(interval_code(Duration::from_secs(61)), None);
    }
}
