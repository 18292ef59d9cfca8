//! Alpaca REST payloads

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::types::Candle;

/// Body of `POST /v2/orders`
#[derive(Debug, Clone, Serialize)]
pub struct NewOrder {
    pub symbol: String,
    pub qty: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub time_in_force: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

/// Order as returned by the orders endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct OrderResponse {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub filled_avg_price: Option<String>,
}

impl OrderResponse {
    pub fn is_filled(&self) -> bool {
        self.status == "filled"
    }

    pub fn fill_price(&self) -> Option<Decimal> {
        Decimal::from_str(self.filled_avg_price.as_deref()?).ok()
    }
}

/// Response of `GET /v2/account`
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub cash: String,
}

/// Response of `GET /v2/positions/{symbol}`
#[derive(Debug, Clone, Deserialize)]
pub struct PositionResponse {
    pub qty: String,
    pub avg_entry_price: String,
}

/// Error body returned with 4xx statuses
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: i64,
    pub message: String,
}

/// Response of the crypto bars endpoint, keyed by symbol
#[derive(Debug, Clone, Deserialize)]
pub struct BarsResponse {
    #[serde(default)]
    pub bars: HashMap<String, Vec<Bar>>,
}

/// One OHLCV bar, stamped with its open time
#[derive(Debug, Clone, Deserialize)]
pub struct Bar {
    pub t: DateTime<Utc>,
    pub o: Decimal,
    pub h: Decimal,
    pub l: Decimal,
    pub c: Decimal,
    pub v: Decimal,
}

impl From<Bar> for Candle {
    fn from(bar: Bar) -> Self {
        Candle {
            time: bar.t,
            open: bar.o,
            high: bar.h,
            low: bar.l,
            close: bar.c,
            volume: bar.v,
        }
    }
}

/// Alpaca timeframe for a candle duration
pub fn timeframe(interval: Duration) -> Option<&'static str> {
    let code = match interval.as_secs() {
        60 => "1Min",
        300 => "5Min",
        900 => "15Min",
        1800 => "30Min",
        3600 => "1Hour",
        14400 => "4Hour",
        86400 => "1Day",
        _ => return None,
    };
    Some(code)
}
