//! Unified types shared by strategies, execution backends and the ledger

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
        }
    }
}

/// OHLCV aggregate for one time interval
///
/// Candles are immutable once produced. Within one symbol's stream they are
/// delivered in non-decreasing time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Candle {
    /// Candle where every price field equals `close`
    pub fn flat(time: DateTime<Utc>, close: Decimal) -> Self {
        Self {
            time,
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ZERO,
        }
    }
}

/// Sort candles ascending by time, keeping the relative order of equal timestamps
pub fn sort_candles(candles: &mut [Candle]) {
    candles.sort_by_key(|c| c.time);
}

/// An order intent produced by a strategy
///
/// Carries no id: identifiers are assigned by the execution backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    /// Reference price (last close for market orders, limit price otherwise)
    pub price: Decimal,
    pub quantity: Decimal,
    /// Caller-chosen id the venue uses to recognise a resent order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn market(symbol: impl Into<String>, side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            price,
            quantity,
            client_order_id: None,
        }
    }

    pub fn limit(symbol: impl Into<String>, side: Side, price: Decimal, quantity: Decimal) -> Self {
        Self {
            order_type: OrderType::Limit,
            ..Self::market(symbol, side, price, quantity)
        }
    }
}

/// An order as seen by the execution backend
///
/// Terminal once `filled` is set; backends never mutate a filled order again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub filled_price: Decimal,
    pub quantity: Decimal,
    pub created_at: DateTime<Utc>,
    pub filled: bool,
}

impl Order {
    /// Build an accepted (not yet filled) order from a request
    pub fn accepted(id: impl Into<String>, request: &OrderRequest, created_at: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            price: request.price,
            filled_price: Decimal::ZERO,
            quantity: request.quantity,
            created_at,
            filled: false,
        }
    }

    /// Mark the order filled at `price`
    pub fn fill(mut self, price: Decimal) -> Self {
        self.filled_price = price;
        self.filled = true;
        self
    }
}

/// A persisted execution derived from a filled order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub price: Decimal,
    pub quantity: Decimal,
    pub executed_at: DateTime<Utc>,
    /// Backtest run that produced the fill; `None` for live trading
    #[serde(default)]
    pub run_id: Option<String>,
}

impl Trade {
    pub fn from_order(order: &Order) -> Self {
        Self {
            id: format!("{}_trade", order.id),
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price: order.filled_price,
            quantity: order.quantity,
            executed_at: order.created_at,
            run_id: None,
        }
    }

    /// Tag the trade as a simulated fill of `run_id`
    pub fn in_run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }
}

/// Open position with a volume-weighted cost basis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    /// Average entry price
    pub avg_price: Decimal,
}

impl Position {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            avg_price: Decimal::ZERO,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == Decimal::ZERO
    }

    /// Apply a fill and return the realized PnL
    ///
    /// Buys move the cost basis; sells realize `(price - avg) * qty` against it
    /// and leave it untouched unless the position is closed out.
    pub fn apply_fill(&mut self, side: Side, quantity: Decimal, price: Decimal) -> Decimal {
        match side {
            Side::Buy => {
                let total = self.quantity + quantity;
                if total != Decimal::ZERO {
                    self.avg_price = (self.avg_price * self.quantity + quantity * price) / total;
                }
                self.quantity = total;
                Decimal::ZERO
            }
            Side::Sell => {
                let realized = (price - self.avg_price) * quantity;
                self.quantity -= quantity;
                if self.quantity <= Decimal::ZERO {
                    self.avg_price = Decimal::ZERO;
                }
                realized
            }
        }
    }

    /// Unrealized PnL of the open quantity at `mark`
    pub fn unrealized_pnl(&self, mark: Decimal) -> Decimal {
        if self.is_flat() {
            Decimal::ZERO
        } else {
            (mark - self.avg_price) * self.quantity
        }
    }
}

/// One engine or backtest execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub strategies: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    /// Realized PnL for live runs, final equity for backtests
    pub final_value: Option<Decimal>,
}

/// Run id unique across processes sharing a ledger, e.g. `backtest_20240101120000000_1f3a9c2e`
pub fn new_run_id(prefix: &str) -> String {
    let nonce = Uuid::new_v4().simple().to_string();
    format!(
        "{}_{}_{}",
        prefix,
        Utc::now().format("%Y%m%d%H%M%S%3f"),
        &nonce[..8]
    )
}

impl RunRecord {
    pub fn open(prefix: &str, strategies: Vec<String>) -> Self {
        Self::with_id(new_run_id(prefix), strategies)
    }

    pub fn with_id(id: impl Into<String>, strategies: Vec<String>) -> Self {
        Self {
            id: id.into(),
            strategies,
            started_at: Utc::now(),
            stopped_at: None,
            final_value: None,
        }
    }

    pub fn close(mut self, final_value: Decimal) -> Self {
        self.stopped_at = Some(Utc::now());
        self.final_value = Some(final_value);
        self
    }
}

/// Aggregate ledger counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCounts {
    pub orders: u64,
    pub trades: u64,
    pub runs: u64,
}
