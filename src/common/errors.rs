//! Error types for the trading runtime

use thiserror::Error;

/// Result type alias using our EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Main error type for engine, execution and ledger operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Transient exchange failure (network hiccup, 5xx, rate limit)
    #[error("Exchange adapter error: {0}")]
    TransientAdapter(String),

    /// Account cannot cover the order
    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Exchange refused the order for a non-transient reason
    #[error("Order rejected: {0}")]
    OrderRejected(String),

    /// Symbol could not be split into base and quote assets
    #[error("Unable to parse symbol: {0}")]
    SymbolParse(String),

    /// Candle subscription could not be opened
    #[error("Subscription error for {symbol}: {message}")]
    Subscription { symbol: String, message: String },

    /// Ledger write or read failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Backtest was asked to replay an empty candle set
    #[error("No candles to replay for {0}")]
    NoCandles(String),

    /// Order id unknown to the exchange
    #[error("Order not found: {0}")]
    OrderNotFound(String),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Database driver errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid API response
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Exchange already holds an order with this client order id
    #[error("Duplicate client order id: {0}")]
    DuplicateOrder(String),

    /// Generic internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Whether the order manager may retry after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::TransientAdapter(_) | EngineError::InvalidResponse(_) => true,
            EngineError::HttpRequest(e) => {
                e.is_timeout() || e.is_connect() || e.status().map_or(true, |s| s.is_server_error())
            }
            _ => false,
        }
    }
}
