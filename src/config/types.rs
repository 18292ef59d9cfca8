//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exchange adapter selection and settings
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Position sizing
    #[serde(default)]
    pub risk: RiskConfig,
    /// Strategy parameters
    #[serde(default)]
    pub strategies: StrategiesConfig,
    /// Backtest settings
    #[serde(default)]
    pub backtest: BacktestConfig,
    /// Ledger database
    #[serde(default)]
    pub database: DatabaseConfig,
    /// General engine settings
    #[serde(default)]
    pub settings: EngineSettings,
}

/// Which exchange adapter the runtime talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExchangeKind {
    #[default]
    Mock,
    Binance,
    Alpaca,
}

/// Exchange configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub kind: ExchangeKind,
    /// Starting USD balance of the mock exchange
    #[serde(default = "default_mock_usd_balance")]
    pub mock_usd_balance: Decimal,
    /// Number of candles the mock feed generates
    #[serde(default = "default_mock_feed_length")]
    pub mock_feed_length: usize,
    /// Delay between mock candles in milliseconds
    #[serde(default = "default_mock_feed_pacing")]
    pub mock_feed_pacing_ms: u64,
    /// API key of the selected venue
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret of the selected venue
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Binance REST base URL
    #[serde(default = "default_binance_rest_url")]
    pub rest_url: String,
    /// Alpaca trading API base URL
    #[serde(default = "default_alpaca_url")]
    pub alpaca_url: String,
    /// Alpaca market data API base URL
    #[serde(default = "default_alpaca_data_url")]
    pub alpaca_data_url: String,
    /// Candle polling interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            kind: ExchangeKind::Mock,
            mock_usd_balance: default_mock_usd_balance(),
            mock_feed_length: default_mock_feed_length(),
            mock_feed_pacing_ms: default_mock_feed_pacing(),
            api_key: None,
            api_secret: None,
            rest_url: default_binance_rest_url(),
            alpaca_url: default_alpaca_url(),
            alpaca_data_url: default_alpaca_data_url(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

fn default_mock_usd_balance() -> Decimal {
    dec!(100000)
}

fn default_mock_feed_length() -> usize {
    200
}

fn default_mock_feed_pacing() -> u64 {
    2000
}

fn default_binance_rest_url() -> String {
    "https://api.binance.com".to_string()
}

fn default_alpaca_url() -> String {
    "https://paper-api.alpaca.markets".to_string()
}

fn default_alpaca_data_url() -> String {
    "https://data.alpaca.markets".to_string()
}

fn default_poll_interval() -> u64 {
    3000
}

/// Fixed-percent risk configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of the account balance committed per order
    #[serde(default = "default_risk_percent")]
    pub percent: Decimal,
    /// Account balance strategies size against
    #[serde(default = "default_account_balance")]
    pub account_balance: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            percent: default_risk_percent(),
            account_balance: default_account_balance(),
        }
    }
}

fn default_risk_percent() -> Decimal {
    dec!(0.005)
}

fn default_account_balance() -> Decimal {
    dec!(300)
}

/// Parameters of the built-in strategies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategiesConfig {
    #[serde(default)]
    pub ema: EmaConfig,
    #[serde(default)]
    pub mean_reversion: MeanReversionConfig,
}

/// EMA crossover parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_short_period")]
    pub short_period: usize,
    #[serde(default = "default_long_period")]
    pub long_period: usize,
}

impl Default for EmaConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            short_period: default_short_period(),
            long_period: default_long_period(),
        }
    }
}

/// Mean reversion parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeanReversionConfig {
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_window")]
    pub window: usize,
    /// Band width in standard deviations
    #[serde(default = "default_k")]
    pub k: Decimal,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            window: default_window(),
            k: default_k(),
        }
    }
}

fn default_symbol() -> String {
    "BTCUSD".to_string()
}

fn default_short_period() -> usize {
    9
}

fn default_long_period() -> usize {
    21
}

fn default_window() -> usize {
    20
}

fn default_k() -> Decimal {
    dec!(2.0)
}

/// Backtest configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Symbol whose stored candles are replayed
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Maximum candles loaded from the ledger
    #[serde(default = "default_candle_limit")]
    pub candle_limit: usize,
    /// Starting cash of the simulator
    #[serde(default = "default_backtest_balance")]
    pub initial_balance: Decimal,
    /// Which strategies take part: `ema`, `mean` or `all`
    #[serde(default = "default_selection")]
    pub strategy: String,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            candle_limit: default_candle_limit(),
            initial_balance: default_backtest_balance(),
            strategy: default_selection(),
        }
    }
}

fn default_candle_limit() -> usize {
    300
}

fn default_backtest_balance() -> Decimal {
    dec!(1000)
}

fn default_selection() -> String {
    "all".to_string()
}

/// Ledger database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_database_url() -> String {
    "sqlite://data/trading.db".to_string()
}

fn default_max_connections() -> u32 {
    5
}

/// General engine settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Candle granularity requested from the exchange, in seconds
    #[serde(default = "default_candle_interval")]
    pub candle_interval_seconds: u64,
    /// Order placement attempts before giving up
    #[serde(default = "default_max_attempts")]
    pub max_order_attempts: u32,
    /// Wait after the first failed placement, doubled after each retry
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            candle_interval_seconds: default_candle_interval(),
            max_order_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_candle_interval() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.exchange.kind, ExchangeKind::Mock);
        assert_eq!(config.exchange.mock_usd_balance, dec!(100000));
        assert_eq!(config.risk.percent, dec!(0.005));
        assert_eq!(config.strategies.ema.short_period, 9);
        assert_eq!(config.strategies.ema.long_period, 21);
        assert_eq!(config.strategies.mean_reversion.window, 20);
        assert_eq!(config.settings.max_order_attempts, 5);
        assert_eq!(config.settings.initial_backoff_ms, 100);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let raw = r#"
            [exchange]
            kind = "binance"

            [strategies.ema]
            short_period = 5
        "#;
        let config: AppConfig = toml_from_str(raw);
        assert_eq!(config.exchange.kind, ExchangeKind::Binance);
        assert_eq!(config.strategies.ema.short_period, 5);
        assert_eq!(config.strategies.ema.long_period, 21);
        assert_eq!(config.backtest.strategy, "all");
    }

    #[test]
    fn test_alpaca_selection_keeps_venue_defaults() {
        let raw = r#"
            [exchange]
            kind = "alpaca"
            alpaca_url = "http://localhost:9000"
        "#;
        let config: AppConfig = toml_from_str(raw);
        assert_eq!(config.exchange.kind, ExchangeKind::Alpaca);
        assert_eq!(config.exchange.alpaca_url, "http://localhost:9000");
        assert_eq!(config.exchange.alpaca_data_url, "https://data.alpaca.markets");
    }

    fn toml_from_str(raw: &str) -> AppConfig {
        config::Config::builder()
            .add_source(config::File::from_str(raw, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }
}
