//! Alpaca crypto adapter over the trading and market data REST APIs

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn};

use super::messages::{
    timeframe, AccountResponse, ApiErrorBody, BarsResponse, NewOrder, OrderResponse,
    PositionResponse,
};
use crate::common::channels::ShutdownReceiver;
use crate::common::errors::{EngineError, Result};
use crate::common::traits::ExchangeAdapter;
use crate::common::types::{Candle, Order, OrderRequest, OrderType, Position};
use crate::config::types::ExchangeConfig;
use crate::exchange::polling::spawn_candle_poller;
use crate::exchange::symbol::parse_symbol;

/// Bars requested per poll
pub const BAR_LIMIT: i32 = 200;

/// Key pair sent as `APCA-API-KEY-ID` / `APCA-API-SECRET-KEY`
#[derive(Debug, Clone)]
pub struct AlpacaCredentials {
    pub key_id: String,
    pub secret_key: String,
}

/// Crypto trading on Alpaca
///
/// Pairs are sent to the venue as `BASE/QUOTE`. Orders carrying a client
/// order id send it as `client_order_id`; a resent id is looked up before it
/// is posted again, and a uniqueness rejection resolves to the existing order.
/// Candles are polled from the market data API.
#[derive(Debug, Clone)]
pub struct AlpacaAdapter {
    client: Client,
    trading_url: String,
    data_url: String,
    credentials: Option<AlpacaCredentials>,
    poll_interval: Duration,
    /// Client order ids already sent to the venue
    sent_client_ids: Arc<RwLock<HashSet<String>>>,
}

impl AlpacaAdapter {
    pub fn new(trading_url: &str, data_url: &str) -> Result<Self> {
        Self::with_timeout(trading_url, data_url, Duration::from_secs(15))
    }

    pub fn with_timeout(trading_url: &str, data_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            trading_url: trading_url.trim_end_matches('/').to_string(),
            data_url: data_url.trim_end_matches('/').to_string(),
            credentials: None,
            poll_interval: Duration::from_secs(3),
            sent_client_ids: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    /// Build from configuration; both key and secret are required
    pub fn from_config(config: &ExchangeConfig) -> Result<Self> {
        let (key_id, secret_key) = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                (key.clone(), secret.clone())
            }
            _ => {
                return Err(EngineError::Configuration(
                    "alpaca exchange requires api_key and api_secret".to_string(),
                ))
            }
        };
        Ok(Self::new(&config.alpaca_url, &config.alpaca_data_url)?
            .with_credentials(AlpacaCredentials { key_id, secret_key })
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms)))
    }

    pub fn with_credentials(mut self, credentials: AlpacaCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn authorized(&self, method: Method, url: &str) -> Result<RequestBuilder> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or_else(|| EngineError::Configuration("missing Alpaca credentials".to_string()))?;
        Ok(self
            .client
            .request(method, url)
            .header("APCA-API-KEY-ID", &credentials.key_id)
            .header("APCA-API-SECRET-KEY", &credentials.secret_key))
    }

    /// Send an authenticated trading API request and return the body of a successful response
    async fn trading_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&NewOrder>,
    ) -> Result<String> {
        let url = format!("{}{}", self.trading_url, path);
        debug!(method = %method, path, "trading request");

        let mut request = self.authorized(method, &url)?;
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_error(status, &body))
        }
    }

    /// Look up an order by client order id; `None` when the venue has no such order
    async fn find_order(&self, client_order_id: &str, request: &OrderRequest) -> Result<Option<Order>> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_order_id", client_order_id)
            .finish();
        let path = format!("/v2/orders:by_client_order_id?{}", query);
        match self.trading_request(Method::GET, &path, None).await {
            Ok(body) => {
                let response: OrderResponse = serde_json::from_str(&body)?;
                info!(client_order_id, order_id = %response.id, "resolved order already on the venue");
                Ok(Some(to_order(request, &response)))
            }
            Err(EngineError::OrderNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetch closed bars for `pair`, ascending
    async fn fetch_bars(&self, pair: &str, code: &str, interval: Duration) -> Result<Vec<Candle>> {
        let request = self.authorized(Method::GET, &bars_url(&self.data_url))?;
        request_bars(request, pair, code, interval).await
    }
}

fn bars_url(data_url: &str) -> String {
    format!("{}/v1beta3/crypto/us/bars", data_url)
}

async fn request_bars(
    request: RequestBuilder,
    pair: &str,
    code: &str,
    interval: Duration,
) -> Result<Vec<Candle>> {
    let step = chrono::Duration::from_std(interval)
        .map_err(|e| EngineError::Internal(format!("interval out of range: {}", e)))?;
    let now = Utc::now();
    let window = step
        .checked_mul(BAR_LIMIT)
        .and_then(|span| now.checked_sub_signed(span))
        .unwrap_or(now);
    let start = window.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let limit = BAR_LIMIT.to_string();

    let response = request
        .query(&[
            ("symbols", pair),
            ("timeframe", code),
            ("start", start.as_str()),
            ("limit", limit.as_str()),
        ])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_error(status, &body));
    }

    let mut bars: BarsResponse = response.json().await?;
    let mut candles: Vec<Candle> = bars
        .bars
        .remove(pair)
        .unwrap_or_default()
        .into_iter()
        .filter(|bar| bar.t.checked_add_signed(step).map_or(false, |close| close <= now))
        .map(Candle::from)
        .collect();
    candles.sort_by_key(|c| c.time);
    Ok(candles)
}

/// Map a failed response onto the retry taxonomy
pub fn classify_error(status: StatusCode, body: &str) -> EngineError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return EngineError::TransientAdapter(format!("status {}: {}", status, body));
    }

    let message = serde_json::from_str::<ApiErrorBody>(body)
        .map(|err| err.message)
        .unwrap_or_else(|_| body.to_string());
    let lower = message.to_lowercase();

    if lower.contains("client_order_id") && lower.contains("unique") {
        EngineError::DuplicateOrder(message)
    } else if lower.contains("insufficient") {
        EngineError::InsufficientFunds(message)
    } else if status == StatusCode::NOT_FOUND {
        EngineError::OrderNotFound(message)
    } else {
        EngineError::OrderRejected(format!("status {}: {}", status, message))
    }
}

fn to_order(request: &OrderRequest, response: &OrderResponse) -> Order {
    let order = Order::accepted(response.id.clone(), request, Utc::now());
    if response.is_filled() {
        order.fill(response.fill_price().unwrap_or(request.price))
    } else {
        order
    }
}

fn parse_decimal(value: &str, field: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| EngineError::InvalidResponse(format!("{} is not a decimal: {}", field, e)))
}

/// `BASE/QUOTE`, the form the crypto endpoints expect
fn venue_pair(symbol: &str) -> Result<String> {
    let (base, quote) = parse_symbol(symbol)?;
    Ok(format!("{}/{}", base, quote))
}

#[async_trait]
impl ExchangeAdapter for AlpacaAdapter {
    #[instrument(skip(self, request), fields(symbol = %request.symbol, side = %request.side))]
    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        let pair = venue_pair(&request.symbol)?;
        let client_order_id = request.client_order_id.as_deref();

        if let Some(client_id) = client_order_id {
            let resent = !self
                .sent_client_ids
                .write()
                .await
                .insert(client_id.to_string());
            if resent {
                if let Some(order) = self.find_order(client_id, request).await? {
                    return Ok(order);
                }
            }
        }

        let body = NewOrder {
            symbol: pair,
            qty: request.quantity.normalize().to_string(),
            side: request.side.to_string().to_lowercase(),
            order_type: request.order_type.to_string().to_lowercase(),
            time_in_force: "gtc",
            limit_price: (request.order_type == OrderType::Limit)
                .then(|| request.price.normalize().to_string()),
            client_order_id: client_order_id.map(str::to_string),
        };

        let response = match self
            .trading_request(Method::POST, "/v2/orders", Some(&body))
            .await
        {
            Ok(response) => response,
            Err(EngineError::DuplicateOrder(msg)) => {
                let client_id = client_order_id.ok_or_else(|| EngineError::DuplicateOrder(msg.clone()))?;
                warn!(client_order_id = client_id, "venue already holds this client order id");
                return self
                    .find_order(client_id, request)
                    .await?
                    .ok_or(EngineError::DuplicateOrder(msg));
            }
            Err(e) => return Err(e),
        };
        let response: OrderResponse = serde_json::from_str(&response)?;

        let order = to_order(request, &response);
        info!(order_id = %order.id, status = %response.status, "alpaca order placed");
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let path = format!("/v2/orders/{}", order_id);
        self.trading_request(Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        let body = self.trading_request(Method::GET, "/v2/account", None).await?;
        let account: AccountResponse = serde_json::from_str(&body)?;
        let cash = parse_decimal(&account.cash, "account cash")?;
        Ok(HashMap::from([("USD".to_string(), cash)]))
    }

    async fn get_position(&self, symbol: &str) -> Result<Position> {
        let (base, quote) = parse_symbol(symbol)?;
        let path = format!("/v2/positions/{}{}", base, quote);
        let mut position = Position::new(symbol);

        let body = match self.trading_request(Method::GET, &path, None).await {
            Ok(body) => body,
            // no open position
            Err(EngineError::OrderNotFound(_)) => return Ok(position),
            Err(e) => return Err(e),
        };
        let held: PositionResponse = serde_json::from_str(&body)?;
        position.quantity = parse_decimal(&held.qty, "position qty")?;
        position.avg_price = parse_decimal(&held.avg_entry_price, "position avg_entry_price")?;
        Ok(position)
    }

    async fn subscribe_candles(
        &self,
        symbol: &str,
        interval: Duration,
        shutdown: ShutdownReceiver,
    ) -> Result<mpsc::Receiver<Candle>> {
        let subscription_error = |message: String| EngineError::Subscription {
            symbol: symbol.to_string(),
            message,
        };
        let pair = venue_pair(symbol).map_err(|e| subscription_error(e.to_string()))?;
        let code = timeframe(interval)
            .ok_or_else(|| subscription_error(format!("unsupported interval {:?}", interval)))?;

        // First fetch happens here so an unreachable venue fails the subscription
        let initial = self
            .fetch_bars(&pair, code, interval)
            .await
            .map_err(|e| subscription_error(e.to_string()))?;
        info!(symbol = %pair, timeframe = code, "polling alpaca bars");

        let adapter = self.clone();
        let poll_pair = pair.clone();
        let rx = spawn_candle_poller(pair, initial, self.poll_interval, shutdown, move || {
            let adapter = adapter.clone();
            let pair = poll_pair.clone();
            async move { adapter.fetch_bars(&pair, code, interval).await }
        });
        Ok(rx)
    }

    fn adapter_name(&self) -> &'static str {
        "alpaca"
    }
}
