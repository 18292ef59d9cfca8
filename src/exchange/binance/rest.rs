//! Binance spot adapter over the REST API

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, instrument, warn};

use super::auth::{signed_query, BinanceCredentials};
use super::messages::{
    interval_code, parse_kline, AccountResponse, ApiErrorBody, OrderResponse,
    INSUFFICIENT_BALANCE_CODE, NO_SUCH_ORDER_CODE, UNKNOWN_ORDER_CODE,
};
use crate::common::channels::ShutdownReceiver;
use crate::common::errors::{EngineError, Result};
use crate::common::traits::ExchangeAdapter;
use crate::common::types::{Candle, Order, OrderRequest, OrderType, Position};
use crate::config::types::ExchangeConfig;
use crate::exchange::polling::spawn_candle_poller;
use crate::exchange::symbol::parse_symbol;

/// Klines requested per poll
pub const KLINE_LIMIT: usize = 500;

/// Spot trading on Binance
///
/// Spot has no positions: a position is reported as the free balance of the
/// base asset. Candles are polled from the klines endpoint.
///
/// Orders carrying a client order id send it as `newClientOrderId`. When the
/// same id is placed again, typically a retry after a timeout, the venue is
/// asked for that order first and a duplicate rejection resolves to the
/// existing order.
#[derive(Debug, Clone)]
pub struct BinanceAdapter {
    client: Client,
    base_url: String,
    credentials: Option<BinanceCredentials>,
    poll_interval: Duration,
    /// Exchange order id to symbol, needed by the cancel endpoint
    order_symbols: Arc<RwLock<HashMap<String, String>>>,
    /// Client order ids already sent to the venue
    sent_client_ids: Arc<RwLock<HashSet<String>>>,
}

impl BinanceAdapter {
    /// Create an unauthenticated adapter
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(15))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            poll_interval: Duration::from_secs(3),
            order_symbols: Arc::new(RwLock::new(HashMap::new())),
            sent_client_ids: Arc::new(RwLock::new(HashSet::new())),
        })
    }

    /// Build from configuration; both key and secret are required
    pub fn from_config(config: &ExchangeConfig) -> Result<Self> {
        let (api_key, api_secret) = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                (key.clone(), secret.clone())
            }
            _ => {
                return Err(EngineError::Configuration(
                    "binance exchange requires api_key and api_secret".to_string(),
                ))
            }
        };
        Ok(Self::new(&config.rest_url)?
            .with_credentials(BinanceCredentials { api_key, api_secret })
            .with_poll_interval(Duration::from_millis(config.poll_interval_ms)))
    }

    pub fn with_credentials(mut self, credentials: BinanceCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn credentials(&self) -> Result<&BinanceCredentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| EngineError::Configuration("missing Binance credentials".to_string()))
    }

    /// Send a signed request and return the body of a successful response
    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<String> {
        let credentials = self.credentials()?;
        let query = signed_query(
            &credentials.api_secret,
            params,
            Utc::now().timestamp_millis(),
        )?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(method = %method, path, "signed request");

        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &credentials.api_key)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(classify_error(status, &body))
        }
    }

    /// Look up an order by client order id; `None` when the venue has no such order
    async fn find_order(
        &self,
        symbol: &str,
        client_order_id: &str,
        request: &OrderRequest,
    ) -> Result<Option<Order>> {
        let params = [
            ("symbol", symbol.to_string()),
            ("origClientOrderId", client_order_id.to_string()),
        ];
        match self
            .signed_request(Method::GET, "/api/v3/order", &params)
            .await
        {
            Ok(body) => {
                let response: OrderResponse = serde_json::from_str(&body)?;
                info!(client_order_id, order_id = response.order_id, "resolved order already on the venue");
                Ok(Some(self.track(symbol, request, &response).await))
            }
            Err(EngineError::OrderNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Convert a venue order and remember its symbol for cancellation
    async fn track(&self, symbol: &str, request: &OrderRequest, response: &OrderResponse) -> Order {
        let mut order = Order::accepted(response.order_id.to_string(), request, Utc::now());
        if response.is_filled() {
            order = order.fill(response.average_price().unwrap_or(request.price));
        }
        self.order_symbols
            .write()
            .await
            .insert(order.id.clone(), symbol.to_string());
        order
    }
}

/// Map a failed response onto the retry taxonomy
pub fn classify_error(status: StatusCode, body: &str) -> EngineError {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return EngineError::TransientAdapter(format!("status {}: {}", status, body));
    }

    match serde_json::from_str::<ApiErrorBody>(body) {
        Ok(err) if err.msg.to_lowercase().contains("duplicate") => EngineError::DuplicateOrder(err.msg),
        Ok(err)
            if err.code == INSUFFICIENT_BALANCE_CODE
                || err.msg.to_lowercase().contains("insufficient") =>
        {
            EngineError::InsufficientFunds(err.msg)
        }
        Ok(err) if err.code == UNKNOWN_ORDER_CODE || err.code == NO_SUCH_ORDER_CODE => {
            EngineError::OrderNotFound(err.msg)
        }
        Ok(err) => EngineError::OrderRejected(format!("code {}: {}", err.code, err.msg)),
        Err(_) => EngineError::OrderRejected(format!("status {}: {}", status, body)),
    }
}

/// Fetch closed klines for `symbol`, ascending
async fn fetch_klines(
    client: &Client,
    base_url: &str,
    symbol: &str,
    interval: &str,
) -> Result<Vec<Candle>> {
    let limit = KLINE_LIMIT.to_string();
    let response = client
        .get(format!("{}/api/v3/klines", base_url))
        .query(&[("symbol", symbol), ("interval", interval), ("limit", limit.as_str())])
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_error(status, &body));
    }

    let rows: Vec<Vec<serde_json::Value>> = response.json().await?;
    let now = Utc::now();
    let mut candles = Vec::with_capacity(rows.len());
    for row in &rows {
        let kline = parse_kline(row)?;
        if kline.close_time <= now {
            candles.push(kline.candle);
        }
    }
    Ok(candles)
}

fn market_symbol(symbol: &str) -> Result<String> {
    let (base, quote) = parse_symbol(symbol)?;
    Ok(format!("{}{}", base, quote))
}

#[async_trait]
impl ExchangeAdapter for BinanceAdapter {
    #[instrument(skip(self, request), fields(symbol = %request.symbol, side = %request.side))]
    async fn place_order(&self, request: &OrderRequest) -> Result<Order> {
        let symbol = market_symbol(&request.symbol)?;
        let client_order_id = request.client_order_id.as_deref();

        if let Some(client_id) = client_order_id {
            let resent = !self
                .sent_client_ids
                .write()
                .await
                .insert(client_id.to_string());
            if resent {
                if let Some(order) = self.find_order(&symbol, client_id, request).await? {
                    return Ok(order);
                }
            }
        }

        let mut params = vec![
            ("symbol", symbol.clone()),
            ("side", request.side.to_string()),
            ("type", request.order_type.to_string()),
            ("quantity", request.quantity.normalize().to_string()),
        ];
        if request.order_type == OrderType::Limit {
            params.push(("price", request.price.normalize().to_string()));
            params.push(("timeInForce", "GTC".to_string()));
        }
        if let Some(client_id) = client_order_id {
            params.push(("newClientOrderId", client_id.to_string()));
        }

        let body = match self
            .signed_request(Method::POST, "/api/v3/order", &params)
            .await
        {
            Ok(body) => body,
            Err(EngineError::DuplicateOrder(msg)) => {
                let client_id = client_order_id.ok_or_else(|| EngineError::DuplicateOrder(msg.clone()))?;
                warn!(client_order_id = client_id, "venue already holds this client order id");
                return self
                    .find_order(&symbol, client_id, request)
                    .await?
                    .ok_or(EngineError::DuplicateOrder(msg));
            }
            Err(e) => return Err(e),
        };
        let response: OrderResponse = serde_json::from_str(&body)?;

        let order = self.track(&symbol, request, &response).await;
        info!(order_id = %order.id, status = %response.status, "binance order placed");
        Ok(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let symbol = self
            .order_symbols
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or_else(|| EngineError::OrderNotFound(order_id.to_string()))?;

        let params = [("symbol", symbol), ("orderId", order_id.to_string())];
        self.signed_request(Method::DELETE, "/api/v3/order", &params)
            .await?;
        self.order_symbols.write().await.remove(order_id);
        Ok(())
    }

    async fn get_balances(&self) -> Result<HashMap<String, Decimal>> {
        let body = self
            .signed_request(Method::GET, "/api/v3/account", &[])
            .await?;
        let account: AccountResponse = serde_json::from_str(&body)?;

        account
            .balances
            .into_iter()
            .map(|entry| {
                let free = Decimal::from_str(&entry.free).map_err(|e| {
                    EngineError::InvalidResponse(format!("balance of {}: {}", entry.asset, e))
                })?;
                Ok((entry.asset, free))
            })
            .collect()
    }

    async fn get_position(&self, symbol: &str) -> Result<Position> {
        let (base, _) = parse_symbol(symbol)?;
        let balances = self.get_balances().await?;
        let mut position = Position::new(symbol);
        position.quantity = balances.get(&base).copied().unwrap_or(Decimal::ZERO);
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
        let market = market_symbol(symbol).map_err(|e| subscription_error(e.to_string()))?;
        let code = interval_code(interval)
            .ok_or_else(|| subscription_error(format!("unsupported interval {:?}", interval)))?;

        // First fetch happens here so an unreachable venue fails the subscription
        let initial = fetch_klines(&self.client, &self.base_url, &market, code)
            .await
            .map_err(|e| subscription_error(e.to_string()))?;

        let client = self.client.clone();
        let base_url = self.base_url.clone();
        info!(symbol = %market, interval = code, "polling binance klines");

        let poll_market = market.clone();
        let rx = spawn_candle_poller(market, initial, self.poll_interval, shutdown, move || {
            let client = client.clone();
            let base_url = base_url.clone();
            let market = poll_market.clone();
            async move { fetch_klines(&client, &base_url, &market, code).await }
        });

        Ok(rx)
    }

    fn adapter_name(&self) -> &'static str {
        "binance"
    }
}
