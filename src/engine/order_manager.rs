//! Live order manager: idempotent, retrying order submission

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::idempotency::{IdempotencyKey, IdempotencyRegistry};
use super::retry::RetryPolicy;
use crate::common::errors::{EngineError, Result};
use crate::common::traits::{ExchangeAdapter, OrderExecutor, Store, Submission};
use crate::common::types::{Order, OrderRequest, Trade};
use crate::exchange::symbol::parse_symbol;

/// Execution backend that places orders on a real (or mock) exchange
///
/// Guarantees at most one exchange placement per idempotency key: repeated or
/// concurrent submissions of the same intent resolve to the first order.
pub struct LiveOrderManager {
    exchange: Arc<dyn ExchangeAdapter>,
    store: Option<Arc<dyn Store>>,
    registry: Arc<IdempotencyRegistry>,
    retry: RetryPolicy,
}

impl LiveOrderManager {
    pub fn new(exchange: Arc<dyn ExchangeAdapter>, registry: Arc<IdempotencyRegistry>) -> Self {
        Self {
            exchange,
            store: None,
            registry,
            retry: RetryPolicy::default(),
        }
    }

    /// Persist fills to a ledger
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn registry(&self) -> &Arc<IdempotencyRegistry> {
        &self.registry
    }

    /// Place with bounded exponential backoff, retrying only retryable errors
    async fn place_with_retry(&self, request: &OrderRequest) -> Result<Order> {
        let mut last_err = None;
        for attempt in 0..self.retry.max_attempts {
            match self.exchange.place_order(request).await {
                Ok(order) => {
                    debug!(attempt, order_id = %order.id, "order placed");
                    return Ok(order);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(attempt, error = %e, "terminal placement error, not retrying");
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "placement failed, backing off"
                    );
                    last_err = Some(e);
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| {
            EngineError::Internal("retry policy allows no attempts".to_string())
        }))
    }

    /// Write the order and its derived trade, stopping at the first failure
    async fn persist(&self, order: &Order) -> Option<EngineError> {
        let store = self.store.as_ref()?;
        if let Err(e) = store.save_order(order).await {
            return Some(e);
        }
        store.save_trade(&Trade::from_order(order)).await.err()
    }
}

#[async_trait]
impl OrderExecutor for LiveOrderManager {
    #[instrument(skip(self, request), fields(symbol = %request.symbol, side = %request.side))]
    async fn submit(&self, mut request: OrderRequest) -> Result<Submission> {
        parse_symbol(&request.symbol)?;

        let key = IdempotencyKey::from_request(&request);
        // Every attempt for this key carries the same client id, so a venue that
        // accepted a timed-out attempt recognises the resend
        if request.client_order_id.is_none() {
            request.client_order_id = Some(key.client_order_id());
        }
        let slot = self.registry.slot(&key).await;
        if let Some(order) = slot.get() {
            debug!(key = %key, order_id = %order.id, "duplicate intent, reusing order");
            return Ok(Submission::deduplicated(order.clone()));
        }

        let mut placed_here = false;
        let order = slot
            .get_or_try_init(|| {
                placed_here = true;
                self.place_with_retry(&request)
            })
            .await?
            .clone();

        if !placed_here {
            debug!(key = %key, order_id = %order.id, "resolved by concurrent submission");
            return Ok(Submission::deduplicated(order));
        }

        info!(key = %key, order_id = %order.id, quantity = %order.quantity, "order submitted");
        let persist_error = self.persist(&order).await;
        if let Some(ref e) = persist_error {
            warn!(order_id = %order.id, error = %e, "order filled but ledger write failed");
        }
        Ok(Submission::fresh(order, persist_error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::MockExchangeAdapter;
    use crate::common::types::Side;
    use crate::store::memory::InMemoryStore;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn filled(id: &str, request: &OrderRequest) -> Order {
        Order::accepted(id, request, Utc::now()).fill(request.price)
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            multiplier: 2,
        }
    }

    #[tokio::test]
    async fn test_duplicate_intent_places_once() {
        let mut exchange = MockExchangeAdapter::new();
        exchange
            .expect_place_order()
            .times(1)
            .returning(|r| Ok(filled("x-1", r)));

        let store = Arc::new(InMemoryStore::new());
        let manager = LiveOrderManager::new(Arc::new(exchange), Arc::new(IdempotencyRegistry::new()))
            .with_store(store.clone());

        let request = OrderRequest::market("BTCUSDT", Side::Buy, dec!(100), dec!(0.5));
        let first = manager.submit(request.clone()).await.unwrap();
        let second = manager.submit(request).await.unwrap();

        assert_eq!(first.order.id, "x-1");
        assert_eq!(second.order.id, "x-1");
        assert!(!first.deduplicated);
        assert!(second.deduplicated);
        assert_eq!(store.counts().await.unwrap().orders, 1);
        assert_eq!(store.counts().await.unwrap().trades, 1);
    }

    #[tokio::test]
    async fn test_terminal_error_not_retried() {
        let mut exchange = MockExchangeAdapter::new();
        exchange
            .expect_place_order()
            .times(1)
            .returning(|_| Err(EngineError::InsufficientFunds("USDT".into())));

        let manager = LiveOrderManager::new(Arc::new(exchange), Arc::new(IdempotencyRegistry::new()))
            .with_retry_policy(fast_retry());

        let request = OrderRequest::market("BTCUSDT", Side::Buy, dec!(100), dec!(5));
        let err = manager.submit(request).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds(_)));
    }

    #[tokio::test]
    async fn test_transient_error_retried_until_success() {
        let mut exchange = MockExchangeAdapter::new();
        let mut seq = mockall::Sequence::new();
        exchange
            .expect_place_order()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(EngineError::TransientAdapter("503".into())));
        exchange
            .expect_place_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Ok(filled("x-3", r)));

        let manager = LiveOrderManager::new(Arc::new(exchange), Arc::new(IdempotencyRegistry::new()))
            .with_retry_policy(fast_retry());

        let request = OrderRequest::market("ETH-USD", Side::Sell, dec!(2000), dec!(1));
        let submission = manager.submit(request).await.unwrap();
        assert_eq!(submission.order.id, "x-3");
    }

    #[tokio::test]
    async fn test_every_attempt_carries_the_key_client_id() {
        let request = OrderRequest::market("BTCUSDT", Side::Buy, dec!(100), dec!(0.25));
        let expected = IdempotencyKey::from_request(&request).client_order_id();

        let mut exchange = MockExchangeAdapter::new();
        let mut seq = mockall::Sequence::new();
        let first = expected.clone();
        exchange
            .expect_place_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |r| r.client_order_id.as_deref() == Some(first.as_str()))
            .returning(|_| Err(EngineError::TransientAdapter("timeout".into())));
        let second = expected.clone();
        exchange
            .expect_place_order()
            .times(1)
            .in_sequence(&mut seq)
            .withf(move |r| r.client_order_id.as_deref() == Some(second.as_str()))
            .returning(|r| Ok(filled("x-9", r)));

        let manager = LiveOrderManager::new(Arc::new(exchange), Arc::new(IdempotencyRegistry::new()))
            .with_retry_policy(fast_retry());
        let submission = manager.submit(request).await.unwrap();
        assert_eq!(submission.order.id, "x-9");
    }

    #[tokio::test]
    async fn test_bad_symbol_never_reaches_exchange() {
        let mut exchange = MockExchangeAdapter::new();
        exchange.expect_place_order().never();

        let manager = LiveOrderManager::new(Arc::new(exchange), Arc::new(IdempotencyRegistry::new()));
        let request = OrderRequest::market("", Side::Buy, dec!(1), dec!(1));
        let err = manager.submit(request).await.unwrap_err();
        assert!(matches!(err, EngineError::SymbolParse(_)));
    }

    #[tokio::test]
    async fn test_failed_placement_leaves_key_unregistered() {
        let mut exchange = MockExchangeAdapter::new();
        let mut seq = mockall::Sequence::new();
        exchange
            .expect_place_order()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Err(EngineError::TransientAdapter("timeout".into())));
        exchange
            .expect_place_order()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Ok(filled("x-late", r)));

        let registry = Arc::new(IdempotencyRegistry::new());
        let manager = LiveOrderManager::new(Arc::new(exchange), registry.clone()).with_retry_policy(
            RetryPolicy {
                max_attempts: 2,
                initial_backoff: Duration::from_millis(1),
                multiplier: 2,
            },
        );

        let request = OrderRequest::market("SOLUSDT", Side::Buy, dec!(20), dec!(3));
        assert!(manager.submit(request.clone()).await.is_err());
        assert!(registry.is_empty().await);

        let retried = manager.submit(request).await.unwrap();
        assert_eq!(retried.order.id, "x-late");
        assert!(!retried.deduplicated);
    }
}
