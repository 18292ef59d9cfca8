use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OnceCell};

use crate::common::types::{Order, OrderRequest, OrderType, Side};

/// Deterministic fingerprint of an order intent
///
/// Two requests with the same symbol, side, quantity and type map to the same
/// key. Quantities are normalized so `1.0` and `1` collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey {
    symbol: String,
    side: Side,
    quantity: Decimal,
    order_type: OrderType,
}

impl IdempotencyKey {
    pub fn from_request(request: &OrderRequest) -> Self {
        Self {
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity.normalize(),
            order_type: request.order_type,
        }
    }

    /// Client order id sent to the venue, stable for the key
    ///
    /// 34 characters from `[a-z0-9-]`, within Binance's 36-character limit.
    pub fn client_order_id(&self) -> String {
        let digest = Sha256::digest(self.to_string().as_bytes());
        format!("ct-{}", &hex::encode(digest)[..32])
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.symbol, self.side, self.quantity, self.order_type
        )
    }
}

/// Slot holding the order a key resolved to, empty until a placement succeeds
pub type OrderSlot = Arc<OnceCell<Order>>;

/// Concurrent-safe map from idempotency key to assigned order
///
/// Each key owns a single-flight slot: the first submitter places the order,
/// concurrent submitters for the same key wait on the slot, and a failed
/// placement leaves the slot empty so the next submitter tries again.
#[derive(Debug, Default)]
pub struct IdempotencyRegistry {
    slots: Mutex<HashMap<IdempotencyKey, OrderSlot>>,
}

impl IdempotencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot for `key`, created empty on first use
    pub async fn slot(&self, key: &IdempotencyKey) -> OrderSlot {
        let mut slots = self.slots.lock().await;
        slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    /// Previously assigned order for `key`, if any
    pub async fn resolved(&self, key: &IdempotencyKey) -> Option<Order> {
        let slots = self.slots.lock().await;
        slots.get(key).and_then(|slot| slot.get().cloned())
    }

    /// Number of keys with an assigned order
    pub async fn len(&self) -> usize {
        let slots = self.slots.lock().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
