use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::types::Decision;
use crate::common::traits::{OrderExecutor, RiskManager};
use crate::common::types::{Order, OrderRequest};

/// Turns strategy decisions into sized orders on the execution backend
///
/// Sizes each intent with the risk manager, suppresses non-positive sizes,
/// submits market orders and logs the outcome. Submission errors are
/// swallowed so the calling strategy keeps running.
#[derive(Clone)]
pub struct OrderRouter {
    symbol: String,
    executor: Arc<dyn OrderExecutor>,
    risk: Arc<dyn RiskManager>,
}

impl OrderRouter {
    pub fn new(
        symbol: impl Into<String>,
        executor: Arc<dyn OrderExecutor>,
        risk: Arc<dyn RiskManager>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            executor,
            risk,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Execute a decision, returning the resulting order if one was placed
    pub async fn execute(
        &self,
        strategy: &str,
        decision: Decision,
        account_balance: Decimal,
    ) -> Option<Order> {
        let Decision::Go(intent) = decision else {
            return None;
        };

        let quantity = self.risk.size(&self.symbol, intent.price, account_balance);
        if quantity <= Decimal::ZERO {
            debug!(strategy, side = %intent.side, price = %intent.price, "sized quantity is zero, order suppressed");
            return None;
        }

        let request = OrderRequest::market(&self.symbol, intent.side, intent.price, quantity);
        match self.executor.submit(request).await {
            Ok(submission) => {
                if let Some(e) = submission.persist_error {
                    warn!(strategy, order_id = %submission.order.id, error = %e, "order executed but not recorded");
                }
                info!(
                    strategy,
                    side = %intent.side,
                    quantity = %quantity,
                    order_id = %submission.order.id,
                    deduplicated = submission.deduplicated,
                    reason = %intent.reason,
                    "order executed"
                );
                Some(submission.order)
            }
            Err(e) => {
                warn!(strategy, side = %intent.side, quantity = %quantity, error = %e, "order submission failed");
                None
            }
        }
    }
}
