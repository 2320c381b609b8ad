use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;
use uuid::Uuid;

use super::traits::{ExchangeGateway, ExecutionReceipt};
use crate::domain::Order;
use crate::error::Result;

/// Dry-run gateway: every order executes immediately
#[derive(Default)]
pub struct PaperGateway {
    executed: AtomicU64,
}

impl PaperGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executed_count(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    fn name(&self) -> &str {
        "paper"
    }

    async fn execute_order(&self, order: &Order) -> Result<ExecutionReceipt> {
        self.executed.fetch_add(1, Ordering::Relaxed);
        info!(
            "[DRY RUN] {} {} {} {} on {}",
            order.side, order.order_type, order.amount, order.symbol, order.exchange
        );
        Ok(ExecutionReceipt::new(
            &order.id,
            format!("paper-{}", Uuid::new_v4()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewOrder, OrderSide};
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_paper_gateway_always_executes() {
        let gateway = PaperGateway::new();
        let order = Order::from_request(NewOrder::market(
            "u1",
            "s1",
            "binance",
            "BTCUSDT",
            OrderSide::Buy,
            dec!(1),
        ));

        let receipt = gateway.execute_order(&order).await.unwrap();
        assert_eq!(receipt.order_id, order.id);
        assert!(receipt.exchange_order_id.starts_with("paper-"));
        assert_eq!(gateway.executed_count(), 1);
    }
}
