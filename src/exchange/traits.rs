use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::Order;
use crate::error::Result;

/// Acknowledgement returned by a venue for an executed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub order_id: String,
    pub exchange_order_id: String,
    pub executed_at: DateTime<Utc>,
}

impl ExecutionReceipt {
    pub fn new(order_id: &str, exchange_order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.to_string(),
            exchange_order_id: exchange_order_id.into(),
            executed_at: Utc::now(),
        }
    }
}

/// Opaque connection to a trading venue.
///
/// Any error is treated as transient; the order engine decides whether to
/// retry.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    fn name(&self) -> &str;

    async fn execute_order(&self, order: &Order) -> Result<ExecutionReceipt>;
}
