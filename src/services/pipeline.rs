//! Trade Pipeline
//!
//! Wires the services into the trade flow:
//! risk gate → order engine, then profit → commissions → performance.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, warn};

use super::commission::{CommissionEngine, CommissionOutcome};
use super::performance::PerformanceMonitor;
use crate::domain::NewOrder;
use crate::error::{FinError, Result};
use crate::platform::{OrderEngine, RiskGate, TradeParams};

pub struct TradePipeline {
    risk: Arc<RiskGate>,
    engine: Arc<OrderEngine>,
    commissions: Arc<CommissionEngine>,
    monitor: Arc<PerformanceMonitor>,
}

impl TradePipeline {
    pub fn new(
        risk: Arc<RiskGate>,
        engine: Arc<OrderEngine>,
        commissions: Arc<CommissionEngine>,
        monitor: Arc<PerformanceMonitor>,
    ) -> Self {
        Self {
            risk,
            engine,
            commissions,
            monitor,
        }
    }

    /// Risk-check, queue and execute one order.
    ///
    /// Returns `Ok(None)` when the risk gate rejects the trade.
    pub async fn submit_order(
        &self,
        strategy_id: &str,
        params: &TradeParams,
        order: NewOrder,
    ) -> Result<Option<String>> {
        if let Some(violation) = self.risk.violation(strategy_id, params).await {
            let rejection = FinError::RiskLimitExceeded(violation.to_string());
            warn!("Order for strategy {} rejected: {}", strategy_id, rejection);
            return Ok(None);
        }

        let order_id = self.engine.add_order(order).await?;
        let status = self.engine.process_order(&order_id).await?;
        debug!("Order {} for strategy {} is {}", order_id, strategy_id, status);

        Ok(Some(order_id))
    }

    /// Post commissions for a realized profit and count the trade.
    ///
    /// A duplicate trade id posts nothing and is not counted again.
    pub async fn record_trade_profit(
        &self,
        user_id: &str,
        strategy_id: &str,
        trade_id: &str,
        profit: Decimal,
        trade_return: Option<Decimal>,
    ) -> Result<CommissionOutcome> {
        let outcome = self
            .commissions
            .process_trade_profit(user_id, strategy_id, trade_id, profit)
            .await?;

        if !outcome.duplicate {
            self.monitor.start_monitoring(strategy_id, user_id).await;
            self.monitor
                .record_trade(strategy_id, user_id, true, trade_return)
                .await?;
        }

        Ok(outcome)
    }

    pub fn engine(&self) -> &Arc<OrderEngine> {
        &self.engine
    }

    pub fn monitor(&self) -> &Arc<PerformanceMonitor> {
        &self.monitor
    }
}
