//! Service wiring
//!
//! Every service is constructed once here and shared by `Arc`.

use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::{PostgresStore, WebhookNotifier};
use crate::config::{AlertConfig, AppConfig};
use crate::error::Result;
use crate::exchange::ExchangeGateway;
use crate::persistence::{InMemoryStore, Store};
use crate::platform::{OrderEngine, RiskGate};
use crate::referral::ReferralGraph;
use crate::services::{
    CommissionEngine, PerformanceMonitor, SettlementService, TradePipeline, WalletLedger,
};
use crate::supervisor::{AlertManager, AlertSink};

pub struct CoreServices {
    pub store: Arc<dyn Store>,
    pub risk: Arc<RiskGate>,
    pub engine: Arc<OrderEngine>,
    pub ledger: Arc<WalletLedger>,
    pub commissions: Arc<CommissionEngine>,
    pub settlements: Arc<SettlementService>,
    pub monitor: Arc<PerformanceMonitor>,
    pub pipeline: Arc<TradePipeline>,
}

impl CoreServices {
    pub fn build(
        config: &AppConfig,
        store: Arc<dyn Store>,
        gateway: Arc<dyn ExchangeGateway>,
        referrals: Arc<dyn ReferralGraph>,
        alerts: Arc<dyn AlertSink>,
    ) -> Self {
        let risk = Arc::new(RiskGate::new(config.risk.clone()));
        let engine = Arc::new(
            OrderEngine::new(store.clone(), gateway, config.execution.clone())
                .with_alerts(alerts.clone()),
        );
        let ledger = Arc::new(WalletLedger::new(store.clone()));
        let commissions = Arc::new(CommissionEngine::new(
            store.clone(),
            ledger.clone(),
            referrals,
            config.commission.clone(),
        ));
        let settlements = Arc::new(SettlementService::new(store.clone(), ledger.clone()));
        let monitor =
            Arc::new(PerformanceMonitor::new(config.monitor.clone()).with_alerts(alerts));
        let pipeline = Arc::new(TradePipeline::new(
            risk.clone(),
            engine.clone(),
            commissions.clone(),
            monitor.clone(),
        ));

        Self {
            store,
            risk,
            engine,
            ledger,
            commissions,
            settlements,
            monitor,
            pipeline,
        }
    }
}

/// Postgres when `database` is configured, otherwise an in-memory store.
pub async fn connect_store(config: &AppConfig) -> Result<Arc<dyn Store>> {
    match &config.database {
        Some(db) => {
            let store = PostgresStore::new(&db.url, db.max_connections).await?;
            store.migrate().await?;
            info!("Using PostgreSQL store");
            Ok(Arc::new(store))
        }
        None => {
            warn!("No database configured, state is kept in memory only");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

pub fn alert_manager(config: &AlertConfig) -> Result<Arc<AlertManager>> {
    let mut manager = AlertManager::new(config.clone());
    if let Some(url) = &config.webhook_url {
        manager = manager.with_webhook(WebhookNotifier::new(url.as_str())?);
    }
    Ok(Arc::new(manager))
}
