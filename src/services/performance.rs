//! Strategy Performance Monitor
//!
//! Tracks running metrics per (strategy, user). Every change is published
//! to all subscribers of that key. A drawdown beyond the configured
//! threshold raises a warning alert.

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::domain::{PerformanceKey, PerformanceStatus, PerformanceUpdate, StrategyPerformance};
use crate::error::{FinError, Result};
use crate::supervisor::{Alert, AlertLevel, AlertSink};

struct Tracked {
    performance: StrategyPerformance,
    tx: broadcast::Sender<StrategyPerformance>,
}

pub struct PerformanceMonitor {
    tracked: RwLock<HashMap<PerformanceKey, Tracked>>,
    alerts: Option<Arc<dyn AlertSink>>,
    config: MonitorConfig,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            tracked: RwLock::new(HashMap::new()),
            alerts: None,
            config,
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Begin tracking; a second call for the same key returns the existing
    /// record unchanged.
    pub async fn start_monitoring(&self, strategy_id: &str, user_id: &str) -> StrategyPerformance {
        let key = PerformanceKey::new(strategy_id, user_id);
        let mut tracked = self.tracked.write().await;

        if let Some(existing) = tracked.get(&key) {
            debug!("Already monitoring {}", key);
            return existing.performance.clone();
        }

        let performance = StrategyPerformance::new(&key);
        let (tx, _) = broadcast::channel(self.config.channel_capacity.max(1));
        info!("Started monitoring {}", key);
        tracked.insert(
            key,
            Tracked {
                performance: performance.clone(),
                tx,
            },
        );
        performance
    }

    pub async fn update_performance(
        &self,
        strategy_id: &str,
        user_id: &str,
        update: PerformanceUpdate,
    ) -> Result<StrategyPerformance> {
        self.mutate(strategy_id, user_id, |p| p.merge(&update)).await
    }

    /// Count one closed trade, optionally adding its return to the running
    /// return.
    pub async fn record_trade(
        &self,
        strategy_id: &str,
        user_id: &str,
        won: bool,
        trade_return: Option<Decimal>,
    ) -> Result<StrategyPerformance> {
        self.mutate(strategy_id, user_id, |p| {
            p.record_trade(won);
            if let Some(r) = trade_return {
                p.current_return += r;
            }
        })
        .await
    }

    pub async fn set_status(
        &self,
        strategy_id: &str,
        user_id: &str,
        status: PerformanceStatus,
    ) -> Result<StrategyPerformance> {
        let performance = self
            .update_performance(
                strategy_id,
                user_id,
                PerformanceUpdate {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await?;
        info!("{} is now {}", performance.key(), status);
        Ok(performance)
    }

    async fn mutate<F>(&self, strategy_id: &str, user_id: &str, op: F) -> Result<StrategyPerformance>
    where
        F: FnOnce(&mut StrategyPerformance),
    {
        let key = PerformanceKey::new(strategy_id, user_id);

        let snapshot = {
            let mut tracked = self.tracked.write().await;
            let entry = tracked
                .get_mut(&key)
                .ok_or_else(|| FinError::not_found("performance", key.to_string()))?;
            op(&mut entry.performance);
            let snapshot = entry.performance.clone();
            // no subscribers is fine
            let _ = entry.tx.send(snapshot.clone());
            snapshot
        };

        self.check_drawdown(&snapshot);
        Ok(snapshot)
    }

    fn check_drawdown(&self, performance: &StrategyPerformance) {
        let (Some(threshold), Some(alerts)) = (self.config.drawdown_alert_threshold, &self.alerts)
        else {
            return;
        };
        if performance.max_drawdown <= threshold {
            return;
        }

        let alert = Alert::new(
            AlertLevel::Warning,
            "performance_monitor",
            "Drawdown Threshold Exceeded",
            &format!(
                "{} max drawdown {} exceeds {}",
                performance.key(),
                performance.max_drawdown,
                threshold
            ),
        )
        .with_metadata(serde_json::json!({
            "strategy_id": performance.strategy_id,
            "user_id": performance.user_id,
            "max_drawdown": performance.max_drawdown,
            "threshold": threshold,
        }));

        let alerts = Arc::clone(alerts);
        tokio::spawn(async move {
            alerts.send_alert(alert).await;
        });
    }

    pub async fn subscribe(
        &self,
        strategy_id: &str,
        user_id: &str,
    ) -> Result<broadcast::Receiver<StrategyPerformance>> {
        let key = PerformanceKey::new(strategy_id, user_id);
        self.tracked
            .read()
            .await
            .get(&key)
            .map(|entry| entry.tx.subscribe())
            .ok_or_else(|| FinError::not_found("performance", key.to_string()))
    }

    pub async fn get_performance(
        &self,
        strategy_id: &str,
        user_id: &str,
    ) -> Option<StrategyPerformance> {
        self.tracked
            .read()
            .await
            .get(&PerformanceKey::new(strategy_id, user_id))
            .map(|entry| entry.performance.clone())
    }

    /// All tracked records, optionally for one user, ordered by strategy
    pub async fn get_all_performances(&self, user_id: Option<&str>) -> Vec<StrategyPerformance> {
        let mut all: Vec<_> = self
            .tracked
            .read()
            .await
            .values()
            .filter(|entry| user_id.map_or(true, |u| entry.performance.user_id == u))
            .map(|entry| entry.performance.clone())
            .collect();
        all.sort_by(|a, b| {
            (&a.strategy_id, &a.user_id).cmp(&(&b.strategy_id, &b.user_id))
        });
        all
    }
}
