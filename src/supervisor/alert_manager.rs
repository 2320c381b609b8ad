//! Alert Manager
//!
//! Routes alerts by severity: every alert is logged and broadcast locally;
//! warning and above also go to the webhook, subject to per-key rate
//! limiting and a global per-minute throttle.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use crate::adapters::WebhookNotifier;
use crate::config::AlertConfig;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Log only
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertLevel {
    pub fn emoji(&self) -> &'static str {
        match self {
            AlertLevel::Info => "\u{2139}\u{fe0f}",
            AlertLevel::Warning => "\u{26a0}\u{fe0f}",
            AlertLevel::Error => "\u{274c}",
            AlertLevel::Critical => "\u{1f6a8}",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertLevel::Info => "info",
            AlertLevel::Warning => "warning",
            AlertLevel::Error => "error",
            AlertLevel::Critical => "critical",
        }
    }
}

impl std::fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub component: String,
    pub title: String,
    pub message: String,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(level: AlertLevel, component: &str, title: &str, message: &str) -> Self {
        Self {
            level,
            component: component.to_string(),
            title: title.to_string(),
            message: message.to_string(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Plain-text rendering for chat webhooks
    pub fn format_text(&self) -> String {
        format!(
            "{} **{}**\n\n**Component:** {}\n**Time:** {}\n\n{}",
            self.level.emoji(),
            self.title,
            self.component,
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.message
        )
    }
}

/// Destination for operational alerts. Delivery is best-effort and never
/// fails the caller.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send_alert(&self, alert: Alert);
}

/// Delivery bookkeeping for one rate-limit key
#[derive(Debug)]
struct KeyWindow {
    last_delivered: DateTime<Utc>,
    suppressed: u32,
}

/// Why an alert was or was not forwarded to the webhook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Deliver,
    /// Same key delivered within `rate_limit_secs`; carries the suppressed count
    RateLimited(u32),
    /// `max_alerts_per_minute` already reached
    Throttled,
}

#[derive(Debug, Default)]
struct DeliveryState {
    windows: HashMap<String, KeyWindow>,
    /// Delivery times within the last minute, oldest first
    recent: VecDeque<DateTime<Utc>>,
}

pub struct AlertManager {
    config: AlertConfig,
    webhook: Option<Arc<WebhookNotifier>>,
    delivery: Mutex<DeliveryState>,
    event_tx: broadcast::Sender<Alert>,
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            config,
            webhook: None,
            delivery: Mutex::new(DeliveryState::default()),
            event_tx,
        }
    }

    pub fn with_webhook(mut self, webhook: Arc<WebhookNotifier>) -> Self {
        self.webhook = Some(webhook);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Alert> {
        self.event_tx.subscribe()
    }

    /// Alerts sharing component, level and title are rate limited together.
    fn window_key(alert: &Alert) -> String {
        format!("{}/{}/{}", alert.component, alert.level, alert.title)
    }

    /// Decide whether `alert` goes to the webhook, recording the delivery
    /// if it does. Suppressed alerts never consume throttle capacity.
    async fn admit(&self, alert: &Alert) -> Admission {
        let now = Utc::now();
        let window = chrono::Duration::seconds(self.config.rate_limit_secs as i64);
        let mut delivery = self.delivery.lock().await;
        let DeliveryState { windows, recent } = &mut *delivery;

        let key = Self::window_key(alert);
        if let Some(w) = windows.get_mut(&key) {
            if now - w.last_delivered < window {
                w.suppressed += 1;
                return Admission::RateLimited(w.suppressed);
            }
        }

        let minute_ago = now - chrono::Duration::minutes(1);
        while recent.front().is_some_and(|t| *t <= minute_ago) {
            recent.pop_front();
        }
        if recent.len() >= self.config.max_alerts_per_minute as usize {
            if let Some(w) = windows.get_mut(&key) {
                w.suppressed += 1;
            }
            return Admission::Throttled;
        }

        recent.push_back(now);
        windows.insert(
            key,
            KeyWindow {
                last_delivered: now,
                suppressed: 0,
            },
        );
        Admission::Deliver
    }

    pub async fn alert(&self, alert: Alert) {
        let _ = self.event_tx.send(alert.clone());

        match alert.level {
            AlertLevel::Info => info!(
                component = %alert.component,
                "{}: {}", alert.title, alert.message
            ),
            AlertLevel::Warning => warn!(
                component = %alert.component,
                "{}: {}", alert.title, alert.message
            ),
            AlertLevel::Error | AlertLevel::Critical => error!(
                component = %alert.component,
                level = %alert.level,
                "{}: {}", alert.title, alert.message
            ),
        }

        if alert.level < AlertLevel::Warning {
            return;
        }
        match self.admit(&alert).await {
            Admission::Deliver => {}
            Admission::RateLimited(suppressed) => {
                debug!("Alert '{}' rate limited ({} suppressed)", alert.title, suppressed);
                return;
            }
            Admission::Throttled => {
                warn!(
                    "Alert '{}' dropped: more than {} alerts in the last minute",
                    alert.title, self.config.max_alerts_per_minute
                );
                return;
            }
        }

        if let Some(webhook) = &self.webhook {
            if let Err(e) = webhook.send_message(&alert.format_text()).await {
                error!("Failed to deliver alert '{}': {}", alert.title, e);
            }
        }
    }

    /// Suppressed counts per key since the key was last delivered
    pub async fn get_suppressed_counts(&self) -> HashMap<String, u32> {
        self.delivery
            .lock()
            .await
            .windows
            .iter()
            .filter(|(_, w)| w.suppressed > 0)
            .map(|(key, w)| (key.clone(), w.suppressed))
            .collect()
    }

    pub async fn reset_rate_limits(&self) {
        self.delivery.lock().await.windows.clear();
        debug!("Alert rate limits reset");
    }
}

#[async_trait]
impl AlertSink for AlertManager {
    async fn send_alert(&self, alert: Alert) {
        self.alert(alert).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_level_ordering() {
        assert!(AlertLevel::Info < AlertLevel::Warning);
        assert!(AlertLevel::Warning < AlertLevel::Error);
        assert!(AlertLevel::Error < AlertLevel::Critical);
    }

    #[test]
    fn test_alert_format_text() {
        let alert = Alert::new(
            AlertLevel::Warning,
            "monitor",
            "Drawdown Alert",
            "s1/u1 drawdown 0.25",
        );

        let formatted = alert.format_text();
        assert!(formatted.contains("Drawdown Alert"));
        assert!(formatted.contains("monitor"));
        assert!(formatted.contains("s1/u1 drawdown 0.25"));
    }

    #[tokio::test]
    async fn test_rate_limiting() {
        let manager = AlertManager::new(AlertConfig::default());
        let alert = Alert::new(AlertLevel::Warning, "test", "Test", "Message");

        assert_eq!(manager.admit(&alert).await, Admission::Deliver);
        assert_eq!(manager.admit(&alert).await, Admission::RateLimited(1));
        assert_eq!(manager.admit(&alert).await, Admission::RateLimited(2));

        let counts = manager.get_suppressed_counts().await;
        assert_eq!(counts.get("test/warning/Test"), Some(&2));

        manager.reset_rate_limits().await;
        assert_eq!(manager.admit(&alert).await, Admission::Deliver);
    }

    #[tokio::test]
    async fn test_throttle() {
        let manager = AlertManager::new(AlertConfig {
            max_alerts_per_minute: 2,
            ..Default::default()
        });
        let alert = |title: &str| Alert::new(AlertLevel::Error, "engine", title, "m");

        assert_eq!(manager.admit(&alert("a")).await, Admission::Deliver);
        assert_eq!(manager.admit(&alert("b")).await, Admission::Deliver);
        assert_eq!(manager.admit(&alert("c")).await, Admission::Throttled);
    }

    #[tokio::test]
    async fn test_rate_limited_alerts_do_not_consume_throttle() {
        let manager = AlertManager::new(AlertConfig {
            max_alerts_per_minute: 2,
            ..Default::default()
        });
        let repeated = Alert::new(AlertLevel::Warning, "monitor", "Drawdown", "s1/u1");

        assert_eq!(manager.admit(&repeated).await, Admission::Deliver);
        for _ in 0..5 {
            assert!(matches!(
                manager.admit(&repeated).await,
                Admission::RateLimited(_)
            ));
        }
        let other = Alert::new(AlertLevel::Warning, "monitor", "Win Rate", "s1/u1");
        assert_eq!(manager.admit(&other).await, Admission::Deliver);
    }

    #[tokio::test]
    async fn test_alerts_broadcast_locally() {
        let manager = AlertManager::new(AlertConfig::default());
        let mut rx = manager.subscribe();

        manager
            .send_alert(Alert::new(AlertLevel::Error, "engine", "Order Failed", "o1"))
            .await;

        let alert = rx.recv().await.unwrap();
        assert_eq!(alert.level, AlertLevel::Error);
        assert_eq!(alert.title, "Order Failed");
    }
}
