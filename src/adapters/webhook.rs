//! Webhook notifications
//!
//! Posts alert text as `{"msg_type":"text","content":{"text":...}}`, the
//! shape accepted by Feishu/Lark bots and most chat webhooks.

use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::error::{FinError, Result};

#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    webhook_url: String,
}

#[derive(Serialize)]
struct TextMessage<'a> {
    msg_type: &'static str,
    content: TextContent<'a>,
}

#[derive(Serialize)]
struct TextContent<'a> {
    text: &'a str,
}

impl WebhookNotifier {
    pub fn new(webhook_url: impl Into<String>) -> Result<Arc<Self>> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let webhook_url = webhook_url.into();
        info!("Webhook alerts enabled");
        Ok(Arc::new(Self {
            client,
            webhook_url,
        }))
    }

    /// Send a text message; non-2xx responses are errors
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let message = TextMessage {
            msg_type: "text",
            content: TextContent { text },
        };

        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&message)
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!("Webhook notification sent");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            error!("Webhook notification failed: {} - {}", status, body);
            Err(FinError::Internal(format!("webhook HTTP {status}: {body}")))
        }
    }
}
