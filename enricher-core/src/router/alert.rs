use std::fmt;

use async_trait::async_trait;
use enricher_model::CanonicalEvent;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{EnricherError, Result};

/// Out-of-band human notification channel.
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, event: &CanonicalEvent) -> Result<()>;
}

/// Writes alerts to the log at error level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn notify(&self, event: &CanonicalEvent) -> Result<()> {
        tracing::error!(
            alert = event.get(crate::quota::ALERT_ATTRIBUTE).unwrap_or("-"),
            stage = event.get(crate::quota::STAGE_ATTRIBUTE).unwrap_or("-"),
            "{}",
            event.body
        );
        Ok(())
    }
}

/// POSTs the event as JSON to a webhook.
#[derive(Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: Url,
}

impl fmt::Debug for WebhookAlertSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookAlertSink")
            .field("host", &self.url.host_str())
            .finish()
    }
}

impl WebhookAlertSink {
    pub fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn notify(&self, event: &CanonicalEvent) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(&serde_json::json!({
                "body": event.body,
                "attributes": event.attributes,
            }))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EnricherError::Internal(format!(
                "alert webhook returned {status}"
            )));
        }
        Ok(())
    }
}

/// Keeps every alert in memory; used by local runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryAlertSink {
    received: Mutex<Vec<CanonicalEvent>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn received(&self) -> Vec<CanonicalEvent> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
    async fn notify(&self, event: &CanonicalEvent) -> Result<()> {
        self.received.lock().await.push(event.clone());
        Ok(())
    }
}
