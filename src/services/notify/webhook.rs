use anyhow::Context;
use async_trait::async_trait;

use super::{BookingEvent, Notifier};

/// Posts each event as JSON to a configured endpoint.
pub struct WebhookNotifier {
    url: String,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, event: &BookingEvent) -> anyhow::Result<()> {
        self.client
            .post(&self.url)
            .header("X-Event-Id", event.id.to_string())
            .json(event)
            .send()
            .await
            .context("failed to deliver booking event")?
            .error_for_status()
            .context("webhook returned error")?;

        Ok(())
    }
}
