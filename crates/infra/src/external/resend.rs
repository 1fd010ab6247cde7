use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::delivery::{DeliveryError, DeliveryReceipt, MessageDelivery, OutboundMessage};

#[derive(Debug, Clone)]
pub struct ResendSettings {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
}

impl ResendSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: "https://api.resend.com".to_string(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Sends email through the `POST /emails` endpoint.
pub struct HttpMessageDelivery {
    client: reqwest::Client,
    settings: ResendSettings,
}

impl HttpMessageDelivery {
    pub fn new(settings: ResendSettings) -> Result<Self, DeliveryError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .map_err(|e| DeliveryError::Unavailable(e.to_string()))?;
        Ok(Self { client, settings })
    }
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: String,
}

#[async_trait]
impl MessageDelivery for HttpMessageDelivery {
    fn name(&self) -> &'static str {
        "resend"
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        let url = format!("{}/emails", self.settings.base_url.trim_end_matches('/'));
        let tags: Vec<_> = message
            .tags
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        let body = json!({
            "from": message.from,
            "to": [message.to],
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
            "tags": tags,
        });

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(DeliveryError::Unavailable(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                body: text,
            });
        }

        let sent: SendResponse = serde_json::from_str(&text)
            .map_err(|e| DeliveryError::Unavailable(format!("unreadable send response: {e}")))?;
        Ok(DeliveryReceipt {
            provider_message_id: sent.id,
        })
    }
}
