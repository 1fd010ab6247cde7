use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// One email ready to hand to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
    pub text: String,
    /// Provider-side tags, e.g. campaign id and step.
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub provider_message_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery provider rejected the message ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("delivery provider unavailable: {0}")]
    Unavailable(String),

    #[error("delivery timed out")]
    Timeout,
}

impl DeliveryError {
    /// Short code stored on the failed message row.
    pub fn code(&self) -> &'static str {
        match self {
            DeliveryError::Rejected { .. } => "delivery_rejected",
            DeliveryError::Unavailable(_) => "delivery_unavailable",
            DeliveryError::Timeout => "delivery_timeout",
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else {
            DeliveryError::Unavailable(err.to_string())
        }
    }
}

#[async_trait]
pub trait MessageDelivery: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError>;
}

#[async_trait]
impl<T: MessageDelivery + ?Sized> MessageDelivery for Arc<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, DeliveryError> {
        (**self).send(message).await
    }
}
