//! Dispatched dunning messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payrecover_core::{CampaignId, DomainError, SentMessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

impl core::str::FromStr for DeliveryStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::validation(format!(
                "unknown delivery status: {other}"
            ))),
        }
    }
}

/// Why a message is sent: a regular sequence step, or the win-back step for a
/// campaign that already ended without recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePurpose {
    Dunning,
    WinBack,
}

impl MessagePurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dunning => "dunning",
            Self::WinBack => "win_back",
        }
    }
}

impl core::str::FromStr for MessagePurpose {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dunning" => Ok(Self::Dunning),
            "win_back" => Ok(Self::WinBack),
            other => Err(DomainError::validation(format!(
                "unknown message purpose: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSentMessage {
    pub step_number: u32,
    pub purpose: MessagePurpose,
    pub recipient: String,
    pub subject: String,
    pub delivery_status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub is_generated_by_ai: bool,
    pub sent_at: DateTime<Utc>,
}

impl NewSentMessage {
    pub fn delivered(&self) -> bool {
        self.delivery_status == DeliveryStatus::Sent
    }

    pub fn into_sent_message(self, campaign_id: CampaignId) -> SentMessage {
        SentMessage {
            id: SentMessageId::new(),
            campaign_id,
            step_number: self.step_number,
            purpose: self.purpose,
            recipient: self.recipient,
            subject: self.subject,
            delivery_status: self.delivery_status,
            provider_message_id: self.provider_message_id,
            error: self.error,
            is_generated_by_ai: self.is_generated_by_ai,
            sent_at: self.sent_at,
        }
    }
}

/// Persisted message row. `(campaign_id, step_number)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: SentMessageId,
    pub campaign_id: CampaignId,
    pub step_number: u32,
    pub purpose: MessagePurpose,
    pub recipient: String,
    pub subject: String,
    pub delivery_status: DeliveryStatus,
    pub provider_message_id: Option<String>,
    pub error: Option<String>,
    pub is_generated_by_ai: bool,
    pub sent_at: DateTime<Utc>,
}
