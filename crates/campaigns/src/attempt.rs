//! Append-only audit rows, one per action taken on a campaign.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use payrecover_core::{AttemptId, CampaignId, DomainError};

use crate::classification::FailureClassification;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptKind {
    Retry,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptStatus {
    Success,
    Failed,
}

impl AttemptKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retry => "retry",
            Self::Message => "message",
        }
    }
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl core::str::FromStr for AttemptKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "retry" => Ok(Self::Retry),
            "message" => Ok(Self::Message),
            other => Err(DomainError::validation(format!("unknown attempt kind: {other}"))),
        }
    }
}

impl core::str::FromStr for AttemptStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(DomainError::validation(format!(
                "unknown attempt status: {other}"
            ))),
        }
    }
}

/// An attempt as decided by the domain, before the store numbers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAttempt {
    pub kind: AttemptKind,
    pub status: AttemptStatus,
    /// Failure classification for retries, delivery error code for messages.
    pub error_code: Option<String>,
    pub detail: Option<String>,
    pub step_number: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub executed_at: DateTime<Utc>,
}

impl NewAttempt {
    pub fn retry_succeeded(scheduled_at: Option<DateTime<Utc>>, executed_at: DateTime<Utc>) -> Self {
        Self {
            kind: AttemptKind::Retry,
            status: AttemptStatus::Success,
            error_code: None,
            detail: None,
            step_number: None,
            scheduled_at,
            executed_at,
        }
    }

    pub fn retry_failed(
        classification: FailureClassification,
        detail: Option<String>,
        scheduled_at: Option<DateTime<Utc>>,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: AttemptKind::Retry,
            status: AttemptStatus::Failed,
            error_code: Some(classification.as_str().to_string()),
            detail,
            step_number: None,
            scheduled_at,
            executed_at,
        }
    }

    pub fn message(
        step_number: u32,
        delivered: bool,
        error_code: Option<String>,
        scheduled_at: Option<DateTime<Utc>>,
        executed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: AttemptKind::Message,
            status: if delivered {
                AttemptStatus::Success
            } else {
                AttemptStatus::Failed
            },
            error_code,
            detail: None,
            step_number: Some(step_number),
            scheduled_at,
            executed_at,
        }
    }

    /// Stamp the row with its campaign and per-campaign sequence number.
    pub fn into_attempt(self, campaign_id: CampaignId, attempt_number: u32) -> Attempt {
        Attempt {
            id: AttemptId::new(),
            campaign_id,
            attempt_number,
            kind: self.kind,
            status: self.status,
            error_code: self.error_code,
            detail: self.detail,
            step_number: self.step_number,
            scheduled_at: self.scheduled_at,
            executed_at: self.executed_at,
        }
    }
}

/// Persisted attempt row. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub id: AttemptId,
    pub campaign_id: CampaignId,
    pub attempt_number: u32,
    pub kind: AttemptKind,
    pub status: AttemptStatus,
    pub error_code: Option<String>,
    pub detail: Option<String>,
    pub step_number: Option<u32>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub executed_at: DateTime<Utc>,
}
