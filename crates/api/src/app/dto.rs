use serde::{Deserialize, Serialize};

use payrecover_campaigns::{Campaign, CampaignStatus, FailureClassification};
use payrecover_infra::engine::{CommandOutcome, MessageOutcome, RetryOutcome};
use payrecover_infra::store::CampaignFilter;
use payrecover_infra::RecoveryError;

use crate::app::errors::ApiError;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListCampaignsQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListCampaignsQuery {
    pub fn into_filter(self) -> Result<CampaignFilter, ApiError> {
        let status = match self.status.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => Some(raw.parse::<CampaignStatus>().map_err(|_| {
                ApiError::BadRequest(
                    "status must be one of: active, recovered, failed, cancelled".into(),
                )
            })?),
        };
        let defaults = CampaignFilter::default();
        Ok(CampaignFilter {
            status,
            limit: self.limit.unwrap_or(defaults.limit),
            offset: self.offset.unwrap_or(0),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SendMessageRequest {
    /// Defaults to the next step in the sequence.
    pub step_number: Option<u32>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct WebhookReceipt {
    pub received: bool,
    pub duplicate: bool,
    pub event_id: String,
    pub event_type: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CampaignPage {
    pub campaigns: Vec<Campaign>,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
}

impl From<RecoveryError> for ErrorBody {
    fn from(err: RecoveryError) -> Self {
        Self {
            error: err.code(),
            message: err.to_string(),
        }
    }
}

/// What a control command did.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub campaign: Option<Campaign>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<FailureClassification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl CommandResponse {
    fn new(outcome: &'static str, campaign: Option<Campaign>) -> Self {
        Self {
            outcome,
            campaign,
            step_number: None,
            classification: None,
            provider_message_id: None,
            error: None,
        }
    }

    /// Skipped commands become errors so the handler can pick a status code.
    pub fn from_outcome(outcome: CommandOutcome) -> Result<Self, ApiError> {
        Ok(match outcome {
            CommandOutcome::Retry(retry) => Self::from_retry(retry),
            CommandOutcome::Message(message) => Self::from_message(message),
            CommandOutcome::Cancelled(campaign) => Self::new("cancelled", Some(campaign)),
            CommandOutcome::Evaluated { retry, message } => {
                let campaign = message
                    .as_ref()
                    .map(|m| m.campaign().clone())
                    .or_else(|| retry.as_ref().map(|r| r.campaign().clone()));
                Self::new("evaluated", campaign)
            }
            CommandOutcome::Skipped { reason, .. } => return Err(reason.into()),
        })
    }

    fn from_retry(outcome: RetryOutcome) -> Self {
        match outcome {
            RetryOutcome::Recovered(campaign) => Self::new("recovered", Some(campaign)),
            RetryOutcome::Declined {
                campaign,
                classification,
                error,
            } => Self {
                classification: Some(classification),
                error: error.map(ErrorBody::from),
                ..Self::new("declined", Some(campaign))
            },
            RetryOutcome::NotDue(campaign) => Self::new("not_due", Some(campaign)),
            RetryOutcome::Superseded(campaign) => Self::new("superseded", Some(campaign)),
        }
    }

    fn from_message(outcome: MessageOutcome) -> Self {
        match outcome {
            MessageOutcome::Sent {
                campaign,
                step_number,
                provider_message_id,
            } => Self {
                step_number: Some(step_number),
                provider_message_id: Some(provider_message_id),
                ..Self::new("sent", Some(campaign))
            },
            MessageOutcome::Failed {
                campaign,
                step_number,
                error,
            } => Self {
                step_number: Some(step_number),
                error: Some(error.into()),
                ..Self::new("delivery_failed", Some(campaign))
            },
            MessageOutcome::AlreadySent {
                campaign,
                step_number,
            } => Self {
                step_number: Some(step_number),
                ..Self::new("already_sent", Some(campaign))
            },
            MessageOutcome::NotDue(campaign) => Self::new("not_due", Some(campaign)),
            MessageOutcome::Superseded(campaign) => Self::new("superseded", Some(campaign)),
        }
    }
}
