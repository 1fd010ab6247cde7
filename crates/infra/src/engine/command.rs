use serde::Serialize;

use payrecover_campaigns::{Campaign, FailureClassification};
use payrecover_core::CampaignId;

use crate::error::RecoveryError;

/// The single internal command path.
///
/// The gateway and the due-campaign scanner enqueue commands; the control
/// API dispatches them inline. Every command re-reads the campaign, so stale
/// or duplicated commands are harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CampaignCommand {
    /// Run whatever is due: the retry first, then the next message.
    Evaluate { campaign_id: CampaignId },
    /// Manual retry, regardless of schedule.
    Retry { campaign_id: CampaignId },
    /// Manual send of a dunning step; `None` means the next one.
    SendStep {
        campaign_id: CampaignId,
        step_number: Option<u32>,
    },
    WinBack { campaign_id: CampaignId },
    Cancel { campaign_id: CampaignId },
}

impl CampaignCommand {
    pub fn campaign_id(&self) -> CampaignId {
        match self {
            CampaignCommand::Evaluate { campaign_id }
            | CampaignCommand::Retry { campaign_id }
            | CampaignCommand::SendStep { campaign_id, .. }
            | CampaignCommand::WinBack { campaign_id }
            | CampaignCommand::Cancel { campaign_id } => *campaign_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CampaignCommand::Evaluate { .. } => "evaluate",
            CampaignCommand::Retry { .. } => "retry",
            CampaignCommand::SendStep { .. } => "send_step",
            CampaignCommand::WinBack { .. } => "win_back",
            CampaignCommand::Cancel { .. } => "cancel",
        }
    }
}

/// Result of one charge retry.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Recovered(Campaign),
    /// The charge failed; the campaign shows whether another retry is planned.
    ///
    /// `error` is `TransientProcessor` when the processor gave no answer and
    /// `PermanentDecline` for durable declines.
    Declined {
        campaign: Campaign,
        classification: FailureClassification,
        error: Option<RecoveryError>,
    },
    NotDue(Campaign),
    /// The campaign ended while the charge was in flight; the result was dropped.
    Superseded(Campaign),
}

impl RetryOutcome {
    pub fn campaign(&self) -> &Campaign {
        match self {
            RetryOutcome::Recovered(c)
            | RetryOutcome::NotDue(c)
            | RetryOutcome::Superseded(c)
            | RetryOutcome::Declined { campaign: c, .. } => c,
        }
    }
}

/// Result of one message step.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Sent {
        campaign: Campaign,
        step_number: u32,
        provider_message_id: String,
    },
    /// Delivery failed; the step is consumed and recorded as failed.
    Failed {
        campaign: Campaign,
        step_number: u32,
        error: RecoveryError,
    },
    AlreadySent { campaign: Campaign, step_number: u32 },
    NotDue(Campaign),
    Superseded(Campaign),
}

impl MessageOutcome {
    pub fn campaign(&self) -> &Campaign {
        match self {
            MessageOutcome::Sent { campaign, .. }
            | MessageOutcome::Failed { campaign, .. }
            | MessageOutcome::AlreadySent { campaign, .. }
            | MessageOutcome::NotDue(campaign)
            | MessageOutcome::Superseded(campaign) => campaign,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Evaluated {
        retry: Option<RetryOutcome>,
        message: Option<MessageOutcome>,
    },
    Retry(RetryOutcome),
    Message(MessageOutcome),
    Cancelled(Campaign),
    /// Benign no-op: the campaign is terminal, missing or busy.
    Skipped {
        campaign_id: CampaignId,
        reason: RecoveryError,
    },
}
