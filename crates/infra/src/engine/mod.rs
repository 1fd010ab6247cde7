//! The recovery engine.
//!
//! - [`EventGateway`] turns signed inbound events into campaign writes and commands
//! - [`RetryExecutor`] charges invoices again
//! - [`DunningSequencer`] sends the message steps
//! - [`CampaignEngine`] dispatches [`CampaignCommand`]s to both
//! - [`CommandQueue`] and [`DueCampaignScanner`] drive the engine in the background
//!
//! All coordination goes through the store: a campaign is claimed with a
//! lease written by conditional update, and every result is recorded against
//! the version it was computed from.

pub mod command;
pub mod executor;
pub mod gateway;
pub mod queue;
pub mod runtime;
pub mod scanner;
pub mod sequencer;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use payrecover_campaigns::{Campaign, CampaignChange};
use payrecover_core::{CampaignId, ExpectedVersion};

pub use command::{CampaignCommand, CommandOutcome, MessageOutcome, RetryOutcome};
pub use executor::{RetryExecutor, RetryTrigger};
pub use gateway::{EventGateway, IngestOutcome};
pub use queue::{CommandQueue, CommandWorkerHandle};
pub use runtime::{Collaborators, RecoveryRuntime, StartupError};
pub use scanner::{DueCampaignScanner, ScannerHandle};
pub use sequencer::{DunningSequencer, MessageSettings};

use crate::error::RecoveryError;
use crate::store::{CampaignStore, SharedStore, StoreError};

/// Re-reads allowed when a conditional write loses a race.
pub(crate) const MAX_CONFLICT_RETRIES: usize = 5;

/// Read, decide, write under the read version; re-read on conflicts.
pub(crate) async fn write_with_retry<F>(
    store: &dyn CampaignStore,
    id: CampaignId,
    mut decide: F,
) -> Result<Campaign, RecoveryError>
where
    F: FnMut(&Campaign) -> Result<CampaignChange, RecoveryError> + Send,
{
    for _ in 0..MAX_CONFLICT_RETRIES {
        let current = store.get(id).await?;
        let change = decide(&current)?;
        match store
            .update(id, ExpectedVersion::Exact(current.version), change)
            .await
        {
            Ok(next) => return Ok(next),
            Err(StoreError::VersionConflict { .. }) => {
                debug!(campaign_id = %id, "version conflict; re-reading campaign");
            }
            Err(err) => return Err(err.into()),
        }
    }
    Err(RecoveryError::VersionConflict(format!(
        "campaign {id} kept changing"
    )))
}

/// Dispatches campaign commands.
pub struct CampaignEngine {
    store: SharedStore,
    executor: RetryExecutor,
    sequencer: DunningSequencer,
}

impl CampaignEngine {
    pub fn new(store: SharedStore, executor: RetryExecutor, sequencer: DunningSequencer) -> Self {
        Self {
            store,
            executor,
            sequencer,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Runs one command. Terminal, missing and busy campaigns come back as
    /// [`CommandOutcome::Skipped`] rather than errors.
    pub async fn dispatch(
        &self,
        command: CampaignCommand,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, RecoveryError> {
        let result = match command {
            CampaignCommand::Evaluate { campaign_id } => self.evaluate(campaign_id, now).await,
            CampaignCommand::Retry { campaign_id } => self
                .executor
                .execute(campaign_id, RetryTrigger::Manual, now)
                .await
                .map(CommandOutcome::Retry),
            CampaignCommand::SendStep {
                campaign_id,
                step_number,
            } => self
                .sequencer
                .send_step(campaign_id, step_number, now)
                .await
                .map(CommandOutcome::Message),
            CampaignCommand::WinBack { campaign_id } => self
                .sequencer
                .send_win_back(campaign_id, now)
                .await
                .map(CommandOutcome::Message),
            CampaignCommand::Cancel { campaign_id } => {
                write_with_retry(&*self.store, campaign_id, |current| Ok(current.cancel(now)?))
                    .await
                    .map(CommandOutcome::Cancelled)
            }
        };

        match result {
            Err(err) if err.is_benign() => {
                warn!(
                    campaign_id = %command.campaign_id(),
                    command = command.name(),
                    reason = %err,
                    "command skipped"
                );
                Ok(CommandOutcome::Skipped {
                    campaign_id: command.campaign_id(),
                    reason: err,
                })
            }
            other => other,
        }
    }

    /// Retry first, then the next message, each only when due.
    async fn evaluate(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome, RecoveryError> {
        let retry = match self.executor.execute(id, RetryTrigger::Scheduled, now).await? {
            RetryOutcome::NotDue(_) => None,
            outcome => Some(outcome),
        };

        let message = match self.sequencer.send_due(id, now).await {
            Ok(MessageOutcome::NotDue(_)) => None,
            Ok(outcome) => Some(outcome),
            // The retry just closed the campaign.
            Err(err) if err.is_benign() && retry.is_some() => None,
            Err(err) => return Err(err),
        };

        Ok(CommandOutcome::Evaluated { retry, message })
    }
}

/// Shared handle to the engine.
pub type SharedEngine = Arc<CampaignEngine>;
