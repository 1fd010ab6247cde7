use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use payrecover_campaigns::{Campaign, CampaignStatus, FailureClassification, RetryPolicy};
use payrecover_core::{CampaignId, ExpectedVersion};

use super::MAX_CONFLICT_RETRIES;
use super::command::RetryOutcome;
use crate::error::RecoveryError;
use crate::external::{ChargeOutcome, PaymentProcessor, ProcessorError};
use crate::store::{SharedStore, StoreError};

/// Why a retry is being run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryTrigger {
    /// From the schedule; skipped unless `next_retry_at` has passed.
    Scheduled,
    /// Operator request; runs as long as the budget allows.
    Manual,
}

enum Charge {
    Paid,
    Failed {
        classification: FailureClassification,
        detail: Option<String>,
        error: Option<RecoveryError>,
    },
}

/// Performs one charge retry under the campaign lease and records it.
pub struct RetryExecutor {
    store: SharedStore,
    processor: Arc<dyn PaymentProcessor>,
    policy: RetryPolicy,
    processor_timeout: Duration,
    lease_ttl: chrono::Duration,
}

impl RetryExecutor {
    pub fn new(
        store: SharedStore,
        processor: Arc<dyn PaymentProcessor>,
        policy: RetryPolicy,
        processor_timeout: Duration,
        lease_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            processor,
            policy,
            processor_timeout,
            lease_ttl,
        }
    }

    pub async fn execute(
        &self,
        id: CampaignId,
        trigger: RetryTrigger,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, RecoveryError> {
        let leased = match self.claim(id, trigger, now).await? {
            Ok(leased) => leased,
            Err(not_due) => return Ok(RetryOutcome::NotDue(not_due)),
        };

        let started = tokio::time::Instant::now();
        let charge = self.charge(&leased).await;
        // Results carry the time the processor answered.
        let settled_at = now
            + chrono::Duration::from_std(started.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());

        match self.commit(leased, charge, settled_at).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.release(id, settled_at).await;
                Err(err)
            }
        }
    }

    /// Drops a lease left behind by a failed commit. Failures here are only
    /// logged; the lease expires on its own.
    async fn release(&self, id: CampaignId, now: DateTime<Utc>) {
        let result = match self.store.get(id).await {
            Ok(current) if current.lease_until.is_some() => self
                .store
                .update(id, ExpectedVersion::Exact(current.version), current.release_lease(now))
                .await
                .map(|_| ()),
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = result {
            warn!(campaign_id = %id, error = %err, "could not release retry lease");
        }
    }

    /// Takes the lease. The inner `Err` carries a campaign with nothing due.
    async fn claim(
        &self,
        id: CampaignId,
        trigger: RetryTrigger,
        now: DateTime<Utc>,
    ) -> Result<Result<Campaign, Campaign>, RecoveryError> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let current = self.store.get(id).await?;
            if current.is_terminal() {
                return Err(RecoveryError::AlreadyTerminal(current.status.to_string()));
            }
            if trigger == RetryTrigger::Scheduled && !current.retry_due(now) {
                return Ok(Err(current));
            }
            if current.retry_count >= current.max_retries {
                return Err(RecoveryError::Validation(format!(
                    "campaign {id} has used all {} retries",
                    current.max_retries
                )));
            }
            if current.is_leased(now) {
                return Err(RecoveryError::Busy(format!("campaign {id} is leased")));
            }

            let change = current.acquire_lease(now, self.lease_ttl)?;
            match self
                .store
                .update(id, ExpectedVersion::Exact(current.version), change)
                .await
            {
                Ok(leased) => return Ok(Ok(leased)),
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(RecoveryError::Busy(format!("campaign {id} kept changing")))
    }

    async fn charge(&self, campaign: &Campaign) -> Charge {
        let call = self.processor.retry_charge(&campaign.invoice_ref);
        let answer = match tokio::time::timeout(self.processor_timeout, call).await {
            Ok(answer) => answer,
            Err(_) => Err(ProcessorError::Timeout),
        };

        match answer {
            Ok(ChargeOutcome::Paid) => Charge::Paid,
            Ok(ChargeOutcome::Declined { code, message }) => {
                let classification = FailureClassification::from_code(&code);
                let detail = message.unwrap_or(code);
                let error = classification.is_durable().then(|| RecoveryError::PermanentDecline {
                    classification,
                    detail: detail.clone(),
                });
                Charge::Failed {
                    classification,
                    detail: Some(detail),
                    error,
                }
            }
            Err(err) => {
                warn!(
                    campaign_id = %campaign.id,
                    invoice_ref = %campaign.invoice_ref,
                    processor = self.processor.name(),
                    error = %err,
                    "processor call failed"
                );
                let error = RecoveryError::from(err);
                Charge::Failed {
                    classification: FailureClassification::ProcessorUnavailable,
                    detail: Some(error.to_string()),
                    error: Some(error),
                }
            }
        }
    }

    /// Records the charge result against the freshest snapshot.
    async fn commit(
        &self,
        leased: Campaign,
        charge: Charge,
        now: DateTime<Utc>,
    ) -> Result<RetryOutcome, RecoveryError> {
        let id = leased.id;
        let mut snapshot = leased;

        for _ in 0..MAX_CONFLICT_RETRIES {
            if snapshot.is_terminal() {
                warn!(
                    campaign_id = %id,
                    status = %snapshot.status,
                    "campaign ended while the charge was in flight; result discarded"
                );
                return Ok(RetryOutcome::Superseded(snapshot));
            }

            let change = match &charge {
                Charge::Paid => snapshot.record_retry_success(now)?,
                Charge::Failed {
                    classification,
                    detail,
                    ..
                } => snapshot.record_retry_failure(*classification, detail.clone(), now, &self.policy)?,
            };

            match self
                .store
                .update(id, ExpectedVersion::Exact(snapshot.version), change)
                .await
            {
                Ok(next) => return Ok(self.outcome(next, charge)),
                Err(StoreError::VersionConflict { .. }) => {
                    snapshot = self.store.get(id).await?;
                }
                Err(StoreError::Terminal(_)) => {
                    snapshot = self.store.get(id).await?;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(RecoveryError::VersionConflict(format!(
            "could not record retry for campaign {id}"
        )))
    }

    fn outcome(&self, campaign: Campaign, charge: Charge) -> RetryOutcome {
        match charge {
            Charge::Paid => {
                info!(
                    campaign_id = %campaign.id,
                    invoice_ref = %campaign.invoice_ref,
                    attempt_number = campaign.retry_count + 1,
                    "payment recovered by retry"
                );
                RetryOutcome::Recovered(campaign)
            }
            Charge::Failed {
                classification,
                error,
                ..
            } => {
                if campaign.status == CampaignStatus::Failed {
                    warn!(
                        campaign_id = %campaign.id,
                        attempt_number = campaign.retry_count,
                        classification = %classification,
                        "retry failed; campaign has nothing left to try"
                    );
                } else {
                    info!(
                        campaign_id = %campaign.id,
                        attempt_number = campaign.retry_count,
                        classification = %classification,
                        next_retry_at = ?campaign.next_retry_at,
                        "retry failed"
                    );
                }
                RetryOutcome::Declined {
                    campaign,
                    classification,
                    error,
                }
            }
        }
    }
}
