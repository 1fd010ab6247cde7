use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use payrecover_campaigns::{
    Campaign, CampaignStatus, DunningSequence, FailureClassification, NewCampaign, RetryPolicy,
};
use payrecover_core::CampaignId;
use payrecover_events::{
    Event, InboundEvent, PaymentEvent, PaymentFailed, PaymentSucceeded, SignatureVerifier,
    SubscriptionCancelled,
};

use super::command::CampaignCommand;
use super::write_with_retry;
use crate::error::RecoveryError;
use crate::store::SharedStore;

/// What the gateway did with one inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    pub event_id: String,
    pub event_type: &'static str,
    /// The event id was already processed; nothing was done.
    pub duplicate: bool,
    /// Follow-up work for the command queue.
    pub commands: Vec<CampaignCommand>,
}

/// Authenticates, parses and applies inbound payment events.
///
/// Campaign state changes that need no outbound call (open, recover,
/// cancel) are written here directly; everything else becomes a command.
pub struct EventGateway {
    store: SharedStore,
    verifier: SignatureVerifier,
    policy: RetryPolicy,
    sequence: DunningSequence,
    dedup_ttl: chrono::Duration,
}

impl EventGateway {
    pub fn new(
        store: SharedStore,
        verifier: SignatureVerifier,
        policy: RetryPolicy,
        sequence: DunningSequence,
        dedup_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            verifier,
            policy,
            sequence,
            dedup_ttl,
        }
    }

    #[instrument(skip(self, signature, body), fields(bytes = body.len()))]
    pub async fn ingest(
        &self,
        signature: Option<&str>,
        body: &[u8],
        now: DateTime<Utc>,
    ) -> Result<IngestOutcome, RecoveryError> {
        if let Err(err) = self.verifier.verify(signature, body, now) {
            warn!(error = %err, "rejected inbound event: bad signature");
            return Err(err.into());
        }

        let event = InboundEvent::parse(body).map_err(|err| {
            warn!(error = %err, "rejected inbound event: malformed payload");
            RecoveryError::from(err)
        })?;
        let event_type = event.payload().event_type();

        if self
            .store
            .event_seen(event.event_id(), now, self.dedup_ttl)
            .await?
        {
            info!(event_id = event.event_id(), event_type, "duplicate event ignored");
            return Ok(IngestOutcome {
                event_id: event.event_id().to_string(),
                event_type,
                duplicate: true,
                commands: Vec::new(),
            });
        }

        let commands = match event.payload() {
            PaymentEvent::PaymentFailed(failed) => self.on_payment_failed(failed, now).await?,
            PaymentEvent::PaymentSucceeded(succeeded) => {
                self.on_payment_succeeded(succeeded, now).await?
            }
            PaymentEvent::SubscriptionCancelled(cancelled) => {
                self.on_subscription_cancelled(cancelled, now).await?
            }
        };

        // Recorded only after the effects landed, so a failed attempt can be redelivered.
        self.store.record_event(event.event_id(), now).await?;
        info!(
            event_id = event.event_id(),
            event_type,
            commands = commands.len(),
            "event processed"
        );

        Ok(IngestOutcome {
            event_id: event.event_id().to_string(),
            event_type,
            duplicate: false,
            commands,
        })
    }

    async fn on_payment_failed(
        &self,
        failed: &PaymentFailed,
        now: DateTime<Utc>,
    ) -> Result<Vec<CampaignCommand>, RecoveryError> {
        let new = NewCampaign {
            invoice_ref: failed.invoice_ref.clone(),
            customer_ref: failed.customer_ref.clone(),
            subscription_ref: failed.subscription_ref.clone(),
            customer_email: failed.customer_email.clone(),
            customer_name: failed.customer_name.clone(),
            amount: failed.amount()?,
            max_retries: self.policy.max_retries(),
            failure_code: failed
                .failure_code
                .as_deref()
                .map(FailureClassification::from_code),
            failure_message: failed.failure_message.clone(),
        };
        let campaign = Campaign::open(CampaignId::new(), new, now, &self.policy, &self.sequence)?;
        let outcome = self.store.create_if_absent(campaign).await?;
        let campaign = outcome.campaign;

        if !outcome.created {
            debug!(
                campaign_id = %campaign.id,
                invoice_ref = %campaign.invoice_ref,
                status = %campaign.status,
                "campaign already exists for invoice"
            );
            return Ok(Vec::new());
        }

        if campaign.is_terminal() {
            warn!(
                campaign_id = %campaign.id,
                invoice_ref = %campaign.invoice_ref,
                status = %campaign.status,
                "campaign opened with nothing to retry or send"
            );
            return Ok(Vec::new());
        }

        info!(
            campaign_id = %campaign.id,
            invoice_ref = %campaign.invoice_ref,
            next_retry_at = ?campaign.next_retry_at,
            next_message_at = ?campaign.next_message_at,
            "recovery campaign opened"
        );
        Ok(vec![CampaignCommand::Evaluate {
            campaign_id: campaign.id,
        }])
    }

    async fn on_payment_succeeded(
        &self,
        succeeded: &PaymentSucceeded,
        now: DateTime<Utc>,
    ) -> Result<Vec<CampaignCommand>, RecoveryError> {
        let Some(campaign) = self.store.find_by_invoice(&succeeded.invoice_ref).await? else {
            debug!(invoice_ref = %succeeded.invoice_ref, "payment succeeded for an invoice without a campaign");
            return Ok(Vec::new());
        };

        let result = write_with_retry(&*self.store, campaign.id, |current| {
            Ok(current.mark_recovered(now)?)
        })
        .await;

        match result {
            Ok(recovered) => info!(
                campaign_id = %recovered.id,
                invoice_ref = %recovered.invoice_ref,
                "campaign recovered by upstream payment"
            ),
            Err(err) if err.is_benign() => warn!(
                campaign_id = %campaign.id,
                invoice_ref = %succeeded.invoice_ref,
                reason = %err,
                "payment succeeded for a campaign that is already closed; ignoring"
            ),
            Err(err) => return Err(err),
        }
        Ok(Vec::new())
    }

    async fn on_subscription_cancelled(
        &self,
        cancelled: &SubscriptionCancelled,
        now: DateTime<Utc>,
    ) -> Result<Vec<CampaignCommand>, RecoveryError> {
        let mut campaigns = self
            .store
            .find_by_subscription(&cancelled.subscription_ref)
            .await?;
        if let Some(invoice_ref) = &cancelled.invoice_ref {
            if !campaigns.iter().any(|c| &c.invoice_ref == invoice_ref) {
                if let Some(campaign) = self.store.find_by_invoice(invoice_ref).await? {
                    campaigns.push(campaign);
                }
            }
        }

        let mut commands = Vec::new();
        for campaign in campaigns {
            let campaign = if campaign.status == CampaignStatus::Active {
                match write_with_retry(&*self.store, campaign.id, |current| {
                    Ok(current.cancel(now)?)
                })
                .await
                {
                    Ok(closed) => {
                        info!(
                            campaign_id = %closed.id,
                            subscription_ref = %cancelled.subscription_ref,
                            "campaign cancelled with its subscription"
                        );
                        closed
                    }
                    // Closed concurrently; look at what it became.
                    Err(err) if err.is_benign() => self.store.get(campaign.id).await?,
                    Err(err) => return Err(err),
                }
            } else {
                campaign
            };

            if self.wants_win_back(&campaign) {
                commands.push(CampaignCommand::WinBack {
                    campaign_id: campaign.id,
                });
            }
        }
        Ok(commands)
    }

    fn wants_win_back(&self, campaign: &Campaign) -> bool {
        campaign.can_win_back()
            && campaign.customer_email.is_some()
            && self
                .sequence
                .win_back()
                .is_some_and(|step| campaign.last_step_sent < step.step_number)
    }
}
