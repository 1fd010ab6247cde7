use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use payrecover_campaigns::{
    Campaign, CampaignStatus, DeliveryStatus, DunningSequence, DunningStep, MessagePurpose,
    NewSentMessage,
};
use payrecover_content::{
    ContentRequest, FallbackContentGenerator, MessageTemplate, render_email_html,
};
use payrecover_core::{CampaignId, DomainError, ExpectedVersion};

use super::MAX_CONFLICT_RETRIES;
use super::command::MessageOutcome;
use crate::error::RecoveryError;
use crate::external::{DeliveryError, MessageDelivery, OutboundMessage};
use crate::store::{SharedStore, StoreError};

/// Sender identity and links rendered into every message.
#[derive(Debug, Clone)]
pub struct MessageSettings {
    pub business_name: String,
    pub from_address: String,
    /// `{invoice}` is replaced with the invoice reference.
    pub payment_update_url: Option<String>,
}

impl MessageSettings {
    fn payment_link(&self, invoice_ref: &str) -> Option<String> {
        self.payment_update_url
            .as_ref()
            .map(|url| url.replace("{invoice}", invoice_ref))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepRequest {
    /// The next regular step, only once its delay has elapsed.
    Due,
    /// A regular step on operator request; `None` is the next one.
    Manual(Option<u32>),
    WinBack,
}

enum Claim {
    Leased {
        campaign: Campaign,
        step: DunningStep,
        purpose: MessagePurpose,
        recipient: String,
    },
    NotDue(Campaign),
    AlreadySent(Campaign, u32),
}

/// Sends dunning steps at most once each.
///
/// Flow per step: lease the campaign, render content, re-check the campaign,
/// deliver, then record the message (which also releases the lease).
pub struct DunningSequencer {
    store: SharedStore,
    delivery: Arc<dyn MessageDelivery>,
    content: Arc<FallbackContentGenerator>,
    sequence: DunningSequence,
    settings: MessageSettings,
    delivery_timeout: Duration,
    lease_ttl: chrono::Duration,
}

impl DunningSequencer {
    pub fn new(
        store: SharedStore,
        delivery: Arc<dyn MessageDelivery>,
        content: Arc<FallbackContentGenerator>,
        sequence: DunningSequence,
        settings: MessageSettings,
        delivery_timeout: Duration,
        lease_ttl: chrono::Duration,
    ) -> Self {
        Self {
            store,
            delivery,
            content,
            sequence,
            settings,
            delivery_timeout,
            lease_ttl,
        }
    }

    pub fn sequence(&self) -> &DunningSequence {
        &self.sequence
    }

    /// Sends the next step if it is due.
    pub async fn send_due(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome, RecoveryError> {
        self.send(id, StepRequest::Due, now).await
    }

    /// Sends a regular step now, ignoring its delay.
    pub async fn send_step(
        &self,
        id: CampaignId,
        step_number: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome, RecoveryError> {
        self.send(id, StepRequest::Manual(step_number), now).await
    }

    /// Sends the win-back step to a failed or cancelled campaign.
    pub async fn send_win_back(
        &self,
        id: CampaignId,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome, RecoveryError> {
        self.send(id, StepRequest::WinBack, now).await
    }

    async fn send(
        &self,
        id: CampaignId,
        request: StepRequest,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome, RecoveryError> {
        let (leased, step, purpose, recipient) = match self.claim(id, request, now).await? {
            Claim::Leased {
                campaign,
                step,
                purpose,
                recipient,
            } => (campaign, step, purpose, recipient),
            Claim::NotDue(campaign) => return Ok(MessageOutcome::NotDue(campaign)),
            Claim::AlreadySent(campaign, step_number) => {
                return Ok(MessageOutcome::AlreadySent {
                    campaign,
                    step_number,
                });
            }
        };

        let content_request = ContentRequest::new(step.step_number, leased.amount.clone())
            .with_customer_name(leased.customer_name.clone())
            .with_business_name(Some(self.settings.business_name.clone()))
            .with_template(step_template(&step));
        let content = self.content.render(&content_request).await;

        // Recovery or cancellation may have landed while content was rendered.
        let fresh = self.store.get(id).await?;
        if !still_sendable(&fresh, purpose) {
            warn!(
                campaign_id = %id,
                step_number = step.step_number,
                status = %fresh.status,
                "campaign changed before dispatch; message dropped"
            );
            return Ok(MessageOutcome::Superseded(fresh));
        }

        let link = self.settings.payment_link(&fresh.invoice_ref);
        let message = OutboundMessage {
            from: self.settings.from_address.clone(),
            to: recipient.clone(),
            subject: content.subject.clone(),
            html: render_email_html(&content.body_html, link.as_deref(), &self.settings.business_name),
            text: content.body_text.clone(),
            tags: vec![
                ("campaign_id".to_string(), id.to_string()),
                ("step".to_string(), step.step_number.to_string()),
            ],
        };

        let delivered = match tokio::time::timeout(self.delivery_timeout, self.delivery.send(&message)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        };

        let record = NewSentMessage {
            step_number: step.step_number,
            purpose,
            recipient,
            subject: content.subject,
            delivery_status: if delivered.is_ok() {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            provider_message_id: delivered.as_ref().ok().map(|r| r.provider_message_id.clone()),
            error: delivered.as_ref().err().map(|e| e.code().to_string()),
            is_generated_by_ai: content.is_generated_by_ai,
            sent_at: now,
        };

        self.commit(fresh, record, delivered.err(), now).await
    }

    async fn claim(
        &self,
        id: CampaignId,
        request: StepRequest,
        now: DateTime<Utc>,
    ) -> Result<Claim, RecoveryError> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let current = self.store.get(id).await?;

            let (step, purpose) = match request {
                StepRequest::Due | StepRequest::Manual(_) if current.is_terminal() => {
                    return Err(RecoveryError::AlreadyTerminal(current.status.to_string()));
                }
                StepRequest::Due => {
                    let next = self.sequence.next_step(current.last_step_sent);
                    match next {
                        Some(step) if current.message_due(now) => (step.clone(), MessagePurpose::Dunning),
                        _ => return Ok(Claim::NotDue(current)),
                    }
                }
                StepRequest::Manual(requested) => {
                    let next = self
                        .sequence
                        .next_step(current.last_step_sent)
                        .ok_or_else(|| RecoveryError::Validation("dunning sequence already completed".into()))?;
                    let wanted = requested.unwrap_or(next.step_number);
                    if wanted <= current.last_step_sent {
                        return Ok(Claim::AlreadySent(current, wanted));
                    }
                    if wanted != next.step_number {
                        return Err(RecoveryError::Validation(format!(
                            "step {wanted} is out of order, next step is {}",
                            next.step_number
                        )));
                    }
                    (next.clone(), MessagePurpose::Dunning)
                }
                StepRequest::WinBack => {
                    let step = self
                        .sequence
                        .win_back()
                        .ok_or_else(|| RecoveryError::Validation("no win-back step configured".into()))?;
                    match current.status {
                        CampaignStatus::Recovered => {
                            return Err(RecoveryError::AlreadyTerminal(current.status.to_string()));
                        }
                        CampaignStatus::Active => {
                            return Err(RecoveryError::Validation(
                                "win-back needs a failed or cancelled campaign".into(),
                            ));
                        }
                        CampaignStatus::Failed | CampaignStatus::Cancelled => {}
                    }
                    if current.last_step_sent >= step.step_number {
                        return Ok(Claim::AlreadySent(current, step.step_number));
                    }
                    (step.clone(), MessagePurpose::WinBack)
                }
            };

            let recipient = current
                .customer_email
                .clone()
                .ok_or_else(|| RecoveryError::Validation(format!("campaign {id} has no recipient")))?;

            let already_sent = self
                .store
                .sent_messages(id)
                .await?
                .iter()
                .any(|m| m.step_number == step.step_number);
            if already_sent {
                return Ok(Claim::AlreadySent(current, step.step_number));
            }
            if current.is_leased(now) {
                return Err(RecoveryError::Busy(format!("campaign {id} is leased")));
            }

            let change = match purpose {
                MessagePurpose::Dunning => current.acquire_lease(now, self.lease_ttl)?,
                MessagePurpose::WinBack => current.acquire_win_back_lease(now, self.lease_ttl)?,
            };
            match self
                .store
                .update(id, ExpectedVersion::Exact(current.version), change)
                .await
            {
                Ok(campaign) => {
                    return Ok(Claim::Leased {
                        campaign,
                        step,
                        purpose,
                        recipient,
                    });
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(err.into()),
            }
        }
        Err(RecoveryError::Busy(format!("campaign {id} kept changing")))
    }

    async fn commit(
        &self,
        fresh: Campaign,
        record: NewSentMessage,
        failure: Option<DeliveryError>,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome, RecoveryError> {
        let id = fresh.id;
        let step_number = record.step_number;
        let mut snapshot = fresh;

        for _ in 0..MAX_CONFLICT_RETRIES {
            let change = match snapshot.record_message(record.clone(), &self.sequence, now) {
                Ok(change) => change,
                Err(DomainError::AlreadyTerminal(status)) => {
                    warn!(
                        campaign_id = %id,
                        step_number,
                        status = %status,
                        "campaign ended after the message went out; not recorded"
                    );
                    return Ok(MessageOutcome::Superseded(snapshot));
                }
                Err(err) => return Err(err.into()),
            };

            match self
                .store
                .update(id, ExpectedVersion::Exact(snapshot.version), change)
                .await
            {
                Ok(campaign) => {
                    return Ok(match failure {
                        None => {
                            info!(
                                campaign_id = %id,
                                step_number,
                                purpose = record.purpose.as_str(),
                                "dunning message sent"
                            );
                            MessageOutcome::Sent {
                                campaign,
                                step_number,
                                provider_message_id: record.provider_message_id.unwrap_or_default(),
                            }
                        }
                        Some(err) => {
                            warn!(
                                campaign_id = %id,
                                step_number,
                                delivery = self.delivery.name(),
                                error = %err,
                                "message delivery failed; step consumed"
                            );
                            MessageOutcome::Failed {
                                campaign,
                                step_number,
                                error: err.into(),
                            }
                        }
                    });
                }
                Err(StoreError::VersionConflict { .. }) | Err(StoreError::Terminal(_)) => {
                    snapshot = self.store.get(id).await?;
                }
                Err(StoreError::DuplicateStep { .. }) => {
                    let campaign = self.store.get(id).await?;
                    return Ok(MessageOutcome::AlreadySent {
                        campaign,
                        step_number,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(RecoveryError::VersionConflict(format!(
            "could not record step {step_number} for campaign {id}"
        )))
    }
}

fn still_sendable(campaign: &Campaign, purpose: MessagePurpose) -> bool {
    match purpose {
        MessagePurpose::Dunning => !campaign.is_terminal(),
        MessagePurpose::WinBack => campaign.can_win_back(),
    }
}

fn step_template(step: &DunningStep) -> Option<MessageTemplate> {
    match (&step.subject, &step.body_html) {
        (Some(subject), Some(body_html)) => Some(MessageTemplate {
            subject: subject.clone(),
            body_html: body_html.clone(),
        }),
        _ => None,
    }
}
