use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use payrecover_core::{AggregateRoot, CampaignId, DomainError, DomainResult, Money};

use crate::attempt::NewAttempt;
use crate::classification::FailureClassification;
use crate::message::{MessagePurpose, NewSentMessage};
use crate::schedule::RetryPolicy;
use crate::sequence::DunningSequence;

pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Upper bound accepted for a campaign's retry budget.
const MAX_RETRY_BUDGET: u32 = 20;

/// Campaign status lifecycle. `Active` is the only non-terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Recovered,
    Failed,
    Cancelled,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Active)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Recovered => "recovered",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl core::fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for CampaignStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "recovered" => Ok(Self::Recovered),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(DomainError::validation(format!(
                "unknown campaign status: {other}"
            ))),
        }
    }
}

/// Fields supplied by the first failure event for an invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCampaign {
    pub invoice_ref: String,
    pub customer_ref: String,
    pub subscription_ref: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub amount: Money,
    pub max_retries: u32,
    pub failure_code: Option<FailureClassification>,
    pub failure_message: Option<String>,
}

impl NewCampaign {
    pub fn validate(&self) -> DomainResult<()> {
        if self.invoice_ref.trim().is_empty() {
            return Err(DomainError::validation("invoice_ref must not be empty"));
        }
        if self.customer_ref.trim().is_empty() {
            return Err(DomainError::validation("customer_ref must not be empty"));
        }
        if let Some(email) = &self.customer_email {
            if !email.contains('@') {
                return Err(DomainError::validation(format!(
                    "customer_email is not an address: {email:?}"
                )));
            }
        }
        if self.max_retries > MAX_RETRY_BUDGET {
            return Err(DomainError::validation(format!(
                "max_retries must be at most {MAX_RETRY_BUDGET}"
            )));
        }
        Ok(())
    }
}

/// Aggregate root: one recovery campaign per failed invoice.
///
/// Stored as a snapshot. Every mutation is expressed as a [`CampaignChange`]
/// computed from the current snapshot and applied by the store under an
/// expected version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub invoice_ref: String,
    pub customer_ref: String,
    pub subscription_ref: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub amount: Money,
    pub status: CampaignStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub next_message_at: Option<DateTime<Utc>>,
    /// Highest message step consumed so far (0 = none).
    pub last_step_sent: u32,
    pub failure_code: Option<FailureClassification>,
    pub failure_message: Option<String>,
    /// Worker lease; while in the future no other worker may act on the campaign.
    pub lease_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl AggregateRoot for Campaign {
    type Id = CampaignId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Campaign {
    /// Opens a campaign for the first failure of an invoice.
    pub fn open(
        id: CampaignId,
        new: NewCampaign,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
        sequence: &DunningSequence,
    ) -> DomainResult<Self> {
        new.validate()?;
        let next_retry_at = policy
            .with_max_retries(new.max_retries)
            .next_retry_at(0, new.failure_code, now);
        // Without a recipient there is nothing to send.
        let next_message_at = new
            .customer_email
            .as_ref()
            .and_then(|_| sequence.next_due_at(0, now));
        // Nothing left to try from the start: a durable decline with no recipient.
        let status = if next_retry_at.is_none() && next_message_at.is_none() {
            CampaignStatus::Failed
        } else {
            CampaignStatus::Active
        };

        Ok(Self {
            id,
            invoice_ref: new.invoice_ref,
            customer_ref: new.customer_ref,
            subscription_ref: new.subscription_ref,
            customer_email: new.customer_email,
            customer_name: new.customer_name,
            amount: new.amount,
            status,
            retry_count: 0,
            max_retries: new.max_retries,
            next_retry_at,
            next_message_at,
            last_step_sent: 0,
            failure_code: new.failure_code,
            failure_message: new.failure_message,
            lease_until: None,
            created_at: now,
            updated_at: now,
            recovered_at: None,
            version: 1,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        self.lease_until.is_some_and(|until| until > now)
    }

    pub fn retry_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.next_retry_at.is_some_and(|at| at <= now)
    }

    pub fn message_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_terminal() && self.next_message_at.is_some_and(|at| at <= now)
    }

    /// Due for the periodic scan: something is scheduled and no worker holds it.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        (self.retry_due(now) || self.message_due(now)) && !self.is_leased(now)
    }

    pub fn can_win_back(&self) -> bool {
        matches!(self.status, CampaignStatus::Failed | CampaignStatus::Cancelled)
    }

    fn ensure_active(&self) -> DomainResult<()> {
        if self.is_terminal() {
            return Err(DomainError::already_terminal(self.status.as_str()));
        }
        Ok(())
    }

    fn ensure_retry_allowed(&self) -> DomainResult<()> {
        self.ensure_active()?;
        if self.retry_count >= self.max_retries {
            return Err(DomainError::already_terminal("out of retries"));
        }
        Ok(())
    }

    /// Claims the campaign for one worker until `now + ttl`.
    pub fn acquire_lease(&self, now: DateTime<Utc>, ttl: Duration) -> DomainResult<CampaignChange> {
        self.ensure_active()?;
        self.lease(now, ttl)
    }

    /// Claims a failed or cancelled campaign for its win-back message.
    pub fn acquire_win_back_lease(
        &self,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> DomainResult<CampaignChange> {
        if !self.can_win_back() {
            return Err(DomainError::already_terminal(self.status.as_str()));
        }
        self.lease(now, ttl)
    }

    fn lease(&self, now: DateTime<Utc>, ttl: Duration) -> DomainResult<CampaignChange> {
        if self.is_leased(now) {
            return Err(DomainError::conflict("campaign is leased by another worker"));
        }
        Ok(CampaignChange::new(
            now,
            CampaignPatch {
                lease_until: Some(Some(now + ttl)),
                ..CampaignPatch::default()
            },
        ))
    }

    /// Releases a lease without any other change.
    pub fn release_lease(&self, now: DateTime<Utc>) -> CampaignChange {
        CampaignChange::new(
            now,
            CampaignPatch {
                lease_until: Some(None),
                ..CampaignPatch::default()
            },
        )
    }

    /// Processor accepted the retry.
    pub fn record_retry_success(&self, now: DateTime<Utc>) -> DomainResult<CampaignChange> {
        self.ensure_retry_allowed()?;
        Ok(
            CampaignChange::new(now, CampaignPatch::recovered(now))
                .with_attempt(NewAttempt::retry_succeeded(self.next_retry_at, now)),
        )
    }

    /// Processor declined the retry (or timed out).
    ///
    /// Increments `retry_count` and either schedules the next retry or ends the
    /// campaign as `failed` once there is nothing left to try.
    pub fn record_retry_failure(
        &self,
        classification: FailureClassification,
        detail: Option<String>,
        now: DateTime<Utc>,
        policy: &RetryPolicy,
    ) -> DomainResult<CampaignChange> {
        self.ensure_retry_allowed()?;

        let retry_count = self.retry_count + 1;
        let next_retry_at = policy
            .with_max_retries(self.max_retries)
            .next_retry_at(retry_count, Some(classification), now);
        let exhausted = retry_count >= self.max_retries
            || (next_retry_at.is_none() && self.next_message_at.is_none());

        let mut patch = CampaignPatch {
            retry_count: Some(retry_count),
            next_retry_at: Some(next_retry_at),
            failure_code: Some(Some(classification)),
            failure_message: Some(detail.clone()),
            lease_until: Some(None),
            ..CampaignPatch::default()
        };
        if exhausted {
            patch.status = Some(CampaignStatus::Failed);
            patch.next_retry_at = Some(None);
            patch.next_message_at = Some(None);
        }

        Ok(CampaignChange::new(now, patch).with_attempt(NewAttempt::retry_failed(
            classification,
            detail,
            self.next_retry_at,
            now,
        )))
    }

    /// Payment reported as settled by the upstream processor.
    pub fn mark_recovered(&self, now: DateTime<Utc>) -> DomainResult<CampaignChange> {
        self.ensure_active()?;
        Ok(CampaignChange::new(now, CampaignPatch::recovered(now)))
    }

    /// Explicit cancellation; voids every scheduled action.
    pub fn cancel(&self, now: DateTime<Utc>) -> DomainResult<CampaignChange> {
        self.ensure_active()?;
        Ok(CampaignChange::new(
            now,
            CampaignPatch {
                status: Some(CampaignStatus::Cancelled),
                next_retry_at: Some(None),
                next_message_at: Some(None),
                lease_until: Some(None),
                ..CampaignPatch::default()
            },
        ))
    }

    /// Records a dispatched (or failed) message step and advances the sequence.
    ///
    /// Regular steps must be exactly the next one in the sequence; the
    /// win-back step is only accepted for failed or cancelled campaigns.
    pub fn record_message(
        &self,
        message: NewSentMessage,
        sequence: &DunningSequence,
        now: DateTime<Utc>,
    ) -> DomainResult<CampaignChange> {
        let step_number = message.step_number;
        let mut patch = CampaignPatch {
            last_step_sent: Some(step_number),
            lease_until: Some(None),
            ..CampaignPatch::default()
        };

        match message.purpose {
            MessagePurpose::Dunning => {
                self.ensure_active()?;
                let expected = self.last_step_sent + 1;
                if sequence.next_step(self.last_step_sent).is_none() {
                    return Err(DomainError::conflict("dunning sequence already completed"));
                }
                if step_number != expected {
                    return Err(DomainError::validation(format!(
                        "step {step_number} is out of order, next step is {expected}"
                    )));
                }

                let next_message_at = sequence.next_due_at(step_number, self.created_at);
                patch.next_message_at = Some(next_message_at);
                if next_message_at.is_none() && self.next_retry_at.is_none() {
                    patch.status = Some(CampaignStatus::Failed);
                }
            }
            MessagePurpose::WinBack => {
                if !self.can_win_back() {
                    return Err(if self.is_terminal() {
                        DomainError::already_terminal(self.status.as_str())
                    } else {
                        DomainError::validation("win-back needs a failed or cancelled campaign")
                    });
                }
                if !sequence.is_win_back(step_number) {
                    return Err(DomainError::validation(format!(
                        "step {step_number} is not the win-back step"
                    )));
                }
                if self.last_step_sent >= step_number {
                    return Err(DomainError::conflict("win-back message already sent"));
                }
            }
        }

        let attempt = NewAttempt::message(
            step_number,
            message.delivered(),
            message.error.clone(),
            self.next_message_at,
            now,
        );
        Ok(CampaignChange::new(now, patch)
            .with_attempt(attempt)
            .with_message(message))
    }

    /// Checks the snapshot-level invariants.
    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.retry_count > self.max_retries {
            return Err(DomainError::invariant("retry_count exceeds max_retries"));
        }
        if self.recovered_at.is_some() != (self.status == CampaignStatus::Recovered) {
            return Err(DomainError::invariant(
                "recovered_at must be set iff status is recovered",
            ));
        }
        if self.next_retry_at.is_some()
            && (self.is_terminal() || self.retry_count >= self.max_retries)
        {
            return Err(DomainError::invariant(
                "next_retry_at set without an active retry budget",
            ));
        }
        if self.is_terminal() && self.next_message_at.is_some() {
            return Err(DomainError::invariant("terminal campaign has a pending message"));
        }
        Ok(())
    }
}

/// Partial update. `None` leaves the field untouched; `Some(None)` clears a
/// nullable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CampaignPatch {
    pub status: Option<CampaignStatus>,
    pub retry_count: Option<u32>,
    pub next_retry_at: Option<Option<DateTime<Utc>>>,
    pub next_message_at: Option<Option<DateTime<Utc>>>,
    pub last_step_sent: Option<u32>,
    pub failure_code: Option<Option<FailureClassification>>,
    pub failure_message: Option<Option<String>>,
    pub lease_until: Option<Option<DateTime<Utc>>>,
    pub recovered_at: Option<Option<DateTime<Utc>>>,
}

impl CampaignPatch {
    fn recovered(now: DateTime<Utc>) -> Self {
        Self {
            status: Some(CampaignStatus::Recovered),
            recovered_at: Some(Some(now)),
            next_retry_at: Some(None),
            next_message_at: Some(None),
            lease_until: Some(None),
            ..Self::default()
        }
    }

    fn apply_to(&self, campaign: &mut Campaign) {
        if let Some(status) = self.status {
            campaign.status = status;
        }
        if let Some(retry_count) = self.retry_count {
            campaign.retry_count = retry_count;
        }
        if let Some(next_retry_at) = self.next_retry_at {
            campaign.next_retry_at = next_retry_at;
        }
        if let Some(next_message_at) = self.next_message_at {
            campaign.next_message_at = next_message_at;
        }
        if let Some(step) = self.last_step_sent {
            campaign.last_step_sent = step;
        }
        if let Some(code) = self.failure_code {
            campaign.failure_code = code;
        }
        if let Some(message) = &self.failure_message {
            campaign.failure_message = message.clone();
        }
        if let Some(lease_until) = self.lease_until {
            campaign.lease_until = lease_until;
        }
        if let Some(recovered_at) = self.recovered_at {
            campaign.recovered_at = recovered_at;
        }
    }
}

/// One atomic store write: a patch plus the audit rows it produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignChange {
    pub at: DateTime<Utc>,
    pub patch: CampaignPatch,
    pub attempt: Option<NewAttempt>,
    pub message: Option<NewSentMessage>,
}

impl CampaignChange {
    pub fn new(at: DateTime<Utc>, patch: CampaignPatch) -> Self {
        Self {
            at,
            patch,
            attempt: None,
            message: None,
        }
    }

    pub fn with_attempt(mut self, attempt: NewAttempt) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_message(mut self, message: NewSentMessage) -> Self {
        self.message = Some(message);
        self
    }

    /// Rejects audit rows for a campaign that is already terminal.
    ///
    /// Stores call this against the snapshot they hold, so the check and the
    /// write happen under the same version.
    pub fn ensure_appendable(&self, current: &Campaign) -> DomainResult<()> {
        if !current.is_terminal() || (self.attempt.is_none() && self.message.is_none()) {
            return Ok(());
        }
        let win_back = self
            .message
            .as_ref()
            .is_some_and(|m| m.purpose == MessagePurpose::WinBack);
        if win_back && current.can_win_back() {
            return Ok(());
        }
        Err(DomainError::already_terminal(current.status.as_str()))
    }

    /// Produces the next snapshot: patch applied, `updated_at` stamped and
    /// version bumped.
    pub fn apply(&self, current: &Campaign) -> Campaign {
        let mut next = current.clone();
        self.patch.apply_to(&mut next);
        next.updated_at = self.at;
        next.version = current.version + 1;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::DeliveryStatus;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 15, 0).unwrap()
    }

    fn new_campaign(invoice: &str) -> NewCampaign {
        NewCampaign {
            invoice_ref: invoice.to_string(),
            customer_ref: "cus_1".to_string(),
            subscription_ref: Some("sub_1".to_string()),
            customer_email: Some("ada@example.com".to_string()),
            customer_name: Some("Ada".to_string()),
            amount: Money::new(7900, "usd").unwrap(),
            max_retries: DEFAULT_MAX_RETRIES,
            failure_code: Some(FailureClassification::InsufficientFunds),
            failure_message: None,
        }
    }

    fn open(invoice: &str) -> Campaign {
        Campaign::open(
            CampaignId::new(),
            new_campaign(invoice),
            t0(),
            &RetryPolicy::default(),
            &DunningSequence::default(),
        )
        .unwrap()
    }

    fn message(step: u32, purpose: MessagePurpose, status: DeliveryStatus) -> NewSentMessage {
        NewSentMessage {
            step_number: step,
            purpose,
            recipient: "ada@example.com".to_string(),
            subject: format!("step {step}"),
            delivery_status: status,
            provider_message_id: None,
            error: None,
            is_generated_by_ai: false,
            sent_at: t0(),
        }
    }

    #[test]
    fn open_schedules_first_retry_and_first_message() {
        let c = open("inv_1");
        assert_eq!(c.status, CampaignStatus::Active);
        assert_eq!(c.retry_count, 0);
        assert_eq!(c.version, 1);
        assert_eq!(c.next_retry_at, Some(Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()));
        assert_eq!(c.next_message_at, Some(t0() + Duration::hours(4)));
        c.check_invariants().unwrap();
    }

    #[test]
    fn open_without_recipient_schedules_no_message() {
        let mut new = new_campaign("inv_no_email");
        new.customer_email = None;
        let c = Campaign::open(
            CampaignId::new(),
            new,
            t0(),
            &RetryPolicy::default(),
            &DunningSequence::default(),
        )
        .unwrap();
        assert!(c.next_retry_at.is_some());
        assert_eq!(c.next_message_at, None);
    }

    #[test]
    fn open_with_durable_failure_and_no_recipient_fails_immediately() {
        let mut new = new_campaign("inv_dead_end");
        new.customer_email = None;
        new.failure_code = Some(FailureClassification::ExpiredCard);
        let c = Campaign::open(
            CampaignId::new(),
            new,
            t0(),
            &RetryPolicy::default(),
            &DunningSequence::default(),
        )
        .unwrap();
        assert_eq!(c.status, CampaignStatus::Failed);
        assert_eq!(c.next_retry_at, None);
        assert_eq!(c.next_message_at, None);
        assert!(!c.is_due(t0() + Duration::days(365)));
        c.check_invariants().unwrap();
    }

    #[test]
    fn open_with_durable_failure_has_no_retry() {
        let mut new = new_campaign("inv_2");
        new.failure_code = Some(FailureClassification::ExpiredCard);
        let c = Campaign::open(
            CampaignId::new(),
            new,
            t0(),
            &RetryPolicy::default(),
            &DunningSequence::default(),
        )
        .unwrap();
        assert!(c.next_retry_at.is_none());
        assert!(c.next_message_at.is_some());
    }

    #[test]
    fn open_rejects_blank_invoice() {
        let mut new = new_campaign(" ");
        new.invoice_ref = " ".to_string();
        let err = Campaign::open(
            CampaignId::new(),
            new,
            t0(),
            &RetryPolicy::default(),
            &DunningSequence::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn transient_failure_reschedules_and_counts() {
        let c = open("inv_1");
        let change = c
            .record_retry_failure(
                FailureClassification::CardDeclined,
                Some("card_declined".into()),
                t0(),
                &RetryPolicy::default(),
            )
            .unwrap();
        let next = change.apply(&c);
        assert_eq!(next.retry_count, 1);
        assert_eq!(next.status, CampaignStatus::Active);
        assert_eq!(next.next_retry_at, Some(Utc.with_ymd_and_hms(2026, 3, 2, 14, 0, 0).unwrap()));
        assert_eq!(next.version, 2);
        assert!(change.attempt.is_some());
        next.check_invariants().unwrap();
    }

    #[test]
    fn exhausting_retries_fails_the_campaign() {
        let mut c = open("inv_1");
        for _ in 0..DEFAULT_MAX_RETRIES {
            let change = c
                .record_retry_failure(
                    FailureClassification::InsufficientFunds,
                    None,
                    t0(),
                    &RetryPolicy::default(),
                )
                .unwrap();
            c = change.apply(&c);
        }
        assert_eq!(c.status, CampaignStatus::Failed);
        assert_eq!(c.retry_count, DEFAULT_MAX_RETRIES);
        assert!(c.next_retry_at.is_none());
        c.check_invariants().unwrap();

        let err = c
            .record_retry_failure(FailureClassification::Unknown, None, t0(), &RetryPolicy::default())
            .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyTerminal(_)));
    }

    #[test]
    fn recovered_campaign_rejects_further_messages() {
        let c = open("inv_1");
        let recovered = c.mark_recovered(t0()).unwrap().apply(&c);
        assert_eq!(recovered.status, CampaignStatus::Recovered);
        assert_eq!(recovered.recovered_at, Some(t0()));
        assert!(recovered.next_retry_at.is_none());

        let err = recovered
            .record_message(
                message(1, MessagePurpose::Dunning, DeliveryStatus::Sent),
                &DunningSequence::default(),
                t0(),
            )
            .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyTerminal(_)));
        assert!(recovered.mark_recovered(t0()).is_err());
    }

    #[test]
    fn message_steps_must_advance_in_order() {
        let c = open("inv_1");
        let seq = DunningSequence::default();
        let err = c
            .record_message(message(2, MessagePurpose::Dunning, DeliveryStatus::Sent), &seq, t0())
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let change = c
            .record_message(message(1, MessagePurpose::Dunning, DeliveryStatus::Failed), &seq, t0())
            .unwrap();
        let next = change.apply(&c);
        assert_eq!(next.last_step_sent, 1);
        assert_eq!(next.next_message_at, Some(t0() + Duration::hours(24)));
        assert_eq!(
            change.attempt.as_ref().map(|a| a.status),
            Some(crate::attempt::AttemptStatus::Failed)
        );
    }

    #[test]
    fn durable_failure_with_finished_sequence_fails() {
        let mut c = open("inv_1");
        let seq = DunningSequence::default();
        for step in 1..=4 {
            let change = c
                .record_message(message(step, MessagePurpose::Dunning, DeliveryStatus::Sent), &seq, t0())
                .unwrap();
            c = change.apply(&c);
        }
        assert_eq!(c.status, CampaignStatus::Active);
        assert!(c.next_message_at.is_none());

        let change = c
            .record_retry_failure(FailureClassification::ExpiredCard, None, t0(), &RetryPolicy::default())
            .unwrap();
        let c = change.apply(&c);
        assert_eq!(c.status, CampaignStatus::Failed);
        c.check_invariants().unwrap();
    }

    #[test]
    fn win_back_only_after_cancellation_or_failure() {
        let c = open("inv_1");
        let seq = DunningSequence::default();
        let wb = message(5, MessagePurpose::WinBack, DeliveryStatus::Sent);
        assert!(matches!(
            c.record_message(wb.clone(), &seq, t0()).unwrap_err(),
            DomainError::Validation(_)
        ));

        let cancelled = c.cancel(t0()).unwrap().apply(&c);
        let change = cancelled.record_message(wb.clone(), &seq, t0()).unwrap();
        change.ensure_appendable(&cancelled).unwrap();
        let after = change.apply(&cancelled);
        assert_eq!(after.status, CampaignStatus::Cancelled);
        assert!(after.record_message(wb, &seq, t0()).is_err());
    }

    #[test]
    fn terminal_campaign_rejects_audit_rows() {
        let c = open("inv_1");
        let change = c
            .record_retry_failure(FailureClassification::CardDeclined, None, t0(), &RetryPolicy::default())
            .unwrap();
        let recovered = c.mark_recovered(t0()).unwrap().apply(&c);
        assert!(matches!(
            change.ensure_appendable(&recovered).unwrap_err(),
            DomainError::AlreadyTerminal(_)
        ));
        assert!(recovered.release_lease(t0()).ensure_appendable(&recovered).is_ok());
    }

    #[test]
    fn lease_excludes_second_worker_until_expiry() {
        let c = open("inv_1");
        let leased = c.acquire_lease(t0(), Duration::minutes(5)).unwrap().apply(&c);
        assert!(leased.is_leased(t0()));
        assert!(matches!(
            leased.acquire_lease(t0(), Duration::minutes(5)).unwrap_err(),
            DomainError::Conflict(_)
        ));
        assert!(
            leased
                .acquire_lease(t0() + Duration::minutes(6), Duration::minutes(5))
                .is_ok()
        );
        assert!(!leased.is_due(t0() + Duration::minutes(4)));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for any sequence of transient retry outcomes, the budget is
        /// never exceeded and a retry is scheduled iff the campaign is active
        /// with budget left.
        #[test]
        fn retry_budget_is_never_exceeded(
            outcomes in prop::collection::vec(any::<bool>(), 0..12),
            max_retries in 1u32..8,
            step_minutes in 1i64..10_000,
        ) {
            let mut new = new_campaign("inv_prop");
            new.max_retries = max_retries;
            let policy = RetryPolicy::default();
            let mut c = Campaign::open(
                CampaignId::new(), new, t0(), &policy, &DunningSequence::default(),
            ).unwrap();
            let mut now = t0();

            for succeed in outcomes {
                now += Duration::minutes(step_minutes);
                let change = if succeed {
                    c.record_retry_success(now)
                } else {
                    c.record_retry_failure(FailureClassification::CardDeclined, None, now, &policy)
                };
                match change {
                    Ok(change) => {
                        change.ensure_appendable(&c).unwrap();
                        c = change.apply(&c);
                    }
                    Err(DomainError::AlreadyTerminal(_)) => prop_assert!(c.is_terminal()),
                    Err(other) => prop_assert!(false, "unexpected error: {other:?}"),
                }

                prop_assert!(c.retry_count <= c.max_retries);
                prop_assert!(c.check_invariants().is_ok());
                prop_assert_eq!(
                    c.next_retry_at.is_some(),
                    c.status == CampaignStatus::Active && c.retry_count < c.max_retries
                );
            }
        }
    }
}
