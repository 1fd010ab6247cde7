use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use payrecover_campaigns::{Attempt, Campaign, CampaignChange, CampaignStatus, SentMessage};
use payrecover_core::{CampaignId, DomainError, ExpectedVersion};

/// Default page size for campaign listings.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Largest page a caller may ask for.
pub const MAX_PAGE_SIZE: usize = 200;

/// Store operation error.
///
/// Infrastructure errors (storage, concurrency) as opposed to the domain
/// errors raised by campaign transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("campaign not found: {0}")]
    NotFound(String),

    #[error("version conflict on campaign {id}: expected {expected}, found {actual}")]
    VersionConflict {
        id: CampaignId,
        expected: String,
        actual: u64,
    },

    #[error("step {step_number} already sent for campaign {id}")]
    DuplicateStep { id: CampaignId, step_number: u32 },

    #[error("campaign is already {0}")]
    Terminal(String),

    #[error("rejected update: {0}")]
    Rejected(String),

    #[error("store operation timed out: {0}")]
    Timeout(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn from_domain(err: DomainError) -> Self {
        match err {
            DomainError::AlreadyTerminal(status) => StoreError::Terminal(status),
            other => StoreError::Rejected(other.to_string()),
        }
    }

    pub(crate) fn conflict(id: CampaignId, expected: ExpectedVersion, actual: u64) -> Self {
        StoreError::VersionConflict {
            id,
            expected: expected.to_string(),
            actual,
        }
    }
}

/// Result of `create_if_absent`: the stored campaign and whether this call created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateOutcome {
    pub campaign: Campaign,
    pub created: bool,
}

/// Listing filter; newest campaigns first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CampaignFilter {
    pub status: Option<CampaignStatus>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for CampaignFilter {
    fn default() -> Self {
        Self {
            status: None,
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

impl CampaignFilter {
    pub fn clamped_limit(&self) -> usize {
        self.limit.clamp(1, MAX_PAGE_SIZE)
    }
}

/// A campaign together with its audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignDetail {
    pub campaign: Campaign,
    pub attempts: Vec<Attempt>,
    pub messages: Vec<SentMessage>,
}

/// Aggregate recovery figures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecoveryStats {
    pub total: u64,
    pub active: u64,
    pub recovered: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// Recovered amount in minor units, per currency.
    pub recovered_revenue: BTreeMap<String, i64>,
    pub messages_sent: u64,
    pub messages_failed: u64,
    pub attempts: u64,
    /// Recovered share of campaigns that reached a terminal status.
    pub recovery_rate: f64,
}

impl RecoveryStats {
    pub(crate) fn finish(mut self) -> Self {
        let closed = self.recovered + self.failed + self.cancelled;
        self.recovery_rate = if closed == 0 {
            0.0
        } else {
            self.recovered as f64 / closed as f64
        };
        self
    }
}

/// Durable record of campaigns, attempts and sent messages.
///
/// Implementations must:
/// - keep exactly one campaign per invoice reference
/// - apply `update` only when `expected` matches the stored version
/// - refuse attempt/message rows for terminal campaigns (see
///   [`CampaignChange::ensure_appendable`])
/// - keep `(campaign_id, step_number)` unique across sent messages
/// - number attempts `1, 2, 3, ...` per campaign
#[async_trait]
pub trait CampaignStore: Send + Sync {
    /// Inserts `campaign` unless one already exists for its invoice reference.
    async fn create_if_absent(&self, campaign: Campaign) -> Result<CreateOutcome, StoreError>;

    async fn get(&self, id: CampaignId) -> Result<Campaign, StoreError>;

    async fn find_by_invoice(&self, invoice_ref: &str) -> Result<Option<Campaign>, StoreError>;

    async fn find_by_subscription(&self, subscription_ref: &str)
    -> Result<Vec<Campaign>, StoreError>;

    /// Conditional write: patch plus audit rows, atomically.
    async fn update(
        &self,
        id: CampaignId,
        expected: ExpectedVersion,
        change: CampaignChange,
    ) -> Result<Campaign, StoreError>;

    /// Active, unleased campaigns with a retry or message due at or before `before`.
    async fn list_active_due(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Campaign>, StoreError>;

    async fn list(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>, StoreError>;

    async fn attempts(&self, id: CampaignId) -> Result<Vec<Attempt>, StoreError>;

    async fn sent_messages(&self, id: CampaignId) -> Result<Vec<SentMessage>, StoreError>;

    /// Whether `event_id` was recorded within `ttl` before `now`.
    async fn event_seen(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn record_event(&self, event_id: &str, seen_at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Drops seen-set entries older than `before`; returns how many.
    async fn purge_events(&self, before: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn stats(&self) -> Result<RecoveryStats, StoreError>;

    async fn detail(&self, id: CampaignId) -> Result<CampaignDetail, StoreError> {
        Ok(CampaignDetail {
            campaign: self.get(id).await?,
            attempts: self.attempts(id).await?,
            messages: self.sent_messages(id).await?,
        })
    }
}

/// Store handle shared by the engine components.
pub type SharedStore = Arc<dyn CampaignStore>;

#[async_trait]
impl<S> CampaignStore for Arc<S>
where
    S: CampaignStore + ?Sized,
{
    async fn create_if_absent(&self, campaign: Campaign) -> Result<CreateOutcome, StoreError> {
        (**self).create_if_absent(campaign).await
    }

    async fn get(&self, id: CampaignId) -> Result<Campaign, StoreError> {
        (**self).get(id).await
    }

    async fn find_by_invoice(&self, invoice_ref: &str) -> Result<Option<Campaign>, StoreError> {
        (**self).find_by_invoice(invoice_ref).await
    }

    async fn find_by_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Vec<Campaign>, StoreError> {
        (**self).find_by_subscription(subscription_ref).await
    }

    async fn update(
        &self,
        id: CampaignId,
        expected: ExpectedVersion,
        change: CampaignChange,
    ) -> Result<Campaign, StoreError> {
        (**self).update(id, expected, change).await
    }

    async fn list_active_due(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Campaign>, StoreError> {
        (**self).list_active_due(before, limit).await
    }

    async fn list(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>, StoreError> {
        (**self).list(filter).await
    }

    async fn attempts(&self, id: CampaignId) -> Result<Vec<Attempt>, StoreError> {
        (**self).attempts(id).await
    }

    async fn sent_messages(&self, id: CampaignId) -> Result<Vec<SentMessage>, StoreError> {
        (**self).sent_messages(id).await
    }

    async fn event_seen(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        (**self).event_seen(event_id, now, ttl).await
    }

    async fn record_event(&self, event_id: &str, seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        (**self).record_event(event_id, seen_at).await
    }

    async fn purge_events(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_events(before).await
    }

    async fn stats(&self) -> Result<RecoveryStats, StoreError> {
        (**self).stats().await
    }
}
