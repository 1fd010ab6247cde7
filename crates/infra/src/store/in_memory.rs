use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use payrecover_campaigns::{
    Attempt, Campaign, CampaignChange, CampaignStatus, DeliveryStatus, SentMessage,
};
use payrecover_core::{CampaignId, ExpectedVersion};

use super::r#trait::{
    CampaignFilter, CampaignStore, CreateOutcome, RecoveryStats, StoreError,
};

#[derive(Debug, Default)]
struct Tables {
    campaigns: HashMap<CampaignId, Campaign>,
    by_invoice: HashMap<String, CampaignId>,
    attempts: HashMap<CampaignId, Vec<Attempt>>,
    messages: HashMap<CampaignId, Vec<SentMessage>>,
    seen_events: HashMap<String, DateTime<Utc>>,
}

/// In-memory campaign store.
///
/// Intended for tests/dev. A single lock covers all tables so that
/// `update` is atomic.
#[derive(Debug, Default)]
pub struct InMemoryCampaignStore {
    tables: RwLock<Tables>,
}

impl InMemoryCampaignStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, StoreError> {
        self.tables
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, StoreError> {
        self.tables
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

#[async_trait]
impl CampaignStore for InMemoryCampaignStore {
    async fn create_if_absent(&self, campaign: Campaign) -> Result<CreateOutcome, StoreError> {
        let mut tables = self.write()?;
        if let Some(existing) = tables
            .by_invoice
            .get(&campaign.invoice_ref)
            .and_then(|id| tables.campaigns.get(id))
        {
            return Ok(CreateOutcome {
                campaign: existing.clone(),
                created: false,
            });
        }

        tables
            .by_invoice
            .insert(campaign.invoice_ref.clone(), campaign.id);
        tables.campaigns.insert(campaign.id, campaign.clone());
        Ok(CreateOutcome {
            campaign,
            created: true,
        })
    }

    async fn get(&self, id: CampaignId) -> Result<Campaign, StoreError> {
        self.read()?
            .campaigns
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn find_by_invoice(&self, invoice_ref: &str) -> Result<Option<Campaign>, StoreError> {
        let tables = self.read()?;
        Ok(tables
            .by_invoice
            .get(invoice_ref)
            .and_then(|id| tables.campaigns.get(id))
            .cloned())
    }

    async fn find_by_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Vec<Campaign>, StoreError> {
        let tables = self.read()?;
        let mut found: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| c.subscription_ref.as_deref() == Some(subscription_ref))
            .cloned()
            .collect();
        found.sort_by_key(|c| c.created_at);
        Ok(found)
    }

    async fn update(
        &self,
        id: CampaignId,
        expected: ExpectedVersion,
        change: CampaignChange,
    ) -> Result<Campaign, StoreError> {
        let mut tables = self.write()?;
        let current = tables
            .campaigns
            .get(&id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !expected.matches(current.version) {
            return Err(StoreError::conflict(id, expected, current.version));
        }
        change
            .ensure_appendable(current)
            .map_err(StoreError::from_domain)?;

        if let Some(message) = &change.message {
            let duplicate = tables
                .messages
                .get(&id)
                .is_some_and(|rows| rows.iter().any(|m| m.step_number == message.step_number));
            if duplicate {
                return Err(StoreError::DuplicateStep {
                    id,
                    step_number: message.step_number,
                });
            }
        }

        let next = change.apply(current);

        if let Some(attempt) = change.attempt {
            let rows = tables.attempts.entry(id).or_default();
            let number = rows.len() as u32 + 1;
            rows.push(attempt.into_attempt(id, number));
        }
        if let Some(message) = change.message {
            tables
                .messages
                .entry(id)
                .or_default()
                .push(message.into_sent_message(id));
        }
        tables.campaigns.insert(id, next.clone());
        Ok(next)
    }

    async fn list_active_due(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Campaign>, StoreError> {
        let tables = self.read()?;
        let mut due: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| c.is_due(before))
            .cloned()
            .collect();
        due.sort_by_key(|c| (earliest_due(c), c.id));
        due.truncate(limit);
        Ok(due)
    }

    async fn list(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>, StoreError> {
        let tables = self.read()?;
        let mut rows: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| filter.status.is_none_or(|s| c.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(filter.offset)
            .take(filter.clamped_limit())
            .collect())
    }

    async fn attempts(&self, id: CampaignId) -> Result<Vec<Attempt>, StoreError> {
        Ok(self.read()?.attempts.get(&id).cloned().unwrap_or_default())
    }

    async fn sent_messages(&self, id: CampaignId) -> Result<Vec<SentMessage>, StoreError> {
        Ok(self.read()?.messages.get(&id).cloned().unwrap_or_default())
    }

    async fn event_seen(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        Ok(self
            .read()?
            .seen_events
            .get(event_id)
            .is_some_and(|seen_at| *seen_at > now - ttl))
    }

    async fn record_event(&self, event_id: &str, seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write()?
            .seen_events
            .insert(event_id.to_string(), seen_at);
        Ok(())
    }

    async fn purge_events(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.write()?;
        let len = tables.seen_events.len();
        tables.seen_events.retain(|_, seen_at| *seen_at >= before);
        Ok((len - tables.seen_events.len()) as u64)
    }

    async fn stats(&self) -> Result<RecoveryStats, StoreError> {
        let tables = self.read()?;
        let mut stats = RecoveryStats::default();

        for campaign in tables.campaigns.values() {
            stats.total += 1;
            match campaign.status {
                CampaignStatus::Active => stats.active += 1,
                CampaignStatus::Recovered => {
                    stats.recovered += 1;
                    let total = stats
                        .recovered_revenue
                        .entry(campaign.amount.currency().to_string())
                        .or_default();
                    *total = total.saturating_add(campaign.amount.amount_minor());
                }
                CampaignStatus::Failed => stats.failed += 1,
                CampaignStatus::Cancelled => stats.cancelled += 1,
            }
        }
        for message in tables.messages.values().flatten() {
            match message.delivery_status {
                DeliveryStatus::Sent => stats.messages_sent += 1,
                DeliveryStatus::Failed => stats.messages_failed += 1,
            }
        }
        stats.attempts = tables.attempts.values().map(|rows| rows.len() as u64).sum();

        Ok(stats.finish())
    }
}

fn earliest_due(campaign: &Campaign) -> Option<DateTime<Utc>> {
    match (campaign.next_retry_at, campaign.next_message_at) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}
