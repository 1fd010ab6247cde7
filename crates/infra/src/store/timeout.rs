use std::future::Future;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use payrecover_campaigns::{Attempt, Campaign, CampaignChange, SentMessage};
use payrecover_core::{CampaignId, ExpectedVersion};

use super::r#trait::{
    CampaignFilter, CampaignStore, CreateOutcome, RecoveryStats, StoreError,
};

/// Bounds every call of the wrapped store.
///
/// An elapsed call surfaces as [`StoreError::Timeout`]; a conditional write
/// that timed out may or may not have been applied, so callers re-read.
#[derive(Debug, Clone)]
pub struct TimeoutStore<S> {
    inner: S,
    limit: StdDuration,
}

impl<S> TimeoutStore<S> {
    pub fn new(inner: S, limit: StdDuration) -> Self {
        Self { inner, limit }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.limit, call)
            .await
            .map_err(|_| StoreError::Timeout(format!("{operation} exceeded {:?}", self.limit)))?
    }
}

#[async_trait]
impl<S: CampaignStore> CampaignStore for TimeoutStore<S> {
    async fn create_if_absent(&self, campaign: Campaign) -> Result<CreateOutcome, StoreError> {
        self.bounded("create_if_absent", self.inner.create_if_absent(campaign))
            .await
    }

    async fn get(&self, id: CampaignId) -> Result<Campaign, StoreError> {
        self.bounded("get", self.inner.get(id)).await
    }

    async fn find_by_invoice(&self, invoice_ref: &str) -> Result<Option<Campaign>, StoreError> {
        self.bounded("find_by_invoice", self.inner.find_by_invoice(invoice_ref))
            .await
    }

    async fn find_by_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Vec<Campaign>, StoreError> {
        self.bounded(
            "find_by_subscription",
            self.inner.find_by_subscription(subscription_ref),
        )
        .await
    }

    async fn update(
        &self,
        id: CampaignId,
        expected: ExpectedVersion,
        change: CampaignChange,
    ) -> Result<Campaign, StoreError> {
        self.bounded("update", self.inner.update(id, expected, change))
            .await
    }

    async fn list_active_due(
        &self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Campaign>, StoreError> {
        self.bounded("list_active_due", self.inner.list_active_due(before, limit))
            .await
    }

    async fn list(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>, StoreError> {
        self.bounded("list", self.inner.list(filter)).await
    }

    async fn attempts(&self, id: CampaignId) -> Result<Vec<Attempt>, StoreError> {
        self.bounded("attempts", self.inner.attempts(id)).await
    }

    async fn sent_messages(&self, id: CampaignId) -> Result<Vec<SentMessage>, StoreError> {
        self.bounded("sent_messages", self.inner.sent_messages(id))
            .await
    }

    async fn event_seen(
        &self,
        event_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.bounded("event_seen", self.inner.event_seen(event_id, now, ttl))
            .await
    }

    async fn record_event(&self, event_id: &str, seen_at: DateTime<Utc>) -> Result<(), StoreError> {
        self.bounded("record_event", self.inner.record_event(event_id, seen_at))
            .await
    }

    async fn purge_events(&self, before: DateTime<Utc>) -> Result<u64, StoreError> {
        self.bounded("purge_events", self.inner.purge_events(before))
            .await
    }

    async fn stats(&self) -> Result<RecoveryStats, StoreError> {
        self.bounded("stats", self.inner.stats()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryCampaignStore;

    struct StalledStore;

    #[async_trait]
    impl CampaignStore for StalledStore {
        async fn create_if_absent(&self, _: Campaign) -> Result<CreateOutcome, StoreError> {
            std::future::pending().await
        }
        async fn get(&self, _: CampaignId) -> Result<Campaign, StoreError> {
            std::future::pending().await
        }
        async fn find_by_invoice(&self, _: &str) -> Result<Option<Campaign>, StoreError> {
            std::future::pending().await
        }
        async fn find_by_subscription(&self, _: &str) -> Result<Vec<Campaign>, StoreError> {
            std::future::pending().await
        }
        async fn update(
            &self,
            _: CampaignId,
            _: ExpectedVersion,
            _: CampaignChange,
        ) -> Result<Campaign, StoreError> {
            std::future::pending().await
        }
        async fn list_active_due(
            &self,
            _: DateTime<Utc>,
            _: usize,
        ) -> Result<Vec<Campaign>, StoreError> {
            std::future::pending().await
        }
        async fn list(&self, _: &CampaignFilter) -> Result<Vec<Campaign>, StoreError> {
            std::future::pending().await
        }
        async fn attempts(&self, _: CampaignId) -> Result<Vec<Attempt>, StoreError> {
            std::future::pending().await
        }
        async fn sent_messages(&self, _: CampaignId) -> Result<Vec<SentMessage>, StoreError> {
            std::future::pending().await
        }
        async fn event_seen(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: Duration,
        ) -> Result<bool, StoreError> {
            std::future::pending().await
        }
        async fn record_event(&self, _: &str, _: DateTime<Utc>) -> Result<(), StoreError> {
            std::future::pending().await
        }
        async fn purge_events(&self, _: DateTime<Utc>) -> Result<u64, StoreError> {
            std::future::pending().await
        }
        async fn stats(&self) -> Result<RecoveryStats, StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_calls_surface_as_timeouts() {
        let store = TimeoutStore::new(StalledStore, StdDuration::from_secs(2));
        let err = store.get(CampaignId::new()).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout(msg) if msg.starts_with("get")));
    }

    #[tokio::test]
    async fn fast_calls_pass_through() {
        let store = TimeoutStore::new(InMemoryCampaignStore::new(), StdDuration::from_secs(2));
        assert_eq!(store.stats().await.unwrap().total, 0);
    }
}
