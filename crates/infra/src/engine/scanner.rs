use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::command::CampaignCommand;
use super::queue::CommandQueue;
use crate::store::{CampaignStore, SharedStore, StoreError};

/// Config for the periodic due-campaign scan.
#[derive(Debug, Clone)]
pub struct DueCampaignScanner {
    pub interval: Duration,
    pub batch_size: usize,
    pub max_retries: u32,
    pub base_backoff: Duration,
    /// Seen-set entries older than this are purged on every pass.
    pub dedup_ttl: chrono::Duration,
}

impl Default for DueCampaignScanner {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            batch_size: 100,
            max_retries: 5,
            base_backoff: Duration::from_millis(250),
            dedup_ttl: chrono::Duration::hours(72),
        }
    }
}

/// Handle for the running scanner (shutdown + trigger hook).
#[derive(Debug)]
pub struct ScannerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    trigger: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl ScannerHandle {
    /// Requests a pass now. Triggers are coalesced: if one is already
    /// pending this is a no-op.
    pub fn trigger(&self) {
        let _ = self.trigger.try_send(());
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.join.await {
            warn!(error = %err, "scanner task panicked");
        }
    }
}

impl DueCampaignScanner {
    /// Spawns the scanner.
    ///
    /// - Schedule: a pass every `interval`, the first one immediately
    /// - Trigger: `handle.trigger()` asks for an extra pass
    /// - Failures: logged and retried with bounded exponential backoff; never propagate
    pub fn spawn(&self, name: &'static str, store: SharedStore, queue: CommandQueue) -> ScannerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let join = tokio::spawn(scanner_loop(
            name,
            self.clone(),
            store,
            queue,
            shutdown_rx,
            trigger_rx,
        ));

        ScannerHandle {
            shutdown: Some(shutdown_tx),
            trigger: trigger_tx,
            join,
        }
    }
}

async fn scanner_loop(
    name: &'static str,
    cfg: DueCampaignScanner,
    store: SharedStore,
    queue: CommandQueue,
    mut shutdown: oneshot::Receiver<()>,
    mut trigger: mpsc::Receiver<()>,
) {
    info!(runner = name, interval = ?cfg.interval, "due campaign scanner started");

    let mut ticker = tokio::time::interval(cfg.interval);
    // Keep a stable cadence even if a pass overruns.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut failures: u32 = 0;

    'run: loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {}
            Some(()) = trigger.recv() => {}
        }

        loop {
            match scan_once(&*store, &queue, cfg.batch_size, cfg.dedup_ttl, Utc::now()).await {
                Ok(enqueued) => {
                    failures = 0;
                    if enqueued > 0 {
                        info!(runner = name, enqueued, "enqueued due campaigns");
                    }
                    break;
                }
                Err(err) => {
                    failures += 1;
                    warn!(runner = name, error = %err, failures, "due campaign scan failed");
                    if failures > cfg.max_retries {
                        failures = 0;
                        break;
                    }
                    tokio::select! {
                        _ = &mut shutdown => break 'run,
                        _ = tokio::time::sleep(backoff(cfg.base_backoff, failures)) => {}
                    }
                }
            }
        }
    }

    info!(runner = name, "due campaign scanner stopped");
}

/// One pass: enqueue an `Evaluate` for every due campaign and purge expired
/// event ids. Returns how many commands were enqueued.
pub async fn scan_once(
    store: &dyn CampaignStore,
    queue: &CommandQueue,
    batch_size: usize,
    dedup_ttl: chrono::Duration,
    now: DateTime<Utc>,
) -> Result<usize, StoreError> {
    let due = store.list_active_due(now, batch_size).await?;
    let enqueued = due
        .iter()
        .filter(|campaign| {
            queue.submit(CampaignCommand::Evaluate {
                campaign_id: campaign.id,
            })
        })
        .count();

    let purged = store.purge_events(now - dedup_ttl).await?;
    if purged > 0 {
        debug!(purged, "purged expired event ids");
    }
    Ok(enqueued)
}

fn backoff(base: Duration, attempt: u32) -> Duration {
    // base * 2^(attempt-1), capped.
    let pow = attempt.saturating_sub(1).min(10);
    let factor = 1u32 << pow;
    let d = base.saturating_mul(factor);
    d.min(Duration::from_secs(10))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use payrecover_campaigns::{Attempt, Campaign, CampaignChange, SentMessage};
    use payrecover_core::{CampaignId, ExpectedVersion};

    use super::*;
    use crate::store::{CampaignFilter, CreateOutcome, RecoveryStats};

    /// Every call fails as if the database were down.
    struct UnreachableStore;

    fn down<T>() -> Result<T, StoreError> {
        Err(StoreError::Backend("connection refused".into()))
    }

    #[async_trait]
    impl CampaignStore for UnreachableStore {
        async fn create_if_absent(&self, _: Campaign) -> Result<CreateOutcome, StoreError> {
            down()
        }
        async fn get(&self, _: CampaignId) -> Result<Campaign, StoreError> {
            down()
        }
        async fn find_by_invoice(&self, _: &str) -> Result<Option<Campaign>, StoreError> {
            down()
        }
        async fn find_by_subscription(&self, _: &str) -> Result<Vec<Campaign>, StoreError> {
            down()
        }
        async fn update(
            &self,
            _: CampaignId,
            _: ExpectedVersion,
            _: CampaignChange,
        ) -> Result<Campaign, StoreError> {
            down()
        }
        async fn list_active_due(
            &self,
            _: DateTime<Utc>,
            _: usize,
        ) -> Result<Vec<Campaign>, StoreError> {
            down()
        }
        async fn list(&self, _: &CampaignFilter) -> Result<Vec<Campaign>, StoreError> {
            down()
        }
        async fn attempts(&self, _: CampaignId) -> Result<Vec<Attempt>, StoreError> {
            down()
        }
        async fn sent_messages(&self, _: CampaignId) -> Result<Vec<SentMessage>, StoreError> {
            down()
        }
        async fn event_seen(
            &self,
            _: &str,
            _: DateTime<Utc>,
            _: chrono::Duration,
        ) -> Result<bool, StoreError> {
            down()
        }
        async fn record_event(&self, _: &str, _: DateTime<Utc>) -> Result<(), StoreError> {
            down()
        }
        async fn purge_events(&self, _: DateTime<Utc>) -> Result<u64, StoreError> {
            down()
        }
        async fn stats(&self) -> Result<RecoveryStats, StoreError> {
            down()
        }
    }

    #[tokio::test]
    async fn shutdown_interrupts_failure_backoff() {
        let (queue, _commands) = CommandQueue::detached(8);
        let scanner = DueCampaignScanner {
            interval: Duration::from_secs(3600),
            base_backoff: Duration::from_secs(30),
            ..DueCampaignScanner::default()
        };
        let handle = scanner.spawn("test-scanner", std::sync::Arc::new(UnreachableStore), queue);

        // Let the first pass fail and enter its backoff.
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .expect("shutdown waits out the backoff");
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff(base, 1), Duration::from_millis(250));
        assert_eq!(backoff(base, 3), Duration::from_secs(1));
        assert_eq!(backoff(base, 30), Duration::from_secs(10));
    }
}
