use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::command::{CampaignCommand, CommandOutcome};
use super::SharedEngine;

/// Bounded command queue drained by a worker pool.
///
/// Cloneable; every clone feeds the same workers.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    sender: mpsc::Sender<CampaignCommand>,
}

/// Handle for the running worker loop.
#[derive(Debug)]
pub struct CommandWorkerHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl CommandWorkerHandle {
    /// Stops taking commands and waits for in-flight ones to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(err) = self.join.await {
            warn!(error = %err, "command worker task panicked");
        }
    }
}

impl CommandQueue {
    /// Spawns the worker loop; at most `concurrency` commands run at once.
    pub fn spawn(
        engine: SharedEngine,
        capacity: usize,
        concurrency: usize,
    ) -> (Self, CommandWorkerHandle) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let join = tokio::spawn(worker_loop(engine, receiver, shutdown_rx, concurrency.max(1)));

        (
            Self { sender },
            CommandWorkerHandle {
                shutdown: Some(shutdown_tx),
                join,
            },
        )
    }

    /// A queue with no workers; commands land in the returned receiver.
    #[cfg(test)]
    pub(crate) fn detached(capacity: usize) -> (Self, mpsc::Receiver<CampaignCommand>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueues without waiting. A full queue drops the command; the
    /// scanner picks the campaign up again on its next pass.
    pub fn submit(&self, command: CampaignCommand) -> bool {
        match self.sender.try_send(command) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(command)) => {
                warn!(
                    campaign_id = %command.campaign_id(),
                    command = command.name(),
                    "command queue full; dropping command"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(command)) => {
                warn!(
                    campaign_id = %command.campaign_id(),
                    command = command.name(),
                    "command queue closed; dropping command"
                );
                false
            }
        }
    }
}

async fn worker_loop(
    engine: SharedEngine,
    mut receiver: mpsc::Receiver<CampaignCommand>,
    mut shutdown: oneshot::Receiver<()>,
    concurrency: usize,
) {
    info!(concurrency, "command workers started");
    let permits = Arc::new(Semaphore::new(concurrency));

    loop {
        let command = tokio::select! {
            _ = &mut shutdown => break,
            next = receiver.recv() => match next {
                Some(command) => command,
                None => break,
            },
        };

        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let engine = engine.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_command(&engine, command).await;
        });
    }

    // Wait for in-flight commands.
    let _ = permits.acquire_many(concurrency as u32).await;
    info!("command workers stopped");
}

async fn run_command(engine: &SharedEngine, command: CampaignCommand) {
    match engine.dispatch(command, Utc::now()).await {
        Ok(CommandOutcome::Skipped { .. }) => {}
        Ok(outcome) => debug!(
            campaign_id = %command.campaign_id(),
            command = command.name(),
            outcome = ?outcome,
            "command finished"
        ),
        Err(err) => error!(
            campaign_id = %command.campaign_id(),
            command = command.name(),
            error = %err,
            "command failed"
        ),
    }
}
