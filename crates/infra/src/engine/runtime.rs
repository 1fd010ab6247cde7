//! Wiring for a running engine: store, collaborators, workers and scanner.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use payrecover_content::{
    AiContentGenerator, ContentError, FallbackContentGenerator, TemplateContentGenerator,
};
use payrecover_events::{SignatureError, SignatureVerifier};

use super::gateway::EventGateway;
use super::queue::{CommandQueue, CommandWorkerHandle};
use super::scanner::{DueCampaignScanner, ScannerHandle};
use super::executor::RetryExecutor;
use super::sequencer::{DunningSequencer, MessageSettings};
use super::{CampaignEngine, SharedEngine};
use crate::config::{ConfigError, ContentMode, DeliveryMode, EngineConfig, ProcessorMode};
use crate::external::{
    ChargeOutcome, DeliveryError, HttpMessageDelivery, HttpPaymentProcessor, MessageDelivery,
    MockMessageDelivery, MockPaymentProcessor, PaymentProcessor, ProcessorError,
};
use crate::store::{
    InMemoryCampaignStore, PostgresCampaignStore, SharedStore, StoreError, TimeoutStore,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("signature verifier: {0}")]
    Signature(#[from] SignatureError),

    #[error("payment processor client: {0}")]
    Processor(#[from] ProcessorError),

    #[error("delivery client: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("content generator: {0}")]
    Content(#[from] ContentError),
}

/// The outbound collaborators the engine calls.
#[derive(Clone)]
pub struct Collaborators {
    pub processor: Arc<dyn PaymentProcessor>,
    pub delivery: Arc<dyn MessageDelivery>,
    pub content: Arc<FallbackContentGenerator>,
}

impl Collaborators {
    /// Builds the clients the configuration selects.
    pub fn from_config(config: &EngineConfig) -> Result<Self, StartupError> {
        let processor: Arc<dyn PaymentProcessor> = match &config.processor {
            ProcessorMode::Mock { decline_code: None } => Arc::new(MockPaymentProcessor::paying()),
            ProcessorMode::Mock {
                decline_code: Some(code),
            } => Arc::new(MockPaymentProcessor::declining(code.clone())),
            ProcessorMode::Stripe(settings) => {
                Arc::new(HttpPaymentProcessor::new(settings.clone())?)
            }
        };

        let delivery: Arc<dyn MessageDelivery> = match &config.delivery {
            DeliveryMode::Mock => Arc::new(MockMessageDelivery::new()),
            DeliveryMode::Resend(settings) => Arc::new(HttpMessageDelivery::new(settings.clone())?),
        };

        let templates = TemplateContentGenerator::new().with_business_name(config.business_name.clone());
        let content = match &config.content {
            ContentMode::Template => FallbackContentGenerator::template_only(templates),
            ContentMode::Ai(settings) => FallbackContentGenerator::new(
                Arc::new(AiContentGenerator::new(settings.clone())?),
                templates,
                config.content_timeout,
            ),
        };

        Ok(Self {
            processor,
            delivery,
            content: Arc::new(content),
        })
    }

    /// Mock processor with a fixed result, mock delivery, templates only.
    pub fn mock(charge: ChargeOutcome) -> Self {
        Self {
            processor: Arc::new(MockPaymentProcessor::new(Ok(charge))),
            delivery: Arc::new(MockMessageDelivery::new()),
            content: Arc::new(FallbackContentGenerator::template_only(
                TemplateContentGenerator::new(),
            )),
        }
    }
}

/// A started engine. Dropping it without [`RecoveryRuntime::shutdown`]
/// aborts nothing; background tasks keep running until the runtime exits.
pub struct RecoveryRuntime {
    pub store: SharedStore,
    pub engine: SharedEngine,
    pub gateway: Arc<EventGateway>,
    pub queue: CommandQueue,
    workers: CommandWorkerHandle,
    scanner: ScannerHandle,
}

impl RecoveryRuntime {
    /// Opens the configured store and starts workers and the scanner.
    pub async fn start(config: &EngineConfig) -> Result<Self, StartupError> {
        config.validate()?;
        let store: SharedStore = match &config.database_url {
            Some(url) => {
                let postgres = PostgresCampaignStore::connect(url).await?;
                info!(store = "postgres", "campaign store ready");
                Arc::new(TimeoutStore::new(postgres, config.store_timeout))
            }
            None => {
                info!(store = "in_memory", "campaign store ready");
                Arc::new(TimeoutStore::new(
                    InMemoryCampaignStore::new(),
                    config.store_timeout,
                ))
            }
        };
        let collaborators = Collaborators::from_config(config)?;
        Self::start_with(config, store, collaborators)
    }

    /// Starts against an explicit store and collaborators.
    pub fn start_with(
        config: &EngineConfig,
        store: SharedStore,
        collaborators: Collaborators,
    ) -> Result<Self, StartupError> {
        let policy = config.retry_policy();
        let verifier = SignatureVerifier::new(&config.webhook_secret, config.signature_tolerance)?;

        let executor = RetryExecutor::new(
            store.clone(),
            collaborators.processor.clone(),
            policy,
            config.processor_timeout,
            config.lease_ttl,
        );
        let sequencer = DunningSequencer::new(
            store.clone(),
            collaborators.delivery.clone(),
            collaborators.content.clone(),
            config.sequence.clone(),
            MessageSettings {
                business_name: config.business_name.clone(),
                from_address: config.from_address.clone(),
                payment_update_url: config.payment_update_url.clone(),
            },
            config.delivery_timeout,
            config.lease_ttl,
        );
        let engine: SharedEngine = Arc::new(CampaignEngine::new(store.clone(), executor, sequencer));
        let gateway = Arc::new(EventGateway::new(
            store.clone(),
            verifier,
            policy,
            config.sequence.clone(),
            config.dedup_ttl,
        ));

        let (queue, workers) = CommandQueue::spawn(
            engine.clone(),
            config.queue_capacity,
            config.worker_concurrency,
        );
        let scanner = DueCampaignScanner {
            interval: config.scan_interval,
            batch_size: config.scan_batch_size,
            dedup_ttl: config.dedup_ttl,
            ..DueCampaignScanner::default()
        }
        .spawn("due_campaigns", store.clone(), queue.clone());

        info!(
            processor = collaborators.processor.name(),
            delivery = collaborators.delivery.name(),
            max_retries = config.max_retries,
            "recovery engine started"
        );

        Ok(Self {
            store,
            engine,
            gateway,
            queue,
            workers,
            scanner,
        })
    }

    /// Asks the scanner for an immediate pass.
    pub fn trigger_scan(&self) {
        self.scanner.trigger();
    }

    /// Stops the scanner, then drains the workers.
    pub async fn shutdown(self) {
        self.scanner.shutdown().await;
        self.workers.shutdown().await;
        info!("recovery engine stopped");
    }
}
