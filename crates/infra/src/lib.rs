//! `payrecover-infra`
//!
//! Runs recovery campaigns against real (or mock) collaborators:
//!
//! - `store`: campaign persistence (in-memory, PostgreSQL, timeout decorator)
//! - `external`: payment processor and email delivery clients
//! - `engine`: event gateway, retry executor, dunning sequencer, workers
//! - `config`: environment-driven settings
//!
//! Domain rules live in `payrecover-campaigns`; this crate only coordinates
//! them with I/O.

pub mod config;
pub mod engine;
pub mod error;
pub mod external;
pub mod store;

mod integration_tests;

pub use config::{ConfigError, ContentMode, DeliveryMode, EngineConfig, ProcessorMode};
pub use engine::{
    CampaignCommand, CampaignEngine, CommandOutcome, CommandQueue, EventGateway, IngestOutcome,
    MessageOutcome, RecoveryRuntime, RetryOutcome, SharedEngine,
};
pub use error::RecoveryError;
pub use store::{CampaignStore, SharedStore, StoreError};
