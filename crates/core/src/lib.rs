//! `payrecover-core`: building blocks shared by every recovery crate.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{AttemptId, CampaignId, SentMessageId};
pub use value_object::{Money, ValueObject};
