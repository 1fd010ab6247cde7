//! Recovery campaign domain module.
//!
//! Business rules for recovering failed recurring payments, implemented purely
//! as deterministic domain logic (no IO, no HTTP, no storage). Every state
//! transition is computed here as a [`CampaignChange`] and applied by a store
//! through its conditional-write primitive.

pub mod attempt;
pub mod campaign;
pub mod classification;
pub mod message;
pub mod schedule;
pub mod sequence;

pub use attempt::{Attempt, AttemptKind, AttemptStatus, NewAttempt};
pub use campaign::{
    Campaign, CampaignChange, CampaignPatch, CampaignStatus, DEFAULT_MAX_RETRIES, NewCampaign,
};
pub use classification::FailureClassification;
pub use message::{DeliveryStatus, MessagePurpose, NewSentMessage, SentMessage};
pub use schedule::{BACKOFF_HOURS, PREFERRED_HOURS, RetryPolicy, ScheduledRetry};
pub use sequence::{DunningSequence, DunningStep, WIN_BACK_STEP};
