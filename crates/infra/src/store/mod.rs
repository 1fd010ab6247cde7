//! Campaign store boundary.
//!
//! The store is the only shared mutable state of the engine. Every mutation
//! goes through [`CampaignStore::update`], a conditional write guarded by the
//! campaign version.

pub mod in_memory;
pub mod postgres;
pub mod timeout;
pub mod r#trait;

pub use in_memory::InMemoryCampaignStore;
pub use postgres::PostgresCampaignStore;
pub use timeout::TimeoutStore;
pub use r#trait::{
    CampaignDetail, CampaignFilter, CampaignStore, CreateOutcome, RecoveryStats, SharedStore,
    StoreError,
};
