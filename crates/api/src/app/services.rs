use std::sync::Arc;

use payrecover_infra::{CommandQueue, EventGateway, RecoveryRuntime, SharedEngine, SharedStore};

/// Handles the HTTP layer needs on the running engine.
#[derive(Clone)]
pub struct AppServices {
    pub store: SharedStore,
    pub engine: SharedEngine,
    pub gateway: Arc<EventGateway>,
    pub queue: CommandQueue,
}

impl AppServices {
    pub fn from_runtime(runtime: &RecoveryRuntime) -> Self {
        Self {
            store: runtime.store.clone(),
            engine: runtime.engine.clone(),
            gateway: runtime.gateway.clone(),
            queue: runtime.queue.clone(),
        }
    }
}
