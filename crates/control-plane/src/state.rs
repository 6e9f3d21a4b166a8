use edi_common::state::StatusStore;
use edi_sync::{FacilityRegistry, LinkValidator, SyncScheduler};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<SyncScheduler>,
    pub validator: Arc<LinkValidator>,
    pub status: StatusStore,
}

impl AppState {
    pub fn registry(&self) -> &FacilityRegistry {
        self.scheduler.registry()
    }
}
