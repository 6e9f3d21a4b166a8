use crate::status::FleetStatus;
use std::sync::Arc;
use tokio::sync::{RwLock, watch};

/// 最新同步状态，写入时同时通知订阅者
#[derive(Clone)]
pub struct StatusStore {
    current: Arc<RwLock<FleetStatus>>,
    tx: watch::Sender<FleetStatus>,
}

impl StatusStore {
    pub fn new(status: FleetStatus) -> (Self, watch::Receiver<FleetStatus>) {
        let (tx, rx) = watch::channel(status.clone());
        let store = Self {
            current: Arc::new(RwLock::new(status)),
            tx,
        };
        (store, rx)
    }

    pub async fn apply(&self, status: FleetStatus) {
        let cloned = status.clone();
        *self.current.write().await = cloned;
        let _ = self.tx.send(status);
    }

    pub async fn current(&self) -> FleetStatus {
        self.current.read().await.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FleetStatus> {
        self.tx.subscribe()
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new(FleetStatus::default()).0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SchedulerState;

    #[tokio::test]
    async fn test_apply_notifies_subscribers() {
        let (store, mut rx) = StatusStore::new(FleetStatus::default());
        let status = FleetStatus {
            scheduler: SchedulerState::Running,
            ..Default::default()
        };
        store.apply(status).await;
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().scheduler, SchedulerState::Running);
        assert_eq!(store.current().await.scheduler, SchedulerState::Running);
    }
}
