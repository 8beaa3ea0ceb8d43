use std::sync::{Arc, RwLock};

use chrono::Utc;
use shared::protocol::{HealthReport, ListenerHealth, ListenerKind, ListenerState};

/// Last reported state of one listener, shared with the web layer.
#[derive(Clone)]
pub struct HealthHandle {
    inner: Arc<RwLock<ListenerHealth>>,
}

impl HealthHandle {
    pub fn new(listener: ListenerKind) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ListenerHealth {
                listener,
                state: ListenerState::Starting,
                updated_at: Utc::now(),
            })),
        }
    }

    pub fn set(&self, state: ListenerState) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.state = state;
        guard.updated_at = Utc::now();
    }

    pub fn get(&self) -> ListenerHealth {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[derive(Clone)]
pub struct ListenerHealthSet {
    pub card: HealthHandle,
    pub cloud: HealthHandle,
}

impl ListenerHealthSet {
    pub fn new() -> Self {
        Self {
            card: HealthHandle::new(ListenerKind::Card),
            cloud: HealthHandle::new(ListenerKind::Cloud),
        }
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            card: self.card.get(),
            cloud: self.cloud.get(),
        }
    }
}

impl Default for ListenerHealthSet {
    fn default() -> Self {
        Self::new()
    }
}
