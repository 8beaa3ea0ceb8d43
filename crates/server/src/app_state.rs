use std::sync::{Arc, Mutex};

use crate::api::ApiContext;

/// One-shot status messages shown on the next page render.
#[derive(Clone, Default)]
pub(crate) struct FlashMessages {
    inner: Arc<Mutex<Vec<String>>>,
}

impl FlashMessages {
    pub(crate) fn push(&self, message: impl Into<String>) {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(message.into());
    }

    pub(crate) fn take(&self) -> Vec<String> {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *guard)
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    pub(crate) flash: FlashMessages,
}
