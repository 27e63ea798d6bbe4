use std::sync::Arc;

use harness_core::events::HarnessEvent;
use harnessd::HarnessService;
use tokio::sync::broadcast;

/// Shared handle the routes work through; cloning is cheap.
#[derive(Clone)]
pub struct WebState {
    service: Arc<HarnessService>,
}

impl WebState {
    pub fn new(service: HarnessService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    pub fn service(&self) -> &HarnessService {
        &self.service
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HarnessEvent> {
        self.service.events.subscribe()
    }
}
