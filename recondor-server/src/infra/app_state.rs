use std::sync::Arc;

use recondor_core::campaign::CampaignService;
use recondor_core::events::EventBroadcaster;
use recondor_core::results::ResultStore;

/// Shared handles cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    service: Arc<CampaignService>,
    results: Arc<dyn ResultStore>,
    events: Arc<EventBroadcaster>,
}

impl AppState {
    pub fn new(
        service: Arc<CampaignService>,
        results: Arc<dyn ResultStore>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            service,
            results,
            events,
        }
    }

    pub fn service(&self) -> &CampaignService {
        &self.service
    }

    pub fn results(&self) -> &dyn ResultStore {
        self.results.as_ref()
    }

    pub fn events(&self) -> &EventBroadcaster {
        &self.events
    }
}
