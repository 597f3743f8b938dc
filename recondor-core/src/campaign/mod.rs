//! Campaign lifecycle: persistence, state machine and control operations.

pub mod service;
pub mod state_machine;
pub mod store;

pub use service::{
    CampaignService, CampaignStatusView, CreateDnsCampaign, CreateGenerationCampaign,
    CreateHttpKeywordCampaign,
};
pub use store::{CampaignFilter, CampaignStore, PostgresCampaignStore};
