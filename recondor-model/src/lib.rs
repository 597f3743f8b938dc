//! Core data model definitions shared across Recondor crates.
#![allow(missing_docs)]

pub mod campaign;
pub mod error;
pub mod events;
pub mod ids;
pub mod persona;
pub mod results;

// Intentionally curated re-exports for downstream consumers.
pub use campaign::{
    Campaign, CampaignCounters, CampaignStatus, CampaignType, DnsValidationParams,
    DomainGenerationParams, HttpKeywordParams, HttpSourceType, PatternType,
};
pub use error::{ModelError, Result as ModelResult};
pub use events::{
    CampaignEvent, ClientMessage, EventPayload, ProgressSnapshot, ServerNotice,
};
pub use ids::{CampaignId, KeywordSetId, PersonaId, ProxyId};
pub use persona::{
    DnsPersonaConfig, HttpPersonaConfig, KeywordRule, KeywordRuleType, KeywordSet, Persona,
    PersonaConfig, PersonaKind, Proxy, ProxySelectionStrategy,
};
pub use results::{
    DnsStatus, DnsValidationResult, GeneratedDomain, HttpKeywordResult, HttpProbeStatus,
    KeywordMatch,
};
