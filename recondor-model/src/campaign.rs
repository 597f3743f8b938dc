use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::ids::{CampaignId, KeywordSetId, PersonaId, ProxyId};
use crate::persona::ProxySelectionStrategy;

/// Declared campaign type; selects which parameter record the campaign owns
/// and which pipeline stage drives it.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignType {
    DomainGeneration,
    DnsValidation,
    HttpKeywordValidation,
}

impl CampaignType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignType::DomainGeneration => "domain_generation",
            CampaignType::DnsValidation => "dns_validation",
            CampaignType::HttpKeywordValidation => "http_keyword_validation",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "domain_generation" => Ok(CampaignType::DomainGeneration),
            "dns_validation" => Ok(CampaignType::DnsValidation),
            "http_keyword_validation" => Ok(CampaignType::HttpKeywordValidation),
            other => Err(ModelError::UnknownValue(format!("campaign type {other}"))),
        }
    }
}

impl fmt::Display for CampaignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Campaign lifecycle states. Transitions are validated by the state machine
/// in `recondor-core`; this enum only names the states.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Pending,
    Queued,
    Running,
    Pausing,
    Paused,
    Completed,
    Failed,
    Cancelled,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Pending => "pending",
            CampaignStatus::Queued => "queued",
            CampaignStatus::Running => "running",
            CampaignStatus::Pausing => "pausing",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Cancelled => "cancelled",
            CampaignStatus::Archived => "archived",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(CampaignStatus::Pending),
            "queued" => Ok(CampaignStatus::Queued),
            "running" => Ok(CampaignStatus::Running),
            "pausing" => Ok(CampaignStatus::Pausing),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            "cancelled" => Ok(CampaignStatus::Cancelled),
            "archived" => Ok(CampaignStatus::Archived),
            other => Err(ModelError::UnknownValue(format!("campaign status {other}"))),
        }
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate item counters. `processed = successful + failed` holds at rest
/// between batches; counter updates ride in the same transaction as the
/// result rows that produced them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub total_items: i64,
    pub processed_items: i64,
    pub successful_items: i64,
    pub failed_items: i64,
}

impl CampaignCounters {
    /// Derived progress percentage; `0.0` while the total is unknown.
    pub fn progress_percent(&self) -> f64 {
        if self.total_items <= 0 {
            return 0.0;
        }
        (self.processed_items as f64 / self.total_items as f64) * 100.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.total_items < 0
            || self.processed_items < 0
            || self.successful_items < 0
            || self.failed_items < 0
        {
            return Err(ModelError::CounterInvariant(
                "counters must be non-negative".into(),
            ));
        }
        if self.processed_items != self.successful_items + self.failed_items {
            return Err(ModelError::CounterInvariant(format!(
                "processed ({}) != successful ({}) + failed ({})",
                self.processed_items, self.successful_items, self.failed_items
            )));
        }
        if self.total_items > 0 && self.processed_items > self.total_items {
            return Err(ModelError::CounterInvariant(format!(
                "processed ({}) exceeds total ({})",
                self.processed_items, self.total_items
            )));
        }
        Ok(())
    }
}

/// One reconnaissance run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub name: String,
    pub campaign_type: CampaignType,
    pub status: CampaignStatus,
    #[serde(flatten)]
    pub counters: CampaignCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Best-effort throughput estimate (items/sec); informational only.
    pub avg_processing_rate: Option<f64>,
    pub estimated_completion_at: Option<DateTime<Utc>>,
}

impl Campaign {
    pub fn new(name: impl Into<String>, campaign_type: CampaignType) -> Self {
        let now = Utc::now();
        Self {
            id: CampaignId::new(),
            name: name.into(),
            campaign_type,
            status: CampaignStatus::Pending,
            counters: CampaignCounters::default(),
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
            last_heartbeat_at: None,
            error_message: None,
            avg_processing_rate: None,
            estimated_completion_at: None,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        self.counters.progress_percent()
    }
}

/// Placement of the variable segment relative to the constant string.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Prefix,
    Suffix,
    Both,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Prefix => "prefix",
            PatternType::Suffix => "suffix",
            PatternType::Both => "both",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "prefix" => Ok(PatternType::Prefix),
            "suffix" => Ok(PatternType::Suffix),
            "both" => Ok(PatternType::Both),
            other => Err(ModelError::UnknownValue(format!("pattern type {other}"))),
        }
    }
}

/// Parameter record for domain generation campaigns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DomainGenerationParams {
    pub pattern_type: PatternType,
    pub variable_length: u32,
    pub character_set: String,
    pub constant_string: String,
    pub tld: String,
    /// Upper bound requested by the operator; 0 means "the whole space".
    pub num_domains_to_generate: u64,
    /// Size of the combinatorial space, computed once at creation.
    pub total_possible_combinations: u64,
    /// Campaign-local position into the space.
    pub current_offset: u64,
    /// Hash of the normalized configuration, shared across campaigns.
    pub config_hash: String,
}

impl DomainGenerationParams {
    pub fn validate(&self) -> Result<()> {
        if self.variable_length == 0 {
            return Err(ModelError::InvalidParams(
                "variable_length must be positive".into(),
            ));
        }
        if self.character_set.is_empty() {
            return Err(ModelError::InvalidParams(
                "character_set must not be empty".into(),
            ));
        }
        if self.tld.trim_matches('.').is_empty() {
            return Err(ModelError::InvalidParams("tld must not be empty".into()));
        }
        Ok(())
    }
}

/// Parameter record for DNS validation campaigns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsValidationParams {
    pub source_generation_campaign_id: CampaignId,
    pub persona_ids: Vec<PersonaId>,
    pub rotation_interval_seconds: u32,
    pub processing_speed_per_minute: u32,
    pub batch_size: u32,
    pub retry_attempts: u32,
}

impl DnsValidationParams {
    pub fn validate(&self) -> Result<()> {
        if self.persona_ids.is_empty() {
            return Err(ModelError::InvalidParams(
                "at least one DNS persona is required".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ModelError::InvalidParams(
                "batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Which upstream result set feeds an HTTP/keyword campaign.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpSourceType {
    DomainGeneration,
    DnsValidation,
}

impl HttpSourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpSourceType::DomainGeneration => "domain_generation",
            HttpSourceType::DnsValidation => "dns_validation",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "domain_generation" => Ok(HttpSourceType::DomainGeneration),
            "dns_validation" => Ok(HttpSourceType::DnsValidation),
            other => Err(ModelError::UnknownValue(format!("source type {other}"))),
        }
    }
}

/// Parameter record for HTTP/keyword validation campaigns.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpKeywordParams {
    pub source_campaign_id: CampaignId,
    pub source_type: HttpSourceType,
    pub persona_ids: Vec<PersonaId>,
    pub proxy_ids: Vec<ProxyId>,
    pub proxy_selection_strategy: ProxySelectionStrategy,
    pub rotation_interval_seconds: u32,
    pub batch_size: u32,
    pub retry_attempts: u32,
    pub keyword_set_ids: Vec<KeywordSetId>,
    pub ad_hoc_keywords: Vec<String>,
    pub target_http_ports: Vec<u16>,
}

impl HttpKeywordParams {
    pub fn validate(&self) -> Result<()> {
        if self.persona_ids.is_empty() {
            return Err(ModelError::InvalidParams(
                "at least one HTTP persona is required".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ModelError::InvalidParams(
                "batch_size must be positive".into(),
            ));
        }
        if self.keyword_set_ids.is_empty() && self.ad_hoc_keywords.is_empty() {
            return Err(ModelError::InvalidParams(
                "a keyword set or ad-hoc keywords are required".into(),
            ));
        }
        Ok(())
    }
}
