use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ModelError, Result};
use crate::ids::{CampaignId, PersonaId, ProxyId};

/// Domain emitted by a generation campaign. `offset_index` is the absolute
/// position in the combinatorial space, so re-runs from a shared offset never
/// produce duplicate rows.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratedDomain {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    pub domain_name: String,
    pub offset_index: u64,
    pub generated_at: DateTime<Utc>,
}

impl GeneratedDomain {
    pub fn new(campaign_id: CampaignId, domain_name: String, offset_index: u64) -> Self {
        Self {
            id: Uuid::now_v7(),
            campaign_id,
            domain_name,
            offset_index,
            generated_at: Utc::now(),
        }
    }
}

/// Outcome classes for a DNS resolution attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DnsStatus {
    Resolved,
    Unresolved,
    Timeout,
    Error,
}

impl DnsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsStatus::Resolved => "resolved",
            DnsStatus::Unresolved => "unresolved",
            DnsStatus::Timeout => "timeout",
            DnsStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "resolved" => Ok(DnsStatus::Resolved),
            "unresolved" => Ok(DnsStatus::Unresolved),
            "timeout" => Ok(DnsStatus::Timeout),
            "error" => Ok(DnsStatus::Error),
            other => Err(ModelError::UnknownValue(format!("dns status {other}"))),
        }
    }

    /// Only resolved domains advance to downstream stages.
    pub fn is_success(&self) -> bool {
        matches!(self, DnsStatus::Resolved)
    }
}

/// Row recorded per domain by a DNS validation campaign.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsValidationResult {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    pub domain_name: String,
    pub status: DnsStatus,
    /// Resolved addresses, A and AAAA mixed, as printed strings.
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    pub persona_id: Option<PersonaId>,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

/// Outcome classes for an HTTP probe. `Success` means the page was fetched;
/// whether keywords matched is carried separately in `keywords_found`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpProbeStatus {
    Success,
    Unreachable,
    Timeout,
    Error,
}

impl HttpProbeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpProbeStatus::Success => "success",
            HttpProbeStatus::Unreachable => "unreachable",
            HttpProbeStatus::Timeout => "timeout",
            HttpProbeStatus::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "success" => Ok(HttpProbeStatus::Success),
            "unreachable" => Ok(HttpProbeStatus::Unreachable),
            "timeout" => Ok(HttpProbeStatus::Timeout),
            "error" => Ok(HttpProbeStatus::Error),
            other => Err(ModelError::UnknownValue(format!("http status {other}"))),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HttpProbeStatus::Success)
    }
}

/// One keyword hit inside a probed response body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeywordMatch {
    pub pattern: String,
    #[serde(default)]
    pub category: Option<String>,
    /// Short excerpt around the first occurrence.
    pub context: String,
}

/// Row recorded per domain by an HTTP/keyword validation campaign.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpKeywordResult {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    pub domain_name: String,
    pub status: HttpProbeStatus,
    pub http_status_code: Option<u16>,
    /// sha256 hex of the fetched body; identical pages within a campaign skip
    /// keyword extraction.
    pub content_hash: Option<String>,
    #[serde(default)]
    pub keywords_found: Vec<KeywordMatch>,
    pub persona_id: Option<PersonaId>,
    pub proxy_id: Option<ProxyId>,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_resolved_counts_as_success() {
        assert!(DnsStatus::Resolved.is_success());
        assert!(!DnsStatus::Timeout.is_success());
        assert!(!DnsStatus::Unresolved.is_success());
    }

    #[test]
    fn probe_status_round_trips_through_text() {
        for status in [
            HttpProbeStatus::Success,
            HttpProbeStatus::Unreachable,
            HttpProbeStatus::Error,
        ] {
            assert_eq!(HttpProbeStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(HttpProbeStatus::parse("ok").is_err());
    }
}
