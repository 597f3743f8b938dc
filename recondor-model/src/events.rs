//! WebSocket wire contract shared by the server and its clients.
//!
//! Events are serialized in camelCase with a dotted `type` tag so existing
//! dashboards can consume the stream without translation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{CampaignId, PersonaId, ProxyId};
use crate::results::KeywordMatch;

/// Ordered event emitted on a campaign topic. `sequence_number` is contiguous
/// per campaign; a gap on the client side means it must resubscribe.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignEvent {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    pub sequence_number: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl CampaignEvent {
    pub fn new(campaign_id: CampaignId, sequence_number: u64, payload: EventPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            campaign_id,
            sequence_number,
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Event payloads, tagged by the dotted wire type.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    #[serde(rename = "campaign.progress")]
    Progress(ProgressSnapshot),

    #[serde(rename = "campaign.status")]
    StatusChanged {
        status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    #[serde(rename = "domain.generated")]
    #[serde(rename_all = "camelCase")]
    DomainGenerated {
        domain: String,
        offset: u64,
        batch_size: u32,
        total_generated: i64,
    },

    #[serde(rename = "dns.validation.result")]
    #[serde(rename_all = "camelCase")]
    DnsValidationResult {
        domain: String,
        validation_status: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ip_addresses: Vec<String>,
        attempts: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        persona_id: Option<PersonaId>,
        total_validated: i64,
    },

    #[serde(rename = "http.validation.result")]
    #[serde(rename_all = "camelCase")]
    HttpValidationResult {
        domain: String,
        validation_status: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        keywords_found: Vec<KeywordMatch>,
        #[serde(skip_serializing_if = "Option::is_none")]
        proxy_id: Option<ProxyId>,
        total_validated: i64,
    },

    /// A stage's job chain is exhausted; the campaign may advance or finish.
    #[serde(rename = "campaign.phase_complete")]
    PhaseComplete { phase: String },

    #[serde(rename = "campaign.error")]
    Error { message: String },

    #[serde(rename = "campaign.complete")]
    #[serde(rename_all = "camelCase")]
    Complete {
        processed_items: i64,
        successful_items: i64,
        failed_items: i64,
    },
}

impl EventPayload {
    /// Dotted wire tag for this payload, as seen by clients.
    pub fn wire_type(&self) -> &'static str {
        match self {
            EventPayload::Progress(_) => "campaign.progress",
            EventPayload::StatusChanged { .. } => "campaign.status",
            EventPayload::DomainGenerated { .. } => "domain.generated",
            EventPayload::DnsValidationResult { .. } => "dns.validation.result",
            EventPayload::HttpValidationResult { .. } => "http.validation.result",
            EventPayload::PhaseComplete { .. } => "campaign.phase_complete",
            EventPayload::Error { .. } => "campaign.error",
            EventPayload::Complete { .. } => "campaign.complete",
        }
    }
}

/// Counter snapshot broadcast after each processed batch.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub total_items: i64,
    pub processed_items: i64,
    pub successful_items: i64,
    pub failed_items: i64,
    pub progress_percent: f64,
    pub status: String,
}

/// Out-of-band server frames that are not campaign events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerNotice {
    /// The requested sequence fell out of the replay buffer; the client must
    /// refetch state over REST and subscribe fresh.
    #[serde(rename = "resync_required")]
    #[serde(rename_all = "camelCase")]
    ResyncRequired {
        campaign_id: CampaignId,
        oldest_buffered_sequence: u64,
    },

    #[serde(rename = "system.notification")]
    Notification { level: String, message: String },
}

/// Frames a client may send on the socket.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "subscribe")]
    #[serde(rename_all = "camelCase")]
    Subscribe { campaign_ids: Vec<CampaignId> },

    /// Subscribe with replay from the sequence after `last_sequence_number`.
    #[serde(rename = "resubscribe")]
    #[serde(rename_all = "camelCase")]
    Resubscribe {
        campaign_id: CampaignId,
        last_sequence_number: u64,
    },

    #[serde(rename = "unsubscribe")]
    #[serde(rename_all = "camelCase")]
    Unsubscribe { campaign_ids: Vec<CampaignId> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_envelope_uses_wire_tags() {
        let event = CampaignEvent::new(
            CampaignId::new(),
            7,
            EventPayload::DomainGenerated {
                domain: "abc.example.com".into(),
                offset: 41,
                batch_size: 100,
                total_generated: 42,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "domain.generated");
        assert_eq!(json["sequenceNumber"], 7);
        assert_eq!(json["data"]["batchSize"], 100);
    }

    #[test]
    fn client_resubscribe_parses() {
        let id = CampaignId::new();
        let raw = format!(
            r#"{{"type":"resubscribe","data":{{"campaignId":"{id}","lastSequenceNumber":12}}}}"#
        );
        let msg: ClientMessage = serde_json::from_str(&raw).unwrap();
        match msg {
            ClientMessage::Resubscribe {
                campaign_id,
                last_sequence_number,
            } => {
                assert_eq!(campaign_id, id);
                assert_eq!(last_sequence_number, 12);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn resync_notice_round_trips() {
        let notice = ServerNotice::ResyncRequired {
            campaign_id: CampaignId::new(),
            oldest_buffered_sequence: 90,
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["type"], "resync_required");
        let back: ServerNotice = serde_json::from_value(json).unwrap();
        assert!(matches!(back, ServerNotice::ResyncRequired { .. }));
    }
}
