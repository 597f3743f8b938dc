//! Campaign lifecycle operations. Every status change goes through the
//! transition table and is applied with a compare-and-set, so concurrent
//! control requests cannot skip states.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use recondor_model::{
    Campaign, CampaignId, CampaignStatus, CampaignType, DnsValidationParams,
    DomainGenerationParams, EventPayload, HttpKeywordParams, HttpSourceType, PatternType,
    ProgressSnapshot, ProxySelectionStrategy,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::events::EventBroadcaster;
use crate::generation::engine::GenerationConfig;
use crate::generation::hashing;
use crate::orchestration::job::{
    DnsValidationJob, GenerationJob, HttpKeywordJob, JobKind, JobPayload, NewJob,
};
use crate::orchestration::queue::JobStore;
use crate::{CoreError, Result};

use super::state_machine;
use super::store::{CampaignFilter, CampaignStore};

/// Smoothing factor for the batch-throughput moving average.
const RATE_EMA_ALPHA: f64 = 0.3;

const DEFAULT_GENERATION_BATCH: u32 = 1_000;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGenerationCampaign {
    pub name: String,
    pub pattern_type: PatternType,
    pub variable_length: u32,
    pub character_set: String,
    pub constant_string: String,
    pub tld: String,
    #[serde(default)]
    pub num_domains_to_generate: u64,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDnsCampaign {
    pub name: String,
    pub source_generation_campaign_id: CampaignId,
    pub persona_ids: Vec<recondor_model::PersonaId>,
    #[serde(default)]
    pub rotation_interval_seconds: u32,
    #[serde(default)]
    pub processing_speed_per_minute: u32,
    pub batch_size: u32,
    pub retry_attempts: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateHttpKeywordCampaign {
    pub name: String,
    pub source_campaign_id: CampaignId,
    pub source_type: HttpSourceType,
    pub persona_ids: Vec<recondor_model::PersonaId>,
    #[serde(default)]
    pub proxy_ids: Vec<recondor_model::ProxyId>,
    #[serde(default)]
    pub proxy_selection_strategy: ProxySelectionStrategy,
    #[serde(default)]
    pub rotation_interval_seconds: u32,
    pub batch_size: u32,
    pub retry_attempts: u32,
    #[serde(default)]
    pub keyword_set_ids: Vec<recondor_model::KeywordSetId>,
    #[serde(default)]
    pub ad_hoc_keywords: Vec<String>,
    #[serde(default)]
    pub target_http_ports: Vec<u16>,
}

/// Snapshot returned by the status endpoint; pairs campaign state with live
/// queue depth so clients can resync after a websocket gap.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStatusView {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub progress_percent: f64,
    pub active_jobs: u64,
    pub running_jobs: u64,
}

pub struct CampaignService {
    campaigns: Arc<dyn CampaignStore>,
    jobs: Arc<dyn JobStore>,
    events: Arc<EventBroadcaster>,
    max_attempts: u16,
}

impl CampaignService {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        jobs: Arc<dyn JobStore>,
        events: Arc<EventBroadcaster>,
        max_attempts: u16,
    ) -> Self {
        Self {
            campaigns,
            jobs,
            events,
            max_attempts,
        }
    }

    pub fn events(&self) -> Arc<EventBroadcaster> {
        Arc::clone(&self.events)
    }

    // ---- creation -------------------------------------------------------

    pub async fn create_generation(&self, req: CreateGenerationCampaign) -> Result<Campaign> {
        let mut params = DomainGenerationParams {
            pattern_type: req.pattern_type,
            variable_length: req.variable_length,
            character_set: req.character_set,
            constant_string: req.constant_string,
            tld: req.tld,
            num_domains_to_generate: req.num_domains_to_generate,
            total_possible_combinations: 0,
            current_offset: 0,
            config_hash: String::new(),
        };
        params.validate()?;

        let (normalized, hash) = hashing::config_hash(&params)?;
        let config = GenerationConfig::from_normalized(&normalized)?;
        let total = config.total_combinations()?;
        params.total_possible_combinations = total;
        params.config_hash = hash;

        let target = if params.num_domains_to_generate == 0 {
            total
        } else {
            params.num_domains_to_generate.min(total)
        };

        let mut campaign = Campaign::new(req.name, CampaignType::DomainGeneration);
        campaign.counters.total_items = target.min(i64::MAX as u64) as i64;

        self.campaigns.insert_generation(&campaign, &params).await?;
        info!("created generation campaign {} ({})", campaign.id, campaign.name);
        Ok(campaign)
    }

    pub async fn create_dns(&self, req: CreateDnsCampaign) -> Result<Campaign> {
        let params = DnsValidationParams {
            source_generation_campaign_id: req.source_generation_campaign_id,
            persona_ids: req.persona_ids,
            rotation_interval_seconds: req.rotation_interval_seconds,
            processing_speed_per_minute: req.processing_speed_per_minute,
            batch_size: req.batch_size,
            retry_attempts: req.retry_attempts,
        };
        params.validate()?;

        let source = self
            .campaigns
            .get(params.source_generation_campaign_id)
            .await?
            .ok_or_else(|| {
                CoreError::Validation("source generation campaign does not exist".into())
            })?;
        if source.campaign_type != CampaignType::DomainGeneration {
            return Err(CoreError::Validation(
                "source campaign is not a generation campaign".into(),
            ));
        }

        let mut campaign = Campaign::new(req.name, CampaignType::DnsValidation);
        // The source keeps producing until it completes; take its target as
        // the working total.
        campaign.counters.total_items = source.counters.total_items;

        self.campaigns.insert_dns(&campaign, &params).await?;
        info!("created dns campaign {} sourcing {}", campaign.id, source.id);
        Ok(campaign)
    }

    pub async fn create_http_keyword(&self, req: CreateHttpKeywordCampaign) -> Result<Campaign> {
        let params = HttpKeywordParams {
            source_campaign_id: req.source_campaign_id,
            source_type: req.source_type,
            persona_ids: req.persona_ids,
            proxy_ids: req.proxy_ids,
            proxy_selection_strategy: req.proxy_selection_strategy,
            rotation_interval_seconds: req.rotation_interval_seconds,
            batch_size: req.batch_size,
            retry_attempts: req.retry_attempts,
            keyword_set_ids: req.keyword_set_ids,
            ad_hoc_keywords: req.ad_hoc_keywords,
            target_http_ports: req.target_http_ports,
        };
        params.validate()?;

        let source = self
            .campaigns
            .get(params.source_campaign_id)
            .await?
            .ok_or_else(|| CoreError::Validation("source campaign does not exist".into()))?;
        let expected = match params.source_type {
            HttpSourceType::DomainGeneration => CampaignType::DomainGeneration,
            HttpSourceType::DnsValidation => CampaignType::DnsValidation,
        };
        if source.campaign_type != expected {
            return Err(CoreError::Validation(format!(
                "source campaign type {} does not match declared source type",
                source.campaign_type
            )));
        }

        let mut campaign = Campaign::new(req.name, CampaignType::HttpKeywordValidation);
        campaign.counters.total_items = match params.source_type {
            HttpSourceType::DomainGeneration => source.counters.total_items,
            // Only resolved domains feed this stage; the runner raises this
            // as the source resolves more.
            HttpSourceType::DnsValidation => source.counters.successful_items,
        };

        self.campaigns.insert_http(&campaign, &params).await?;
        info!("created http-keyword campaign {} sourcing {}", campaign.id, source.id);
        Ok(campaign)
    }

    // ---- reads ----------------------------------------------------------

    pub async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        self.campaigns.get(id).await
    }

    pub async fn require(&self, id: CampaignId) -> Result<Campaign> {
        self.campaigns
            .get(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("campaign {id} not found")))
    }

    pub async fn list(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>> {
        self.campaigns.list(filter).await
    }

    pub async fn status_view(&self, id: CampaignId) -> Result<CampaignStatusView> {
        let campaign = self.require(id).await?;
        let active_jobs = self.jobs.active_job_count(id).await?;
        let running_jobs = self.jobs.running_job_count(id).await?;
        Ok(CampaignStatusView {
            progress_percent: campaign.progress_percent(),
            campaign,
            active_jobs,
            running_jobs,
        })
    }

    // ---- control surface ------------------------------------------------

    /// Move a pending campaign to queued and enqueue its initial job. The
    /// orchestrator owns every job created after this one.
    pub async fn start(&self, id: CampaignId) -> Result<Campaign> {
        let campaign = self.require(id).await?;
        state_machine::validate_transition(campaign.status, CampaignStatus::Queued)?;

        let payload = self.initial_payload(&campaign).await?;
        if !self
            .campaigns
            .set_status(id, campaign.status, CampaignStatus::Queued)
            .await?
        {
            return Err(CoreError::Validation(format!(
                "campaign {id} changed state concurrently"
            )));
        }
        self.jobs
            .enqueue(NewJob::new(payload, self.max_attempts))
            .await?;
        self.publish_status(id, CampaignStatus::Queued, None).await;
        self.require(id).await
    }

    pub async fn pause(&self, id: CampaignId) -> Result<Campaign> {
        let campaign = self.require(id).await?;
        state_machine::validate_transition(campaign.status, CampaignStatus::Pausing)?;
        self.campaigns
            .set_status(id, campaign.status, CampaignStatus::Pausing)
            .await?;
        self.publish_status(id, CampaignStatus::Pausing, None).await;

        // Nothing in flight means the pause completes immediately.
        self.finish_pause_if_idle(id).await?;
        self.require(id).await
    }

    pub async fn resume(&self, id: CampaignId) -> Result<Campaign> {
        let campaign = self.require(id).await?;
        state_machine::validate_transition(campaign.status, CampaignStatus::Running)?;
        self.campaigns
            .set_status(id, campaign.status, CampaignStatus::Running)
            .await?;
        self.publish_status(id, CampaignStatus::Running, None).await;
        self.require(id).await
    }

    pub async fn cancel(&self, id: CampaignId) -> Result<Campaign> {
        let campaign = self.require(id).await?;
        state_machine::validate_transition(campaign.status, CampaignStatus::Cancelled)?;
        self.campaigns
            .set_status(id, campaign.status, CampaignStatus::Cancelled)
            .await?;

        let cancelled = self.jobs.cancel_pending(id).await?;
        if cancelled > 0 {
            info!("cancelled {cancelled} pending jobs for campaign {id}");
        }
        self.publish_status(id, CampaignStatus::Cancelled, None).await;
        self.require(id).await
    }

    pub async fn archive(&self, id: CampaignId) -> Result<Campaign> {
        let campaign = self.require(id).await?;
        state_machine::validate_transition(campaign.status, CampaignStatus::Archived)?;
        self.campaigns
            .set_status(id, campaign.status, CampaignStatus::Archived)
            .await?;
        self.events.remove_topic(id);
        self.require(id).await
    }

    /// Cancel outstanding work, then drop the campaign. Result rows cascade
    /// at the data layer.
    pub async fn delete(&self, id: CampaignId) -> Result<()> {
        let campaign = self.require(id).await?;
        if !state_machine::is_terminal(campaign.status) {
            self.jobs.cancel_pending(id).await?;
        }
        if !self.campaigns.delete(id).await? {
            return Err(CoreError::NotFound(format!("campaign {id} not found")));
        }
        self.events.remove_topic(id);
        info!("deleted campaign {id}");
        Ok(())
    }

    // ---- orchestrator hooks ---------------------------------------------

    pub async fn mark_running(&self, id: CampaignId) -> Result<()> {
        if self
            .campaigns
            .set_status(id, CampaignStatus::Queued, CampaignStatus::Running)
            .await?
        {
            self.publish_status(id, CampaignStatus::Running, None).await;
        }
        Ok(())
    }

    /// Complete a requested pause once the campaign has no running job left.
    pub async fn finish_pause_if_idle(&self, id: CampaignId) -> Result<()> {
        let Some(campaign) = self.campaigns.get(id).await? else {
            return Ok(());
        };
        if campaign.status != CampaignStatus::Pausing {
            return Ok(());
        }
        if self.jobs.running_job_count(id).await? > 0 {
            return Ok(());
        }
        if self
            .campaigns
            .set_status(id, CampaignStatus::Pausing, CampaignStatus::Paused)
            .await?
        {
            self.publish_status(id, CampaignStatus::Paused, None).await;
        }
        Ok(())
    }

    /// Update heartbeat and throughput estimate after a processed batch and
    /// broadcast a progress snapshot.
    pub async fn record_batch(
        &self,
        id: CampaignId,
        outcome: &crate::orchestration::runner::StageOutcome,
        elapsed: Duration,
    ) -> Result<()> {
        self.campaigns.touch_heartbeat(id).await?;

        let Some(campaign) = self.campaigns.get(id).await? else {
            return Ok(());
        };

        if outcome.processed > 0 && elapsed.as_secs_f64() > 0.0 {
            let observed = outcome.processed as f64 / elapsed.as_secs_f64();
            let rate = match campaign.avg_processing_rate {
                Some(previous) => RATE_EMA_ALPHA * observed + (1.0 - RATE_EMA_ALPHA) * previous,
                None => observed,
            };
            let remaining =
                (campaign.counters.total_items - campaign.counters.processed_items).max(0);
            let eta = if rate > 0.0 && remaining > 0 {
                Some(Utc::now() + chrono::Duration::seconds((remaining as f64 / rate) as i64))
            } else {
                None
            };
            self.campaigns.update_rate(id, rate, eta).await?;
        }

        self.events.publish(
            id,
            EventPayload::Progress(ProgressSnapshot {
                total_items: campaign.counters.total_items,
                processed_items: campaign.counters.processed_items,
                successful_items: campaign.counters.successful_items,
                failed_items: campaign.counters.failed_items,
                progress_percent: campaign.progress_percent(),
                status: campaign.status.as_str().into(),
            }),
        );
        Ok(())
    }

    /// A stage reported no further batches. Completion requires that nothing
    /// claimable or running remains.
    pub async fn on_stage_exhausted(&self, id: CampaignId, kind: JobKind) -> Result<()> {
        self.events.publish(
            id,
            EventPayload::PhaseComplete {
                phase: kind.as_str().into(),
            },
        );
        self.try_complete(id).await
    }

    pub async fn try_complete(&self, id: CampaignId) -> Result<()> {
        let Some(campaign) = self.campaigns.get(id).await? else {
            return Ok(());
        };
        if campaign.status != CampaignStatus::Running {
            return Ok(());
        }
        if self.jobs.active_job_count(id).await? > 0 {
            return Ok(());
        }
        if self
            .campaigns
            .set_status(id, CampaignStatus::Running, CampaignStatus::Completed)
            .await?
        {
            info!("campaign {id} completed");
            self.publish_status(id, CampaignStatus::Completed, None).await;
            self.events.publish(
                id,
                EventPayload::Complete {
                    processed_items: campaign.counters.processed_items,
                    successful_items: campaign.counters.successful_items,
                    failed_items: campaign.counters.failed_items,
                },
            );
        }
        Ok(())
    }

    /// A job exhausted its attempts. The campaign fails only when no other
    /// viable work remains; otherwise the remaining jobs keep going.
    pub async fn fail_campaign_if_stalled(&self, id: CampaignId, error: &str) -> Result<()> {
        if self.jobs.active_job_count(id).await? > 0 {
            return Ok(());
        }
        let Some(campaign) = self.campaigns.get(id).await? else {
            return Ok(());
        };
        if campaign.status != CampaignStatus::Running {
            return Ok(());
        }
        if self
            .campaigns
            .set_status(id, CampaignStatus::Running, CampaignStatus::Failed)
            .await?
        {
            self.campaigns.set_error(id, error).await?;
            warn!("campaign {id} failed: {error}");
            self.publish_status(id, CampaignStatus::Failed, Some(error.to_string()))
                .await;
            self.events.publish(
                id,
                EventPayload::Error {
                    message: error.to_string(),
                },
            );
        }
        Ok(())
    }

    // ---- internals ------------------------------------------------------

    async fn initial_payload(&self, campaign: &Campaign) -> Result<JobPayload> {
        match campaign.campaign_type {
            CampaignType::DomainGeneration => Ok(JobPayload::Generation(GenerationJob {
                campaign_id: campaign.id,
                batch_size: DEFAULT_GENERATION_BATCH,
            })),
            CampaignType::DnsValidation => {
                let params = self
                    .campaigns
                    .dns_params(campaign.id)
                    .await?
                    .ok_or_else(|| {
                        CoreError::Internal(format!("campaign {} has no dns params", campaign.id))
                    })?;
                Ok(JobPayload::DnsValidation(DnsValidationJob {
                    campaign_id: campaign.id,
                    cursor: None,
                    batch_size: params.batch_size,
                }))
            }
            CampaignType::HttpKeywordValidation => {
                let params = self
                    .campaigns
                    .http_params(campaign.id)
                    .await?
                    .ok_or_else(|| {
                        CoreError::Internal(format!("campaign {} has no http params", campaign.id))
                    })?;
                Ok(JobPayload::HttpKeyword(HttpKeywordJob {
                    campaign_id: campaign.id,
                    cursor: None,
                    batch_size: params.batch_size,
                }))
            }
        }
    }

    async fn publish_status(&self, id: CampaignId, status: CampaignStatus, message: Option<String>) {
        self.events.publish(
            id,
            EventPayload::StatusChanged {
                status: status.as_str().into(),
                message,
            },
        );
    }
}
