//! Stage runner for domain generation jobs. Each call produces one batch,
//! persists it, advances both the campaign-local and shared config-hash
//! offsets, and hands the next batch back as a follow-up payload.

use std::sync::Arc;

use async_trait::async_trait;
use recondor_model::{EventPayload, GeneratedDomain};
use tracing::debug;

use crate::campaign::store::CampaignStore;
use crate::events::EventBroadcaster;
use crate::orchestration::job::{GenerationJob, JobPayload, JobRecord};
use crate::orchestration::runner::{StageError, StageOutcome, StageRunner};
use crate::results::ResultStore;

use super::engine::{self, GenerationConfig};
use super::hashing::NormalizedGenerationConfig;
use super::state::GenerationStateStore;

pub struct GenerationRunner {
    campaigns: Arc<dyn CampaignStore>,
    results: Arc<dyn ResultStore>,
    state: Arc<dyn GenerationStateStore>,
    events: Arc<EventBroadcaster>,
}

impl GenerationRunner {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        results: Arc<dyn ResultStore>,
        state: Arc<dyn GenerationStateStore>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            campaigns,
            results,
            state,
            events,
        }
    }
}

#[async_trait]
impl StageRunner for GenerationRunner {
    async fn run(&self, job: &JobRecord) -> Result<StageOutcome, StageError> {
        let JobPayload::Generation(work) = &job.payload else {
            return Err(StageError::terminal("job payload is not a generation job"));
        };

        let campaign = self
            .campaigns
            .get(work.campaign_id)
            .await
            .map_err(|e| StageError::retryable(format!("campaign lookup failed: {e}")))?
            .ok_or_else(|| StageError::terminal("campaign no longer exists"))?;
        let params = self
            .campaigns
            .generation_params(work.campaign_id)
            .await
            .map_err(|e| StageError::retryable(format!("params lookup failed: {e}")))?
            .ok_or_else(|| StageError::terminal("campaign has no generation params"))?;

        // Config problems cannot heal with retries.
        let normalized = NormalizedGenerationConfig::from_params(&params);
        let config = GenerationConfig::from_normalized(&normalized)
            .map_err(|e| StageError::terminal(format!("invalid generation config: {e}")))?;
        let total = config
            .total_combinations()
            .map_err(|e| StageError::terminal(format!("invalid generation config: {e}")))?;

        let remaining =
            (campaign.counters.total_items - campaign.counters.processed_items).max(0) as u64;

        // Resume from whichever cursor is further along: this campaign's own
        // offset or the shared offset left by sibling campaigns with the same
        // config hash.
        let shared = self
            .state
            .last_offset(&params.config_hash)
            .await
            .map_err(|e| StageError::retryable(format!("shared offset lookup failed: {e}")))?
            .unwrap_or(0);
        let offset = params.current_offset.max(shared);

        if remaining == 0 || offset >= total {
            return Ok(StageOutcome::done());
        }

        let take = u64::from(work.batch_size).min(remaining).max(1) as u32;
        let batch = engine::generate(&config, offset, total, take);
        if batch.domains.is_empty() {
            return Ok(StageOutcome::done());
        }

        let rows: Vec<GeneratedDomain> = batch
            .domains
            .iter()
            .map(|(index, domain)| {
                GeneratedDomain::new(work.campaign_id, domain.clone(), *index)
            })
            .collect();
        let inserted = self
            .results
            .insert_generated(work.campaign_id, &rows)
            .await
            .map_err(|e| StageError::retryable(format!("batch persist failed: {e}")))?;

        self.campaigns
            .advance_generation_offset(work.campaign_id, batch.next_offset)
            .await
            .map_err(|e| StageError::retryable(format!("offset advance failed: {e}")))?;
        self.state
            .advance(&params.config_hash, &normalized, batch.next_offset)
            .await
            .map_err(|e| StageError::retryable(format!("shared offset advance failed: {e}")))?;

        if let Some((last_index, last_domain)) = batch.domains.last() {
            self.events.publish(
                work.campaign_id,
                EventPayload::DomainGenerated {
                    domain: last_domain.clone(),
                    offset: *last_index,
                    batch_size: batch.domains.len() as u32,
                    total_generated: campaign.counters.processed_items + inserted as i64,
                },
            );
        }

        let produced = batch.domains.len() as u64;
        let done = batch.exhausted || produced >= remaining;
        debug!(
            "generation batch for {}: offset {offset}..{} ({} inserted, done={done})",
            work.campaign_id, batch.next_offset, inserted
        );

        Ok(StageOutcome {
            processed: produced,
            succeeded: inserted,
            failed: 0,
            done,
            next_payload: (!done).then(|| {
                JobPayload::Generation(GenerationJob {
                    campaign_id: work.campaign_id,
                    batch_size: work.batch_size,
                })
            }),
        })
    }
}
