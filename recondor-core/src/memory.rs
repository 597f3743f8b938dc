//! In-memory counterparts of the Postgres stores, all backed by one shared
//! state so counters, results and shared offsets stay consistent with each
//! other. The integration suites run the full orchestrator against these.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recondor_model::{
    Campaign, CampaignId, CampaignStatus, DnsValidationParams, DnsValidationResult,
    DomainGenerationParams, GeneratedDomain, HttpKeywordParams, HttpKeywordResult, KeywordSet,
    KeywordSetId, Persona, PersonaId, Proxy, ProxyId,
};

use crate::campaign::store::{CampaignFilter, CampaignStore};
use crate::directory::Directory;
use crate::generation::hashing::NormalizedGenerationConfig;
use crate::generation::state::GenerationStateStore;
use crate::results::ResultStore;
use crate::{CoreError, Result};

#[derive(Default)]
struct ArenaState {
    campaigns: HashMap<CampaignId, Campaign>,
    generation_params: HashMap<CampaignId, DomainGenerationParams>,
    dns_params: HashMap<CampaignId, DnsValidationParams>,
    http_params: HashMap<CampaignId, HttpKeywordParams>,
    generated: HashMap<CampaignId, BTreeMap<String, GeneratedDomain>>,
    dns_results: HashMap<CampaignId, BTreeMap<String, DnsValidationResult>>,
    http_results: HashMap<CampaignId, BTreeMap<String, HttpKeywordResult>>,
    shared_offsets: HashMap<String, u64>,
    personas: Vec<Persona>,
    proxies: Vec<Proxy>,
    keyword_sets: Vec<KeywordSet>,
}

/// Single shared backing store implementing every persistence trait the
/// orchestrator needs.
#[derive(Default)]
pub struct InMemoryArena {
    state: Mutex<ArenaState>,
}

impl InMemoryArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ArenaState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_persona(&self, persona: Persona) {
        self.lock().personas.push(persona);
    }

    pub fn add_proxy(&self, proxy: Proxy) {
        self.lock().proxies.push(proxy);
    }

    pub fn add_keyword_set(&self, set: KeywordSet) {
        self.lock().keyword_sets.push(set);
    }

    /// Direct snapshot for assertions.
    pub fn campaign(&self, id: CampaignId) -> Option<Campaign> {
        self.lock().campaigns.get(&id).cloned()
    }

    pub fn generated_count(&self, id: CampaignId) -> usize {
        self.lock().generated.get(&id).map_or(0, BTreeMap::len)
    }

    pub fn shared_offset(&self, config_hash: &str) -> Option<u64> {
        self.lock().shared_offsets.get(config_hash).copied()
    }
}

#[async_trait]
impl CampaignStore for InMemoryArena {
    async fn insert_generation(
        &self,
        campaign: &Campaign,
        params: &DomainGenerationParams,
    ) -> Result<()> {
        let mut state = self.lock();
        state.campaigns.insert(campaign.id, campaign.clone());
        state.generation_params.insert(campaign.id, params.clone());
        Ok(())
    }

    async fn insert_dns(&self, campaign: &Campaign, params: &DnsValidationParams) -> Result<()> {
        let mut state = self.lock();
        state.campaigns.insert(campaign.id, campaign.clone());
        state.dns_params.insert(campaign.id, params.clone());
        Ok(())
    }

    async fn insert_http(&self, campaign: &Campaign, params: &HttpKeywordParams) -> Result<()> {
        let mut state = self.lock();
        state.campaigns.insert(campaign.id, campaign.clone());
        state.http_params.insert(campaign.id, params.clone());
        Ok(())
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        Ok(self.lock().campaigns.get(&id).cloned())
    }

    async fn list(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>> {
        let state = self.lock();
        let mut campaigns: Vec<Campaign> = state
            .campaigns
            .values()
            .filter(|c| filter.status.is_none_or(|s| c.status == s))
            .filter(|c| filter.campaign_type.is_none_or(|t| c.campaign_type == t))
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = filter.offset.max(0) as usize;
        let limit = filter.limit.clamp(1, 1_000) as usize;
        Ok(campaigns.into_iter().skip(offset).take(limit).collect())
    }

    async fn generation_params(&self, id: CampaignId) -> Result<Option<DomainGenerationParams>> {
        Ok(self.lock().generation_params.get(&id).cloned())
    }

    async fn dns_params(&self, id: CampaignId) -> Result<Option<DnsValidationParams>> {
        Ok(self.lock().dns_params.get(&id).cloned())
    }

    async fn http_params(&self, id: CampaignId) -> Result<Option<HttpKeywordParams>> {
        Ok(self.lock().http_params.get(&id).cloned())
    }

    async fn set_status(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool> {
        let mut state = self.lock();
        let Some(campaign) = state.campaigns.get_mut(&id) else {
            return Ok(false);
        };
        if campaign.status != from {
            return Ok(false);
        }
        campaign.status = to;
        campaign.updated_at = Utc::now();
        if to == CampaignStatus::Running && campaign.started_at.is_none() {
            campaign.started_at = Some(campaign.updated_at);
        }
        if matches!(
            to,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Cancelled
        ) {
            campaign.completed_at = Some(campaign.updated_at);
        }
        Ok(true)
    }

    async fn set_error(&self, id: CampaignId, message: &str) -> Result<()> {
        let mut state = self.lock();
        if let Some(campaign) = state.campaigns.get_mut(&id) {
            campaign.error_message = Some(message.to_string());
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn touch_heartbeat(&self, id: CampaignId) -> Result<()> {
        let mut state = self.lock();
        if let Some(campaign) = state.campaigns.get_mut(&id) {
            campaign.last_heartbeat_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn update_rate(
        &self,
        id: CampaignId,
        rate: f64,
        eta: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut state = self.lock();
        if let Some(campaign) = state.campaigns.get_mut(&id) {
            campaign.avg_processing_rate = Some(rate);
            campaign.estimated_completion_at = eta;
        }
        Ok(())
    }

    async fn raise_total_items(&self, id: CampaignId, total: i64) -> Result<()> {
        let mut state = self.lock();
        if let Some(campaign) = state.campaigns.get_mut(&id) {
            campaign.counters.total_items = campaign.counters.total_items.max(total);
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn advance_generation_offset(&self, id: CampaignId, offset: u64) -> Result<()> {
        let mut state = self.lock();
        let params = state
            .generation_params
            .get_mut(&id)
            .ok_or_else(|| CoreError::NotFound(format!("campaign {id} has no generation params")))?;
        params.current_offset = params.current_offset.max(offset);
        Ok(())
    }

    async fn delete(&self, id: CampaignId) -> Result<bool> {
        let mut state = self.lock();
        let existed = state.campaigns.remove(&id).is_some();
        state.generation_params.remove(&id);
        state.dns_params.remove(&id);
        state.http_params.remove(&id);
        state.generated.remove(&id);
        state.dns_results.remove(&id);
        state.http_results.remove(&id);
        Ok(existed)
    }
}

#[async_trait]
impl ResultStore for InMemoryArena {
    async fn insert_generated(
        &self,
        campaign_id: CampaignId,
        domains: &[GeneratedDomain],
    ) -> Result<u64> {
        let mut state = self.lock();
        let mut inserted = 0i64;
        {
            let bucket = state.generated.entry(campaign_id).or_default();
            for domain in domains {
                if !bucket.contains_key(&domain.domain_name) {
                    bucket.insert(domain.domain_name.clone(), domain.clone());
                    inserted += 1;
                }
            }
        }
        if let Some(campaign) = state.campaigns.get_mut(&campaign_id) {
            campaign.counters.processed_items += inserted;
            campaign.counters.successful_items += inserted;
            campaign.updated_at = Utc::now();
        }
        Ok(inserted as u64)
    }

    async fn record_dns_results(
        &self,
        campaign_id: CampaignId,
        results: &[DnsValidationResult],
    ) -> Result<()> {
        let mut state = self.lock();
        let mut successful = 0i64;
        let mut failed = 0i64;
        {
            let bucket = state.dns_results.entry(campaign_id).or_default();
            for result in results {
                if bucket.contains_key(&result.domain_name) {
                    continue;
                }
                bucket.insert(result.domain_name.clone(), result.clone());
                if result.status.is_success() {
                    successful += 1;
                } else {
                    failed += 1;
                }
            }
        }
        if let Some(campaign) = state.campaigns.get_mut(&campaign_id) {
            campaign.counters.processed_items += successful + failed;
            campaign.counters.successful_items += successful;
            campaign.counters.failed_items += failed;
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_http_results(
        &self,
        campaign_id: CampaignId,
        results: &[HttpKeywordResult],
    ) -> Result<()> {
        let mut state = self.lock();
        let mut successful = 0i64;
        let mut failed = 0i64;
        {
            let bucket = state.http_results.entry(campaign_id).or_default();
            for result in results {
                if bucket.contains_key(&result.domain_name) {
                    continue;
                }
                bucket.insert(result.domain_name.clone(), result.clone());
                if result.status.is_success() {
                    successful += 1;
                } else {
                    failed += 1;
                }
            }
        }
        if let Some(campaign) = state.campaigns.get_mut(&campaign_id) {
            campaign.counters.processed_items += successful + failed;
            campaign.counters.successful_items += successful;
            campaign.counters.failed_items += failed;
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_generated(
        &self,
        campaign_id: CampaignId,
        after_offset: Option<i64>,
        limit: i64,
    ) -> Result<Vec<GeneratedDomain>> {
        let state = self.lock();
        let mut rows: Vec<GeneratedDomain> = state
            .generated
            .get(&campaign_id)
            .map(|bucket| bucket.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by_key(|d| d.offset_index);
        let after = after_offset.unwrap_or(-1);
        Ok(rows
            .into_iter()
            .filter(|d| (d.offset_index as i64) > after)
            .take(limit.clamp(1, 10_000) as usize)
            .collect())
    }

    async fn list_dns_results(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DnsValidationResult>> {
        let state = self.lock();
        Ok(state
            .dns_results
            .get(&campaign_id)
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|r| after_domain.is_none_or(|a| r.domain_name.as_str() > a))
                    .take(limit.clamp(1, 10_000) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_http_results(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HttpKeywordResult>> {
        let state = self.lock();
        Ok(state
            .http_results
            .get(&campaign_id)
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|r| after_domain.is_none_or(|a| r.domain_name.as_str() > a))
                    .take(limit.clamp(1, 10_000) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn resolved_domains(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let state = self.lock();
        Ok(state
            .dns_results
            .get(&campaign_id)
            .map(|bucket| {
                bucket
                    .values()
                    .filter(|r| r.status.is_success())
                    .filter(|r| after_domain.is_none_or(|a| r.domain_name.as_str() > a))
                    .take(limit.clamp(1, 10_000) as usize)
                    .map(|r| r.domain_name.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn generated_domain_names(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let state = self.lock();
        Ok(state
            .generated
            .get(&campaign_id)
            .map(|bucket| {
                bucket
                    .keys()
                    .filter(|name| after_domain.is_none_or(|a| name.as_str() > a))
                    .take(limit.clamp(1, 10_000) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn content_hash_seen(&self, campaign_id: CampaignId, hash: &str) -> Result<bool> {
        let state = self.lock();
        Ok(state.http_results.get(&campaign_id).is_some_and(|bucket| {
            bucket
                .values()
                .any(|r| r.content_hash.as_deref() == Some(hash))
        }))
    }
}

#[async_trait]
impl GenerationStateStore for InMemoryArena {
    async fn last_offset(&self, config_hash: &str) -> Result<Option<u64>> {
        Ok(self.lock().shared_offsets.get(config_hash).copied())
    }

    async fn advance(
        &self,
        config_hash: &str,
        _normalized: &NormalizedGenerationConfig,
        offset: u64,
    ) -> Result<u64> {
        let mut state = self.lock();
        let entry = state.shared_offsets.entry(config_hash.to_string()).or_insert(0);
        *entry = (*entry).max(offset);
        Ok(*entry)
    }
}

#[async_trait]
impl Directory for InMemoryArena {
    async fn personas_by_ids(&self, ids: &[PersonaId]) -> Result<Vec<Persona>> {
        let state = self.lock();
        let mut personas: Vec<Persona> = state
            .personas
            .iter()
            .filter(|p| p.is_enabled && ids.contains(&p.id))
            .cloned()
            .collect();
        personas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(personas)
    }

    async fn proxies_by_ids(&self, ids: &[ProxyId]) -> Result<Vec<Proxy>> {
        let state = self.lock();
        let mut proxies: Vec<Proxy> = state
            .proxies
            .iter()
            .filter(|p| p.is_enabled && ids.contains(&p.id))
            .cloned()
            .collect();
        proxies.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(proxies)
    }

    async fn keyword_sets_by_ids(&self, ids: &[KeywordSetId]) -> Result<Vec<KeywordSet>> {
        let state = self.lock();
        let mut sets: Vec<KeywordSet> = state
            .keyword_sets
            .iter()
            .filter(|s| s.is_enabled && ids.contains(&s.id))
            .cloned()
            .collect();
        sets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(sets)
    }
}
