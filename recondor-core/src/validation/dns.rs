//! DNS validation stage: resolves source domains through persona-configured
//! resolvers and classifies each into `resolved | unresolved | timeout |
//! error`. Per-record failures become result rows, never job failures.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::error::ResolveErrorKind;
use hickory_resolver::TokioAsyncResolver;
use recondor_model::{
    DnsPersonaConfig, DnsStatus, DnsValidationResult, EventPayload, Persona, PersonaConfig,
    PersonaId, PersonaKind,
};
use tracing::debug;

use crate::campaign::state_machine;
use crate::campaign::store::CampaignStore;
use crate::directory::Directory;
use crate::events::EventBroadcaster;
use crate::orchestration::job::{DnsValidationJob, JobPayload, JobRecord};
use crate::orchestration::runner::{StageError, StageOutcome, StageRunner};
use crate::results::ResultStore;
use crate::{CoreError, Result};

/// Why a lookup failed, reduced to what classification needs.
#[derive(Clone, Debug)]
pub enum ResolveFailure {
    /// Authoritative negative answer; retrying cannot help.
    NotFound,
    Other(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> std::result::Result<Vec<IpAddr>, ResolveFailure>;
}

/// Builds a resolver from a persona's DNS settings.
pub trait DnsResolverProvider: Send + Sync {
    fn resolver_for(&self, config: &DnsPersonaConfig) -> Result<Arc<dyn DnsResolver>>;
}

pub struct HickoryDnsResolver {
    inner: TokioAsyncResolver,
}

#[async_trait]
impl DnsResolver for HickoryDnsResolver {
    async fn resolve(&self, domain: &str) -> std::result::Result<Vec<IpAddr>, ResolveFailure> {
        match self.inner.lookup_ip(domain).await {
            Ok(lookup) => Ok(lookup.iter().collect()),
            Err(e) => match e.kind() {
                ResolveErrorKind::NoRecordsFound { .. } => Err(ResolveFailure::NotFound),
                _ => Err(ResolveFailure::Other(e.to_string())),
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HickoryResolverProvider;

impl DnsResolverProvider for HickoryResolverProvider {
    fn resolver_for(&self, config: &DnsPersonaConfig) -> Result<Arc<dyn DnsResolver>> {
        let inner = if config.use_system_resolvers || config.resolvers.is_empty() {
            TokioAsyncResolver::tokio_from_system_conf()
                .map_err(|e| CoreError::Internal(format!("system resolver setup failed: {e}")))?
        } else {
            let mut ips = Vec::with_capacity(config.resolvers.len());
            let mut port = 53u16;
            for entry in &config.resolvers {
                if let Ok(addr) = entry.parse::<SocketAddr>() {
                    ips.push(addr.ip());
                    port = addr.port();
                } else {
                    let ip: IpAddr = entry.parse().map_err(|_| {
                        CoreError::Validation(format!("invalid resolver address {entry:?}"))
                    })?;
                    ips.push(ip);
                }
            }
            let group = NameServerConfigGroup::from_ips_clear(&ips, port, true);
            TokioAsyncResolver::tokio(
                ResolverConfig::from_parts(None, Vec::new(), group),
                ResolverOpts::default(),
            )
        };
        Ok(Arc::new(HickoryDnsResolver { inner }))
    }
}

/// Outcome of resolving one domain, retries included.
#[derive(Clone, Debug)]
pub(crate) struct Resolution {
    pub status: DnsStatus,
    pub ip_addresses: Vec<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

/// Resolve with a hard per-attempt timeout. Timeouts and transport errors
/// retry up to `max_attempts`; a negative answer is final on first sight.
pub(crate) async fn resolve_with_retries(
    resolver: &dyn DnsResolver,
    domain: &str,
    timeout: Duration,
    max_attempts: u32,
) -> Resolution {
    let max_attempts = max_attempts.max(1);
    let mut last = Resolution {
        status: DnsStatus::Error,
        ip_addresses: Vec::new(),
        attempts: 0,
        error: None,
    };

    for attempt in 1..=max_attempts {
        last.attempts = attempt;
        match tokio::time::timeout(timeout, resolver.resolve(domain)).await {
            Ok(Ok(ips)) if !ips.is_empty() => {
                last.status = DnsStatus::Resolved;
                last.ip_addresses = ips.iter().map(IpAddr::to_string).collect();
                last.error = None;
                return last;
            }
            Ok(Ok(_)) | Ok(Err(ResolveFailure::NotFound)) => {
                last.status = DnsStatus::Unresolved;
                last.error = None;
                return last;
            }
            Ok(Err(ResolveFailure::Other(message))) => {
                last.status = DnsStatus::Error;
                last.error = Some(message);
            }
            Err(_) => {
                last.status = DnsStatus::Timeout;
                last.error = Some(format!("lookup exceeded {}s", timeout.as_secs()));
            }
        }
    }
    last
}

pub struct DnsValidationRunner {
    campaigns: Arc<dyn CampaignStore>,
    results: Arc<dyn ResultStore>,
    directory: Arc<dyn Directory>,
    provider: Arc<dyn DnsResolverProvider>,
    events: Arc<EventBroadcaster>,
}

impl DnsValidationRunner {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        results: Arc<dyn ResultStore>,
        directory: Arc<dyn Directory>,
        provider: Arc<dyn DnsResolverProvider>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            campaigns,
            results,
            directory,
            provider,
            events,
        }
    }

    fn dns_config(persona: &Persona) -> Option<&DnsPersonaConfig> {
        match &persona.config {
            PersonaConfig::Dns(config) => Some(config),
            PersonaConfig::Http(_) => None,
        }
    }
}

#[async_trait]
impl StageRunner for DnsValidationRunner {
    async fn run(&self, job: &JobRecord) -> std::result::Result<StageOutcome, StageError> {
        let JobPayload::DnsValidation(work) = &job.payload else {
            return Err(StageError::terminal("job payload is not a dns job"));
        };

        let campaign = self
            .campaigns
            .get(work.campaign_id)
            .await
            .map_err(|e| StageError::retryable(format!("campaign lookup failed: {e}")))?
            .ok_or_else(|| StageError::terminal("campaign no longer exists"))?;
        let params = self
            .campaigns
            .dns_params(work.campaign_id)
            .await
            .map_err(|e| StageError::retryable(format!("params lookup failed: {e}")))?
            .ok_or_else(|| StageError::terminal("campaign has no dns params"))?;

        let page = self
            .results
            .list_generated(
                params.source_generation_campaign_id,
                work.cursor,
                i64::from(work.batch_size.max(1)),
            )
            .await
            .map_err(|e| StageError::retryable(format!("source page fetch failed: {e}")))?;

        if page.is_empty() {
            let source = self
                .campaigns
                .get(params.source_generation_campaign_id)
                .await
                .map_err(|e| StageError::retryable(format!("source lookup failed: {e}")))?
                .ok_or_else(|| StageError::terminal("source campaign no longer exists"))?;
            if state_machine::is_terminal(source.status) {
                return Ok(StageOutcome::done());
            }
            // The feed has not caught up; poll again with the same cursor.
            return Ok(StageOutcome {
                next_payload: Some(JobPayload::DnsValidation(work.clone())),
                ..StageOutcome::default()
            });
        }

        let personas: Vec<Persona> = self
            .directory
            .personas_by_ids(&params.persona_ids)
            .await
            .map_err(|e| StageError::retryable(format!("persona lookup failed: {e}")))?
            .into_iter()
            .filter(|p| p.kind() == PersonaKind::Dns)
            .collect();
        if personas.is_empty() {
            return Err(StageError::terminal("no enabled dns personas configured"));
        }

        let mut resolvers: HashMap<PersonaId, Arc<dyn DnsResolver>> = HashMap::new();
        let mut concurrency = 1usize;
        for persona in &personas {
            let Some(config) = Self::dns_config(persona) else {
                continue;
            };
            concurrency = concurrency.max(config.max_concurrent_queries.max(1) as usize);
            let resolver = self
                .provider
                .resolver_for(config)
                .map_err(|e| StageError::retryable(format!("resolver setup failed: {e}")))?;
            resolvers.insert(persona.id, resolver);
        }

        let rotator =
            super::rotation::PersonaRotator::new(personas, params.rotation_interval_seconds)
                .map_err(|e| StageError::terminal(e.to_string()))?;
        let max_attempts = params.retry_attempts.max(1);

        // Build the batch futures up front; a lazy iterator here trips the
        // compiler's higher-ranked lifetime inference on the stream adapter.
        let lookups: Vec<_> = page
            .iter()
            .filter_map(|record| {
                let persona = rotator.current();
                let config = Self::dns_config(persona)?;
                let resolver = Arc::clone(resolvers.get(&persona.id)?);
                let timeout = Duration::from_secs(u64::from(config.query_timeout_seconds.max(1)));
                let domain = record.domain_name.clone();
                let persona_id = persona.id;
                Some(async move {
                    let resolution =
                        resolve_with_retries(resolver.as_ref(), &domain, timeout, max_attempts)
                            .await;
                    (domain, persona_id, resolution)
                })
            })
            .collect();
        let outcomes: Vec<(String, PersonaId, Resolution)> = futures::stream::iter(lookups)
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let now = Utc::now();
        let rows: Vec<DnsValidationResult> = outcomes
            .into_iter()
            .map(|(domain, persona_id, resolution)| DnsValidationResult {
                id: uuid::Uuid::now_v7(),
                campaign_id: work.campaign_id,
                domain_name: domain,
                status: resolution.status,
                ip_addresses: resolution.ip_addresses,
                persona_id: Some(persona_id),
                attempts: resolution.attempts,
                error_message: resolution.error,
                checked_at: now,
            })
            .collect();

        self.results
            .record_dns_results(work.campaign_id, &rows)
            .await
            .map_err(|e| StageError::retryable(format!("result persist failed: {e}")))?;

        let mut total = campaign.counters.processed_items;
        for row in &rows {
            total += 1;
            self.events.publish(
                work.campaign_id,
                EventPayload::DnsValidationResult {
                    domain: row.domain_name.clone(),
                    validation_status: row.status.as_str().into(),
                    ip_addresses: row.ip_addresses.clone(),
                    attempts: row.attempts,
                    persona_id: row.persona_id,
                    total_validated: total,
                },
            );
        }

        let succeeded = rows.iter().filter(|r| r.status.is_success()).count() as u64;
        let cursor = page.last().map(|r| r.offset_index as i64);
        debug!(
            "dns batch for {}: {} domains, {} resolved",
            work.campaign_id,
            rows.len(),
            succeeded
        );

        Ok(StageOutcome {
            processed: rows.len() as u64,
            succeeded,
            failed: rows.len() as u64 - succeeded,
            done: false,
            next_payload: Some(JobPayload::DnsValidation(DnsValidationJob {
                campaign_id: work.campaign_id,
                cursor,
                batch_size: work.batch_size,
            })),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolved_lookup_returns_addresses_on_first_attempt() {
        let mut resolver = MockDnsResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_| Ok(vec!["93.184.216.34".parse().unwrap()]));

        let out =
            resolve_with_retries(&resolver, "example.com", Duration::from_secs(5), 3).await;
        assert_eq!(out.status, DnsStatus::Resolved);
        assert_eq!(out.ip_addresses, vec!["93.184.216.34"]);
        assert_eq!(out.attempts, 1);
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn negative_answer_is_final_without_retries() {
        let mut resolver = MockDnsResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_| Err(ResolveFailure::NotFound));

        let out = resolve_with_retries(&resolver, "nx.example", Duration::from_secs(5), 4).await;
        assert_eq!(out.status, DnsStatus::Unresolved);
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn transport_errors_retry_until_exhausted() {
        let mut resolver = MockDnsResolver::new();
        resolver
            .expect_resolve()
            .times(3)
            .returning(|_| Err(ResolveFailure::Other("connection refused".into())));

        let out = resolve_with_retries(&resolver, "example.com", Duration::from_secs(5), 3).await;
        assert_eq!(out.status, DnsStatus::Error);
        assert_eq!(out.attempts, 3);
        assert_eq!(out.error.as_deref(), Some("connection refused"));
    }

    struct SlowResolver;

    #[async_trait]
    impl DnsResolver for SlowResolver {
        async fn resolve(
            &self,
            _domain: &str,
        ) -> std::result::Result<Vec<IpAddr>, ResolveFailure> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_lookup_classifies_as_timeout() {
        let out =
            resolve_with_retries(&SlowResolver, "slow.example", Duration::from_secs(2), 2).await;
        assert_eq!(out.status, DnsStatus::Timeout);
        assert_eq!(out.attempts, 2);
    }

    #[tokio::test]
    async fn empty_answer_set_is_unresolved() {
        let mut resolver = MockDnsResolver::new();
        resolver.expect_resolve().times(1).returning(|_| Ok(Vec::new()));

        let out = resolve_with_retries(&resolver, "empty.example", Duration::from_secs(5), 3).await;
        assert_eq!(out.status, DnsStatus::Unresolved);
    }
}
