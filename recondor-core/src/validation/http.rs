//! HTTP/keyword validation stage: probes source domains through persona-shaped
//! clients (optionally via a proxy), hashes response bodies, and scans new
//! content for keyword hits.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use recondor_model::{
    EventPayload, HttpKeywordResult, HttpPersonaConfig, HttpProbeStatus, HttpSourceType,
    KeywordMatch, Persona, PersonaConfig, PersonaId, PersonaKind, Proxy, ProxyId,
};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::redirect::Policy;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::campaign::state_machine;
use crate::campaign::store::CampaignStore;
use crate::directory::Directory;
use crate::events::EventBroadcaster;
use crate::orchestration::job::{HttpKeywordJob, JobPayload, JobRecord};
use crate::orchestration::runner::{StageError, StageOutcome, StageRunner};
use crate::results::ResultStore;
use crate::{CoreError, Result};

use super::keywords::KeywordScanner;
use super::rotation::{PersonaRotator, ProxySelector};

/// Probes in flight at once per batch.
const MAX_CONCURRENT_PROBES: usize = 8;

const DEFAULT_PORTS: [u16; 2] = [80, 443];

#[derive(Clone, Debug)]
pub struct FetchedPage {
    pub http_status: u16,
    pub body: String,
}

#[derive(Clone, Debug)]
pub enum FetchFailure {
    Timeout,
    Unreachable(String),
    Other(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchFailure>;
}

/// Builds a fetcher from a persona's request shape and an optional proxy.
pub trait HttpFetcherProvider: Send + Sync {
    fn fetcher_for(
        &self,
        config: &HttpPersonaConfig,
        proxy: Option<&Proxy>,
    ) -> Result<Arc<dyn HttpFetcher>>;
}

pub struct ReqwestFetcher {
    client: reqwest::Client,
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchFailure> {
        let response = self.client.get(url).send().await.map_err(classify_error)?;
        let http_status = response.status().as_u16();
        let body = response.text().await.map_err(classify_error)?;
        Ok(FetchedPage { http_status, body })
    }
}

fn classify_error(e: reqwest::Error) -> FetchFailure {
    if e.is_timeout() {
        FetchFailure::Timeout
    } else if e.is_connect() {
        FetchFailure::Unreachable(e.to_string())
    } else {
        FetchFailure::Other(e.to_string())
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ReqwestFetcherProvider;

impl HttpFetcherProvider for ReqwestFetcherProvider {
    fn fetcher_for(
        &self,
        config: &HttpPersonaConfig,
        proxy: Option<&Proxy>,
    ) -> Result<Arc<dyn HttpFetcher>> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| CoreError::Validation(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| CoreError::Validation(format!("invalid header value: {e}")))?;
            headers.insert(name, value);
        }

        let redirects = if config.follow_redirects {
            Policy::limited(config.max_redirects.max(1) as usize)
        } else {
            Policy::none()
        };
        let mut builder = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(u64::from(
                config.request_timeout_seconds.max(1),
            )))
            .redirect(redirects)
            .danger_accept_invalid_certs(config.allow_insecure_tls);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(&proxy.url)
                .map_err(|e| CoreError::Validation(format!("invalid proxy url: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| CoreError::Internal(format!("http client build failed: {e}")))?;
        Ok(Arc::new(ReqwestFetcher { client }))
    }
}

/// Result of probing one domain across its candidate ports, retries included.
#[derive(Clone, Debug)]
pub(crate) struct ProbeOutcome {
    pub status: HttpProbeStatus,
    pub http_status: Option<u16>,
    pub body: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

fn probe_url(domain: &str, port: u16) -> String {
    let scheme = if port == 443 { "https" } else { "http" };
    format!("{scheme}://{domain}:{port}/")
}

/// Try each candidate port in order; the first fetched page wins. Failures
/// retry the whole port sweep up to `max_attempts`. `timeout` bounds every
/// individual request regardless of client configuration.
pub(crate) async fn probe_with_retries(
    fetcher: &dyn HttpFetcher,
    domain: &str,
    ports: &[u16],
    timeout: Duration,
    max_attempts: u32,
) -> ProbeOutcome {
    let max_attempts = max_attempts.max(1);
    let mut out = ProbeOutcome {
        status: HttpProbeStatus::Error,
        http_status: None,
        body: None,
        attempts: 0,
        error: None,
    };

    for attempt in 1..=max_attempts {
        out.attempts = attempt;
        for port in ports {
            let url = probe_url(domain, *port);
            match tokio::time::timeout(timeout, fetcher.fetch(&url)).await {
                Ok(Ok(page)) => {
                    out.status = HttpProbeStatus::Success;
                    out.http_status = Some(page.http_status);
                    out.body = Some(page.body);
                    out.error = None;
                    return out;
                }
                Ok(Err(FetchFailure::Timeout)) | Err(_) => {
                    out.status = HttpProbeStatus::Timeout;
                    out.error = Some(format!("request to {url} timed out"));
                }
                Ok(Err(FetchFailure::Unreachable(message))) => {
                    out.status = HttpProbeStatus::Unreachable;
                    out.error = Some(message);
                }
                Ok(Err(FetchFailure::Other(message))) => {
                    out.status = HttpProbeStatus::Error;
                    out.error = Some(message);
                }
            }
        }
    }
    out
}

pub struct HttpKeywordRunner {
    campaigns: Arc<dyn CampaignStore>,
    results: Arc<dyn ResultStore>,
    directory: Arc<dyn Directory>,
    provider: Arc<dyn HttpFetcherProvider>,
    events: Arc<EventBroadcaster>,
}

impl HttpKeywordRunner {
    pub fn new(
        campaigns: Arc<dyn CampaignStore>,
        results: Arc<dyn ResultStore>,
        directory: Arc<dyn Directory>,
        provider: Arc<dyn HttpFetcherProvider>,
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

    fn http_config(persona: &Persona) -> Option<&HttpPersonaConfig> {
        match &persona.config {
            PersonaConfig::Http(config) => Some(config),
            PersonaConfig::Dns(_) => None,
        }
    }
}

#[async_trait]
impl StageRunner for HttpKeywordRunner {
    async fn run(&self, job: &JobRecord) -> std::result::Result<StageOutcome, StageError> {
        let JobPayload::HttpKeyword(work) = &job.payload else {
            return Err(StageError::terminal("job payload is not an http job"));
        };

        let campaign = self
            .campaigns
            .get(work.campaign_id)
            .await
            .map_err(|e| StageError::retryable(format!("campaign lookup failed: {e}")))?
            .ok_or_else(|| StageError::terminal("campaign no longer exists"))?;
        let params = self
            .campaigns
            .http_params(work.campaign_id)
            .await
            .map_err(|e| StageError::retryable(format!("params lookup failed: {e}")))?
            .ok_or_else(|| StageError::terminal("campaign has no http params"))?;

        // A DNS-fed campaign trails a source that is still resolving; its
        // total tracks the source's success count as that grows.
        if matches!(params.source_type, HttpSourceType::DnsValidation) {
            let source = self
                .campaigns
                .get(params.source_campaign_id)
                .await
                .map_err(|e| StageError::retryable(format!("source lookup failed: {e}")))?
                .ok_or_else(|| StageError::terminal("source campaign no longer exists"))?;
            if source.counters.successful_items > campaign.counters.total_items {
                self.campaigns
                    .raise_total_items(work.campaign_id, source.counters.successful_items)
                    .await
                    .map_err(|e| StageError::retryable(format!("total refresh failed: {e}")))?;
            }
        }

        let limit = i64::from(work.batch_size.max(1));
        let page = match params.source_type {
            HttpSourceType::DomainGeneration => self
                .results
                .generated_domain_names(params.source_campaign_id, work.cursor.as_deref(), limit)
                .await,
            HttpSourceType::DnsValidation => self
                .results
                .resolved_domains(params.source_campaign_id, work.cursor.as_deref(), limit)
                .await,
        }
        .map_err(|e| StageError::retryable(format!("source page fetch failed: {e}")))?;

        if page.is_empty() {
            let source = self
                .campaigns
                .get(params.source_campaign_id)
                .await
                .map_err(|e| StageError::retryable(format!("source lookup failed: {e}")))?
                .ok_or_else(|| StageError::terminal("source campaign no longer exists"))?;
            if state_machine::is_terminal(source.status) {
                return Ok(StageOutcome::done());
            }
            return Ok(StageOutcome {
                next_payload: Some(JobPayload::HttpKeyword(work.clone())),
                ..StageOutcome::default()
            });
        }

        let personas: Vec<Persona> = self
            .directory
            .personas_by_ids(&params.persona_ids)
            .await
            .map_err(|e| StageError::retryable(format!("persona lookup failed: {e}")))?
            .into_iter()
            .filter(|p| p.kind() == PersonaKind::Http)
            .collect();
        if personas.is_empty() {
            return Err(StageError::terminal("no enabled http personas configured"));
        }

        let proxies = self
            .directory
            .proxies_by_ids(&params.proxy_ids)
            .await
            .map_err(|e| StageError::retryable(format!("proxy lookup failed: {e}")))?;
        if !params.proxy_ids.is_empty() && proxies.is_empty() {
            // Proxies were requested but none are usable right now.
            return Err(StageError::retryable("proxy pool exhausted"));
        }
        let selector = ProxySelector::new(proxies, params.proxy_selection_strategy);

        let keyword_sets = self
            .directory
            .keyword_sets_by_ids(&params.keyword_set_ids)
            .await
            .map_err(|e| StageError::retryable(format!("keyword set lookup failed: {e}")))?;
        let scanner = Arc::new(
            KeywordScanner::new(&keyword_sets, &params.ad_hoc_keywords)
                .map_err(|e| StageError::terminal(e.to_string()))?,
        );

        let rotator = PersonaRotator::new(personas, params.rotation_interval_seconds)
            .map_err(|e| StageError::terminal(e.to_string()))?;
        let ports: Vec<u16> = if params.target_http_ports.is_empty() {
            DEFAULT_PORTS.to_vec()
        } else {
            params.target_http_ports.clone()
        };
        let max_attempts = params.retry_attempts.max(1);

        // One client per (persona, proxy) pair, shared across the batch.
        let mut fetchers: HashMap<(PersonaId, Option<ProxyId>), Arc<dyn HttpFetcher>> =
            HashMap::new();
        let mut probes = Vec::with_capacity(page.len());
        for domain in &page {
            let persona = rotator.current();
            let Some(config) = Self::http_config(persona) else {
                continue;
            };
            let proxy = selector.next();
            let key = (persona.id, proxy.map(|p| p.id));
            let fetcher = match fetchers.get(&key) {
                Some(fetcher) => Arc::clone(fetcher),
                None => {
                    let built = self
                        .provider
                        .fetcher_for(config, proxy)
                        .map_err(|e| StageError::retryable(format!("client setup failed: {e}")))?;
                    fetchers.insert(key, Arc::clone(&built));
                    built
                }
            };
            // Margin over the client timeout so slow bodies still classify as
            // timeouts instead of hanging the batch.
            let timeout = Duration::from_secs(u64::from(config.request_timeout_seconds.max(1)) + 5);
            probes.push((domain.clone(), persona.id, key.1, fetcher, timeout));
        }

        let ports = Arc::new(ports);
        // Materialized up front; a lazy iterator here trips the compiler's
        // higher-ranked lifetime inference on the stream adapter.
        let probe_futures: Vec<_> = probes
            .into_iter()
            .map(|(domain, persona_id, proxy_id, fetcher, timeout)| {
                let ports = Arc::clone(&ports);
                async move {
                    let outcome = probe_with_retries(
                        fetcher.as_ref(),
                        &domain,
                        &ports,
                        timeout,
                        max_attempts,
                    )
                    .await;
                    (domain, persona_id, proxy_id, outcome)
                }
            })
            .collect();
        let outcomes: Vec<(String, PersonaId, Option<ProxyId>, ProbeOutcome)> =
            futures::stream::iter(probe_futures)
                .buffer_unordered(MAX_CONCURRENT_PROBES)
                .collect()
                .await;

        let now = Utc::now();
        let mut rows = Vec::with_capacity(outcomes.len());
        for (domain, persona_id, proxy_id, outcome) in outcomes {
            let (content_hash, keywords_found) = match &outcome.body {
                Some(body) => {
                    let hash = hex::encode(Sha256::digest(body.as_bytes()));
                    let seen = self
                        .results
                        .content_hash_seen(work.campaign_id, &hash)
                        .await
                        .map_err(|e| {
                            StageError::retryable(format!("content hash lookup failed: {e}"))
                        })?;
                    let keywords: Vec<KeywordMatch> = if seen || scanner.is_empty() {
                        Vec::new()
                    } else {
                        scanner.scan(body)
                    };
                    (Some(hash), keywords)
                }
                None => (None, Vec::new()),
            };
            rows.push(HttpKeywordResult {
                id: uuid::Uuid::now_v7(),
                campaign_id: work.campaign_id,
                domain_name: domain,
                status: outcome.status,
                http_status_code: outcome.http_status,
                content_hash,
                keywords_found,
                persona_id: Some(persona_id),
                proxy_id,
                attempts: outcome.attempts,
                error_message: outcome.error,
                checked_at: now,
            });
        }

        self.results
            .record_http_results(work.campaign_id, &rows)
            .await
            .map_err(|e| StageError::retryable(format!("result persist failed: {e}")))?;

        let mut total = campaign.counters.processed_items;
        for row in &rows {
            total += 1;
            self.events.publish(
                work.campaign_id,
                EventPayload::HttpValidationResult {
                    domain: row.domain_name.clone(),
                    validation_status: row.status.as_str().into(),
                    http_status: row.http_status_code,
                    keywords_found: row.keywords_found.clone(),
                    proxy_id: row.proxy_id,
                    total_validated: total,
                },
            );
        }

        let succeeded = rows.iter().filter(|r| r.status.is_success()).count() as u64;
        let cursor = page.last().cloned();
        debug!(
            "http batch for {}: {} domains, {} fetched",
            work.campaign_id,
            rows.len(),
            succeeded
        );

        Ok(StageOutcome {
            processed: rows.len() as u64,
            succeeded,
            failed: rows.len() as u64 - succeeded,
            done: false,
            next_payload: Some(JobPayload::HttpKeyword(HttpKeywordJob {
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

    fn page(body: &str) -> FetchedPage {
        FetchedPage {
            http_status: 200,
            body: body.into(),
        }
    }

    #[tokio::test]
    async fn first_reachable_port_wins() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url.starts_with("http://shop.example:80"))
            .times(1)
            .returning(|_| Err(FetchFailure::Unreachable("refused".into())));
        fetcher
            .expect_fetch()
            .withf(|url| url.starts_with("https://shop.example:443"))
            .times(1)
            .returning(|_| Ok(page("<html>ok</html>")));

        let out = probe_with_retries(
            &fetcher,
            "shop.example",
            &[80, 443],
            Duration::from_secs(10),
            3,
        )
        .await;
        assert_eq!(out.status, HttpProbeStatus::Success);
        assert_eq!(out.http_status, Some(200));
        assert_eq!(out.attempts, 1);
    }

    #[tokio::test]
    async fn unreachable_everywhere_exhausts_attempts() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_fetch()
            .times(4)
            .returning(|_| Err(FetchFailure::Unreachable("refused".into())));

        let out = probe_with_retries(
            &fetcher,
            "down.example",
            &[80, 443],
            Duration::from_secs(10),
            2,
        )
        .await;
        assert_eq!(out.status, HttpProbeStatus::Unreachable);
        assert_eq!(out.attempts, 2);
        assert!(out.body.is_none());
    }

    #[tokio::test]
    async fn timeout_failure_classifies_as_timeout() {
        let mut fetcher = MockHttpFetcher::new();
        fetcher
            .expect_fetch()
            .times(1)
            .returning(|_| Err(FetchFailure::Timeout));

        let out =
            probe_with_retries(&fetcher, "slow.example", &[443], Duration::from_secs(10), 1).await;
        assert_eq!(out.status, HttpProbeStatus::Timeout);
        assert!(out.error.as_deref().is_some_and(|e| e.contains("443")));
    }

    #[tokio::test]
    async fn retry_after_transient_failure_succeeds() {
        let mut fetcher = MockHttpFetcher::new();
        let mut calls = 0;
        fetcher.expect_fetch().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Err(FetchFailure::Other("reset by peer".into()))
            } else {
                Ok(page("body"))
            }
        });

        let out =
            probe_with_retries(&fetcher, "flaky.example", &[443], Duration::from_secs(10), 3).await;
        assert_eq!(out.status, HttpProbeStatus::Success);
        assert_eq!(out.attempts, 2);
    }

    #[test]
    fn non_tls_ports_use_plain_http() {
        assert_eq!(probe_url("a.example", 8080), "http://a.example:8080/");
        assert_eq!(probe_url("a.example", 443), "https://a.example:443/");
    }
}
