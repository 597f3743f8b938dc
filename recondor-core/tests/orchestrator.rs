//! End-to-end orchestration over the in-memory backends: campaigns are
//! created through the service, jobs flow through real workers, and the
//! assertions check counters, state transitions and the event stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use recondor_core::campaign::service::{CampaignService, CreateDnsCampaign, CreateGenerationCampaign};
use recondor_core::campaign::store::CampaignStore;
use recondor_core::events::EventBroadcaster;
use recondor_core::generation::GenerationRunner;
use recondor_core::memory::InMemoryArena;
use recondor_core::orchestration::{
    CampaignWorker, GenerationJob, InMemoryJobStore, JobKind, JobPayload, JobRecord, JobStore,
    LeaseConfig, NewJob, OrchestratorConfig, RetryConfig, RunnerRegistry, StageError, StageOutcome,
    StageRunner,
};
use recondor_core::results::ResultStore;
use recondor_core::validation::dns::{
    DnsResolver, DnsResolverProvider, DnsValidationRunner, ResolveFailure,
};
use recondor_model::{
    CampaignId, CampaignStatus, DnsPersonaConfig, DnsStatus, PatternType, Persona, PersonaConfig,
    PersonaId,
};
use tokio::sync::watch;

struct Harness {
    arena: Arc<InMemoryArena>,
    jobs: Arc<InMemoryJobStore>,
    events: Arc<EventBroadcaster>,
    service: Arc<CampaignService>,
    config: OrchestratorConfig,
}

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        workers: 1,
        poll_interval_ms: 5,
        retry: RetryConfig {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        },
        lease: LeaseConfig {
            lease_ttl_secs: 60,
            heartbeat_interval_ms: 10_000,
            housekeeper_interval_ms: 10_000,
        },
    }
}

fn harness() -> Harness {
    let config = fast_config();
    let arena = Arc::new(InMemoryArena::new());
    let jobs = Arc::new(InMemoryJobStore::new(config.retry, config.lease));
    let events = Arc::new(EventBroadcaster::default());
    let service = Arc::new(CampaignService::new(
        arena.clone() as Arc<dyn CampaignStore>,
        jobs.clone() as Arc<dyn JobStore>,
        events.clone(),
        config.retry.max_attempts,
    ));
    Harness {
        arena,
        jobs,
        events,
        service,
        config,
    }
}

impl Harness {
    fn generation_registry(&self) -> Arc<RunnerRegistry> {
        let runner = GenerationRunner::new(
            self.arena.clone() as Arc<dyn CampaignStore>,
            self.arena.clone() as Arc<dyn ResultStore>,
            self.arena.clone(),
            self.events.clone(),
        );
        Arc::new(RunnerRegistry::new().register(JobKind::Generation, Arc::new(runner)))
    }

    fn spawn_workers(
        &self,
        registry: Arc<RunnerRegistry>,
        count: usize,
    ) -> (watch::Sender<bool>, Vec<tokio::task::JoinHandle<()>>) {
        let (tx, rx) = watch::channel(false);
        let handles = (0..count)
            .map(|i| {
                let worker = CampaignWorker::new(
                    format!("worker-{i}"),
                    self.jobs.clone() as Arc<dyn JobStore>,
                    registry.clone(),
                    self.service.clone(),
                    self.config,
                );
                tokio::spawn(worker.run(rx.clone()))
            })
            .collect();
        (tx, handles)
    }

    async fn wait_for_status(&self, id: CampaignId, status: CampaignStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(campaign) = self.arena.campaign(id) {
                if campaign.status == status {
                    return;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "campaign {id} never reached {status}, currently {:?}",
                self.arena.campaign(id).map(|c| c.status)
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

fn ten_domain_generation() -> CreateGenerationCampaign {
    CreateGenerationCampaign {
        name: "ten domains".into(),
        pattern_type: PatternType::Prefix,
        variable_length: 1,
        character_set: "abcdefghij".into(),
        constant_string: "shop".into(),
        tld: "com".into(),
        num_domains_to_generate: 0,
    }
}

fn dns_persona(timeout_secs: u32) -> Persona {
    Persona {
        id: PersonaId::new(),
        name: "resolver-a".into(),
        config: PersonaConfig::Dns(DnsPersonaConfig {
            resolvers: vec!["127.0.0.1:53".into()],
            query_timeout_seconds: timeout_secs,
            max_concurrent_queries: 8,
            use_system_resolvers: false,
        }),
        is_enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

#[tokio::test]
async fn generation_campaign_runs_to_completion() {
    let h = harness();
    let campaign = h.service.create_generation(ten_domain_generation()).await.unwrap();
    assert_eq!(campaign.counters.total_items, 10);

    let (shutdown, handles) = h.spawn_workers(h.generation_registry(), 1);
    h.service.start(campaign.id).await.unwrap();
    h.wait_for_status(campaign.id, CampaignStatus::Completed).await;

    let done = h.arena.campaign(campaign.id).unwrap();
    assert_eq!(done.counters.processed_items, 10);
    assert_eq!(done.counters.successful_items, 10);
    assert_eq!(done.counters.failed_items, 0);
    assert_eq!(h.arena.generated_count(campaign.id), 10);
    assert!(done.completed_at.is_some());

    shutdown.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

#[tokio::test]
async fn small_batches_chain_until_the_space_is_exhausted() {
    // 10-combination space in batches of 4 -> 4, 4, 2.
    let h = harness();
    let campaign = h.service.create_generation(ten_domain_generation()).await.unwrap();
    h.service.start(campaign.id).await.unwrap();
    h.service.mark_running(campaign.id).await.unwrap();

    let registry = h.generation_registry();
    let runner = registry.get(JobKind::Generation).unwrap();

    let mut payload = JobPayload::Generation(GenerationJob {
        campaign_id: campaign.id,
        batch_size: 4,
    });
    let mut batches = Vec::new();
    loop {
        let record = h.jobs.enqueue(NewJob::new(payload.clone(), 3)).await.unwrap();
        let outcome = runner.run(&record).await.unwrap();
        batches.push(outcome.processed);
        if outcome.done {
            break;
        }
        payload = outcome.next_payload.expect("continuation payload");
    }

    assert_eq!(batches, vec![4, 4, 2]);
    assert_eq!(h.arena.generated_count(campaign.id), 10);

    // Resuming over the same space finds nothing left to do.
    let record = h
        .jobs
        .enqueue(NewJob::new(
            JobPayload::Generation(GenerationJob {
                campaign_id: campaign.id,
                batch_size: 4,
            }),
            3,
        ))
        .await
        .unwrap();
    let outcome = runner.run(&record).await.unwrap();
    assert!(outcome.done);
    assert_eq!(outcome.processed, 0);
}

#[tokio::test]
async fn sibling_campaign_with_same_config_resumes_from_shared_offset() {
    let h = harness();
    let first = h.service.create_generation(ten_domain_generation()).await.unwrap();
    let (shutdown, handles) = h.spawn_workers(h.generation_registry(), 1);
    h.service.start(first.id).await.unwrap();
    h.wait_for_status(first.id, CampaignStatus::Completed).await;
    shutdown.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    let params = h.arena.generation_params(first.id).await.unwrap().unwrap();
    assert_eq!(h.arena.shared_offset(&params.config_hash), Some(10));

    // Same config: the sibling starts at the shared offset and immediately
    // finds the space exhausted, completing with zero domains.
    let second = h.service.create_generation(ten_domain_generation()).await.unwrap();
    let (shutdown, handles) = h.spawn_workers(h.generation_registry(), 1);
    h.service.start(second.id).await.unwrap();
    h.wait_for_status(second.id, CampaignStatus::Completed).await;
    shutdown.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(h.arena.generated_count(second.id), 0);
}

/// Scripted resolver: two configured domains hang past any timeout, the rest
/// resolve instantly.
struct ScriptedResolver {
    hang: Vec<String>,
}

#[async_trait]
impl DnsResolver for ScriptedResolver {
    async fn resolve(
        &self,
        domain: &str,
    ) -> std::result::Result<Vec<std::net::IpAddr>, ResolveFailure> {
        if self.hang.iter().any(|d| d == domain) {
            tokio::time::sleep(Duration::from_secs(600)).await;
        }
        Ok(vec!["10.0.0.1".parse().unwrap()])
    }
}

struct ScriptedProvider {
    hang: Vec<String>,
}

impl DnsResolverProvider for ScriptedProvider {
    fn resolver_for(
        &self,
        _config: &DnsPersonaConfig,
    ) -> recondor_core::Result<Arc<dyn DnsResolver>> {
        Ok(Arc::new(ScriptedResolver {
            hang: self.hang.clone(),
        }))
    }
}

#[tokio::test]
async fn dns_campaign_completes_despite_timeouts() {
    let h = harness();

    // Source: a completed generation campaign with five domains on record.
    let source = h.service.create_generation(ten_domain_generation()).await.unwrap();
    let domains: Vec<recondor_model::GeneratedDomain> = (0..5)
        .map(|i| {
            recondor_model::GeneratedDomain::new(source.id, format!("d{i}.example.com"), i as u64)
        })
        .collect();
    h.arena.insert_generated(source.id, &domains).await.unwrap();
    h.arena
        .set_status(source.id, CampaignStatus::Pending, CampaignStatus::Queued)
        .await
        .unwrap();
    h.arena
        .set_status(source.id, CampaignStatus::Queued, CampaignStatus::Running)
        .await
        .unwrap();
    h.arena
        .set_status(source.id, CampaignStatus::Running, CampaignStatus::Completed)
        .await
        .unwrap();

    let persona = dns_persona(1);
    let persona_id = persona.id;
    h.arena.add_persona(persona);

    let dns = h
        .service
        .create_dns(CreateDnsCampaign {
            name: "validate".into(),
            source_generation_campaign_id: source.id,
            persona_ids: vec![persona_id],
            rotation_interval_seconds: 0,
            processing_speed_per_minute: 0,
            batch_size: 5,
            retry_attempts: 1,
        })
        .await
        .unwrap();

    let runner = DnsValidationRunner::new(
        h.arena.clone() as Arc<dyn CampaignStore>,
        h.arena.clone() as Arc<dyn ResultStore>,
        h.arena.clone(),
        Arc::new(ScriptedProvider {
            hang: vec!["d1.example.com".into(), "d3.example.com".into()],
        }),
        h.events.clone(),
    );
    let registry =
        Arc::new(RunnerRegistry::new().register(JobKind::DnsValidation, Arc::new(runner)));

    let (shutdown, handles) = h.spawn_workers(registry, 1);
    h.service.start(dns.id).await.unwrap();
    h.wait_for_status(dns.id, CampaignStatus::Completed).await;
    shutdown.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    let done = h.arena.campaign(dns.id).unwrap();
    assert_eq!(done.counters.processed_items, 5);
    assert_eq!(done.counters.successful_items, 3);
    assert_eq!(done.counters.failed_items, 2);

    let rows = h.arena.list_dns_results(dns.id, None, 100).await.unwrap();
    let timeouts: Vec<&str> = rows
        .iter()
        .filter(|r| r.status == DnsStatus::Timeout)
        .map(|r| r.domain_name.as_str())
        .collect();
    assert_eq!(timeouts, vec!["d1.example.com", "d3.example.com"]);
}

struct StubFetcher;

#[async_trait]
impl recondor_core::validation::HttpFetcher for StubFetcher {
    async fn fetch(
        &self,
        _url: &str,
    ) -> std::result::Result<
        recondor_core::validation::FetchedPage,
        recondor_core::validation::FetchFailure,
    > {
        Ok(recondor_core::validation::FetchedPage {
            http_status: 200,
            body: "<html>storefront</html>".into(),
        })
    }
}

struct StubFetcherProvider;

impl recondor_core::validation::HttpFetcherProvider for StubFetcherProvider {
    fn fetcher_for(
        &self,
        _config: &recondor_model::HttpPersonaConfig,
        _proxy: Option<&recondor_model::Proxy>,
    ) -> recondor_core::Result<Arc<dyn recondor_core::validation::HttpFetcher>> {
        Ok(Arc::new(StubFetcher))
    }
}

fn http_persona() -> Persona {
    Persona {
        id: PersonaId::new(),
        name: "browser-a".into(),
        config: PersonaConfig::Http(recondor_model::HttpPersonaConfig {
            user_agent: "recondor-test/1.0".into(),
            headers: vec![],
            request_timeout_seconds: 5,
            follow_redirects: true,
            max_redirects: 3,
            allow_insecure_tls: false,
        }),
        is_enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn resolved(campaign_id: CampaignId, domain: &str) -> recondor_model::DnsValidationResult {
    recondor_model::DnsValidationResult {
        id: uuid::Uuid::now_v7(),
        campaign_id,
        domain_name: domain.into(),
        status: DnsStatus::Resolved,
        ip_addresses: vec!["192.0.2.7".into()],
        persona_id: None,
        attempts: 1,
        error_message: None,
        checked_at: Utc::now(),
    }
}

#[tokio::test]
async fn http_total_follows_late_dns_resolutions() {
    use recondor_core::campaign::service::CreateHttpKeywordCampaign;
    use recondor_core::orchestration::HttpKeywordJob;
    use recondor_model::HttpSourceType;

    let h = harness();

    let generation = h.service.create_generation(ten_domain_generation()).await.unwrap();
    let dns_persona = dns_persona(1);
    let dns_persona_id = dns_persona.id;
    h.arena.add_persona(dns_persona);
    let dns = h
        .service
        .create_dns(CreateDnsCampaign {
            name: "resolve".into(),
            source_generation_campaign_id: generation.id,
            persona_ids: vec![dns_persona_id],
            rotation_interval_seconds: 0,
            processing_speed_per_minute: 0,
            batch_size: 5,
            retry_attempts: 1,
        })
        .await
        .unwrap();

    // One domain resolved at creation time; the http total starts there.
    h.arena
        .record_dns_results(dns.id, &[resolved(dns.id, "a.example.com")])
        .await
        .unwrap();

    let persona = http_persona();
    let persona_id = persona.id;
    h.arena.add_persona(persona);
    let http = h
        .service
        .create_http_keyword(CreateHttpKeywordCampaign {
            name: "scan".into(),
            source_campaign_id: dns.id,
            source_type: HttpSourceType::DnsValidation,
            persona_ids: vec![persona_id],
            proxy_ids: vec![],
            proxy_selection_strategy: Default::default(),
            rotation_interval_seconds: 0,
            batch_size: 10,
            retry_attempts: 1,
            keyword_set_ids: vec![],
            ad_hoc_keywords: vec!["storefront".into()],
            target_http_ports: vec![443],
        })
        .await
        .unwrap();
    assert_eq!(http.counters.total_items, 1);

    // Two more resolutions land after the http campaign was created.
    h.arena
        .record_dns_results(
            dns.id,
            &[
                resolved(dns.id, "b.example.com"),
                resolved(dns.id, "c.example.com"),
            ],
        )
        .await
        .unwrap();

    let runner = recondor_core::validation::HttpKeywordRunner::new(
        h.arena.clone() as Arc<dyn CampaignStore>,
        h.arena.clone() as Arc<dyn ResultStore>,
        h.arena.clone(),
        Arc::new(StubFetcherProvider),
        h.events.clone(),
    );
    let record = h
        .jobs
        .enqueue(NewJob::new(
            JobPayload::HttpKeyword(HttpKeywordJob {
                campaign_id: http.id,
                cursor: None,
                batch_size: 10,
            }),
            3,
        ))
        .await
        .unwrap();
    let outcome = StageRunner::run(&runner, &record).await.unwrap();
    assert_eq!(outcome.processed, 3);

    let refreshed = h.arena.campaign(http.id).unwrap();
    assert_eq!(refreshed.counters.total_items, 3);
    assert!(
        refreshed.counters.processed_items <= refreshed.counters.total_items,
        "processed {} overtook total {}",
        refreshed.counters.processed_items,
        refreshed.counters.total_items
    );
}

/// Runner that always fails retryably; used to drive attempt exhaustion.
struct AlwaysFailing;

#[async_trait]
impl StageRunner for AlwaysFailing {
    async fn run(&self, _job: &JobRecord) -> std::result::Result<StageOutcome, StageError> {
        Err(StageError::retryable("upstream unavailable"))
    }
}

#[tokio::test]
async fn exhausted_attempts_fail_the_campaign_with_an_error() {
    let h = harness();
    let campaign = h.service.create_generation(ten_domain_generation()).await.unwrap();

    let registry =
        Arc::new(RunnerRegistry::new().register(JobKind::Generation, Arc::new(AlwaysFailing)));
    let (shutdown, handles) = h.spawn_workers(registry, 1);
    h.service.start(campaign.id).await.unwrap();
    h.wait_for_status(campaign.id, CampaignStatus::Failed).await;
    shutdown.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    let failed = h.arena.campaign(campaign.id).unwrap();
    assert_eq!(failed.error_message.as_deref(), Some("upstream unavailable"));

    let jobs = h.jobs.jobs_for_campaign(campaign.id).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].attempts, h.config.retry.max_attempts);
}

/// Runner that emits one domain per granted permit; without a permit it
/// reports an empty batch and hands the same payload back. Lets a test
/// control exactly how far a campaign gets before pausing it.
struct GatedRunner {
    arena: Arc<InMemoryArena>,
    permits: Arc<tokio::sync::Semaphore>,
    offset: std::sync::atomic::AtomicU64,
    total: u64,
}

#[async_trait]
impl StageRunner for GatedRunner {
    async fn run(&self, job: &JobRecord) -> std::result::Result<StageOutcome, StageError> {
        use std::sync::atomic::Ordering;

        let Ok(permit) = self.permits.try_acquire() else {
            return Ok(StageOutcome {
                next_payload: Some(job.payload.clone()),
                ..StageOutcome::default()
            });
        };
        permit.forget();

        let offset = self.offset.fetch_add(1, Ordering::SeqCst);
        let domain = recondor_model::GeneratedDomain::new(
            job.campaign_id,
            format!("g{offset}.example.com"),
            offset,
        );
        self.arena
            .insert_generated(job.campaign_id, &[domain])
            .await
            .map_err(|e| StageError::terminal(e.to_string()))?;

        Ok(StageOutcome {
            processed: 1,
            succeeded: 1,
            done: offset + 1 >= self.total,
            next_payload: Some(job.payload.clone()),
            ..StageOutcome::default()
        })
    }
}

#[tokio::test]
async fn paused_campaign_stops_processing_until_resumed() {
    let h = harness();
    let campaign = h.service.create_generation(ten_domain_generation()).await.unwrap();

    // The runner only advances when granted a permit, so the pause always
    // lands mid-campaign regardless of scheduling.
    let permits = Arc::new(tokio::sync::Semaphore::new(0));
    let runner = GatedRunner {
        arena: h.arena.clone(),
        permits: permits.clone(),
        offset: std::sync::atomic::AtomicU64::new(0),
        total: 10,
    };
    let registry = Arc::new(RunnerRegistry::new().register(JobKind::Generation, Arc::new(runner)));
    let (shutdown, handles) = h.spawn_workers(registry, 1);
    h.service.start(campaign.id).await.unwrap();

    permits.add_permits(2);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while h.arena.campaign(campaign.id).unwrap().counters.processed_items < 2 {
        assert!(tokio::time::Instant::now() < deadline, "no batch processed");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    h.service.pause(campaign.id).await.unwrap();
    h.wait_for_status(campaign.id, CampaignStatus::Paused).await;

    // Work is available but the campaign is paused; nothing may run.
    permits.add_permits(8);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        h.arena.campaign(campaign.id).unwrap().counters.processed_items,
        2,
        "paused campaign kept processing"
    );
    assert_eq!(h.jobs.running_job_count(campaign.id).await.unwrap(), 0);

    h.service.resume(campaign.id).await.unwrap();
    h.wait_for_status(campaign.id, CampaignStatus::Completed).await;
    assert_eq!(
        h.arena.campaign(campaign.id).unwrap().counters.processed_items,
        10
    );

    shutdown.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}

/// Forwards to an in-memory store while counting claim calls.
struct CountingJobStore {
    inner: InMemoryJobStore,
    claims: std::sync::atomic::AtomicU64,
}

#[async_trait]
impl JobStore for CountingJobStore {
    async fn enqueue(&self, job: NewJob) -> recondor_core::Result<JobRecord> {
        self.inner.enqueue(job).await
    }

    async fn claim_next(
        &self,
        worker_id: &str,
        kinds: &[JobKind],
    ) -> recondor_core::Result<Option<JobRecord>> {
        self.claims
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        self.inner.claim_next(worker_id, kinds).await
    }

    async fn complete(&self, job_id: recondor_core::orchestration::JobId) -> recondor_core::Result<()> {
        self.inner.complete(job_id).await
    }

    async fn fail(
        &self,
        job_id: recondor_core::orchestration::JobId,
        error: &str,
        retryable: bool,
    ) -> recondor_core::Result<()> {
        self.inner.fail(job_id, error, retryable).await
    }

    async fn heartbeat(
        &self,
        job_id: recondor_core::orchestration::JobId,
        worker_id: &str,
    ) -> recondor_core::Result<()> {
        self.inner.heartbeat(job_id, worker_id).await
    }

    async fn release(
        &self,
        job_id: recondor_core::orchestration::JobId,
        worker_id: &str,
    ) -> recondor_core::Result<()> {
        self.inner.release(job_id, worker_id).await
    }

    async fn reclaim_expired(&self) -> recondor_core::Result<recondor_core::orchestration::ReclaimReport> {
        self.inner.reclaim_expired().await
    }

    async fn get(
        &self,
        job_id: recondor_core::orchestration::JobId,
    ) -> recondor_core::Result<Option<JobRecord>> {
        self.inner.get(job_id).await
    }

    async fn active_job_count(&self, campaign_id: CampaignId) -> recondor_core::Result<u64> {
        self.inner.active_job_count(campaign_id).await
    }

    async fn running_job_count(&self, campaign_id: CampaignId) -> recondor_core::Result<u64> {
        self.inner.running_job_count(campaign_id).await
    }

    async fn cancel_pending(&self, campaign_id: CampaignId) -> recondor_core::Result<u64> {
        self.inner.cancel_pending(campaign_id).await
    }

    async fn jobs_for_campaign(
        &self,
        campaign_id: CampaignId,
    ) -> recondor_core::Result<Vec<JobRecord>> {
        self.inner.jobs_for_campaign(campaign_id).await
    }
}

#[tokio::test]
async fn gated_campaign_claims_are_paced_by_the_poll_interval() {
    let config = OrchestratorConfig {
        poll_interval_ms: 50,
        ..fast_config()
    };
    let arena = Arc::new(InMemoryArena::new());
    let jobs = Arc::new(CountingJobStore {
        inner: InMemoryJobStore::new(config.retry, config.lease),
        claims: std::sync::atomic::AtomicU64::new(0),
    });
    let events = Arc::new(EventBroadcaster::default());
    let service = Arc::new(CampaignService::new(
        arena.clone() as Arc<dyn CampaignStore>,
        jobs.clone() as Arc<dyn JobStore>,
        events.clone(),
        config.retry.max_attempts,
    ));

    // A queued job for a campaign that was never started: the worker must
    // release it and back off instead of spinning on claim/release.
    let campaign = service.create_generation(ten_domain_generation()).await.unwrap();
    jobs.enqueue(NewJob::new(
        JobPayload::Generation(GenerationJob {
            campaign_id: campaign.id,
            batch_size: 4,
        }),
        3,
    ))
    .await
    .unwrap();

    let registry = Arc::new(
        RunnerRegistry::new().register(JobKind::Generation, Arc::new(AlwaysFailing)),
    );
    let (tx, rx) = watch::channel(false);
    let worker = CampaignWorker::new(
        "worker-0",
        jobs.clone() as Arc<dyn JobStore>,
        registry,
        service.clone(),
        config,
    );
    let handle = tokio::spawn(worker.run(rx));

    tokio::time::sleep(Duration::from_millis(300)).await;
    tx.send(true).unwrap();
    handle.await.unwrap();

    // 300ms at a 50ms poll interval allows a handful of claims; an unpaced
    // loop would rack up thousands.
    let claims = jobs.claims.load(std::sync::atomic::Ordering::SeqCst);
    assert!(claims <= 12, "worker spun on a gated campaign: {claims} claims");

    let job = jobs.jobs_for_campaign(campaign.id).await.unwrap().remove(0);
    assert_eq!(job.attempts, 0, "gate releases must refund the attempt");
}

#[tokio::test]
async fn concurrent_workers_never_duplicate_work() {
    let h = harness();
    let campaign = h.service.create_generation(ten_domain_generation()).await.unwrap();

    let (shutdown, handles) = h.spawn_workers(h.generation_registry(), 4);
    h.service.start(campaign.id).await.unwrap();
    h.wait_for_status(campaign.id, CampaignStatus::Completed).await;
    shutdown.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }

    // Exactly the full space, no double-counting from racing claims.
    let done = h.arena.campaign(campaign.id).unwrap();
    assert_eq!(done.counters.processed_items, 10);
    assert_eq!(h.arena.generated_count(campaign.id), 10);
}

#[tokio::test]
async fn event_stream_is_contiguous_through_completion() {
    let h = harness();
    let campaign = h.service.create_generation(ten_domain_generation()).await.unwrap();
    let mut sub = h.events.subscribe(campaign.id, None);

    let (shutdown, handles) = h.spawn_workers(h.generation_registry(), 1);
    h.service.start(campaign.id).await.unwrap();
    h.wait_for_status(campaign.id, CampaignStatus::Completed).await;

    let mut sequences = Vec::new();
    let mut saw_complete = false;
    while !saw_complete {
        let event = tokio::time::timeout(Duration::from_secs(5), sub.live.recv())
            .await
            .expect("event stream stalled")
            .expect("broadcast closed");
        saw_complete = matches!(event.payload, recondor_model::EventPayload::Complete { .. });
        sequences.push(event.sequence_number);
    }

    assert_eq!(sequences.first(), Some(&1));
    for window in sequences.windows(2) {
        assert_eq!(window[1], window[0] + 1, "gap in {sequences:?}");
    }

    shutdown.send(true).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}
