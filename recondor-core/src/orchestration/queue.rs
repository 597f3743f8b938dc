use async_trait::async_trait;
use recondor_model::CampaignId;

use crate::Result;

use super::job::{JobId, JobKind, JobRecord, NewJob};

/// What a lease-expiry sweep did: jobs with attempts left go back to the
/// queue, jobs at the attempt cap are failed and reported so the campaign
/// can be failed too.
#[derive(Debug, Default)]
pub struct ReclaimReport {
    pub requeued: u64,
    pub exhausted: Vec<JobRecord>,
}

impl ReclaimReport {
    pub fn total(&self) -> u64 {
        self.requeued + self.exhausted.len() as u64
    }
}

/// Durable job queue with lease semantics. The claim is the only
/// synchronisation point between workers; everything else keys on job id.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord>;

    /// Atomically claim the next eligible job of one of the given kinds.
    /// Eligible: claimable state, due, not under a live lease, and with
    /// attempts left below `max_attempts` (the claim increments `attempts`,
    /// so a claim never pushes the counter past the cap). The claim sets
    /// `running` and stamps the lease fields.
    async fn claim_next(&self, worker_id: &str, kinds: &[JobKind]) -> Result<Option<JobRecord>>;

    /// Mark a running job completed and clear its lease.
    async fn complete(&self, job_id: JobId) -> Result<()>;

    /// Record a failure. Retryable failures below `max_attempts` go back to
    /// `retry` with exponential backoff; everything else is terminal.
    async fn fail(&self, job_id: JobId, error: &str, retryable: bool) -> Result<()>;

    /// Extend the lease of a running job owned by `worker_id`.
    async fn heartbeat(&self, job_id: JobId, worker_id: &str) -> Result<()>;

    /// Return a claimed job to the queue without consuming an attempt. Used
    /// when a worker claims a job whose campaign turned out to be gated.
    async fn release(&self, job_id: JobId, worker_id: &str) -> Result<()>;

    /// Crash recovery sweep. `running` jobs with expired leases go back to
    /// `queued` while they have attempts left; jobs already at the attempt
    /// cap move to `failed` and are returned in the report.
    async fn reclaim_expired(&self) -> Result<ReclaimReport>;

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>>;

    /// Jobs in pending/queued/retry/running for the campaign.
    async fn active_job_count(&self, campaign_id: CampaignId) -> Result<u64>;

    async fn running_job_count(&self, campaign_id: CampaignId) -> Result<u64>;

    /// Fail every non-running job of the campaign with a cancellation error.
    /// In-flight jobs are left to finish cooperatively.
    async fn cancel_pending(&self, campaign_id: CampaignId) -> Result<u64>;

    async fn jobs_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<JobRecord>>;
}
