//! Mutex-serialised job store for tests and single-process development runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use recondor_model::CampaignId;

use crate::{CoreError, Result};

use super::config::{LeaseConfig, RetryConfig};
use super::job::{JobId, JobKind, JobRecord, JobState, NewJob};
use super::queue::{JobStore, ReclaimReport};

pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, JobRecord>>,
    retry: RetryConfig,
    lease: LeaseConfig,
}

impl InMemoryJobStore {
    pub fn new(retry: RetryConfig, lease: LeaseConfig) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            retry,
            lease,
        }
    }

    fn lease_ttl(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.lease.lease_ttl_secs as i64)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<JobId, JobRecord>>> {
        self.jobs
            .lock()
            .map_err(|_| CoreError::Internal("job store mutex poisoned".into()))
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new(RetryConfig::default(), LeaseConfig::default())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord> {
        let record = JobRecord::new(job);
        let mut jobs = self.lock()?;
        jobs.insert(record.id, record.clone());
        Ok(record)
    }

    async fn claim_next(&self, worker_id: &str, kinds: &[JobKind]) -> Result<Option<JobRecord>> {
        let now = Utc::now();
        let mut jobs = self.lock()?;

        let mut candidates: Vec<&JobRecord> = jobs
            .values()
            .filter(|job| kinds.contains(&job.kind()))
            .filter(|job| {
                let due = job.next_execution_at.unwrap_or(job.scheduled_at) <= now;
                let lease_expired = job
                    .locked_at
                    .map(|locked| locked + self.lease_ttl() < now)
                    .unwrap_or(true);
                // The claim bumps `attempts`, so only jobs below the cap are
                // eligible; a reclaimed job at the cap waits for housekeeping.
                job.attempts < job.max_attempts
                    && ((job.state.is_claimable() && due)
                        || (job.state == JobState::Running && lease_expired))
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.scheduled_at
                .cmp(&b.scheduled_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        let Some(id) = candidates.first().map(|job| job.id) else {
            return Ok(None);
        };

        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| CoreError::Internal("claimed job vanished".into()))?;
        job.state = JobState::Running;
        job.attempts += 1;
        job.locked_at = Some(now);
        job.locked_by = Some(worker_id.to_string());
        job.processing_server_id = Some(worker_id.to_string());
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn complete(&self, job_id: JobId) -> Result<()> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.get_mut(&job_id) {
            job.state = JobState::Completed;
            job.locked_at = None;
            job.locked_by = None;
            job.processing_server_id = None;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn fail(&self, job_id: JobId, error: &str, retryable: bool) -> Result<()> {
        let now = Utc::now();
        let mut jobs = self.lock()?;
        let Some(job) = jobs.get_mut(&job_id) else {
            return Ok(());
        };

        job.last_error = Some(error.to_string());
        job.locked_at = None;
        job.locked_by = None;
        job.processing_server_id = None;
        job.updated_at = now;

        if retryable && job.attempts < job.max_attempts {
            let delay_ms = {
                let mut rng = rand::rng();
                self.retry.jittered_delay_ms(job.attempts, &mut rng)
            };
            job.state = JobState::Retry;
            job.next_execution_at = Some(now + ChronoDuration::milliseconds(delay_ms as i64));
        } else {
            job.state = JobState::Failed;
        }
        Ok(())
    }

    async fn heartbeat(&self, job_id: JobId, worker_id: &str) -> Result<()> {
        let mut jobs = self.lock()?;
        match jobs.get_mut(&job_id) {
            Some(job)
                if job.state == JobState::Running
                    && job.locked_by.as_deref() == Some(worker_id) =>
            {
                job.locked_at = Some(Utc::now());
                Ok(())
            }
            _ => Err(CoreError::NotFound(format!(
                "job {job_id} is not running under worker {worker_id}"
            ))),
        }
    }

    async fn release(&self, job_id: JobId, worker_id: &str) -> Result<()> {
        let mut jobs = self.lock()?;
        if let Some(job) = jobs.get_mut(&job_id) {
            if job.state == JobState::Running && job.locked_by.as_deref() == Some(worker_id) {
                job.state = JobState::Queued;
                job.attempts = job.attempts.saturating_sub(1);
                job.locked_at = None;
                job.locked_by = None;
                job.processing_server_id = None;
                job.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<ReclaimReport> {
        let now = Utc::now();
        let ttl = self.lease_ttl();
        let mut jobs = self.lock()?;
        let mut report = ReclaimReport::default();
        for job in jobs.values_mut() {
            let expired = job
                .locked_at
                .map(|locked| locked + ttl < now)
                .unwrap_or(false);
            if job.state != JobState::Running || !expired {
                continue;
            }
            job.locked_at = None;
            job.locked_by = None;
            job.processing_server_id = None;
            job.updated_at = now;
            if job.attempts >= job.max_attempts {
                job.state = JobState::Failed;
                job.last_error = Some("lease expired with no attempts left".into());
                report.exhausted.push(job.clone());
            } else {
                job.state = JobState::Queued;
                job.last_error = Some("lease expired".into());
                report.requeued += 1;
            }
        }
        Ok(report)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.lock()?.get(&job_id).cloned())
    }

    async fn active_job_count(&self, campaign_id: CampaignId) -> Result<u64> {
        Ok(self
            .lock()?
            .values()
            .filter(|job| job.campaign_id == campaign_id)
            .filter(|job| job.state.is_claimable() || job.state == JobState::Running)
            .count() as u64)
    }

    async fn running_job_count(&self, campaign_id: CampaignId) -> Result<u64> {
        Ok(self
            .lock()?
            .values()
            .filter(|job| job.campaign_id == campaign_id && job.state == JobState::Running)
            .count() as u64)
    }

    async fn cancel_pending(&self, campaign_id: CampaignId) -> Result<u64> {
        let now = Utc::now();
        let mut jobs = self.lock()?;
        let mut cancelled = 0u64;
        for job in jobs.values_mut() {
            if job.campaign_id == campaign_id && job.state.is_claimable() {
                job.state = JobState::Failed;
                job.last_error = Some("campaign cancelled".into());
                job.updated_at = now;
                cancelled += 1;
            }
        }
        Ok(cancelled)
    }

    async fn jobs_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<JobRecord>> {
        let jobs = self.lock()?;
        let mut out: Vec<JobRecord> = jobs
            .values()
            .filter(|job| job.campaign_id == campaign_id)
            .cloned()
            .collect();
        out.sort_by_key(|job| job.created_at);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::job::{GenerationJob, JobPayload};

    fn generation_job(campaign_id: CampaignId) -> NewJob {
        NewJob::new(
            JobPayload::Generation(GenerationJob {
                campaign_id,
                batch_size: 10,
            }),
            3,
        )
    }

    #[tokio::test]
    async fn claim_marks_running_and_counts_attempt() {
        let store = InMemoryJobStore::default();
        let campaign = CampaignId::new();
        store.enqueue(generation_job(campaign)).await.unwrap();

        let claimed = store
            .claim_next("w1", &[JobKind::Generation])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.state, JobState::Running);
        assert_eq!(claimed.attempts, 1);
        assert_eq!(claimed.locked_by.as_deref(), Some("w1"));

        // Under a live lease nothing else is claimable.
        assert!(store
            .claim_next("w2", &[JobKind::Generation])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn retryable_failure_schedules_backoff() {
        let store = InMemoryJobStore::default();
        let campaign = CampaignId::new();
        store.enqueue(generation_job(campaign)).await.unwrap();
        let job = store
            .claim_next("w1", &[JobKind::Generation])
            .await
            .unwrap()
            .unwrap();

        store.fail(job.id, "transient", true).await.unwrap();
        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Retry);
        assert!(job.next_execution_at.unwrap() > Utc::now());
        assert_eq!(job.last_error.as_deref(), Some("transient"));
    }

    #[tokio::test]
    async fn exhausted_attempts_are_terminal() {
        let store = InMemoryJobStore::default();
        let campaign = CampaignId::new();
        let record = store
            .enqueue(NewJob::new(
                JobPayload::Generation(GenerationJob {
                    campaign_id: campaign,
                    batch_size: 10,
                }),
                1,
            ))
            .await
            .unwrap();

        store
            .claim_next("w1", &[JobKind::Generation])
            .await
            .unwrap()
            .unwrap();
        store.fail(record.id, "boom", true).await.unwrap();

        let job = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(store.active_job_count(campaign).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn release_requeues_without_consuming_attempt() {
        let store = InMemoryJobStore::default();
        let campaign = CampaignId::new();
        store.enqueue(generation_job(campaign)).await.unwrap();

        let job = store
            .claim_next("w1", &[JobKind::Generation])
            .await
            .unwrap()
            .unwrap();
        store.release(job.id, "w1").await.unwrap();

        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempts, 0);
        assert!(job.locked_by.is_none());
    }

    #[tokio::test]
    async fn reclaim_returns_expired_leases() {
        let store = InMemoryJobStore::new(
            RetryConfig::default(),
            LeaseConfig {
                lease_ttl_secs: 0,
                ..LeaseConfig::default()
            },
        );
        let campaign = CampaignId::new();
        store.enqueue(generation_job(campaign)).await.unwrap();
        let job = store
            .claim_next("w1", &[JobKind::Generation])
            .await
            .unwrap()
            .unwrap();

        // ttl of zero means the lease is expired as soon as it is taken
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let report = store.reclaim_expired().await.unwrap();
        assert_eq!(report.requeued, 1);
        assert!(report.exhausted.is_empty());
        let job = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn expired_lease_cannot_push_attempts_past_the_cap() {
        let store = InMemoryJobStore::new(
            RetryConfig::default(),
            LeaseConfig {
                lease_ttl_secs: 0,
                ..LeaseConfig::default()
            },
        );
        let campaign = CampaignId::new();
        let record = store
            .enqueue(NewJob::new(
                JobPayload::Generation(GenerationJob {
                    campaign_id: campaign,
                    batch_size: 10,
                }),
                1,
            ))
            .await
            .unwrap();

        let claimed = store
            .claim_next("w1", &[JobKind::Generation])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.attempts, 1);

        // The single attempt is spent; even with the lease long expired no
        // worker may claim the job again.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(store
            .claim_next("w2", &[JobKind::Generation])
            .await
            .unwrap()
            .is_none());
        assert!(store
            .claim_next("w3", &[JobKind::Generation])
            .await
            .unwrap()
            .is_none());

        let report = store.reclaim_expired().await.unwrap();
        assert_eq!(report.requeued, 0);
        assert_eq!(report.exhausted.len(), 1);
        assert_eq!(report.exhausted[0].campaign_id, campaign);

        let job = store.get(record.id).await.unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn cancel_pending_spares_running_jobs() {
        let store = InMemoryJobStore::default();
        let campaign = CampaignId::new();
        store.enqueue(generation_job(campaign)).await.unwrap();
        store.enqueue(generation_job(campaign)).await.unwrap();

        let running = store
            .claim_next("w1", &[JobKind::Generation])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.cancel_pending(campaign).await.unwrap(), 1);

        let still_running = store.get(running.id).await.unwrap().unwrap();
        assert_eq!(still_running.state, JobState::Running);
        assert_eq!(store.running_job_count(campaign).await.unwrap(), 1);
    }
}
