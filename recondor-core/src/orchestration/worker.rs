//! Worker claim loop and the lease housekeeper.

use std::sync::Arc;

use recondor_model::CampaignStatus;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::campaign::service::CampaignService;
use crate::{CoreError, Result};

use super::config::OrchestratorConfig;
use super::job::{JobRecord, JobState, NewJob};
use super::queue::JobStore;
use super::runner::RunnerRegistry;

pub struct CampaignWorker {
    worker_id: String,
    store: Arc<dyn JobStore>,
    registry: Arc<RunnerRegistry>,
    service: Arc<CampaignService>,
    config: OrchestratorConfig,
}

impl CampaignWorker {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn JobStore>,
        registry: Arc<RunnerRegistry>,
        service: Arc<CampaignService>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            registry,
            service,
            config,
        }
    }

    /// Claim loop. Runs until the shutdown signal flips to true; an in-flight
    /// batch always finishes before the loop exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let kinds = self.registry.kinds();
        info!(worker = %self.worker_id, "campaign worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.store.claim_next(&self.worker_id, &kinds).await {
                Ok(Some(job)) => {
                    if let Err(e) = self.process(job).await {
                        error!(worker = %self.worker_id, "job processing error: {e}");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.changed() => {}
                        _ = sleep(self.config.poll_interval()) => {}
                    }
                }
                Err(e) => {
                    error!(worker = %self.worker_id, "claim failed: {e}");
                    sleep(self.config.poll_interval()).await;
                }
            }
        }

        info!(worker = %self.worker_id, "campaign worker stopped");
    }

    async fn process(&self, job: JobRecord) -> Result<()> {
        let campaign_id = job.campaign_id;
        let Some(campaign) = self.service.get(campaign_id).await? else {
            // Orphaned job; nothing to resume it for.
            warn!("job {} references missing campaign {campaign_id}", job.id);
            self.store
                .fail(job.id, "campaign no longer exists", false)
                .await?;
            return Ok(());
        };

        match campaign.status {
            CampaignStatus::Queued => {
                self.service.mark_running(campaign_id).await?;
            }
            CampaignStatus::Running => {}
            CampaignStatus::Pausing | CampaignStatus::Paused => {
                debug!(
                    "releasing job {} for {} campaign {campaign_id}",
                    job.id, campaign.status
                );
                self.store.release(job.id, &self.worker_id).await?;
                self.service.finish_pause_if_idle(campaign_id).await?;
                // The released job is immediately claimable again; back off
                // one poll interval so the gate does not spin.
                sleep(self.config.poll_interval()).await;
                return Ok(());
            }
            CampaignStatus::Cancelled
            | CampaignStatus::Completed
            | CampaignStatus::Failed
            | CampaignStatus::Archived => {
                self.store.fail(job.id, "campaign cancelled", false).await?;
                return Ok(());
            }
            CampaignStatus::Pending => {
                // Start was not issued yet; put the job back untouched and
                // back off one poll interval before reclaiming it.
                self.store.release(job.id, &self.worker_id).await?;
                sleep(self.config.poll_interval()).await;
                return Ok(());
            }
        }

        let runner = self.registry.get(job.kind()).ok_or_else(|| {
            CoreError::Internal(format!("no runner registered for kind {}", job.kind()))
        })?;

        let heartbeat = self.spawn_heartbeat(&job);
        let started = tokio::time::Instant::now();
        let result = runner.run(&job).await;
        heartbeat.abort();

        match result {
            Ok(outcome) => {
                self.store.complete(job.id).await?;
                self.service
                    .record_batch(campaign_id, &outcome, started.elapsed())
                    .await?;

                if outcome.done {
                    self.service
                        .on_stage_exhausted(campaign_id, job.kind())
                        .await?;
                } else if let Some(payload) = outcome.next_payload {
                    let mut follow_up = NewJob::new(payload, job.max_attempts);
                    if outcome.processed == 0 {
                        // Empty batch means the source feed has not caught up;
                        // wait one poll interval before looking again.
                        follow_up.scheduled_at = chrono::Utc::now()
                            + chrono::Duration::milliseconds(self.config.poll_interval_ms as i64);
                    }
                    self.store.enqueue(follow_up).await?;
                }

                // A pause requested mid-batch completes once we are the last
                // running job of the campaign.
                self.service.finish_pause_if_idle(campaign_id).await?;
            }
            Err(stage_err) => {
                warn!(
                    "job {} for campaign {campaign_id} failed: {} (retryable={})",
                    job.id, stage_err.message, stage_err.retryable
                );
                self.store
                    .fail(job.id, &stage_err.message, stage_err.retryable)
                    .await?;

                if let Some(updated) = self.store.get(job.id).await? {
                    if updated.state == JobState::Failed {
                        self.service
                            .fail_campaign_if_stalled(campaign_id, &stage_err.message)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn spawn_heartbeat(&self, job: &JobRecord) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let job_id = job.id;
        let worker_id = self.worker_id.clone();
        let interval = self.config.lease.heartbeat_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                ticker.tick().await;
                if let Err(e) = store.heartbeat(job_id, &worker_id).await {
                    warn!("heartbeat for job {job_id} failed: {e}");
                    break;
                }
            }
        })
    }
}

/// Periodically returns expired leases to the queue so crashed workers do not
/// strand jobs. Jobs that expire with no attempts left are failed by the
/// sweep; their campaigns are failed here once nothing else is in flight.
pub async fn run_lease_housekeeper(
    store: Arc<dyn JobStore>,
    service: Arc<CampaignService>,
    config: OrchestratorConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = config.lease.housekeeper_interval();
    info!("lease housekeeper started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            _ = sleep(interval) => {
                match store.reclaim_expired().await {
                    Ok(report) => {
                        if report.total() > 0 {
                            info!(
                                "housekeeper reclaimed {} expired leases ({} exhausted)",
                                report.total(),
                                report.exhausted.len()
                            );
                        }
                        for job in &report.exhausted {
                            let message = job
                                .last_error
                                .as_deref()
                                .unwrap_or("lease expired with no attempts left");
                            if let Err(e) = service
                                .fail_campaign_if_stalled(job.campaign_id, message)
                                .await
                            {
                                error!(
                                    "failed to propagate exhausted job {} to campaign {}: {e}",
                                    job.id, job.campaign_id
                                );
                            }
                        }
                    }
                    Err(e) => error!("lease housekeeping failed: {e}"),
                }
            }
        }
    }

    info!("lease housekeeper stopped");
}
