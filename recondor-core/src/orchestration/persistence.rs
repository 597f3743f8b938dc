//! Postgres-backed job store. Claims go through `FOR UPDATE SKIP LOCKED` so
//! racing workers never observe the same job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rng;
use recondor_model::CampaignId;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{CoreError, Result};

use super::config::{LeaseConfig, RetryConfig};
use super::job::{JobId, JobKind, JobPayload, JobRecord, JobState, NewJob};
use super::queue::{JobStore, ReclaimReport};

#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
    retry: RetryConfig,
    lease: LeaseConfig,
}

type JobRow = (
    Uuid,                      // id
    Uuid,                      // campaign_id
    serde_json::Value,         // payload
    String,                    // state
    i32,                       // attempts
    i32,                       // max_attempts
    DateTime<Utc>,             // scheduled_at
    Option<DateTime<Utc>>,     // next_execution_at
    Option<String>,            // last_error
    Option<DateTime<Utc>>,     // locked_at
    Option<String>,            // locked_by
    Option<String>,            // processing_server_id
    DateTime<Utc>,             // created_at
    DateTime<Utc>,             // updated_at
);

const JOB_COLUMNS: &str = "id, campaign_id, payload, state, attempts, max_attempts, \
     scheduled_at, next_execution_at, last_error, locked_at, locked_by, \
     processing_server_id, created_at, updated_at";

impl PostgresJobStore {
    /// Connect and verify the schema is migrated far enough to dequeue.
    pub async fn new(pool: PgPool, retry: RetryConfig, lease: LeaseConfig) -> Result<Self> {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| {
                CoreError::Internal(format!("job store failed Postgres health check: {e}"))
            })?;
        info!("job store connected to Postgres");

        let idx_exists = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT 1
            FROM pg_indexes
            WHERE schemaname = 'public'
              AND indexname = $1
            LIMIT 1
            "#,
        )
        .bind("idx_campaign_jobs_claim")
        .fetch_optional(&pool)
        .await
        .map_err(|e| CoreError::Internal(format!("job store schema validation failed: {e}")))?
        .is_some();

        if !idx_exists {
            return Err(CoreError::Internal(
                "Required index idx_campaign_jobs_claim is missing; run migrations".into(),
            ));
        }

        Ok(Self { pool, retry, lease })
    }

    fn map_row(row: JobRow) -> Result<JobRecord> {
        let (
            id,
            campaign_id,
            payload,
            state,
            attempts,
            max_attempts,
            scheduled_at,
            next_execution_at,
            last_error,
            locked_at,
            locked_by,
            processing_server_id,
            created_at,
            updated_at,
        ) = row;

        let payload: JobPayload = serde_json::from_value(payload)
            .map_err(|e| CoreError::Internal(format!("failed to deserialize job payload: {e}")))?;
        let state = JobState::parse(&state)
            .ok_or_else(|| CoreError::Internal(format!("queue returned unknown state {state}")))?;

        Ok(JobRecord {
            id: JobId(id),
            campaign_id: CampaignId(campaign_id),
            payload,
            state,
            attempts: attempts.max(0) as u16,
            max_attempts: max_attempts.max(0) as u16,
            scheduled_at,
            next_execution_at,
            last_error,
            locked_at,
            locked_by,
            processing_server_id,
            created_at,
            updated_at,
        })
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobRecord> {
        let record = JobRecord::new(job);
        let payload_json = serde_json::to_value(&record.payload)
            .map_err(|e| CoreError::Internal(format!("failed to serialize job payload: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO campaign_jobs (
                id, campaign_id, kind, payload, state, attempts, max_attempts,
                scheduled_at, next_execution_at, last_error,
                locked_at, locked_by, processing_server_id, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6, NULL, NULL, NULL, NULL, NULL, NOW(), NOW())
            "#,
        )
        .bind(record.id.0)
        .bind(record.campaign_id.0)
        .bind(record.kind().as_str())
        .bind(&payload_json)
        .bind(i32::from(record.max_attempts))
        .bind(record.scheduled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("enqueue insert failed: {e}")))?;

        info!("enqueue accepted new job {}", record.id);
        Ok(record)
    }

    async fn claim_next(&self, worker_id: &str, kinds: &[JobKind]) -> Result<Option<JobRecord>> {
        let kind_strs: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();

        // Single statement: pick under SKIP LOCKED and stamp the lease in the
        // same snapshot, so two workers can never return the same row.
        let sql = format!(
            r#"
            WITH next AS (
                SELECT id
                FROM campaign_jobs
                WHERE kind = ANY($1)
                  AND attempts < max_attempts
                  AND (
                    (state IN ('pending','queued','retry')
                       AND COALESCE(next_execution_at, scheduled_at) <= NOW())
                    OR (state = 'running'
                       AND locked_at IS NOT NULL
                       AND locked_at + ($2::bigint) * INTERVAL '1 second' < NOW())
                  )
                ORDER BY scheduled_at, id
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE campaign_jobs j
            SET state = 'running',
                attempts = j.attempts + 1,
                locked_at = NOW(),
                locked_by = $3,
                processing_server_id = $3,
                updated_at = NOW()
            FROM next
            WHERE j.id = next.id
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(&kind_strs)
            .bind(self.lease.lease_ttl_secs as i64)
            .bind(worker_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("claim_next failed: {e}")))?;

        row.map(Self::map_row).transpose()
    }

    async fn complete(&self, job_id: JobId) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET state = 'completed',
                locked_at = NULL,
                locked_by = NULL,
                processing_server_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND state = 'running'
            "#,
        )
        .bind(job_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("complete update failed: {e}")))?;

        if res.rows_affected() > 0 {
            info!("completed job {job_id}");
        }
        Ok(())
    }

    async fn fail(&self, job_id: JobId, error: &str, retryable: bool) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Internal(format!("begin fail tx failed: {e}")))?;

        let row = sqlx::query_as::<_, (i32, i32)>(
            r#"
            SELECT attempts, max_attempts
            FROM campaign_jobs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(job_id.0)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("fail select failed: {e}")))?;

        let Some((attempts, max_attempts)) = row else {
            drop(tx);
            return Ok(());
        };

        if retryable && attempts < max_attempts {
            let delay_ms = {
                let mut rng = rng();
                self.retry.jittered_delay_ms(attempts.max(0) as u16, &mut rng)
            };

            sqlx::query(
                r#"
                UPDATE campaign_jobs
                SET state = 'retry',
                    locked_at = NULL,
                    locked_by = NULL,
                    processing_server_id = NULL,
                    last_error = $2,
                    next_execution_at = NOW() + ($3::bigint) * INTERVAL '1 millisecond',
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job_id.0)
            .bind(error)
            .bind(delay_ms as i64)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(format!("fail retry update failed: {e}")))?;

            tx.commit()
                .await
                .map_err(|e| CoreError::Internal(format!("fail tx commit failed: {e}")))?;

            warn!(
                "job {job_id} failed retryable; attempts now {attempts}; scheduled retry"
            );
        } else {
            sqlx::query(
                r#"
                UPDATE campaign_jobs
                SET state = 'failed',
                    locked_at = NULL,
                    locked_by = NULL,
                    processing_server_id = NULL,
                    last_error = $2,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(job_id.0)
            .bind(error)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(format!("fail terminal update failed: {e}")))?;

            tx.commit()
                .await
                .map_err(|e| CoreError::Internal(format!("fail tx commit failed: {e}")))?;

            warn!("job {job_id} moved to failed after {attempts} attempts");
        }
        Ok(())
    }

    async fn heartbeat(&self, job_id: JobId, worker_id: &str) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET locked_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND state = 'running' AND locked_by = $2
            "#,
        )
        .bind(job_id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("heartbeat update failed: {e}")))?;

        if res.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!(
                "job {job_id} is not running under worker {worker_id}"
            )));
        }
        Ok(())
    }

    async fn release(&self, job_id: JobId, worker_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET state = 'queued',
                attempts = GREATEST(attempts - 1, 0),
                locked_at = NULL,
                locked_by = NULL,
                processing_server_id = NULL,
                updated_at = NOW()
            WHERE id = $1 AND state = 'running' AND locked_by = $2
            "#,
        )
        .bind(job_id.0)
        .bind(worker_id)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("release update failed: {e}")))?;
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<ReclaimReport> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| CoreError::Internal(format!("begin reclaim tx failed: {e}")))?;

        // Jobs at the attempt cap have nothing left to retry with; they go
        // terminal here instead of back to the queue.
        let exhaust_sql = format!(
            r#"
            UPDATE campaign_jobs
            SET state = 'failed',
                locked_at = NULL,
                locked_by = NULL,
                processing_server_id = NULL,
                last_error = 'lease expired with no attempts left',
                updated_at = NOW()
            WHERE state = 'running'
              AND attempts >= max_attempts
              AND locked_at IS NOT NULL
              AND locked_at + ($1::bigint) * INTERVAL '1 second' < NOW()
            RETURNING {JOB_COLUMNS}
            "#
        );

        let exhausted_rows = sqlx::query_as::<_, JobRow>(&exhaust_sql)
            .bind(self.lease.lease_ttl_secs as i64)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(format!("lease exhaustion scan failed: {e}")))?;

        let res = sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET state = 'queued',
                locked_at = NULL,
                locked_by = NULL,
                processing_server_id = NULL,
                last_error = COALESCE(last_error, 'lease expired'),
                updated_at = NOW()
            WHERE state = 'running'
              AND locked_at IS NOT NULL
              AND locked_at + ($1::bigint) * INTERVAL '1 second' < NOW()
            "#,
        )
        .bind(self.lease.lease_ttl_secs as i64)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("lease expiry scan failed: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| CoreError::Internal(format!("reclaim tx commit failed: {e}")))?;

        let report = ReclaimReport {
            requeued: res.rows_affected(),
            exhausted: exhausted_rows
                .into_iter()
                .map(Self::map_row)
                .collect::<Result<Vec<_>>>()?,
        };
        if report.total() > 0 {
            warn!(
                "reclaimed {} expired job leases ({} exhausted)",
                report.total(),
                report.exhausted.len()
            );
        }
        Ok(report)
    }

    async fn get(&self, job_id: JobId) -> Result<Option<JobRecord>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM campaign_jobs WHERE id = $1");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job_id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("job lookup failed: {e}")))?;
        row.map(Self::map_row).transpose()
    }

    async fn active_job_count(&self, campaign_id: CampaignId) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)::bigint
            FROM campaign_jobs
            WHERE campaign_id = $1
              AND state IN ('pending','queued','retry','running')
            "#,
        )
        .bind(campaign_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("active job count failed: {e}")))?;
        Ok(count.max(0) as u64)
    }

    async fn running_job_count(&self, campaign_id: CampaignId) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)::bigint
            FROM campaign_jobs
            WHERE campaign_id = $1 AND state = 'running'
            "#,
        )
        .bind(campaign_id.0)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("running job count failed: {e}")))?;
        Ok(count.max(0) as u64)
    }

    async fn cancel_pending(&self, campaign_id: CampaignId) -> Result<u64> {
        let res = sqlx::query(
            r#"
            UPDATE campaign_jobs
            SET state = 'failed',
                last_error = 'campaign cancelled',
                updated_at = NOW()
            WHERE campaign_id = $1
              AND state IN ('pending','queued','retry')
            "#,
        )
        .bind(campaign_id.0)
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("cancel_pending update failed: {e}")))?;
        Ok(res.rows_affected())
    }

    async fn jobs_for_campaign(&self, campaign_id: CampaignId) -> Result<Vec<JobRecord>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM campaign_jobs WHERE campaign_id = $1 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(campaign_id.0)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CoreError::Internal(format!("campaign job listing failed: {e}")))?;
        rows.into_iter().map(Self::map_row).collect()
    }
}
