//! Result persistence. Counter updates ride in the same transaction as the
//! rows that produced them, so `processed = successful + failed` holds at
//! rest no matter where a worker dies.
//!
//! Writes are first-write-wins per `(campaign_id, domain_name)`: a batch
//! retried after a mid-batch crash re-inserts with `ON CONFLICT DO NOTHING`,
//! which also keeps the counters exact.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recondor_model::{
    CampaignId, DnsStatus, DnsValidationResult, GeneratedDomain, HttpKeywordResult,
    HttpProbeStatus, PersonaId, ProxyId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{CoreError, Result};

#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Bulk-insert generated domains idempotently and advance the campaign's
    /// counters by the number of rows actually inserted. Returns that count.
    async fn insert_generated(
        &self,
        campaign_id: CampaignId,
        domains: &[GeneratedDomain],
    ) -> Result<u64>;

    async fn record_dns_results(
        &self,
        campaign_id: CampaignId,
        results: &[DnsValidationResult],
    ) -> Result<()>;

    async fn record_http_results(
        &self,
        campaign_id: CampaignId,
        results: &[HttpKeywordResult],
    ) -> Result<()>;

    /// Generated rows ordered by offset index, resuming strictly after the
    /// cursor.
    async fn list_generated(
        &self,
        campaign_id: CampaignId,
        after_offset: Option<i64>,
        limit: i64,
    ) -> Result<Vec<GeneratedDomain>>;

    async fn list_dns_results(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DnsValidationResult>>;

    async fn list_http_results(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HttpKeywordResult>>;

    /// Domain names a DNS campaign resolved, paged by name.
    async fn resolved_domains(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<String>>;

    /// Plain generated names, paged by name; source feed for HTTP campaigns
    /// that skip DNS validation.
    async fn generated_domain_names(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<String>>;

    /// Whether a response body hash was already recorded in this campaign.
    async fn content_hash_seen(&self, campaign_id: CampaignId, hash: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct PostgresResultStore {
    pool: PgPool,
}

impl PostgresResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn bump_counters(
        tx: &mut sqlx::PgTransaction<'_>,
        campaign_id: CampaignId,
        processed: i64,
        successful: i64,
        failed: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET processed_items = processed_items + $2,
                successful_items = successful_items + $3,
                failed_items = failed_items + $4,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(campaign_id.0)
        .bind(processed)
        .bind(successful)
        .bind(failed)
        .execute(&mut **tx)
        .await
        .map_err(|e| CoreError::Internal(format!("counter update failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl ResultStore for PostgresResultStore {
    async fn insert_generated(
        &self,
        campaign_id: CampaignId,
        domains: &[GeneratedDomain],
    ) -> Result<u64> {
        if domains.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for domain in domains {
            let res = sqlx::query(
                r#"
                INSERT INTO generated_domains (
                    id, campaign_id, domain_name, offset_index, generated_at
                )
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (campaign_id, domain_name) DO NOTHING
                "#,
            )
            .bind(domain.id)
            .bind(campaign_id.0)
            .bind(&domain.domain_name)
            .bind(domain.offset_index as i64)
            .bind(domain.generated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(format!("generated domain insert failed: {e}")))?;
            inserted += res.rows_affected();
        }

        Self::bump_counters(&mut tx, campaign_id, inserted as i64, inserted as i64, 0).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn record_dns_results(
        &self,
        campaign_id: CampaignId,
        results: &[DnsValidationResult],
    ) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let mut successful = 0i64;
        let mut failed = 0i64;

        for result in results {
            let res = sqlx::query(
                r#"
                INSERT INTO dns_validation_results (
                    id, campaign_id, domain_name, status, ip_addresses,
                    persona_id, attempts, error_message, checked_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ON CONFLICT (campaign_id, domain_name) DO NOTHING
                "#,
            )
            .bind(result.id)
            .bind(campaign_id.0)
            .bind(&result.domain_name)
            .bind(result.status.as_str())
            .bind(&result.ip_addresses)
            .bind(result.persona_id.map(|p| p.0))
            .bind(result.attempts as i32)
            .bind(result.error_message.as_deref())
            .bind(result.checked_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(format!("dns result insert failed: {e}")))?;

            if res.rows_affected() > 0 {
                if result.status.is_success() {
                    successful += 1;
                } else {
                    failed += 1;
                }
            }
        }

        Self::bump_counters(&mut tx, campaign_id, successful + failed, successful, failed)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_http_results(
        &self,
        campaign_id: CampaignId,
        results: &[HttpKeywordResult],
    ) -> Result<()> {
        if results.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        let mut successful = 0i64;
        let mut failed = 0i64;

        for result in results {
            let keywords_json = serde_json::to_value(&result.keywords_found)?;
            let res = sqlx::query(
                r#"
                INSERT INTO http_keyword_results (
                    id, campaign_id, domain_name, status, http_status_code,
                    content_hash, keywords_found, persona_id, proxy_id,
                    attempts, error_message, checked_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                ON CONFLICT (campaign_id, domain_name) DO NOTHING
                "#,
            )
            .bind(result.id)
            .bind(campaign_id.0)
            .bind(&result.domain_name)
            .bind(result.status.as_str())
            .bind(result.http_status_code.map(i32::from))
            .bind(result.content_hash.as_deref())
            .bind(&keywords_json)
            .bind(result.persona_id.map(|p| p.0))
            .bind(result.proxy_id.map(|p| p.0))
            .bind(result.attempts as i32)
            .bind(result.error_message.as_deref())
            .bind(result.checked_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| CoreError::Internal(format!("http result insert failed: {e}")))?;

            if res.rows_affected() > 0 {
                if result.status.is_success() {
                    successful += 1;
                } else {
                    failed += 1;
                }
            }
        }

        Self::bump_counters(&mut tx, campaign_id, successful + failed, successful, failed)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn list_generated(
        &self,
        campaign_id: CampaignId,
        after_offset: Option<i64>,
        limit: i64,
    ) -> Result<Vec<GeneratedDomain>> {
        let rows = sqlx::query_as::<_, (Uuid, String, i64, DateTime<Utc>)>(
            r#"
            SELECT id, domain_name, offset_index, generated_at
            FROM generated_domains
            WHERE campaign_id = $1
              AND offset_index > COALESCE($2, -1)
            ORDER BY offset_index
            LIMIT $3
            "#,
        )
        .bind(campaign_id.0)
        .bind(after_offset)
        .bind(limit.clamp(1, 10_000))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, domain_name, offset_index, generated_at)| GeneratedDomain {
                id,
                campaign_id,
                domain_name,
                offset_index: offset_index.max(0) as u64,
                generated_at,
            })
            .collect())
    }

    async fn list_dns_results(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<DnsValidationResult>> {
        type DnsRow = (
            Uuid,
            String,
            String,
            Vec<String>,
            Option<Uuid>,
            i32,
            Option<String>,
            DateTime<Utc>,
        );
        let rows = sqlx::query_as::<_, DnsRow>(
            r#"
            SELECT id, domain_name, status, ip_addresses, persona_id,
                   attempts, error_message, checked_at
            FROM dns_validation_results
            WHERE campaign_id = $1
              AND ($2::text IS NULL OR domain_name > $2)
            ORDER BY domain_name
            LIMIT $3
            "#,
        )
        .bind(campaign_id.0)
        .bind(after_domain)
        .bind(limit.clamp(1, 10_000))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(id, domain_name, status, ip_addresses, persona_id, attempts, error_message, checked_at)| {
                    Ok(DnsValidationResult {
                        id,
                        campaign_id,
                        domain_name,
                        status: DnsStatus::parse(&status)?,
                        ip_addresses,
                        persona_id: persona_id.map(PersonaId),
                        attempts: attempts.max(0) as u32,
                        error_message,
                        checked_at,
                    })
                },
            )
            .collect()
    }

    async fn list_http_results(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<HttpKeywordResult>> {
        type HttpRow = (
            Uuid,
            String,
            String,
            Option<i32>,
            Option<String>,
            serde_json::Value,
            Option<Uuid>,
            Option<Uuid>,
            i32,
            Option<String>,
            DateTime<Utc>,
        );
        let rows = sqlx::query_as::<_, HttpRow>(
            r#"
            SELECT id, domain_name, status, http_status_code, content_hash,
                   keywords_found, persona_id, proxy_id, attempts,
                   error_message, checked_at
            FROM http_keyword_results
            WHERE campaign_id = $1
              AND ($2::text IS NULL OR domain_name > $2)
            ORDER BY domain_name
            LIMIT $3
            "#,
        )
        .bind(campaign_id.0)
        .bind(after_domain)
        .bind(limit.clamp(1, 10_000))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(
                |(
                    id,
                    domain_name,
                    status,
                    http_status_code,
                    content_hash,
                    keywords_found,
                    persona_id,
                    proxy_id,
                    attempts,
                    error_message,
                    checked_at,
                )| {
                    Ok(HttpKeywordResult {
                        id,
                        campaign_id,
                        domain_name,
                        status: HttpProbeStatus::parse(&status)?,
                        http_status_code: http_status_code
                            .map(|c| c.clamp(0, i32::from(u16::MAX)) as u16),
                        content_hash,
                        keywords_found: serde_json::from_value(keywords_found)?,
                        persona_id: persona_id.map(PersonaId),
                        proxy_id: proxy_id.map(ProxyId),
                        attempts: attempts.max(0) as u32,
                        error_message,
                        checked_at,
                    })
                },
            )
            .collect()
    }

    async fn resolved_domains(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT domain_name
            FROM dns_validation_results
            WHERE campaign_id = $1
              AND status = 'resolved'
              AND ($2::text IS NULL OR domain_name > $2)
            ORDER BY domain_name
            LIMIT $3
            "#,
        )
        .bind(campaign_id.0)
        .bind(after_domain)
        .bind(limit.clamp(1, 10_000))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn generated_domain_names(
        &self,
        campaign_id: CampaignId,
        after_domain: Option<&str>,
        limit: i64,
    ) -> Result<Vec<String>> {
        let rows = sqlx::query_scalar::<_, String>(
            r#"
            SELECT domain_name
            FROM generated_domains
            WHERE campaign_id = $1
              AND ($2::text IS NULL OR domain_name > $2)
            ORDER BY domain_name
            LIMIT $3
            "#,
        )
        .bind(campaign_id.0)
        .bind(after_domain)
        .bind(limit.clamp(1, 10_000))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn content_hash_seen(&self, campaign_id: CampaignId, hash: &str) -> Result<bool> {
        let found = sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT 1
            FROM http_keyword_results
            WHERE campaign_id = $1 AND content_hash = $2
            LIMIT 1
            "#,
        )
        .bind(campaign_id.0)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(found.is_some())
    }
}
