//! Campaign persistence: the campaigns table plus one parameter table per
//! campaign type.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recondor_model::{
    Campaign, CampaignCounters, CampaignId, CampaignStatus, CampaignType, DnsValidationParams,
    DomainGenerationParams, HttpKeywordParams, HttpSourceType, KeywordSetId, PatternType,
    PersonaId, ProxyId, ProxySelectionStrategy,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{CoreError, Result};

/// Listing filter for the campaign index endpoint.
#[derive(Clone, Debug, Default)]
pub struct CampaignFilter {
    pub status: Option<CampaignStatus>,
    pub campaign_type: Option<CampaignType>,
    pub offset: i64,
    pub limit: i64,
}

#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn insert_generation(
        &self,
        campaign: &Campaign,
        params: &DomainGenerationParams,
    ) -> Result<()>;
    async fn insert_dns(&self, campaign: &Campaign, params: &DnsValidationParams) -> Result<()>;
    async fn insert_http(&self, campaign: &Campaign, params: &HttpKeywordParams) -> Result<()>;

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>>;
    async fn list(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>>;

    async fn generation_params(&self, id: CampaignId) -> Result<Option<DomainGenerationParams>>;
    async fn dns_params(&self, id: CampaignId) -> Result<Option<DnsValidationParams>>;
    async fn http_params(&self, id: CampaignId) -> Result<Option<HttpKeywordParams>>;

    /// Compare-and-set status change. Returns false when the row was not in
    /// `from` anymore; the caller decides whether that is an error.
    async fn set_status(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool>;

    async fn set_error(&self, id: CampaignId, message: &str) -> Result<()>;
    async fn touch_heartbeat(&self, id: CampaignId) -> Result<()>;
    async fn update_rate(
        &self,
        id: CampaignId,
        rate: f64,
        eta: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Raise `total_items` to `total` (monotone). Stages fed by a live
    /// upstream campaign call this as the upstream total grows.
    async fn raise_total_items(&self, id: CampaignId, total: i64) -> Result<()>;

    /// Advance the campaign-local generation offset (monotone).
    async fn advance_generation_offset(&self, id: CampaignId, offset: u64) -> Result<()>;

    async fn delete(&self, id: CampaignId) -> Result<bool>;
}

#[derive(Clone)]
pub struct PostgresCampaignStore {
    pool: PgPool,
}

type CampaignRow = (
    Uuid,                  // id
    String,                // name
    String,                // campaign_type
    String,                // status
    i64,                   // total_items
    i64,                   // processed_items
    i64,                   // successful_items
    i64,                   // failed_items
    DateTime<Utc>,         // created_at
    DateTime<Utc>,         // updated_at
    Option<DateTime<Utc>>, // started_at
    Option<DateTime<Utc>>, // completed_at
    Option<DateTime<Utc>>, // last_heartbeat_at
    Option<String>,        // error_message
    Option<f64>,           // avg_processing_rate
    Option<DateTime<Utc>>, // estimated_completion_at
);

const CAMPAIGN_COLUMNS: &str = "id, name, campaign_type, status, total_items, processed_items, \
     successful_items, failed_items, created_at, updated_at, started_at, completed_at, \
     last_heartbeat_at, error_message, avg_processing_rate, estimated_completion_at";

impl PostgresCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: CampaignRow) -> Result<Campaign> {
        let (
            id,
            name,
            campaign_type,
            status,
            total_items,
            processed_items,
            successful_items,
            failed_items,
            created_at,
            updated_at,
            started_at,
            completed_at,
            last_heartbeat_at,
            error_message,
            avg_processing_rate,
            estimated_completion_at,
        ) = row;

        Ok(Campaign {
            id: CampaignId(id),
            name,
            campaign_type: CampaignType::parse(&campaign_type)?,
            status: CampaignStatus::parse(&status)?,
            counters: CampaignCounters {
                total_items,
                processed_items,
                successful_items,
                failed_items,
            },
            created_at,
            updated_at,
            started_at,
            completed_at,
            last_heartbeat_at,
            error_message,
            avg_processing_rate,
            estimated_completion_at,
        })
    }

    async fn insert_campaign(
        &self,
        tx: &mut sqlx::PgTransaction<'_>,
        campaign: &Campaign,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, name, campaign_type, status,
                total_items, processed_items, successful_items, failed_items,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, 0, 0, 0, NOW(), NOW())
            "#,
        )
        .bind(campaign.id.0)
        .bind(&campaign.name)
        .bind(campaign.campaign_type.as_str())
        .bind(campaign.status.as_str())
        .bind(campaign.counters.total_items)
        .execute(&mut **tx)
        .await
        .map_err(|e| CoreError::Internal(format!("campaign insert failed: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl CampaignStore for PostgresCampaignStore {
    async fn insert_generation(
        &self,
        campaign: &Campaign,
        params: &DomainGenerationParams,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.insert_campaign(&mut tx, campaign).await?;

        sqlx::query(
            r#"
            INSERT INTO domain_generation_params (
                campaign_id, pattern_type, variable_length, character_set,
                constant_string, tld, num_domains_to_generate,
                total_possible_combinations, current_offset, config_hash
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(campaign.id.0)
        .bind(params.pattern_type.as_str())
        .bind(params.variable_length as i32)
        .bind(&params.character_set)
        .bind(&params.constant_string)
        .bind(&params.tld)
        .bind(params.num_domains_to_generate as i64)
        .bind(params.total_possible_combinations as i64)
        .bind(params.current_offset as i64)
        .bind(&params.config_hash)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("generation params insert failed: {e}")))?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_dns(&self, campaign: &Campaign, params: &DnsValidationParams) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.insert_campaign(&mut tx, campaign).await?;

        let persona_ids: Vec<Uuid> = params.persona_ids.iter().map(|p| p.0).collect();
        sqlx::query(
            r#"
            INSERT INTO dns_validation_params (
                campaign_id, source_generation_campaign_id, persona_ids,
                rotation_interval_seconds, processing_speed_per_minute,
                batch_size, retry_attempts
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(campaign.id.0)
        .bind(params.source_generation_campaign_id.0)
        .bind(&persona_ids)
        .bind(params.rotation_interval_seconds as i32)
        .bind(params.processing_speed_per_minute as i32)
        .bind(params.batch_size as i32)
        .bind(params.retry_attempts as i32)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("dns params insert failed: {e}")))?;

        tx.commit().await?;
        Ok(())
    }

    async fn insert_http(&self, campaign: &Campaign, params: &HttpKeywordParams) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        self.insert_campaign(&mut tx, campaign).await?;

        let persona_ids: Vec<Uuid> = params.persona_ids.iter().map(|p| p.0).collect();
        let proxy_ids: Vec<Uuid> = params.proxy_ids.iter().map(|p| p.0).collect();
        let keyword_set_ids: Vec<Uuid> = params.keyword_set_ids.iter().map(|k| k.0).collect();
        let ports: Vec<i32> = params.target_http_ports.iter().map(|p| *p as i32).collect();

        sqlx::query(
            r#"
            INSERT INTO http_keyword_params (
                campaign_id, source_campaign_id, source_type, persona_ids,
                proxy_ids, proxy_selection_strategy, rotation_interval_seconds,
                batch_size, retry_attempts, keyword_set_ids, ad_hoc_keywords,
                target_http_ports
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(campaign.id.0)
        .bind(params.source_campaign_id.0)
        .bind(params.source_type.as_str())
        .bind(&persona_ids)
        .bind(&proxy_ids)
        .bind(params.proxy_selection_strategy.as_str())
        .bind(params.rotation_interval_seconds as i32)
        .bind(params.batch_size as i32)
        .bind(params.retry_attempts as i32)
        .bind(&keyword_set_ids)
        .bind(&params.ad_hoc_keywords)
        .bind(&ports)
        .execute(&mut *tx)
        .await
        .map_err(|e| CoreError::Internal(format!("http params insert failed: {e}")))?;

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: CampaignId) -> Result<Option<Campaign>> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        let row = sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::map_row).transpose()
    }

    async fn list(&self, filter: &CampaignFilter) -> Result<Vec<Campaign>> {
        let sql = format!(
            r#"
            SELECT {CAMPAIGN_COLUMNS}
            FROM campaigns
            WHERE ($1::text IS NULL OR status = $1)
              AND ($2::text IS NULL OR campaign_type = $2)
            ORDER BY created_at DESC
            OFFSET $3 LIMIT $4
            "#
        );
        let rows = sqlx::query_as::<_, CampaignRow>(&sql)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.campaign_type.map(|t| t.as_str()))
            .bind(filter.offset.max(0))
            .bind(filter.limit.clamp(1, 500))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Self::map_row).collect()
    }

    async fn generation_params(&self, id: CampaignId) -> Result<Option<DomainGenerationParams>> {
        let row = sqlx::query_as::<
            _,
            (String, i32, String, String, String, i64, i64, i64, String),
        >(
            r#"
            SELECT pattern_type, variable_length, character_set, constant_string,
                   tld, num_domains_to_generate, total_possible_combinations,
                   current_offset, config_hash
            FROM domain_generation_params
            WHERE campaign_id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(
                pattern_type,
                variable_length,
                character_set,
                constant_string,
                tld,
                num_domains_to_generate,
                total_possible_combinations,
                current_offset,
                config_hash,
            )| {
                Ok(DomainGenerationParams {
                    pattern_type: PatternType::parse(&pattern_type)?,
                    variable_length: variable_length.max(0) as u32,
                    character_set,
                    constant_string,
                    tld,
                    num_domains_to_generate: num_domains_to_generate.max(0) as u64,
                    total_possible_combinations: total_possible_combinations.max(0) as u64,
                    current_offset: current_offset.max(0) as u64,
                    config_hash,
                })
            },
        )
        .transpose()
    }

    async fn dns_params(&self, id: CampaignId) -> Result<Option<DnsValidationParams>> {
        let row = sqlx::query_as::<_, (Uuid, Vec<Uuid>, i32, i32, i32, i32)>(
            r#"
            SELECT source_generation_campaign_id, persona_ids,
                   rotation_interval_seconds, processing_speed_per_minute,
                   batch_size, retry_attempts
            FROM dns_validation_params
            WHERE campaign_id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(source, persona_ids, rotation, speed, batch_size, retry_attempts)| {
                DnsValidationParams {
                    source_generation_campaign_id: CampaignId(source),
                    persona_ids: persona_ids.into_iter().map(PersonaId).collect(),
                    rotation_interval_seconds: rotation.max(0) as u32,
                    processing_speed_per_minute: speed.max(0) as u32,
                    batch_size: batch_size.max(0) as u32,
                    retry_attempts: retry_attempts.max(0) as u32,
                }
            },
        ))
    }

    async fn http_params(&self, id: CampaignId) -> Result<Option<HttpKeywordParams>> {
        type HttpRow = (
            Uuid,
            String,
            Vec<Uuid>,
            Vec<Uuid>,
            String,
            i32,
            i32,
            i32,
            Vec<Uuid>,
            Vec<String>,
            Vec<i32>,
        );
        let row = sqlx::query_as::<_, HttpRow>(
            r#"
            SELECT source_campaign_id, source_type, persona_ids, proxy_ids,
                   proxy_selection_strategy, rotation_interval_seconds,
                   batch_size, retry_attempts, keyword_set_ids, ad_hoc_keywords,
                   target_http_ports
            FROM http_keyword_params
            WHERE campaign_id = $1
            "#,
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(
            |(
                source,
                source_type,
                persona_ids,
                proxy_ids,
                strategy,
                rotation,
                batch_size,
                retry_attempts,
                keyword_set_ids,
                ad_hoc_keywords,
                ports,
            )| {
                Ok(HttpKeywordParams {
                    source_campaign_id: CampaignId(source),
                    source_type: HttpSourceType::parse(&source_type)?,
                    persona_ids: persona_ids.into_iter().map(PersonaId).collect(),
                    proxy_ids: proxy_ids.into_iter().map(ProxyId).collect(),
                    proxy_selection_strategy: ProxySelectionStrategy::parse(&strategy)?,
                    rotation_interval_seconds: rotation.max(0) as u32,
                    batch_size: batch_size.max(0) as u32,
                    retry_attempts: retry_attempts.max(0) as u32,
                    keyword_set_ids: keyword_set_ids.into_iter().map(KeywordSetId).collect(),
                    ad_hoc_keywords,
                    target_http_ports: ports.into_iter().map(|p| p.clamp(0, 65_535) as u16).collect(),
                })
            },
        )
        .transpose()
    }

    async fn set_status(
        &self,
        id: CampaignId,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> Result<bool> {
        let res = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $3,
                started_at = CASE WHEN $3 = 'running' AND started_at IS NULL
                                  THEN NOW() ELSE started_at END,
                completed_at = CASE WHEN $3 IN ('completed','failed','cancelled')
                                    THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id.0)
        .bind(from.as_str())
        .bind(to.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("status update failed: {e}")))?;
        Ok(res.rows_affected() > 0)
    }

    async fn set_error(&self, id: CampaignId, message: &str) -> Result<()> {
        sqlx::query(
            "UPDATE campaigns SET error_message = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.0)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_heartbeat(&self, id: CampaignId) -> Result<()> {
        sqlx::query(
            "UPDATE campaigns SET last_heartbeat_at = NOW(), updated_at = NOW() WHERE id = $1",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_rate(
        &self,
        id: CampaignId,
        rate: f64,
        eta: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET avg_processing_rate = $2,
                estimated_completion_at = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(rate)
        .bind(eta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn raise_total_items(&self, id: CampaignId, total: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE campaigns
            SET total_items = GREATEST(total_items, $2),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn advance_generation_offset(&self, id: CampaignId, offset: u64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE domain_generation_params
            SET current_offset = GREATEST(current_offset, $2)
            WHERE campaign_id = $1
            "#,
        )
        .bind(id.0)
        .bind(offset as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, id: CampaignId) -> Result<bool> {
        // Params and result rows cascade from the campaigns FK.
        let res = sqlx::query("DELETE FROM campaigns WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }
}
