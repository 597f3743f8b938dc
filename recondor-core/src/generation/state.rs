//! Shared generation offset state, keyed by config hash. The single source
//! of truth for how far a combinatorial space has been enumerated across all
//! campaigns that share a configuration.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::{CoreError, Result};

use super::hashing::NormalizedGenerationConfig;

#[async_trait]
pub trait GenerationStateStore: Send + Sync {
    async fn last_offset(&self, config_hash: &str) -> Result<Option<u64>>;

    /// Compare-and-advance: the stored offset only ever moves forward.
    /// Returns the offset actually stored after the call, which may be
    /// larger than `offset` when another campaign got further first.
    async fn advance(
        &self,
        config_hash: &str,
        normalized: &NormalizedGenerationConfig,
        offset: u64,
    ) -> Result<u64>;
}

#[derive(Clone)]
pub struct PostgresGenerationStateStore {
    pool: PgPool,
}

impl PostgresGenerationStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GenerationStateStore for PostgresGenerationStateStore {
    async fn last_offset(&self, config_hash: &str) -> Result<Option<u64>> {
        let offset = sqlx::query_scalar::<_, i64>(
            "SELECT last_offset FROM domain_generation_config_states WHERE config_hash = $1",
        )
        .bind(config_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(offset.map(|o| o.max(0) as u64))
    }

    async fn advance(
        &self,
        config_hash: &str,
        normalized: &NormalizedGenerationConfig,
        offset: u64,
    ) -> Result<u64> {
        let config_json = serde_json::to_value(normalized)?;
        let stored = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO domain_generation_config_states (config_hash, config, last_offset, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (config_hash)
            DO UPDATE SET
                last_offset = GREATEST(domain_generation_config_states.last_offset, EXCLUDED.last_offset),
                updated_at = NOW()
            RETURNING last_offset
            "#,
        )
        .bind(config_hash)
        .bind(&config_json)
        .bind(offset as i64)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CoreError::Internal(format!("generation state advance failed: {e}")))?;

        Ok(stored.max(0) as u64)
    }
}
