//! Read-only lookups into the persona, proxy and keyword-set directories.
//! Management of these records happens outside this service; the runners
//! only ever consume enabled entries by id.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use recondor_model::{
    DnsPersonaConfig, HttpPersonaConfig, KeywordRule, KeywordSet, KeywordSetId, Persona,
    PersonaConfig, PersonaId, PersonaKind, Proxy, ProxyId,
};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{CoreError, Result};

#[async_trait]
pub trait Directory: Send + Sync {
    /// Enabled personas among the given ids, in directory order.
    async fn personas_by_ids(&self, ids: &[PersonaId]) -> Result<Vec<Persona>>;

    /// Enabled proxies among the given ids.
    async fn proxies_by_ids(&self, ids: &[ProxyId]) -> Result<Vec<Proxy>>;

    /// Enabled keyword sets among the given ids.
    async fn keyword_sets_by_ids(&self, ids: &[KeywordSetId]) -> Result<Vec<KeywordSet>>;
}

#[derive(Clone)]
pub struct PostgresDirectory {
    pool: PgPool,
}

impl PostgresDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for PostgresDirectory {
    async fn personas_by_ids(&self, ids: &[PersonaId]) -> Result<Vec<Persona>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw_ids: Vec<Uuid> = ids.iter().map(|p| p.0).collect();

        type PersonaRow = (
            Uuid,
            String,
            String,
            serde_json::Value,
            bool,
            DateTime<Utc>,
            DateTime<Utc>,
        );
        let rows = sqlx::query_as::<_, PersonaRow>(
            r#"
            SELECT id, name, kind, config, is_enabled, created_at, updated_at
            FROM personas
            WHERE id = ANY($1) AND is_enabled
            ORDER BY name
            "#,
        )
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, name, kind, config, is_enabled, created_at, updated_at)| {
                let kind = PersonaKind::parse(&kind)?;
                let config = match kind {
                    PersonaKind::Dns => {
                        PersonaConfig::Dns(serde_json::from_value::<DnsPersonaConfig>(config)?)
                    }
                    PersonaKind::Http => {
                        PersonaConfig::Http(serde_json::from_value::<HttpPersonaConfig>(config)?)
                    }
                };
                Ok(Persona {
                    id: PersonaId(id),
                    name,
                    config,
                    is_enabled,
                    created_at,
                    updated_at,
                })
            })
            .collect()
    }

    async fn proxies_by_ids(&self, ids: &[ProxyId]) -> Result<Vec<Proxy>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw_ids: Vec<Uuid> = ids.iter().map(|p| p.0).collect();

        type ProxyRow = (Uuid, String, String, i32, bool, DateTime<Utc>, DateTime<Utc>);
        let rows = sqlx::query_as::<_, ProxyRow>(
            r#"
            SELECT id, name, url, weight, is_enabled, created_at, updated_at
            FROM proxies
            WHERE id = ANY($1) AND is_enabled
            ORDER BY name
            "#,
        )
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, name, url, weight, is_enabled, created_at, updated_at)| Proxy {
                id: ProxyId(id),
                name,
                url,
                weight: weight.max(0) as u32,
                is_enabled,
                created_at,
                updated_at,
            })
            .collect())
    }

    async fn keyword_sets_by_ids(&self, ids: &[KeywordSetId]) -> Result<Vec<KeywordSet>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let raw_ids: Vec<Uuid> = ids.iter().map(|k| k.0).collect();

        type SetRow = (Uuid, String, serde_json::Value, bool, DateTime<Utc>, DateTime<Utc>);
        let rows = sqlx::query_as::<_, SetRow>(
            r#"
            SELECT id, name, rules, is_enabled, created_at, updated_at
            FROM keyword_sets
            WHERE id = ANY($1) AND is_enabled
            ORDER BY name
            "#,
        )
        .bind(&raw_ids)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(id, name, rules, is_enabled, created_at, updated_at)| {
                let rules: Vec<KeywordRule> = serde_json::from_value(rules).map_err(|e| {
                    CoreError::Internal(format!("keyword set {id} has malformed rules: {e}"))
                })?;
                Ok(KeywordSet {
                    id: KeywordSetId(id),
                    name,
                    rules,
                    is_enabled,
                    created_at,
                    updated_at,
                })
            })
            .collect()
    }
}
