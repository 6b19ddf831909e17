use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::offsets::models::StoredOffset;
use crate::offsets::repositories::OffsetRepository;
use ghtap_common::error::{TapError, TapResult};

#[derive(Clone)]
pub struct PgOffsetRepository {
    pool: PgPool,
}

impl PgOffsetRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: sqlx::postgres::PgRow) -> TapResult<StoredOffset> {
        Ok(StoredOffset {
            id: row.get("id"),
            owner: row.get("owner"),
            repository: row.get("repository"),
            offset_value: row.get("offset_value"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl OffsetRepository for PgOffsetRepository {
    async fn load(&self, owner: &str, repository: &str) -> TapResult<Option<StoredOffset>> {
        let row = sqlx::query(
            "select id, owner, repository, offset_value, created_at, updated_at
             from source_offsets
             where owner = $1 and repository = $2",
        )
        .bind(owner)
        .bind(repository)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| TapError::Database(e.to_string()))?;

        match row {
            Some(r) => Ok(Some(Self::map_row(r)?)),
            None => Ok(None),
        }
    }

    async fn save(
        &self,
        owner: &str,
        repository: &str,
        offset_value: &serde_json::Value,
    ) -> TapResult<StoredOffset> {
        let row = sqlx::query(
            "insert into source_offsets (id, owner, repository, offset_value, updated_at)
             values ($1, $2, $3, $4, $5)
             on conflict (owner, repository)
             do update set offset_value = excluded.offset_value, updated_at = excluded.updated_at
             returning id, owner, repository, offset_value, created_at, updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(repository)
        .bind(offset_value)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| TapError::Database(e.to_string()))?;

        Self::map_row(row)
    }
}
