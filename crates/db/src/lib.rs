pub mod offsets;

use ghtap_common::error::{TapError, TapResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> TapResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| TapError::Database(e.to_string()))
}

/// Create the tables this service owns if they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> TapResult<()> {
    sqlx::query(
        "create table if not exists source_offsets (
           id uuid primary key,
           owner text not null,
           repository text not null,
           offset_value jsonb not null,
           created_at timestamptz not null default now(),
           updated_at timestamptz not null default now()
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| TapError::Database(e.to_string()))?;

    sqlx::query(
        "create unique index if not exists source_offsets_partition_uidx
         on source_offsets(owner, repository)",
    )
    .execute(pool)
    .await
    .map_err(|e| TapError::Database(e.to_string()))?;

    Ok(())
}
