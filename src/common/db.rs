use crate::config::AppConfig;
use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;

/// Opens the connection pool, retrying a few times since the database
/// container often isn't accepting connections yet right after the
/// service starts.
pub async fn create_database_pool(config: &AppConfig) -> Result<sqlx::PgPool> {
    let mut attempt = 0;
    const MAX_ATTEMPTS: usize = 3;

    loop {
        attempt += 1;
        tracing::info!(attempt, "connecting to postgres");

        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                tracing::info!("postgres connection established");
                return Ok(pool);
            }
            Err(e) if attempt >= MAX_ATTEMPTS => {
                tracing::error!("failed to connect to postgres: {e}");
                return Err(anyhow::anyhow!("failed to connect to postgres after {MAX_ATTEMPTS} attempts: {e}"));
            }
            Err(e) => {
                tracing::warn!("postgres connection attempt {attempt} failed: {e}");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Bootstraps the single-table schema (spec §3 / §4.1 "SQL portability").
/// `table_name` is validated by `AppConfig::from_env` before this runs.
pub async fn bootstrap_schema(pool: &sqlx::PgPool, table_name: &str) -> Result<()> {
    let ddl = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table_name} (
            path         TEXT PRIMARY KEY,
            created_at   BIGINT NOT NULL,
            modified_at  BIGINT NOT NULL,
            size         BIGINT NOT NULL,
            etag         TEXT NOT NULL,
            content      BYTEA,
            meta         TEXT
        )
        "#
    );
    sqlx::query(&ddl).execute(pool).await?;
    Ok(())
}
