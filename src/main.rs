mod application;
mod common;
mod config;
mod domain;
mod infrastructure;
mod interfaces;

use crate::common::db::{bootstrap_schema, create_database_pool};
use crate::common::state::AppState;
use crate::config::AppConfig;
use crate::infrastructure::repositories::pg_vfs::PgVfs;
use crate::interfaces::middleware::auth::require_basic_auth;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()?;
    let pool = create_database_pool(&config).await?;
    bootstrap_schema(&pool, &config.table_name).await?;

    let vfs = Arc::new(PgVfs::new(pool, config.table_name.clone()));
    let config = Arc::new(config);
    let state = Arc::new(AppState { vfs, config: config.clone() });

    let mut app: Router<Arc<AppState>> = interfaces::api::webdav::router();
    if config.credentials.is_some() {
        app = app.layer(axum::middleware::from_fn_with_state(config.clone(), require_basic_auth));
    }

    let app = app
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
    tracing::info!(port = config.port, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}
