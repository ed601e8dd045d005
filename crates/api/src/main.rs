use std::sync::Arc;

use anyhow::Context;

use vantage_api::app::build_app;
use vantage_api::context::AppContext;
use vantage_dispatch::{PoolConfig, WorkerPool};
use vantage_engine::{EngineConfig, PgCatalog, PgSourceConfig, QueryExecutor};
use vantage_store::{RedisStatusStore, StatusStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    vantage_observability::init();

    let redis_url =
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let role = std::env::var("VANTAGE_QUERY_ROLE")
        .unwrap_or_else(|_| "vantage_readonly".to_string());
    let schema =
        std::env::var("VANTAGE_SOURCE_SCHEMA").unwrap_or_else(|_| "public".to_string());
    let tables: Vec<String> = std::env::var("VANTAGE_SOURCE_TABLES")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    let workers: usize = std::env::var("VANTAGE_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4);

    let client = Arc::new(redis::Client::open(redis_url.as_str())?);
    let store: Arc<dyn StatusStore> =
        Arc::new(RedisStatusStore::new(client, Default::default()));

    let catalog = Arc::new(PgCatalog::new(
        PgSourceConfig::new(database_url)
            .with_role(role)
            .with_schema(schema)
            .with_tables(tables),
    ));

    let executor = Arc::new(QueryExecutor::new(
        store.clone(),
        catalog,
        tokio::runtime::Handle::current(),
        EngineConfig::default(),
    ));

    let pool = WorkerPool::new(PoolConfig::default().with_workers(workers));
    let ctx = Arc::new(AppContext::new(store, executor, pool));
    let app = build_app(ctx);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080")
        .await
        .context("failed to bind 0.0.0.0:8080")?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
