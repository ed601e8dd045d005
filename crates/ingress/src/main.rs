use std::sync::Arc;

use anyhow::Context;

use vantage_dispatch::{PoolConfig, WorkerPool};
use vantage_engine::{EngineConfig, PgCatalog, PgSourceConfig, QueryExecutor};
use vantage_ingress::{Consumer, ConsumerConfig, RedisJobStream, StreamConfig};
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
    let stream = RedisJobStream::connect(&redis_url, StreamConfig::default())
        .context("failed to connect to the job stream")?;
    let consumer = Consumer::new(stream, pool, executor, store, ConsumerConfig::default());

    // The read loop blocks with bounded timeouts; keep it off the async
    // runtime's workers.
    tokio::task::spawn_blocking(move || consumer.run()).await??;
    Ok(())
}
