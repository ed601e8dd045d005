//! Query executor: drives one job from `Running` to a terminal status.

use std::sync::Arc;
use std::time::Duration;

use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use datafusion::error::DataFusionError;
use datafusion::physical_plan::RecordBatchStream;
use futures::StreamExt;
use thiserror::Error;
use tracing::{error, info, warn};

use vantage_core::{JobStatus, QueryJob, QueryMetadata};
use vantage_store::{StatusStore, StoreError};

use crate::session::{self, SessionScope};
use crate::source::{SourceCatalog, SourceError};

/// Default result chunk size (rows) when the job carries no hint.
const DEFAULT_BATCH_SIZE: usize = 256;

/// Default execution deadline when the job carries no hint.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub default_batch_size: usize,
    pub default_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_BATCH_SIZE,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl EngineConfig {
    pub fn with_default_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size.max(1);
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }
}

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("status store failure: {0}")]
    Store(#[from] StoreError),

    #[error("source attachment failed: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Engine(#[from] DataFusionError),

    #[error("result serialization failed: {0}")]
    Serialize(#[from] ArrowError),

    #[error("query timed out after {seconds}s")]
    Timeout { seconds: u64 },
}

/// Executes query jobs. Every outcome — success, failure, or timeout — lands
/// in the status store; nothing is ever re-raised to the dispatching loop.
pub struct QueryExecutor {
    store: Arc<dyn StatusStore>,
    catalog: Arc<dyn SourceCatalog>,
    runtime: tokio::runtime::Handle,
    config: EngineConfig,
}

impl QueryExecutor {
    /// `runtime` must belong to a multi-threaded runtime; workers block on
    /// it for the duration of each execution.
    pub fn new(
        store: Arc<dyn StatusStore>,
        catalog: Arc<dyn SourceCatalog>,
        runtime: tokio::runtime::Handle,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            runtime,
            config,
        }
    }

    /// Run one job to a terminal status. Occupies the calling worker thread
    /// for the full duration.
    pub fn execute(&self, job: &QueryJob) {
        let query_id = &job.query_id;

        match self.store.get_status(query_id) {
            Ok(Some(status)) if status != JobStatus::Pending => {
                warn!(query_id = %query_id, %status, "resubmitted query id; previous state will be overwritten");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(query_id = %query_id, error = %e, "status lookup failed before execution");
            }
        }

        // Overwrite semantics: wipe any prior record so no stale batch from
        // an earlier execution stays reachable.
        if let Err(e) = self.store.remove(query_id) {
            warn!(query_id = %query_id, error = %e, "failed to clear previous record");
        }
        if let Err(e) = self.store.set_status(query_id, JobStatus::Running) {
            error!(query_id = %query_id, error = %e, "failed to mark job running; dropping job");
            return;
        }

        let timeout = job
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_timeout);

        let outcome = self.runtime.block_on(async {
            match tokio::time::timeout(timeout, self.run(job, timeout)).await {
                Ok(result) => result,
                Err(_) => Err(ExecuteError::Timeout {
                    seconds: timeout.as_secs(),
                }),
            }
        });

        match outcome {
            Ok(metadata) => {
                // Metadata first, terminal flip last: the status must never
                // read completed while a batch or the metadata is missing.
                let finalize = self
                    .store
                    .write_metadata(query_id, &metadata)
                    .and_then(|()| self.store.set_status(query_id, JobStatus::Completed));
                match finalize {
                    Ok(()) => info!(
                        query_id = %query_id,
                        total_rows = metadata.total_rows,
                        total_batches = metadata.total_batches,
                        "query completed"
                    ),
                    Err(e) => error!(query_id = %query_id, error = %e, "failed to finalize completed query"),
                }
            }
            Err(e) => {
                warn!(query_id = %query_id, error = %e, "query failed");
                let record = self
                    .store
                    .set_error(query_id, &e.to_string())
                    .and_then(|()| self.store.set_status(query_id, JobStatus::Failed));
                if let Err(store_err) = record {
                    error!(query_id = %query_id, error = %store_err, "failed to record query failure");
                }
            }
        }
    }

    async fn run(&self, job: &QueryJob, timeout: Duration) -> Result<QueryMetadata, ExecuteError> {
        let batch_size = job
            .batch_size
            .unwrap_or(self.config.default_batch_size)
            .max(1);

        // Dedicated session per invocation; never shared across executions.
        let ctx = session::build_session(batch_size);
        let scope = SessionScope::new(job.allowed_workspace_ids.clone(), timeout);
        self.catalog.register(&ctx, &scope).await?;

        let df = ctx.sql(&job.query).await?;
        let mut stream = df.execute_stream().await?;
        let schema = stream.schema();

        let column_names: Vec<String> =
            schema.fields().iter().map(|f| f.name().clone()).collect();
        let column_types: Vec<String> = schema
            .fields()
            .iter()
            .map(|f| f.data_type().to_string())
            .collect();

        let mut offset: u32 = 0;
        let mut total_rows: u64 = 0;
        let mut est_size_bytes: u64 = 0;

        while let Some(batch) = stream.next().await {
            let batch = batch?;
            for chunk in rechunk(batch, batch_size) {
                if chunk.num_rows() == 0 {
                    continue;
                }
                let bytes = crate::ipc::encode_batch(&chunk)?;
                total_rows += chunk.num_rows() as u64;
                est_size_bytes += bytes.len() as u64;
                self.store.write_batch(&job.query_id, offset, &bytes)?;
                offset += 1;
            }
        }

        Ok(QueryMetadata {
            total_rows,
            total_batches: offset,
            est_size_bytes,
            column_names,
            column_types,
        })
    }
}

/// Split an engine batch into chunks of at most `max_rows` rows so the
/// stored batches honor the requested chunk size.
fn rechunk(batch: RecordBatch, max_rows: usize) -> Vec<RecordBatch> {
    if batch.num_rows() <= max_rows {
        return vec![batch];
    }
    let mut chunks = Vec::with_capacity(batch.num_rows().div_ceil(max_rows));
    let mut offset = 0;
    while offset < batch.num_rows() {
        let len = max_rows.min(batch.num_rows() - offset);
        chunks.push(batch.slice(offset, len));
        offset += len;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use async_trait::async_trait;
    use datafusion::prelude::SessionContext;

    use vantage_core::{QueryId, WorkspaceId};
    use vantage_store::InMemoryStatusStore;

    use crate::source::MemoryCatalog;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    fn rows(ids: &[i64], names: &[&str]) -> RecordBatch {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(Int64Array::from(ids.to_vec())),
                Arc::new(StringArray::from(names.to_vec())),
            ],
        )
        .unwrap()
    }

    fn workspace(s: &str) -> WorkspaceId {
        s.parse().unwrap()
    }

    fn job(id: &str, workspaces: &[&str], query: &str) -> QueryJob {
        QueryJob {
            query_id: id.parse().unwrap(),
            allowed_workspace_ids: workspaces.iter().map(|w| w.parse().unwrap()).collect(),
            query: query.to_string(),
            batch_size: None,
            timeout_seconds: None,
        }
    }

    fn shared_view_catalog() -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        catalog.add_batch("shared_view", &workspace("w1"), rows(&[1, 2], &["a", "b"]));
        catalog.add_batch(
            "shared_view",
            &workspace("w2"),
            rows(&[3, 4, 5], &["c", "d", "e"]),
        );
        catalog
    }

    fn executor(
        catalog: MemoryCatalog,
        handle: tokio::runtime::Handle,
    ) -> (Arc<InMemoryStatusStore>, QueryExecutor) {
        let store = Arc::new(InMemoryStatusStore::new());
        let executor = QueryExecutor::new(
            store.clone(),
            Arc::new(catalog),
            handle,
            EngineConfig::default(),
        );
        (store, executor)
    }

    fn qid(s: &str) -> QueryId {
        s.parse().unwrap()
    }

    #[test]
    fn select_one_completes_with_one_batch() {
        let rt = runtime();
        let (store, executor) = executor(MemoryCatalog::new(), rt.handle().clone());

        executor.execute(&job("abc", &["w1"], "SELECT 1"));

        assert_eq!(
            store.get_status(&qid("abc")).unwrap(),
            Some(JobStatus::Completed)
        );
        let metadata = store.read_metadata(&qid("abc")).unwrap().unwrap();
        assert_eq!(metadata.total_rows, 1);
        assert_eq!(metadata.total_batches, 1);
        assert!(metadata.est_size_bytes > 0);

        let bytes = store.read_batch(&qid("abc"), 0).unwrap().unwrap();
        let decoded = crate::ipc::decode_batches(&bytes).unwrap();
        assert_eq!(decoded.iter().map(RecordBatch::num_rows).sum::<usize>(), 1);
    }

    #[test]
    fn invalid_sql_fails_with_parser_diagnostic() {
        let rt = runtime();
        let (store, executor) = executor(MemoryCatalog::new(), rt.handle().clone());

        executor.execute(&job("bad", &["w1"], "select * froma asdf"));

        assert_eq!(
            store.get_status(&qid("bad")).unwrap(),
            Some(JobStatus::Failed)
        );
        let error = store.get_error(&qid("bad")).unwrap().unwrap();
        assert!(error.contains("SQL"), "unexpected diagnostic: {error}");
        assert!(store.read_metadata(&qid("bad")).unwrap().is_none());
    }

    #[test]
    fn unpredicated_select_sees_only_permitted_workspaces() {
        let rt = runtime();
        let (store, executor) = executor(shared_view_catalog(), rt.handle().clone());

        // No workspace predicate in the query text; scoping happens at the
        // source boundary.
        executor.execute(&job("iso", &["w1"], "SELECT * FROM shared_view"));

        let metadata = store.read_metadata(&qid("iso")).unwrap().unwrap();
        assert_eq!(metadata.total_rows, 2);
        assert_eq!(metadata.column_names, vec!["id", "name"]);
    }

    #[test]
    fn zero_row_result_completes_with_no_batches() {
        let rt = runtime();
        let (store, executor) = executor(shared_view_catalog(), rt.handle().clone());

        executor.execute(&job("none", &["w3"], "SELECT * FROM shared_view"));

        assert_eq!(
            store.get_status(&qid("none")).unwrap(),
            Some(JobStatus::Completed)
        );
        let metadata = store.read_metadata(&qid("none")).unwrap().unwrap();
        assert_eq!(metadata.total_rows, 0);
        assert_eq!(metadata.total_batches, 0);
        assert_eq!(metadata.column_names, vec!["id", "name"]);
        assert!(store.read_batch(&qid("none"), 0).unwrap().is_none());
    }

    #[test]
    fn batch_size_hint_bounds_stored_chunks() {
        let rt = runtime();
        let (store, executor) = executor(shared_view_catalog(), rt.handle().clone());

        let mut job = job("chunked", &["w2"], "SELECT * FROM shared_view");
        job.batch_size = Some(2);
        executor.execute(&job);

        let metadata = store.read_metadata(&qid("chunked")).unwrap().unwrap();
        assert_eq!(metadata.total_rows, 3);
        assert_eq!(metadata.total_batches, 2);
        assert!(store.read_batch(&qid("chunked"), 1).unwrap().is_some());
        assert!(store.read_batch(&qid("chunked"), 2).unwrap().is_none());
    }

    #[test]
    fn resubmission_overwrites_previous_record() {
        let rt = runtime();
        let (store, executor) = executor(shared_view_catalog(), rt.handle().clone());

        let mut first = job("again", &["w2"], "SELECT * FROM shared_view");
        first.batch_size = Some(1);
        executor.execute(&first);
        assert_eq!(store.batch_count(&qid("again")), 3);

        let second = job("again", &["w1"], "SELECT * FROM shared_view");
        executor.execute(&second);

        // Only the second execution's record remains reachable.
        let metadata = store.read_metadata(&qid("again")).unwrap().unwrap();
        assert_eq!(metadata.total_rows, 2);
        assert_eq!(metadata.total_batches, 1);
        assert_eq!(store.batch_count(&qid("again")), 1);
    }

    #[test]
    fn rechunk_splits_on_row_budget() {
        let batch = rows(&[1, 2, 3, 4, 5], &["a", "b", "c", "d", "e"]);
        let chunks = rechunk(batch, 2);
        assert_eq!(
            chunks.iter().map(RecordBatch::num_rows).collect::<Vec<_>>(),
            vec![2, 2, 1]
        );
    }

    struct StalledCatalog;

    #[async_trait]
    impl crate::source::SourceCatalog for StalledCatalog {
        async fn register(
            &self,
            _ctx: &SessionContext,
            _scope: &SessionScope,
        ) -> Result<(), crate::source::SourceError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    #[test]
    fn deadline_is_enforced() {
        let rt = runtime();
        let store = Arc::new(InMemoryStatusStore::new());
        let executor = QueryExecutor::new(
            store.clone(),
            Arc::new(StalledCatalog),
            rt.handle().clone(),
            EngineConfig::default(),
        );

        let mut job = job("slow", &["w1"], "SELECT 1");
        job.timeout_seconds = Some(1);
        executor.execute(&job);

        assert_eq!(
            store.get_status(&qid("slow")).unwrap(),
            Some(JobStatus::Failed)
        );
        let error = store.get_error(&qid("slow")).unwrap().unwrap();
        assert!(error.contains("timed out"), "unexpected error: {error}");
    }
}
