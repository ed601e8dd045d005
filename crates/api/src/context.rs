//! Process-wide application context.
//!
//! Constructed once at startup and passed into each handler; torn down at
//! shutdown. Holds the shared store, the executor, the worker pool, and the
//! in-memory map from `query_id` to pool handle used for direct
//! cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use vantage_core::{QueryId, QueryJob};
use vantage_dispatch::{TaskHandle, WorkerPool};
use vantage_engine::QueryExecutor;
use vantage_store::StatusStore;

pub struct AppContext {
    store: Arc<dyn StatusStore>,
    executor: Arc<QueryExecutor>,
    pool: WorkerPool,
    jobs: Mutex<HashMap<QueryId, TaskHandle>>,
}

impl AppContext {
    pub fn new(
        store: Arc<dyn StatusStore>,
        executor: Arc<QueryExecutor>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            store,
            executor,
            pool,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn StatusStore> {
        self.store.clone()
    }

    /// Hand a job to the worker pool and track its handle for cancellation.
    pub fn submit(&self, job: QueryJob) {
        let executor = self.executor.clone();
        let task_job = job.clone();
        let handle = self.pool.submit(move || executor.execute(&task_job));

        let mut jobs = self.jobs.lock().unwrap();
        jobs.retain(|_, h| !h.is_finished());
        jobs.insert(job.query_id, handle);
    }

    /// Best-effort cancellation by id.
    ///
    /// `None` if the id is unknown; `Some(true)` if the job had not started
    /// and will never run; `Some(false)` if it already started (no effect).
    pub fn cancel(&self, query_id: &QueryId) -> Option<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let handle = jobs.get(query_id)?;
        let cancelled = handle.cancel();
        if cancelled || handle.is_finished() {
            jobs.remove(query_id);
        }
        Some(cancelled)
    }
}
