//! Consumer loop: claim, decode, dispatch, and graceful shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use vantage_core::{JobRequest, JobStatus, QueryId, QueryJob};
use vantage_dispatch::{TaskHandle, WaitResult, WorkerPool};
use vantage_engine::QueryExecutor;
use vantage_store::StatusStore;

use crate::stream::{JobStream, StreamEntry, StreamError};

/// How long the shutdown phase waits on each in-flight job.
const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Only failure class that is fatal at startup.
    #[error("failed to establish consumer group: {0}")]
    GroupSetup(#[source] StreamError),
}

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub drain_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(DEFAULT_DRAIN_TIMEOUT_SECS),
        }
    }
}

impl ConsumerConfig {
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Stream-consumer ingress. One instance owns its stream connection and
/// polling loop; query execution fans out to the bounded worker pool.
pub struct Consumer<S: JobStream> {
    stream: S,
    pool: WorkerPool,
    executor: Arc<QueryExecutor>,
    store: Arc<dyn StatusStore>,
    config: ConsumerConfig,
    in_flight: HashMap<QueryId, TaskHandle>,
    shutdown: bool,
}

impl<S: JobStream> Consumer<S> {
    pub fn new(
        stream: S,
        pool: WorkerPool,
        executor: Arc<QueryExecutor>,
        store: Arc<dyn StatusStore>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            stream,
            pool,
            executor,
            store,
            config,
            in_flight: HashMap::new(),
            shutdown: false,
        }
    }

    /// Run until a `stop` action arrives, then drain in-flight work and
    /// release the pool and stream connection.
    pub fn run(mut self) -> Result<(), ConsumerError> {
        info!("starting consumer");
        self.stream
            .ensure_group()
            .map_err(ConsumerError::GroupSetup)?;

        while !self.shutdown {
            let Some(entry) = self.next_entry() else {
                self.prune_finished();
                continue;
            };
            self.prune_finished();
            self.process_entry(entry);
        }

        self.drain();
        Ok(())
    }

    /// Two-phase read: new entries first, then this consumer's own pending
    /// list (crash recovery). Connectivity errors count as an idle
    /// iteration.
    fn next_entry(&mut self) -> Option<StreamEntry> {
        match self.stream.read_new() {
            Ok(Some(entry)) => return Some(entry),
            Ok(None) => {}
            Err(e) => {
                debug!(error = %e, "stream read failed; no work this iteration");
                return None;
            }
        }

        match self.stream.read_pending() {
            Ok(entry) => entry,
            Err(e) => {
                debug!(error = %e, "pending read failed; no work this iteration");
                None
            }
        }
    }

    fn process_entry(&mut self, entry: StreamEntry) {
        let request = match JobRequest::from_fields(&entry.fields) {
            Ok(request) => request,
            Err(e) => {
                // Terminal, non-retryable: acknowledge so the entry never
                // becomes a poison pill.
                error!(
                    entry_id = %entry.id,
                    error = %e,
                    fields = ?entry.fields,
                    "malformed entry acknowledged and dropped"
                );
                self.ack(&entry.id);
                return;
            }
        };

        self.ack(&entry.id);

        match request {
            JobRequest::Stop => {
                info!("received stop action; finishing current iteration");
                self.shutdown = true;
            }
            JobRequest::Cancel { query_id } => self.cancel(&query_id),
            JobRequest::Query(job) => self.dispatch(job),
        }
    }

    fn dispatch(&mut self, job: QueryJob) {
        info!(query_id = %job.query_id, "dispatching query job");
        let executor = self.executor.clone();
        let task_job = job.clone();
        let handle = self.pool.submit(move || executor.execute(&task_job));
        self.in_flight.insert(job.query_id, handle);
    }

    /// Best-effort cancellation: only guaranteed effective before the job
    /// starts executing.
    fn cancel(&mut self, query_id: &QueryId) {
        match self.in_flight.get(query_id) {
            Some(handle) if handle.cancel() => {
                let recorded = self
                    .store
                    .remove(query_id)
                    .and_then(|()| self.store.set_status(query_id, JobStatus::Cancelled));
                if let Err(e) = recorded {
                    warn!(query_id = %query_id, error = %e, "failed to record cancellation");
                }
                self.in_flight.remove(query_id);
                info!(query_id = %query_id, "job cancelled before start");
            }
            Some(_) => {
                warn!(query_id = %query_id, "cancel ignored; job already started");
            }
            None => {
                warn!(query_id = %query_id, "cancel for unknown or finished job");
            }
        }
    }

    fn ack(&mut self, entry_id: &str) {
        if let Err(e) = self.stream.ack(entry_id) {
            // The entry stays pending and will be reclaimed; at-least-once.
            warn!(entry_id = %entry_id, error = %e, "failed to acknowledge entry");
        }
    }

    fn prune_finished(&mut self) {
        self.in_flight.retain(|_, handle| !handle.is_finished());
    }

    fn drain(mut self) {
        info!(in_flight = self.in_flight.len(), "initiating graceful shutdown");

        for (query_id, handle) in self.in_flight.drain() {
            match handle.wait_timeout(self.config.drain_timeout) {
                WaitResult::Completed | WaitResult::Cancelled => {}
                WaitResult::Panicked(msg) => {
                    error!(query_id = %query_id, error = %msg, "job panicked during drain");
                }
                WaitResult::TimedOut => {
                    error!(query_id = %query_id, "job exceeded drain timeout");
                }
            }
        }

        self.pool.shutdown();
        info!("consumer shutdown complete");
    }
}
