//! Status store abstraction.

use thiserror::Error;

use vantage_core::{JobStatus, QueryId, QueryMetadata};

/// Status store error.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("corrupt entry for {query_id}: {message}")]
    Corrupt { query_id: String, message: String },
}

/// Lifecycle state and result payload of jobs, keyed by `query_id`.
///
/// TTL contract: the status entry is created with a short TTL which is
/// refreshed on every non-terminal status write, so a long-running job's
/// status cannot expire mid-execution. Terminal writes switch the whole
/// record to the (longer) result-retention TTL.
pub trait StatusStore: Send + Sync {
    /// Create the `Pending` entry for a freshly accepted job.
    fn create(&self, query_id: &QueryId) -> Result<(), StoreError>;

    /// Overwrite the job status, applying the TTL contract above.
    fn set_status(&self, query_id: &QueryId, status: JobStatus) -> Result<(), StoreError>;

    /// Read the job status. A missing key is `None`, distinct from any
    /// status value.
    fn get_status(&self, query_id: &QueryId) -> Result<Option<JobStatus>, StoreError>;

    /// Delete the status entry and the whole result record.
    fn remove(&self, query_id: &QueryId) -> Result<(), StoreError>;

    /// Record the terminal failure string for the job.
    fn set_error(&self, query_id: &QueryId, error: &str) -> Result<(), StoreError>;

    fn get_error(&self, query_id: &QueryId) -> Result<Option<String>, StoreError>;

    /// Store one serialized result batch under its offset.
    fn write_batch(&self, query_id: &QueryId, offset: u32, bytes: &[u8]) -> Result<(), StoreError>;

    fn read_batch(&self, query_id: &QueryId, offset: u32) -> Result<Option<Vec<u8>>, StoreError>;

    /// Write result metadata. Called once, after all batches are stored and
    /// immediately before the terminal flip to `Completed`.
    fn write_metadata(
        &self,
        query_id: &QueryId,
        metadata: &QueryMetadata,
    ) -> Result<(), StoreError>;

    fn read_metadata(&self, query_id: &QueryId) -> Result<Option<QueryMetadata>, StoreError>;
}
