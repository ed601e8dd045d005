//! Redis-backed status store.
//!
//! Key layout:
//! - `{prefix}:status:{query_id}` — status string, short TTL from creation,
//!   refreshed on every non-terminal write
//! - `{prefix}:record:{query_id}` — hash: `status`, `error?`,
//!   `result:{offset}` (binary batch per offset), `metadata:*` fields; TTL
//!   switched to the result-retention window once the job is terminal

use std::sync::Arc;

use vantage_core::{JobStatus, QueryId, QueryMetadata};

use crate::status_store::{StatusStore, StoreError};

const DEFAULT_KEY_PREFIX: &str = "vantage";

/// Status entries live this long while a job is pending/running.
const DEFAULT_STATUS_TTL_SECS: u64 = 300;

/// Terminal records (results, metadata, errors) are retained this long.
const DEFAULT_RESULT_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub key_prefix: String,
    pub status_ttl_secs: u64,
    pub result_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            status_ttl_secs: DEFAULT_STATUS_TTL_SECS,
            result_ttl_secs: DEFAULT_RESULT_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisStatusStore {
    client: Arc<redis::Client>,
    config: StoreConfig,
}

impl RedisStatusStore {
    pub fn new(client: Arc<redis::Client>, config: StoreConfig) -> Self {
        Self { client, config }
    }

    fn conn(&self) -> Result<redis::Connection, StoreError> {
        self.client
            .get_connection()
            .map_err(|e| StoreError::Connection(e.to_string()))
    }

    fn status_key(&self, query_id: &QueryId) -> String {
        format!("{}:status:{}", self.config.key_prefix, query_id)
    }

    fn record_key(&self, query_id: &QueryId) -> String {
        format!("{}:record:{}", self.config.key_prefix, query_id)
    }

    /// Non-terminal writes refresh the short status TTL; terminal writes
    /// switch the entry to the result-retention window.
    fn ttl_for(&self, status: JobStatus) -> u64 {
        if status.is_terminal() {
            self.config.result_ttl_secs
        } else {
            self.config.status_ttl_secs
        }
    }

    fn write_status(&self, query_id: &QueryId, status: JobStatus) -> Result<(), StoreError> {
        let ttl = self.ttl_for(status);
        let mut conn = self.conn()?;
        redis::pipe()
            .cmd("SET")
            .arg(self.status_key(query_id))
            .arg(status.as_str())
            .arg("EX")
            .arg(ttl)
            .ignore()
            .cmd("HSET")
            .arg(self.record_key(query_id))
            .arg("status")
            .arg(status.as_str())
            .ignore()
            .cmd("EXPIRE")
            .arg(self.record_key(query_id))
            .arg(ttl)
            .ignore()
            .query(&mut conn)
            .map_err(|e| StoreError::Command(format!("status write failed: {e}")))
    }
}

impl StatusStore for RedisStatusStore {
    fn create(&self, query_id: &QueryId) -> Result<(), StoreError> {
        self.write_status(query_id, JobStatus::Pending)
    }

    fn set_status(&self, query_id: &QueryId, status: JobStatus) -> Result<(), StoreError> {
        self.write_status(query_id, status)
    }

    fn get_status(&self, query_id: &QueryId) -> Result<Option<JobStatus>, StoreError> {
        let mut conn = self.conn()?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.status_key(query_id))
            .query(&mut conn)
            .map_err(|e| StoreError::Command(format!("GET failed: {e}")))?;

        match raw {
            None => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|e: vantage_core::DomainError| StoreError::Corrupt {
                    query_id: query_id.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    fn remove(&self, query_id: &QueryId) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("DEL")
            .arg(self.status_key(query_id))
            .arg(self.record_key(query_id))
            .query::<()>(&mut conn)
            .map_err(|e| StoreError::Command(format!("DEL failed: {e}")))
    }

    fn set_error(&self, query_id: &QueryId, error: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("HSET")
            .arg(self.record_key(query_id))
            .arg("error")
            .arg(error)
            .query::<()>(&mut conn)
            .map_err(|e| StoreError::Command(format!("HSET error failed: {e}")))
    }

    fn get_error(&self, query_id: &QueryId) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("HGET")
            .arg(self.record_key(query_id))
            .arg("error")
            .query(&mut conn)
            .map_err(|e| StoreError::Command(format!("HGET error failed: {e}")))
    }

    fn write_batch(&self, query_id: &QueryId, offset: u32, bytes: &[u8]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("HSET")
            .arg(self.record_key(query_id))
            .arg(format!("result:{offset}"))
            .arg(bytes)
            .query::<()>(&mut conn)
            .map_err(|e| StoreError::Command(format!("batch write failed: {e}")))
    }

    fn read_batch(&self, query_id: &QueryId, offset: u32) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.conn()?;
        redis::cmd("HGET")
            .arg(self.record_key(query_id))
            .arg(format!("result:{offset}"))
            .query(&mut conn)
            .map_err(|e| StoreError::Command(format!("batch read failed: {e}")))
    }

    fn write_metadata(
        &self,
        query_id: &QueryId,
        metadata: &QueryMetadata,
    ) -> Result<(), StoreError> {
        let column_names = serde_json::to_string(&metadata.column_names)
            .map_err(|e| StoreError::Command(format!("column names serialization: {e}")))?;
        let column_types = serde_json::to_string(&metadata.column_types)
            .map_err(|e| StoreError::Command(format!("column types serialization: {e}")))?;

        let mut conn = self.conn()?;
        redis::cmd("HSET")
            .arg(self.record_key(query_id))
            .arg("metadata:total_rows")
            .arg(metadata.total_rows)
            .arg("metadata:total_batches")
            .arg(metadata.total_batches)
            .arg("metadata:est_size_bytes")
            .arg(metadata.est_size_bytes)
            .arg("metadata:column_names")
            .arg(column_names)
            .arg("metadata:column_types")
            .arg(column_types)
            .query::<()>(&mut conn)
            .map_err(|e| StoreError::Command(format!("metadata write failed: {e}")))
    }

    fn read_metadata(&self, query_id: &QueryId) -> Result<Option<QueryMetadata>, StoreError> {
        let mut conn = self.conn()?;
        let (total_rows, total_batches, est_size_bytes, column_names, column_types): (
            Option<u64>,
            Option<u32>,
            Option<u64>,
            Option<String>,
            Option<String>,
        ) = redis::cmd("HMGET")
            .arg(self.record_key(query_id))
            .arg("metadata:total_rows")
            .arg("metadata:total_batches")
            .arg("metadata:est_size_bytes")
            .arg("metadata:column_names")
            .arg("metadata:column_types")
            .query(&mut conn)
            .map_err(|e| StoreError::Command(format!("metadata read failed: {e}")))?;

        let (Some(total_rows), Some(total_batches), Some(est_size_bytes)) =
            (total_rows, total_batches, est_size_bytes)
        else {
            return Ok(None);
        };

        let corrupt = |message: String| StoreError::Corrupt {
            query_id: query_id.to_string(),
            message,
        };

        let column_names: Vec<String> = match column_names {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| corrupt(format!("column names: {e}")))?,
            None => return Err(corrupt("missing metadata:column_names".to_string())),
        };
        let column_types: Vec<String> = match column_types {
            Some(raw) => serde_json::from_str(&raw)
                .map_err(|e| corrupt(format!("column types: {e}")))?,
            None => return Err(corrupt("missing metadata:column_types".to_string())),
        };

        Ok(Some(QueryMetadata {
            total_rows,
            total_batches,
            est_size_bytes,
            column_names,
            column_types,
        }))
    }
}
