//! In-memory status store for tests/dev.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use vantage_core::{JobStatus, QueryId, QueryMetadata};

use crate::status_store::{StatusStore, StoreError};

#[derive(Debug, Default, Clone)]
struct Record {
    status: Option<JobStatus>,
    error: Option<String>,
    batches: BTreeMap<u32, Vec<u8>>,
    metadata: Option<QueryMetadata>,
    /// TTL the last status write would have applied (seconds); tracked so
    /// the TTL-refresh contract is observable in tests.
    ttl_secs: Option<u64>,
}

/// In-memory status store. Entries never expire; the TTL that *would* have
/// been applied is recorded for assertions.
#[derive(Debug)]
pub struct InMemoryStatusStore {
    records: Mutex<HashMap<String, Record>>,
    status_ttl_secs: u64,
    result_ttl_secs: u64,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            status_ttl_secs: 300,
            result_ttl_secs: 3600,
        }
    }

    /// TTL the most recent status write applied, if the entry exists.
    pub fn ttl_secs(&self, query_id: &QueryId) -> Option<u64> {
        self.records
            .lock()
            .unwrap()
            .get(query_id.as_str())
            .and_then(|r| r.ttl_secs)
    }

    /// Number of stored result batches (test helper).
    pub fn batch_count(&self, query_id: &QueryId) -> usize {
        self.records
            .lock()
            .unwrap()
            .get(query_id.as_str())
            .map(|r| r.batches.len())
            .unwrap_or(0)
    }
}

impl Default for InMemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusStore for InMemoryStatusStore {
    fn create(&self, query_id: &QueryId) -> Result<(), StoreError> {
        self.set_status(query_id, JobStatus::Pending)
    }

    fn set_status(&self, query_id: &QueryId, status: JobStatus) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        let record = records.entry(query_id.to_string()).or_default();
        record.status = Some(status);
        record.ttl_secs = Some(if status.is_terminal() {
            self.result_ttl_secs
        } else {
            self.status_ttl_secs
        });
        Ok(())
    }

    fn get_status(&self, query_id: &QueryId) -> Result<Option<JobStatus>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(query_id.as_str())
            .and_then(|r| r.status))
    }

    fn remove(&self, query_id: &QueryId) -> Result<(), StoreError> {
        self.records.lock().unwrap().remove(query_id.as_str());
        Ok(())
    }

    fn set_error(&self, query_id: &QueryId, error: &str) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        records.entry(query_id.to_string()).or_default().error = Some(error.to_string());
        Ok(())
    }

    fn get_error(&self, query_id: &QueryId) -> Result<Option<String>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(query_id.as_str())
            .and_then(|r| r.error.clone()))
    }

    fn write_batch(&self, query_id: &QueryId, offset: u32, bytes: &[u8]) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        records
            .entry(query_id.to_string())
            .or_default()
            .batches
            .insert(offset, bytes.to_vec());
        Ok(())
    }

    fn read_batch(&self, query_id: &QueryId, offset: u32) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(query_id.as_str())
            .and_then(|r| r.batches.get(&offset).cloned()))
    }

    fn write_metadata(
        &self,
        query_id: &QueryId,
        metadata: &QueryMetadata,
    ) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        records.entry(query_id.to_string()).or_default().metadata = Some(metadata.clone());
        Ok(())
    }

    fn read_metadata(&self, query_id: &QueryId) -> Result<Option<QueryMetadata>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(query_id.as_str())
            .and_then(|r| r.metadata.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> QueryId {
        s.parse().unwrap()
    }

    #[test]
    fn missing_key_is_not_found() {
        let store = InMemoryStatusStore::new();
        assert_eq!(store.get_status(&id("missing")).unwrap(), None);
    }

    #[test]
    fn create_then_read_back() {
        let store = InMemoryStatusStore::new();
        store.create(&id("q")).unwrap();
        assert_eq!(store.get_status(&id("q")).unwrap(), Some(JobStatus::Pending));
    }

    #[test]
    fn status_ttl_is_refreshed_until_terminal() {
        let store = InMemoryStatusStore::new();
        let q = id("q");

        store.create(&q).unwrap();
        assert_eq!(store.ttl_secs(&q), Some(300));

        store.set_status(&q, JobStatus::Running).unwrap();
        assert_eq!(store.ttl_secs(&q), Some(300));

        store.set_status(&q, JobStatus::Completed).unwrap();
        assert_eq!(store.ttl_secs(&q), Some(3600));
    }

    #[test]
    fn remove_deletes_status_and_record() {
        let store = InMemoryStatusStore::new();
        let q = id("q");
        store.create(&q).unwrap();
        store.write_batch(&q, 0, b"bytes").unwrap();
        store.remove(&q).unwrap();
        assert_eq!(store.get_status(&q).unwrap(), None);
        assert_eq!(store.read_batch(&q, 0).unwrap(), None);
    }

    #[test]
    fn batches_are_offset_addressable() {
        let store = InMemoryStatusStore::new();
        let q = id("q");
        store.write_batch(&q, 1, b"one").unwrap();
        store.write_batch(&q, 0, b"zero").unwrap();
        assert_eq!(store.read_batch(&q, 0).unwrap().unwrap(), b"zero");
        assert_eq!(store.read_batch(&q, 1).unwrap().unwrap(), b"one");
        assert_eq!(store.read_batch(&q, 2).unwrap(), None);
    }

    #[test]
    fn metadata_round_trips() {
        let store = InMemoryStatusStore::new();
        let q = id("q");
        let metadata = QueryMetadata {
            total_rows: 42,
            total_batches: 3,
            est_size_bytes: 1024,
            column_names: vec!["a".into(), "b".into()],
            column_types: vec!["Int64".into(), "Utf8".into()],
        };
        store.write_metadata(&q, &metadata).unwrap();
        assert_eq!(store.read_metadata(&q).unwrap().unwrap(), metadata);
    }
}
