//! Durable job stream with consumer-group semantics.
//!
//! `JobStream` is the seam between the consumer loop and the stream store;
//! the production implementation speaks Redis Streams
//! (XGROUP/XREADGROUP/XACK).

use std::collections::HashMap;

use thiserror::Error;
use tracing::debug;

/// Default stream key for job requests.
const DEFAULT_STREAM_KEY: &str = "vantage:query";

/// Default consumer group name.
const DEFAULT_GROUP_NAME: &str = "vantage:query-engine";

/// Default bounded block time while waiting for new entries.
const DEFAULT_BLOCK_MS: u64 = 5000;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream connection error: {0}")]
    Connection(String),

    #[error("consumer group setup failed: {0}")]
    GroupSetup(String),

    #[error("stream read failed: {0}")]
    Read(String),

    #[error("stream ack failed: {0}")]
    Ack(String),
}

/// One raw entry claimed from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

/// Consumer-group view of the job stream.
///
/// The two read phases are kept separate on purpose: `read_pending` is the
/// crash-recovery step (entries claimed by this consumer but never
/// acknowledged), a distinct correctness property from reading new work.
pub trait JobStream {
    /// Create the consumer group if it does not exist. A group that already
    /// exists is not an error; any other failure is fatal at startup.
    fn ensure_group(&mut self) -> Result<(), StreamError>;

    /// Claim the next entry never delivered to any consumer in the group,
    /// blocking up to the configured bound.
    fn read_new(&mut self) -> Result<Option<StreamEntry>, StreamError>;

    /// Reclaim this consumer's oldest not-yet-acknowledged entry (work
    /// orphaned by a crash).
    fn read_pending(&mut self) -> Result<Option<StreamEntry>, StreamError>;

    /// Acknowledge a processed (or poison) entry.
    fn ack(&mut self, entry_id: &str) -> Result<(), StreamError>;
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub stream_key: String,
    pub group_name: String,
    pub consumer_name: String,
    pub block_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            stream_key: DEFAULT_STREAM_KEY.to_string(),
            group_name: DEFAULT_GROUP_NAME.to_string(),
            consumer_name: format!("consumer-{}", std::process::id()),
            block_ms: DEFAULT_BLOCK_MS,
        }
    }
}

impl StreamConfig {
    pub fn with_stream_key(mut self, key: impl Into<String>) -> Self {
        self.stream_key = key.into();
        self
    }

    pub fn with_group_name(mut self, group: impl Into<String>) -> Self {
        self.group_name = group.into();
        self
    }

    pub fn with_consumer_name(mut self, name: impl Into<String>) -> Self {
        self.consumer_name = name.into();
        self
    }

    pub fn with_block_ms(mut self, block_ms: u64) -> Self {
        self.block_ms = block_ms;
        self
    }
}

/// Redis Streams implementation. The connection is owned exclusively by the
/// consumer loop that drives this stream.
pub struct RedisJobStream {
    conn: redis::Connection,
    config: StreamConfig,
}

impl RedisJobStream {
    pub fn connect(redis_url: &str, config: StreamConfig) -> Result<Self, StreamError> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StreamError::Connection(e.to_string()))?;
        let conn = client
            .get_connection()
            .map_err(|e| StreamError::Connection(e.to_string()))?;
        Ok(Self { conn, config })
    }

    fn read_group(&mut self, start_id: &str, block: bool) -> Result<Option<StreamEntry>, StreamError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.config.group_name)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1);
        if block {
            cmd.arg("BLOCK").arg(self.config.block_ms);
        }
        cmd.arg("STREAMS").arg(&self.config.stream_key).arg(start_id);

        let reply: redis::Value = cmd
            .query(&mut self.conn)
            .map_err(|e| StreamError::Read(e.to_string()))?;

        Ok(parse_read_reply(&reply))
    }
}

impl JobStream for RedisJobStream {
    fn ensure_group(&mut self) -> Result<(), StreamError> {
        // MKSTREAM creates the stream if absent; reading from id 0 means the
        // group sees the whole stream history.
        let result: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_key)
            .arg(&self.config.group_name)
            .arg("0")
            .arg("MKSTREAM")
            .query(&mut self.conn);

        match result {
            Ok(_) => {
                debug!(stream = %self.config.stream_key, group = %self.config.group_name, "created consumer group");
                Ok(())
            }
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!(stream = %self.config.stream_key, group = %self.config.group_name, "consumer group already exists");
                Ok(())
            }
            Err(e) => Err(StreamError::GroupSetup(e.to_string())),
        }
    }

    fn read_new(&mut self) -> Result<Option<StreamEntry>, StreamError> {
        self.read_group(">", true)
    }

    fn read_pending(&mut self) -> Result<Option<StreamEntry>, StreamError> {
        // "0" reads this consumer's pending list from its start.
        self.read_group("0", false)
    }

    fn ack(&mut self, entry_id: &str) -> Result<(), StreamError> {
        redis::cmd("XACK")
            .arg(&self.config.stream_key)
            .arg(&self.config.group_name)
            .arg(entry_id)
            .query::<u64>(&mut self.conn)
            .map(|_| ())
            .map_err(|e| StreamError::Ack(e.to_string()))
    }
}

/// Parse an XREADGROUP reply down to its first entry.
///
/// Reply shape: `[[stream_key, [[entry_id, [field, value, ...]], ...]], ...]`;
/// a blocked read that times out returns nil.
fn parse_read_reply(reply: &redis::Value) -> Option<StreamEntry> {
    let streams = match reply {
        redis::Value::Bulk(streams) => streams,
        _ => return None,
    };
    let pair = match streams.first() {
        Some(redis::Value::Bulk(pair)) if pair.len() == 2 => pair,
        _ => return None,
    };
    let entries = match &pair[1] {
        redis::Value::Bulk(entries) => entries,
        _ => return None,
    };
    entries.first().and_then(entry_from_value)
}

fn entry_from_value(entry: &redis::Value) -> Option<StreamEntry> {
    let parts = match entry {
        redis::Value::Bulk(parts) if parts.len() == 2 => parts,
        _ => return None,
    };
    let id = match &parts[0] {
        redis::Value::Data(data) => String::from_utf8_lossy(data).to_string(),
        _ => return None,
    };
    let raw_fields = match &parts[1] {
        redis::Value::Bulk(fields) => fields,
        _ => return None,
    };

    let mut fields = HashMap::new();
    for chunk in raw_fields.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = chunk {
            fields.insert(
                String::from_utf8_lossy(key).to_string(),
                String::from_utf8_lossy(value).to_string(),
            );
        }
    }

    Some(StreamEntry { id, fields })
}
