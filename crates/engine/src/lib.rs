//! Query executor: isolated engine sessions over a tenant-scoped source.
//!
//! ## Design
//!
//! - Each job execution owns a dedicated in-process engine session for its
//!   full lifetime; sessions are never shared across invocations
//! - The shared relational store is attached read-only under a restricted
//!   role; row-level policies at the storage boundary enforce tenant
//!   isolation regardless of the submitted query text
//! - Results are streamed in bounded row chunks, serialized to Arrow IPC,
//!   and written under offset-addressable keys; metadata and the terminal
//!   status flip are strictly the last writes

pub mod executor;
pub mod ipc;
pub mod postgres;
pub mod session;
pub mod source;

pub use executor::{EngineConfig, ExecuteError, QueryExecutor};
pub use postgres::{PgCatalog, PgSourceConfig};
pub use session::SessionScope;
pub use source::{MemoryCatalog, SourceCatalog, SourceError};
