//! Job Status Store: a thin, typed wrapper over a shared key-value store.
//!
//! ## Design
//!
//! - Per-job keys are namespaced by `query_id` and never collide, so the
//!   underlying connection may be shared read/write across all workers
//! - Entries are time-boxed (TTL) and garbage-collected by the store itself;
//!   no explicit destructor step is required by the application
//! - `StatusStore` is a trait with a Redis-backed production implementation
//!   and an in-memory implementation for tests/dev

pub mod memory;
pub mod redis_store;
pub mod status_store;

pub use memory::InMemoryStatusStore;
pub use redis_store::{RedisStatusStore, StoreConfig};
pub use status_store::{StatusStore, StoreError};
