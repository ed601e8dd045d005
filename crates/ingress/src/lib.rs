//! Stream-consumer job ingress (durable, at-least-once delivery).
//!
//! ## Design
//!
//! - A named consumer group over a durable stream; entries are acknowledged
//!   only after they are decoded, so work claimed before a crash is
//!   recovered by the pending-entry read on restart
//! - One single-threaded polling loop per consumer instance, fanning out
//!   into the bounded worker pool for actual query execution
//! - A single bad entry never stops the consumer: malformed entries are
//!   acknowledged and dropped, read errors count as an idle iteration

pub mod consumer;
pub mod stream;

pub use consumer::{Consumer, ConsumerConfig, ConsumerError};
pub use stream::{JobStream, RedisJobStream, StreamConfig, StreamEntry, StreamError};
