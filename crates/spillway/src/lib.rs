//! # spillway
//!
//! Memory-bounded data structures that spill to a [`spillstore`] database.
//!
//! ## Components
//! - [`CachedDiskDict`]: dictionary keeping the most accessed keys in memory
//! - [`CachedQueue`]: blocking FIFO queue with a bounded in-memory head
//! - [`OrderedCachedQueue`]: blocking queue released in ascending hash order
//! - [`bloom`]: file-backed, in-memory and scalable bloom filters
//!
//! Queues track throughput ([`QueueSpeed`]) and support `task_done`/`join`
//! accounting for producer/consumer pipelines.

#![warn(missing_docs)]

pub mod bloom;
mod blocking;
mod cache;
pub mod config;
mod ordered_queue;
mod queue;
mod speed;
mod stats;

pub use blocking::{BlockingQueue, QueueStorage, JOIN_POLL_INTERVAL};
pub use cache::CachedDiskDict;
pub use config::SpillwayConfig;
pub use ordered_queue::{
    hash_hex_of, Hashable32Hex, OrderedCachedQueue, OrderedStorage, POISON_PILL_HASH,
};
pub use queue::{CachedQueue, FifoStorage, SpillQueue, TieredStorage, DEFAULT_QUEUE_NAME};
pub use speed::{QueueSpeed, MAX_EVENTS, MAX_SECONDS_IN_THE_PAST};
pub use spillstore::{Database, DiskDict, DiskList, Error, Result, SerializationStrategy};
pub use stats::CacheStats;
