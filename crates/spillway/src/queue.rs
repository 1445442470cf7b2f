//! Unbounded queues that keep a bounded number of items in memory
//!
//! The first `max_in_memory` queued items live in a hash map; the rest are
//! spilled to a [`DiskDict`] and read back when their turn comes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use serde::de::DeserializeOwned;
use serde::Serialize;
use spillstore::{Database, DiskDict, Error, Result, SerializationStrategy};
use tracing::debug;

use crate::blocking::{BlockingQueue, QueueStorage};
use crate::config::QueueConfig;
use crate::speed::QueueSpeed;

/// Name used when none is given
pub const DEFAULT_QUEUE_NAME: &str = "queue";

/// Table prefix for spilled queue items
const QUEUE_TABLE_PREFIX: &str = "queue";

/// Queue storage split between memory and disk
pub trait TieredStorage: QueueStorage {
    /// Items held in memory
    fn memory_len(&self) -> usize;

    /// Items spilled to disk
    fn disk_len(&self) -> usize;

    /// Drop the disk tier
    fn cleanup(self) -> Result<()>;
}

pub(crate) fn check_max_in_memory(max_in_memory: usize) -> Result<()> {
    if max_in_memory == 0 {
        return Err(Error::Config(
            "max_in_memory must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// FIFO storage addressed by monotonically increasing positions
pub struct FifoStorage<T> {
    name: String,
    max_in_memory: usize,
    memory: HashMap<u64, T, RandomState>,
    disk: DiskDict<u64, T>,
    put_pointer: u64,
    get_pointer: u64,
}

impl<T> FifoStorage<T>
where
    T: Serialize + DeserializeOwned,
{
    fn new(
        name: &str,
        max_in_memory: usize,
        db: Arc<Database>,
        strategy: SerializationStrategy,
    ) -> Result<Self> {
        check_max_in_memory(max_in_memory)?;
        Ok(Self {
            name: name.to_string(),
            max_in_memory,
            memory: HashMap::with_hasher(RandomState::new()),
            disk: DiskDict::with_options(db, QUEUE_TABLE_PREFIX, strategy)?,
            put_pointer: 0,
            get_pointer: 0,
        })
    }
}

impl<T> QueueStorage for FifoStorage<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    type Item = T;

    fn push(&mut self, item: T) -> Result<()> {
        let position = self.put_pointer;
        if self.memory.len() < self.max_in_memory {
            self.memory.insert(position, item);
        } else {
            debug!(
                queue = %self.name,
                position,
                disk_len = self.disk.len(),
                "writing item to disk"
            );
            self.disk.set(&position, &item)?;
        }
        self.put_pointer += 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<T> {
        let position = self.get_pointer;
        // Advance first so a lost item cannot wedge the queue
        self.get_pointer += 1;

        if let Some(item) = self.memory.remove(&position) {
            return Ok(item);
        }

        debug!(
            queue = %self.name,
            position,
            disk_len = self.disk.len(),
            "reading item from disk"
        );
        match self.disk.get_opt(&position)? {
            Some(item) => {
                self.disk.delete(&position)?;
                Ok(item)
            }
            None => Err(Error::MissingQueueItem(position.to_string())),
        }
    }

    fn len(&self) -> usize {
        self.memory.len() + self.disk.len()
    }
}

impl<T> TieredStorage for FifoStorage<T>
where
    T: Serialize + DeserializeOwned + Send,
{
    fn memory_len(&self) -> usize {
        self.memory.len()
    }

    fn disk_len(&self) -> usize {
        self.disk.len()
    }

    fn cleanup(self) -> Result<()> {
        self.disk.cleanup()
    }
}

/// Blocking queue over [`TieredStorage`] with throughput tracking
pub struct SpillQueue<S> {
    inner: BlockingQueue<S>,
    speed: QueueSpeed,
    processed_tasks: AtomicU64,
}

/// Strict FIFO queue that spills to disk
pub type CachedQueue<T> = SpillQueue<FifoStorage<T>>;

impl<T> SpillQueue<FifoStorage<T>>
where
    T: Serialize + DeserializeOwned + Send,
{
    /// Create a queue holding at most `max_in_memory` items in memory
    pub fn new(max_in_memory: usize, db: Arc<Database>) -> Result<Self> {
        Self::with_name(max_in_memory, DEFAULT_QUEUE_NAME, db)
    }

    /// Create a named queue
    pub fn with_name(max_in_memory: usize, name: &str, db: Arc<Database>) -> Result<Self> {
        let storage =
            FifoStorage::new(name, max_in_memory, db, SerializationStrategy::default())?;
        Ok(Self::from_storage(name, storage))
    }

    /// Create a queue from configuration
    pub fn from_config(config: &QueueConfig, db: Arc<Database>) -> Result<Self> {
        let storage = FifoStorage::new(
            &config.name,
            config.max_in_memory,
            db,
            config.serialization,
        )?;
        Ok(Self::from_storage(&config.name, storage))
    }
}

impl<S: TieredStorage> SpillQueue<S> {
    pub(crate) fn from_storage(name: &str, storage: S) -> Self {
        Self {
            inner: BlockingQueue::new(name, storage),
            speed: QueueSpeed::new(),
            processed_tasks: AtomicU64::new(0),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Append an item; never blocks on capacity
    pub fn put(&self, item: S::Item) -> Result<()> {
        self.inner.put(item)?;
        self.speed.item_in();
        Ok(())
    }

    /// Remove the next item, waiting as long as needed
    pub fn get(&self) -> Result<S::Item> {
        let item = self.inner.get()?;
        self.record_get();
        Ok(item)
    }

    /// Remove the next item, waiting at most `timeout`
    pub fn get_timeout(&self, timeout: Duration) -> Result<Option<S::Item>> {
        let item = self.inner.get_timeout(timeout)?;
        if item.is_some() {
            self.record_get();
        }
        Ok(item)
    }

    /// Remove the next item if one is queued
    pub fn try_get(&self) -> Result<Option<S::Item>> {
        let item = self.inner.try_get()?;
        if item.is_some() {
            self.record_get();
        }
        Ok(item)
    }

    fn record_get(&self) {
        self.speed.item_out();
        self.processed_tasks.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a fetched item as processed
    pub fn task_done(&self) -> Result<()> {
        self.inner.task_done()
    }

    /// Block until every item put has been marked done
    pub fn join(&self) {
        self.inner.join()
    }

    /// Items waiting, in memory and on disk
    pub fn qsize(&self) -> usize {
        self.inner.qsize()
    }

    /// True if no items are waiting
    pub fn is_empty(&self) -> bool {
        self.qsize() == 0
    }

    /// Items waiting in memory
    pub fn memory_len(&self) -> usize {
        self.inner.with_storage(|storage| storage.memory_len())
    }

    /// Items waiting on disk
    pub fn disk_len(&self) -> usize {
        self.inner.with_storage(|storage| storage.disk_len())
    }

    /// Items put but not yet marked done
    pub fn unfinished_tasks(&self) -> usize {
        self.inner.unfinished_tasks()
    }

    /// Items fetched so far
    pub fn processed_tasks(&self) -> u64 {
        self.processed_tasks.load(Ordering::Relaxed)
    }

    /// Items put per minute, over the recent window
    pub fn get_input_rpm(&self) -> f64 {
        self.speed.input_rpm()
    }

    /// Items fetched per minute, over the recent window
    pub fn get_output_rpm(&self) -> f64 {
        self.speed.output_rpm()
    }

    /// Drop the disk tier; queued items are discarded
    pub fn cleanup(self) -> Result<()> {
        self.inner.into_storage().cleanup()
    }
}
