//! Queue that releases items in ascending hash order
//!
//! Used to feed work to consumers in a stable, reproducible order no matter
//! the order producers discovered it in.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use ahash::RandomState;
use rand::RngCore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use spillstore::{Database, DiskDict, Error, Result, SerializationStrategy};
use tracing::debug;

use crate::blocking::QueueStorage;
use crate::config::QueueConfig;
use crate::queue::{check_max_in_memory, SpillQueue, TieredStorage, DEFAULT_QUEUE_NAME};

/// Hash given to poison pills; sorts after every real hash
pub const POISON_PILL_HASH: &str = "ffffffffffffffffffffffffffffffff";

const ORDERED_TABLE_PREFIX: &str = "ordered_queue";

/// Items that expose a 32 character lowercase hex hash.
///
/// The hash decides the order items leave an [`OrderedCachedQueue`].
pub trait Hashable32Hex {
    /// 32 lowercase hex characters
    fn hash_hex(&self) -> String;

    /// True for the shutdown marker that must leave the queue last
    fn is_poison_pill(&self) -> bool {
        false
    }
}

/// `None` is the poison pill
impl<T: Hashable32Hex> Hashable32Hex for Option<T> {
    fn hash_hex(&self) -> String {
        match self {
            Some(item) => item.hash_hex(),
            None => POISON_PILL_HASH.to_string(),
        }
    }

    fn is_poison_pill(&self) -> bool {
        match self {
            Some(item) => item.is_poison_pill(),
            None => true,
        }
    }
}

/// 32 hex character digest of `data`, for implementing [`Hashable32Hex`]
pub fn hash_hex_of(data: impl AsRef<[u8]>) -> String {
    let digest = Sha256::digest(data.as_ref());
    hex::encode(&digest[..16])
}

fn check_hash(hash: &str) -> Result<()> {
    let valid = hash.len() == 32 && hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "hash must be 32 lowercase hex characters, got {:?}",
            hash
        )))
    }
}

fn random_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Storage keyed by random ids, released by ascending hash
pub struct OrderedStorage<T> {
    name: String,
    max_in_memory: usize,
    memory: HashMap<String, T, RandomState>,
    disk: DiskDict<String, T>,
    // Hash -> ids in arrival order
    buckets: BTreeMap<String, VecDeque<String>>,
}

impl<T> OrderedStorage<T>
where
    T: Hashable32Hex + Serialize + DeserializeOwned,
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
            disk: DiskDict::with_options(db, ORDERED_TABLE_PREFIX, strategy)?,
            buckets: BTreeMap::new(),
        })
    }
}

impl<T> QueueStorage for OrderedStorage<T>
where
    T: Hashable32Hex + Serialize + DeserializeOwned + Send,
{
    type Item = T;

    fn push(&mut self, item: T) -> Result<()> {
        let hash = if item.is_poison_pill() {
            POISON_PILL_HASH.to_string()
        } else {
            let hash = item.hash_hex();
            check_hash(&hash)?;
            hash
        };
        let id = random_id();

        if self.memory.len() < self.max_in_memory {
            self.memory.insert(id.clone(), item);
        } else {
            debug!(
                queue = %self.name,
                %hash,
                disk_len = self.disk.len(),
                "writing item to disk"
            );
            self.disk.set(&id, &item)?;
        }

        self.buckets.entry(hash).or_default().push_back(id);
        Ok(())
    }

    fn pop(&mut self) -> Result<T> {
        let id = {
            let mut bucket = self
                .buckets
                .first_entry()
                .ok_or_else(|| Error::MissingQueueItem("empty hash order".to_string()))?;
            let id = bucket.get_mut().pop_front();
            if bucket.get().is_empty() {
                bucket.remove();
            }
            id.ok_or_else(|| Error::MissingQueueItem("empty hash bucket".to_string()))?
        };

        if let Some(item) = self.memory.remove(&id) {
            return Ok(item);
        }

        debug!(queue = %self.name, %id, disk_len = self.disk.len(), "reading item from disk");
        match self.disk.get_opt(&id)? {
            Some(item) => {
                self.disk.delete(&id)?;
                Ok(item)
            }
            None => Err(Error::MissingQueueItem(id)),
        }
    }

    fn len(&self) -> usize {
        self.memory.len() + self.disk.len()
    }
}

impl<T> TieredStorage for OrderedStorage<T>
where
    T: Hashable32Hex + Serialize + DeserializeOwned + Send,
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

/// Spill-to-disk queue that always releases the smallest hash first.
///
/// Items with equal hashes leave in arrival order; poison pills leave after
/// every real item queued before the consumer reaches them.
pub type OrderedCachedQueue<T> = SpillQueue<OrderedStorage<T>>;

impl<T> SpillQueue<OrderedStorage<T>>
where
    T: Hashable32Hex + Serialize + DeserializeOwned + Send,
{
    /// Create a queue holding at most `max_in_memory` items in memory
    pub fn new(max_in_memory: usize, db: Arc<Database>) -> Result<Self> {
        Self::with_name(max_in_memory, DEFAULT_QUEUE_NAME, db)
    }

    /// Create a named queue
    pub fn with_name(max_in_memory: usize, name: &str, db: Arc<Database>) -> Result<Self> {
        let storage =
            OrderedStorage::new(name, max_in_memory, db, SerializationStrategy::default())?;
        Ok(Self::from_storage(name, storage))
    }

    /// Create a queue from configuration
    pub fn from_config(config: &QueueConfig, db: Arc<Database>) -> Result<Self> {
        let storage = OrderedStorage::new(
            &config.name,
            config.max_in_memory,
            db,
            config.serialization,
        )?;
        Ok(Self::from_storage(&config.name, storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Request {
        hash: String,
        url: String,
    }

    impl Request {
        fn new(hash_digit: char, url: &str) -> Self {
            Self {
                hash: hash_digit.to_string().repeat(32),
                url: url.to_string(),
            }
        }
    }

    impl Hashable32Hex for Request {
        fn hash_hex(&self) -> String {
            self.hash.clone()
        }
    }

    fn db() -> Arc<Database> {
        Arc::new(Database::temporary().unwrap())
    }

    #[test]
    fn test_hash_hex_of() {
        let hash = hash_hex_of("http://example.com/");
        assert_eq!(hash.len(), 32);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(hash, hash_hex_of(b"http://example.com/"));
    }

    #[test]
    fn test_random_ids_are_unique() {
        let a = random_id();
        let b = random_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_option_poison_pill() {
        let pill: Option<Request> = None;
        assert!(pill.is_poison_pill());
        assert_eq!(pill.hash_hex(), POISON_PILL_HASH);

        let item = Some(Request::new('1', "/"));
        assert!(!item.is_poison_pill());
        assert_eq!(item.hash_hex(), "1".repeat(32));
    }

    #[test]
    fn test_releases_by_hash() {
        let queue = OrderedCachedQueue::new(2, db()).unwrap();
        queue.put(Request::new('c', "/c")).unwrap();
        queue.put(Request::new('a', "/a")).unwrap();
        queue.put(Request::new('b', "/b")).unwrap();
        assert_eq!(queue.disk_len(), 1);

        let urls: Vec<String> = (0..3).map(|_| queue.get().unwrap().url).collect();
        assert_eq!(urls, vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn test_equal_hashes_keep_arrival_order() {
        let queue = OrderedCachedQueue::new(1, db()).unwrap();
        for url in ["/first", "/second", "/third"] {
            queue.put(Request::new('5', url)).unwrap();
        }
        queue.put(Request::new('0', "/zero")).unwrap();

        let urls: Vec<String> = (0..4).map(|_| queue.get().unwrap().url).collect();
        assert_eq!(urls, vec!["/zero", "/first", "/second", "/third"]);
    }

    #[test]
    fn test_poison_pill_leaves_last() {
        let queue = OrderedCachedQueue::new(2, db()).unwrap();
        queue.put(None).unwrap();
        queue.put(Some(Request::new('e', "/e"))).unwrap();
        queue.put(Some(Request::new('9', "/9"))).unwrap();

        assert_eq!(queue.get().unwrap().unwrap().url, "/9");
        assert_eq!(queue.get().unwrap().unwrap().url, "/e");
        assert!(queue.get().unwrap().is_none());
    }

    #[test]
    fn test_malformed_hash_rejected() {
        let queue = OrderedCachedQueue::new(1, db()).unwrap();
        queue.put(Some(Request::new('1', "/ok"))).unwrap();

        let too_long = Request {
            hash: format!("{}0", POISON_PILL_HASH),
            url: "/long".to_string(),
        };
        let upper = Request::new('A', "/upper");
        let short = Request {
            hash: "abc".to_string(),
            url: "/short".to_string(),
        };
        for request in [too_long, upper, short] {
            assert!(matches!(queue.put(Some(request)), Err(Error::Config(_))));
        }
        assert_eq!(queue.qsize(), 1);
        assert_eq!(queue.unfinished_tasks(), 1);

        queue.put(None).unwrap();
        assert_eq!(queue.get().unwrap().unwrap().url, "/ok");
        assert!(queue.get().unwrap().is_none());
    }

    #[test]
    fn test_interleaved_put_get() {
        let queue = OrderedCachedQueue::new(1, db()).unwrap();
        queue.put(Request::new('b', "/b")).unwrap();
        queue.put(Request::new('d', "/d")).unwrap();
        assert_eq!(queue.get().unwrap().url, "/b");

        queue.put(Request::new('a', "/a")).unwrap();
        assert_eq!(queue.get().unwrap().url, "/a");
        assert_eq!(queue.get().unwrap().url, "/d");
        assert!(queue.try_get().unwrap().is_none());
    }

    #[test]
    fn test_cleanup() {
        let db = db();
        let queue = OrderedCachedQueue::new(1, Arc::clone(&db)).unwrap();
        queue.put(Request::new('a', "/a")).unwrap();
        queue.put(Request::new('b', "/b")).unwrap();
        queue.cleanup().unwrap();
        assert!(db.table_names().is_empty());
    }

    proptest! {
        #[test]
        fn prop_hashes_non_decreasing(
            digits in prop::collection::vec(0u8..16, 1..40),
            max_in_memory in 1usize..5,
        ) {
            let queue = OrderedCachedQueue::new(max_in_memory, db()).unwrap();
            for (i, digit) in digits.iter().enumerate() {
                let hash_digit = char::from_digit(u32::from(*digit), 16).unwrap();
                queue.put(Request::new(hash_digit, &i.to_string())).unwrap();
            }

            let mut previous: Option<Request> = None;
            while let Some(item) = queue.try_get().unwrap() {
                if let Some(previous) = &previous {
                    prop_assert!(previous.hash <= item.hash);
                    if previous.hash == item.hash {
                        // Same bucket: arrival order
                        let a: usize = previous.url.parse().unwrap();
                        let b: usize = item.url.parse().unwrap();
                        prop_assert!(a < b);
                    }
                }
                previous = Some(item);
            }
            prop_assert_eq!(queue.processed_tasks(), digits.len() as u64);
        }
    }
}
