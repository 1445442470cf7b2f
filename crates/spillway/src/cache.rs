//! CachedDiskDict: frequency-ranked memory tier over a DiskDict

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;
use serde::de::DeserializeOwned;
use serde::Serialize;
use spillstore::{Database, DiskDict, Error, Result, SerializationStrategy};
use tracing::debug;

use crate::config::CacheConfig;
use crate::stats::CacheStats;

/// Table prefix used for the disk tier
pub const CACHED_DICT_TABLE_PREFIX: &str = "cached_disk_dict";

#[derive(Debug, Clone, Copy)]
struct AccessCount {
    count: u64,
    first_seen: u64,
}

/// Two-tier dictionary keeping the most accessed keys in memory.
///
/// The memory tier always holds the `max_in_memory` keys with the highest
/// access counts; ties go to the key that was seen first. Every successful
/// read, write or containment check counts as one access and may move at
/// most one key in each direction between the tiers.
///
/// There is no internal locking: every access mutates counters, so all
/// operations take `&mut self`. Share it behind a `Mutex` if needed.
pub struct CachedDiskDict<K, V> {
    max_in_memory: usize,
    in_memory: HashMap<K, V, RandomState>,
    disk: DiskDict<K, V>,
    access_count: HashMap<K, AccessCount, RandomState>,
    next_seen: u64,
    stats: CacheStats,
}

impl<K, V> CachedDiskDict<K, V>
where
    K: Hash + Eq + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Create a cache holding at most `max_in_memory` keys in memory
    ///
    /// # Arguments
    /// * `max_in_memory` - Size of the memory tier, must be > 0
    /// * `db` - Database providing the disk tier
    pub fn new(max_in_memory: usize, db: Arc<Database>) -> Result<Self> {
        Self::with_options(
            max_in_memory,
            db,
            CACHED_DICT_TABLE_PREFIX,
            SerializationStrategy::default(),
        )
    }

    /// Create a cache from configuration
    pub fn from_config(config: &CacheConfig, db: Arc<Database>) -> Result<Self> {
        Self::with_options(
            config.max_in_memory,
            db,
            &config.table_prefix,
            config.serialization,
        )
    }

    /// Create a cache with an explicit table prefix and serialization strategy
    pub fn with_options(
        max_in_memory: usize,
        db: Arc<Database>,
        table_prefix: &str,
        strategy: SerializationStrategy,
    ) -> Result<Self> {
        if max_in_memory == 0 {
            return Err(Error::Config(
                "max_in_memory must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            max_in_memory,
            in_memory: HashMap::with_capacity_and_hasher(max_in_memory, RandomState::new()),
            disk: DiskDict::with_options(db, table_prefix, strategy)?,
            access_count: HashMap::with_hasher(RandomState::new()),
            next_seen: 0,
            stats: CacheStats::new(),
        })
    }

    /// Get the value for `key`, failing with `NotFound` if neither tier has it
    pub fn get(&mut self, key: &K) -> Result<V> {
        let value = if let Some(value) = self.in_memory.get(key) {
            self.stats.record_memory_hit();
            value.clone()
        } else {
            match self.disk.get_opt(key)? {
                Some(value) => {
                    self.stats.record_disk_hit();
                    value
                }
                None => {
                    self.stats.record_miss();
                    return Err(Error::NotFound);
                }
            }
        };

        self.record_access(key)?;
        Ok(value)
    }

    /// Get the value for `key`, or `default` if neither tier has it
    pub fn get_or(&mut self, key: &K, default: V) -> Result<V> {
        match self.get(key) {
            Ok(value) => Ok(value),
            Err(Error::NotFound) => Ok(default),
            Err(err) => Err(err),
        }
    }

    /// Insert `key` or replace its value.
    ///
    /// An existing key is updated in whichever tier holds it. A new key
    /// goes to memory while the memory tier has room, to disk otherwise.
    pub fn set(&mut self, key: K, value: V) -> Result<()> {
        if let Some(slot) = self.in_memory.get_mut(&key) {
            *slot = value;
        } else if self.disk.contains(&key)? {
            self.disk.set(&key, &value)?;
        } else if self.in_memory.len() < self.max_in_memory {
            self.in_memory.insert(key.clone(), value);
        } else {
            self.disk.set(&key, &value)?;
        }

        self.record_access(&key)
    }

    /// Check whether either tier holds `key`; a hit counts as an access
    pub fn contains(&mut self, key: &K) -> Result<bool> {
        if self.in_memory.contains_key(key) || self.disk.contains(key)? {
            self.record_access(key)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Remove `key` from whichever tier holds it and forget its access count.
    ///
    /// Removing a memory key frees a slot, which is refilled at once with
    /// the best-ranked key still on disk.
    pub fn delete(&mut self, key: &K) -> Result<()> {
        let was_in_memory = self.in_memory.remove(key).is_some();
        if !was_in_memory {
            self.disk.delete(key)?;
        }
        self.access_count.remove(key);

        if was_in_memory {
            let top = self.top_keys();
            let refill = top
                .iter()
                .filter(|key| !self.in_memory.contains_key(*key))
                .min_by_key(|key| self.rank(key))
                .cloned();
            if let Some(key) = refill {
                self.promote(key)?;
            }
        }
        Ok(())
    }

    /// All keys, memory tier first. Does not count as an access.
    pub fn keys(&self) -> Result<Vec<K>> {
        self.iter().collect()
    }

    /// Iterate over keys, memory tier first. Does not count as an access.
    pub fn iter(&self) -> impl Iterator<Item = Result<K>> + '_ {
        self.in_memory
            .keys()
            .cloned()
            .map(Ok)
            .chain(self.disk.iter_keys())
    }

    /// Total number of keys across both tiers
    pub fn len(&self) -> usize {
        self.in_memory.len() + self.disk.len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys in the memory tier
    pub fn in_memory_len(&self) -> usize {
        self.in_memory.len()
    }

    /// Number of keys in the disk tier
    pub fn on_disk_len(&self) -> usize {
        self.disk.len()
    }

    /// Check whether `key` currently lives in the memory tier.
    /// Does not count as an access.
    pub fn is_in_memory(&self, key: &K) -> bool {
        self.in_memory.contains_key(key)
    }

    /// Access count recorded for `key`
    pub fn access_count(&self, key: &K) -> u64 {
        self.access_count.get(key).map_or(0, |entry| entry.count)
    }

    /// Size of the memory tier
    pub fn max_in_memory(&self) -> usize {
        self.max_in_memory
    }

    /// Hit, miss and migration statistics
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Drop the disk tier's table
    pub fn cleanup(self) -> Result<()> {
        self.disk.cleanup()
    }

    fn record_access(&mut self, key: &K) -> Result<()> {
        match self.access_count.get_mut(key) {
            Some(entry) => entry.count += 1,
            None => {
                self.access_count.insert(
                    key.clone(),
                    AccessCount {
                        count: 1,
                        first_seen: self.next_seen,
                    },
                );
                self.next_seen += 1;
            }
        }

        self.rebalance(key)
    }

    /// Sort key: smaller ranks higher
    fn rank(&self, key: &K) -> (Reverse<u64>, u64) {
        match self.access_count.get(key) {
            Some(entry) => (Reverse(entry.count), entry.first_seen),
            None => (Reverse(0), u64::MAX),
        }
    }

    fn top_keys(&self) -> HashSet<K, RandomState> {
        let mut ranked: Vec<(&K, &AccessCount)> = self.access_count.iter().collect();
        ranked.sort_unstable_by_key(|(_, entry)| (Reverse(entry.count), entry.first_seen));

        let mut top = HashSet::with_capacity_and_hasher(self.max_in_memory, RandomState::new());
        top.extend(
            ranked
                .into_iter()
                .take(self.max_in_memory)
                .map(|(key, _)| key.clone()),
        );
        top
    }

    fn rebalance(&mut self, accessed: &K) -> Result<()> {
        let top = self.top_keys();

        let demote = self
            .in_memory
            .keys()
            .filter(|key| !top.contains(*key))
            .max_by_key(|key| self.rank(key))
            .cloned();

        if let Some(key) = demote {
            if let Some(value) = self.in_memory.get(&key) {
                // Leave memory only once the disk copy is written
                self.disk.set(&key, value)?;
                self.in_memory.remove(&key);
                self.stats.record_demotion();
                debug!(table = self.disk.table_name(), "demoted key to disk");
            }
        }

        if self.in_memory.len() >= self.max_in_memory {
            return Ok(());
        }

        // The accessed key first; otherwise the best-ranked key on disk
        let promote = if top.contains(accessed) && !self.in_memory.contains_key(accessed) {
            Some(accessed.clone())
        } else {
            top.iter()
                .filter(|key| !self.in_memory.contains_key(*key))
                .min_by_key(|key| self.rank(key))
                .cloned()
        };

        match promote {
            Some(key) => self.promote(key),
            None => Ok(()),
        }
    }

    fn promote(&mut self, key: K) -> Result<()> {
        if let Some(value) = self.disk.get_opt(&key)? {
            self.disk.delete(&key)?;
            self.in_memory.insert(key, value);
            self.stats.record_promotion();
            debug!(table = self.disk.table_name(), "promoted key to memory");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn db() -> Arc<Database> {
        Arc::new(Database::temporary().unwrap())
    }

    fn assert_residency<K, V>(cache: &CachedDiskDict<K, V>)
    where
        K: Hash + Eq + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
        V: Clone + Serialize + DeserializeOwned,
    {
        assert!(cache.in_memory_len() <= cache.max_in_memory());
        let top = cache.top_keys();
        let in_memory: HashSet<K, RandomState> = cache.in_memory.keys().cloned().collect();
        assert_eq!(in_memory, top);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result: Result<CachedDiskDict<u32, u32>> = CachedDiskDict::new(0, db());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_hot_key_promotion() {
        let mut cache = CachedDiskDict::new(3, db()).unwrap();

        for key in 1..=3u32 {
            cache.set(key, key * 10).unwrap();
        }
        for key in 1..=3u32 {
            cache.get(&key).unwrap();
        }
        assert_eq!(cache.in_memory_len(), 3);

        // Memory is full, so the new key starts on disk
        cache.set(4, 40).unwrap();
        assert!(!cache.is_in_memory(&4));
        assert_eq!(cache.on_disk_len(), 1);

        for _ in 0..3 {
            assert_eq!(cache.get(&4).unwrap(), 40);
        }

        assert!(cache.is_in_memory(&4));
        assert!(!cache.is_in_memory(&3));
        assert!(cache.is_in_memory(&1));
        assert!(cache.is_in_memory(&2));
        assert_eq!(cache.in_memory_len(), 3);
        assert_eq!(cache.on_disk_len(), 1);
        assert_eq!(cache.stats().promotions(), 1);
        assert_eq!(cache.stats().demotions(), 1);
        assert_residency(&cache);

        cache.cleanup().unwrap();
    }

    #[test]
    fn test_miss_does_not_count() {
        let mut cache: CachedDiskDict<u32, u32> = CachedDiskDict::new(2, db()).unwrap();

        assert!(matches!(cache.get(&7), Err(Error::NotFound)));
        assert!(!cache.contains(&7).unwrap());
        assert_eq!(cache.get_or(&7, 0).unwrap(), 0);
        assert_eq!(cache.access_count(&7), 0);
        assert_eq!(cache.stats().misses(), 2);

        cache.cleanup().unwrap();
    }

    #[test]
    fn test_contains_counts_hits() {
        let mut cache = CachedDiskDict::new(2, db()).unwrap();
        cache.set("a".to_string(), 1u32).unwrap();

        assert!(cache.contains(&"a".to_string()).unwrap());
        assert_eq!(cache.access_count(&"a".to_string()), 2);

        cache.cleanup().unwrap();
    }

    #[test]
    fn test_iteration_is_access_neutral() {
        let mut cache = CachedDiskDict::new(1, db()).unwrap();
        cache.set(1u32, 1u32).unwrap();
        cache.set(2u32, 2u32).unwrap();

        let keys = cache.keys().unwrap();
        assert_eq!(keys, vec![1, 2]);
        assert_eq!(cache.access_count(&1), 1);
        assert_eq!(cache.access_count(&2), 1);

        cache.cleanup().unwrap();
    }

    #[test]
    fn test_delete_from_both_tiers() {
        let mut cache = CachedDiskDict::new(1, db()).unwrap();
        cache.set(1u32, "one".to_string()).unwrap();
        cache.set(2u32, "two".to_string()).unwrap();
        assert!(cache.is_in_memory(&1));

        cache.delete(&2).unwrap();
        cache.delete(&1).unwrap();

        assert!(cache.is_empty());
        assert_eq!(cache.access_count(&1), 0);
        assert!(matches!(cache.delete(&1), Err(Error::NotFound)));

        cache.cleanup().unwrap();
    }

    #[test]
    fn test_hole_after_delete_is_refilled() {
        let mut cache = CachedDiskDict::new(1, db()).unwrap();
        cache.set(1u32, 1u32).unwrap();
        cache.set(2u32, 2u32).unwrap();
        cache.delete(&1).unwrap();

        assert!(cache.is_in_memory(&2));
        assert_eq!(cache.on_disk_len(), 0);
        assert_residency(&cache);

        cache.cleanup().unwrap();
    }

    #[test]
    fn test_consecutive_deletes_keep_memory_full() {
        let mut cache = CachedDiskDict::new(2, db()).unwrap();
        for key in 1..=4u32 {
            cache.set(key, key).unwrap();
        }

        cache.delete(&1).unwrap();
        assert_residency(&cache);
        cache.delete(&2).unwrap();
        assert_residency(&cache);

        assert_eq!(cache.get(&3).unwrap(), 3);
        assert!(cache.is_in_memory(&3));
        assert!(cache.is_in_memory(&4));
        assert_eq!(cache.on_disk_len(), 0);
        assert_residency(&cache);

        cache.cleanup().unwrap();
    }

    #[test]
    fn test_failed_demotion_keeps_value_in_memory() {
        let mut cache = CachedDiskDict::new(1, db()).unwrap();
        // Fits in memory but is over the table's record limit
        let large = vec![7u8; 64 * 1024 * 1024];
        cache.set(1u32, large).unwrap();
        cache.set(2u32, vec![1u8]).unwrap();
        assert!(!cache.is_in_memory(&2));

        // Key 2 outranks key 1, so this access tries to demote key 1
        assert!(matches!(cache.get(&2), Err(Error::ValueTooLarge(_))));

        assert!(cache.is_in_memory(&1));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1).unwrap().len(), 64 * 1024 * 1024);
        assert_eq!(cache.stats().demotions(), 0);

        cache.cleanup().unwrap();
    }

    #[test]
    fn test_update_stays_in_tier() {
        let mut cache = CachedDiskDict::new(1, db()).unwrap();
        cache.set(1u32, 1u32).unwrap();
        cache.set(2u32, 2u32).unwrap();

        cache.set(1, 10).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&1).unwrap(), 10);
        assert_eq!(cache.get(&2).unwrap(), 2);

        cache.cleanup().unwrap();
    }

    #[derive(Debug, Clone)]
    enum Op {
        Set(u8, u16),
        Get(u8),
        Contains(u8),
        Delete(u8),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..12, any::<u16>()).prop_map(|(k, v)| Op::Set(k, v)),
            (0u8..12).prop_map(Op::Get),
            (0u8..12).prop_map(Op::Contains),
            (0u8..12).prop_map(Op::Delete),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_residency_and_roundtrip(ops in prop::collection::vec(op(), 1..80), max in 1usize..5) {
            let mut cache: CachedDiskDict<u8, u16> = CachedDiskDict::new(max, db()).unwrap();
            let mut model = std::collections::HashMap::new();

            for op in ops {
                match op {
                    Op::Set(k, v) => {
                        cache.set(k, v).unwrap();
                        model.insert(k, v);
                    }
                    Op::Get(k) => {
                        let got = cache.get(&k).ok();
                        prop_assert_eq!(got, model.get(&k).copied());
                    }
                    Op::Contains(k) => {
                        prop_assert_eq!(cache.contains(&k).unwrap(), model.contains_key(&k));
                    }
                    Op::Delete(k) => {
                        prop_assert_eq!(cache.delete(&k).is_ok(), model.remove(&k).is_some());
                    }
                }
                assert_residency(&cache);
            }

            prop_assert_eq!(cache.len(), model.len());
            cache.cleanup().unwrap();
        }
    }
}
