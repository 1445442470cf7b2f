//! Dictionary persisted in its own uniquely named table

use std::marker::PhantomData;
use std::sync::Arc;

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::SerializationStrategy;
use crate::error::{Error, Result};
use crate::storage::{Database, Table};

/// Table prefix used when the caller does not pick one
pub const DEFAULT_TABLE_PREFIX: &str = "disk_dict";

const TABLE_SUFFIX_LEN: usize = 30;

/// Generate a table name that will not collide with any other instance
pub fn random_table_name(prefix: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TABLE_SUFFIX_LEN)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect();
    format!("{}_{}", prefix, suffix)
}

/// A key/value dictionary stored on disk.
///
/// Keys and values are serialized with the dictionary's
/// [`SerializationStrategy`] and stored in a table that belongs to this
/// instance alone. Iteration follows first-insertion order.
///
/// The table is only removed by [`cleanup`](DiskDict::cleanup). Dropping a
/// `DiskDict` without calling it leaves the table behind for as long as the
/// database lives.
pub struct DiskDict<K, V> {
    db: Arc<Database>,
    table: Arc<Table>,
    strategy: SerializationStrategy,
    cleaned_up: bool,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> DiskDict<K, V>
where
    K: Serialize + DeserializeOwned,
    V: Serialize + DeserializeOwned,
{
    /// Create an empty dictionary with the default table prefix and compact encoding
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Self::with_options(db, DEFAULT_TABLE_PREFIX, SerializationStrategy::default())
    }

    /// Create an empty dictionary using `strategy` for keys and values
    pub fn with_strategy(db: Arc<Database>, strategy: SerializationStrategy) -> Result<Self> {
        Self::with_options(db, DEFAULT_TABLE_PREFIX, strategy)
    }

    /// Create an empty dictionary whose table name starts with `table_prefix`
    pub fn with_options(
        db: Arc<Database>,
        table_prefix: &str,
        strategy: SerializationStrategy,
    ) -> Result<Self> {
        let name = random_table_name(table_prefix);
        let table = db.create_table(&name)?;

        debug!(table = %name, ?strategy, "created disk dict");

        Ok(Self {
            db,
            table,
            strategy,
            cleaned_up: false,
            _marker: PhantomData,
        })
    }

    /// Name of the backing table
    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    /// Serialization strategy used for keys and values
    pub fn strategy(&self) -> SerializationStrategy {
        self.strategy
    }

    /// Insert `key` or replace its value
    pub fn set(&self, key: &K, value: &V) -> Result<()> {
        let key = self.strategy.encode(key)?;
        let value = self.strategy.encode(value)?;
        self.table.upsert(&key, &value)
    }

    /// Get the value for `key`, failing with `NotFound` if it is absent
    pub fn get(&self, key: &K) -> Result<V> {
        self.get_opt(key)?.ok_or(Error::NotFound)
    }

    /// Get the value for `key`, or `None` if it is absent
    pub fn get_opt(&self, key: &K) -> Result<Option<V>> {
        let key = self.strategy.encode(key)?;
        match self.table.get(&key)? {
            Some(bytes) => Ok(Some(self.strategy.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Get the value for `key`, or `default` if it is absent
    pub fn get_or(&self, key: &K, default: V) -> Result<V> {
        Ok(self.get_opt(key)?.unwrap_or(default))
    }

    /// Check whether `key` is stored
    pub fn contains(&self, key: &K) -> Result<bool> {
        let key = self.strategy.encode(key)?;
        self.table.contains(&key)
    }

    /// Remove `key`, failing with `NotFound` if it is absent
    pub fn delete(&self, key: &K) -> Result<()> {
        let key = self.strategy.encode(key)?;
        if self.table.delete(&key)? {
            Ok(())
        } else {
            Err(Error::NotFound)
        }
    }

    /// Remove `key` and return its value, failing with `NotFound` if it is absent
    pub fn pop(&self, key: &K) -> Result<V> {
        let value = self.get(key)?;
        self.delete(key)?;
        Ok(value)
    }

    /// Remove `key` and return its value, or `default` if it is absent
    pub fn pop_or(&self, key: &K, default: V) -> Result<V> {
        match self.get_opt(key)? {
            Some(value) => {
                self.delete(key)?;
                Ok(value)
            }
            None => Ok(default),
        }
    }

    /// All keys, in insertion order
    pub fn keys(&self) -> Result<Vec<K>> {
        self.iter_keys().collect()
    }

    /// Lazily iterate over keys.
    ///
    /// The row set is snapshotted when this is called; rows deleted while
    /// iterating are skipped. Call again to restart from the beginning.
    pub fn iter_keys(&self) -> impl Iterator<Item = Result<K>> + '_ {
        self.table
            .row_ids()
            .into_iter()
            .filter_map(move |row_id| self.table.key_at(row_id))
            .map(move |bytes| self.strategy.decode(&bytes))
    }

    /// Lazily iterate over key/value pairs, with the same snapshot rules as
    /// [`iter_keys`](Self::iter_keys)
    pub fn iter_items(&self) -> impl Iterator<Item = Result<(K, V)>> + '_ {
        self.table
            .row_ids()
            .into_iter()
            .filter_map(move |row_id| match self.table.get_row(row_id) {
                Ok(Some((key, value))) => Some(self.decode_pair(&key, &value)),
                Ok(None) => None,
                Err(err) => Some(Err(err)),
            })
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if the dictionary is empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Flush the backing table to disk
    pub fn commit(&self) -> Result<()> {
        self.table.commit()
    }

    /// Drop the backing table
    pub fn cleanup(mut self) -> Result<()> {
        self.db.drop_table(self.table.name())?;
        self.cleaned_up = true;
        Ok(())
    }

    fn decode_pair(&self, key: &[u8], value: &[u8]) -> Result<(K, V)> {
        Ok((self.strategy.decode(key)?, self.strategy.decode(value)?))
    }
}

impl<K, V> Drop for DiskDict<K, V> {
    fn drop(&mut self) {
        if !self.cleaned_up {
            warn!(
                table = %self.table.name(),
                "disk dict dropped without cleanup, table leaked"
            );
        }
    }
}
