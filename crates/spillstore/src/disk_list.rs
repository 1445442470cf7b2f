//! Append-only list persisted in its own uniquely named table

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::codec::SerializationStrategy;
use crate::disk_dict::random_table_name;
use crate::error::Result;
use crate::storage::{Database, Table};

/// Table prefix used when the caller does not pick one
pub const DEFAULT_LIST_TABLE_PREFIX: &str = "disk_list";

/// Row key for the item at `position`
fn position_key(position: u64) -> [u8; 8] {
    position.to_be_bytes()
}

/// A list stored on disk.
///
/// Items are appended to a table that belongs to this instance alone and
/// read back in append order. Duplicates are kept. Membership checks scan
/// the table and compare serialized bytes, so they are linear in the list
/// length and need a deterministic encoding of `T`.
///
/// Like [`DiskDict`](crate::DiskDict), the table is only removed by
/// [`cleanup`](DiskList::cleanup).
pub struct DiskList<T> {
    db: Arc<Database>,
    table: Arc<Table>,
    strategy: SerializationStrategy,
    // Position of the next append; held while writing so rows stay in order
    next_position: Mutex<u64>,
    cleaned_up: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> DiskList<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Create an empty list with the default table prefix and compact encoding
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Self::with_options(
            db,
            DEFAULT_LIST_TABLE_PREFIX,
            SerializationStrategy::default(),
        )
    }

    /// Create an empty list using `strategy` for items
    pub fn with_strategy(db: Arc<Database>, strategy: SerializationStrategy) -> Result<Self> {
        Self::with_options(db, DEFAULT_LIST_TABLE_PREFIX, strategy)
    }

    /// Create an empty list whose table name starts with `table_prefix`
    pub fn with_options(
        db: Arc<Database>,
        table_prefix: &str,
        strategy: SerializationStrategy,
    ) -> Result<Self> {
        let name = random_table_name(table_prefix);
        let table = db.create_table(&name)?;

        debug!(table = %name, ?strategy, "created disk list");

        Ok(Self {
            db,
            table,
            strategy,
            next_position: Mutex::new(0),
            cleaned_up: false,
            _marker: PhantomData,
        })
    }

    /// Name of the backing table
    pub fn table_name(&self) -> &str {
        self.table.name()
    }

    /// Serialization strategy used for items
    pub fn strategy(&self) -> SerializationStrategy {
        self.strategy
    }

    /// Append `item` at the end of the list
    pub fn push(&self, item: &T) -> Result<()> {
        let value = self.strategy.encode(item)?;

        let mut next = self.next_position.lock();
        self.table.upsert(&position_key(*next), &value)?;
        *next += 1;
        Ok(())
    }

    /// Append every item of `items`, stopping at the first failure
    pub fn extend<'a, I>(&self, items: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a T>,
        T: 'a,
    {
        items.into_iter().try_for_each(|item| self.push(item))
    }

    /// Item at `index`, or `None` past the end
    pub fn get(&self, index: usize) -> Result<Option<T>> {
        match self.table.get(&position_key(index as u64))? {
            Some(bytes) => Ok(Some(self.strategy.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Last item, or `None` if the list is empty
    pub fn last(&self) -> Result<Option<T>> {
        match self.len().checked_sub(1) {
            Some(index) => self.get(index),
            None => Ok(None),
        }
    }

    /// Check whether an item equal to `item` was appended
    pub fn contains(&self, item: &T) -> Result<bool> {
        let needle = self.strategy.encode(item)?;
        for row_id in self.table.row_ids() {
            if let Some((_, value)) = self.table.get_row(row_id)? {
                if value == needle {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Lazily iterate over items in append order; `.rev()` walks backwards.
    ///
    /// The row set is snapshotted when this is called.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Result<T>> + '_ {
        self.table
            .row_ids()
            .into_iter()
            .filter_map(move |row_id| match self.table.get_row(row_id) {
                Ok(Some((_, value))) => Some(self.strategy.decode(&value)),
                Ok(None) => None,
                Err(err) => Some(Err(err)),
            })
    }

    /// All items, in append order
    pub fn to_vec(&self) -> Result<Vec<T>> {
        self.iter().collect()
    }

    /// All items, sorted
    pub fn sorted(&self) -> Result<Vec<T>>
    where
        T: Ord,
    {
        let mut items = self.to_vec()?;
        items.sort();
        Ok(items)
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if the list is empty
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Remove every item; the table itself is kept
    pub fn clear(&self) -> Result<()> {
        let mut next = self.next_position.lock();
        for position in 0..*next {
            self.table.delete(&position_key(position))?;
        }
        *next = 0;
        Ok(())
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
}

impl<T> Drop for DiskList<T> {
    fn drop(&mut self) {
        if !self.cleaned_up {
            warn!(
                table = %self.table.name(),
                "disk list dropped without cleanup, table leaked"
            );
        }
    }
}
