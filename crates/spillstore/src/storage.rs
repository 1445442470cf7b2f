//! Storage engine implementation
//!
//! Directory layout:
//! - `<table>.tbl`: append-only log of put/delete records for one table
//!
//! Every table keeps its index in memory: key bytes -> row location, plus
//! row id -> key for scans in row order. Reads seek straight to the
//! indexed record; writes append. Dead records are reclaimed by compaction.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::{Mutex, RwLock};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::{
    create_header, encode_record, parse_header, parse_record, scan_records, RecordKind,
    HEADER_LEN, RECORD_HEADER_LEN, TABLE_VERSION,
};

/// Maximum encoded record size, key and value included (64 MB)
const MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Compaction only runs once at least this many bytes are dead (1 MB)
const COMPACT_MIN_DEAD_BYTES: u64 = 1024 * 1024;

const TABLE_EXTENSION: &str = "tbl";
const COMPACT_EXTENSION: &str = "compact";

/// Where a live row's latest record sits in the table file
#[derive(Debug, Clone, Copy)]
struct RowLocation {
    row_id: u64,
    offset: u64,
    len: u32,
}

struct TableIndex {
    keys: HashMap<Vec<u8>, RowLocation, RandomState>,
    rows: BTreeMap<u64, Vec<u8>>,
    next_row_id: u64,
    file_len: u64,
    dead_bytes: u64,
}

impl TableIndex {
    fn empty(file_len: u64) -> Self {
        Self {
            keys: HashMap::with_hasher(RandomState::new()),
            rows: BTreeMap::new(),
            next_row_id: 0,
            file_len,
            dead_bytes: 0,
        }
    }

    fn apply(&mut self, kind: RecordKind, row_id: u64, key: &[u8], offset: u64, len: u32) {
        self.next_row_id = self.next_row_id.max(row_id + 1);

        match kind {
            RecordKind::Put => {
                let location = RowLocation {
                    row_id,
                    offset,
                    len,
                };
                if let Some(old) = self.keys.insert(key.to_vec(), location) {
                    self.dead_bytes += old.len as u64;
                    if old.row_id != row_id {
                        self.rows.remove(&old.row_id);
                    }
                }
                self.rows.insert(row_id, key.to_vec());
            }
            RecordKind::Delete => {
                if let Some(old) = self.keys.remove(key) {
                    self.rows.remove(&old.row_id);
                    self.dead_bytes += old.len as u64;
                }
                self.dead_bytes += len as u64;
            }
        }
    }

    fn needs_compaction(&self) -> bool {
        self.dead_bytes >= COMPACT_MIN_DEAD_BYTES && self.dead_bytes * 2 >= self.file_len
    }
}

/// A single key/value table backed by one append-only file.
///
/// Rows are identified by an integer row id that is assigned from a
/// monotonically increasing counter and never handed out twice by the same
/// table handle. Replacing the value of an existing key keeps its row id,
/// so scans stay in first-insertion order.
pub struct Table {
    name: String,
    path: PathBuf,
    index: RwLock<TableIndex>,
    file: Mutex<File>,
    dropped: AtomicBool,
}

impl Table {
    fn create(path: PathBuf, name: &str) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let header = create_header(TABLE_VERSION);
        file.write_all(&header)?;

        Ok(Self::from_parts(
            name,
            path,
            file,
            TableIndex::empty(header.len() as u64),
        ))
    }

    fn open_existing(path: PathBuf, name: &str) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;

        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;

        let version = parse_header(&contents)?;
        if version != TABLE_VERSION {
            return Err(Error::Parse(format!(
                "Unsupported table version {} in {}",
                version,
                path.display()
            )));
        }

        let mut index = TableIndex::empty(HEADER_LEN as u64);
        for (offset, len, record) in scan_records(&contents[HEADER_LEN..])? {
            let offset = offset + HEADER_LEN as u64;
            index.apply(record.kind, record.row_id, record.key, offset, len);
            index.file_len = offset + len as u64;
        }

        if index.file_len < contents.len() as u64 {
            warn!(
                table = name,
                kept = index.file_len,
                found = contents.len(),
                "truncating torn record at end of table"
            );
            file.set_len(index.file_len)?;
        }

        Ok(Self::from_parts(name, path, file, index))
    }

    fn from_parts(name: &str, path: PathBuf, file: File, index: TableIndex) -> Self {
        Self {
            name: name.to_string(),
            path,
            index: RwLock::new(index),
            file: Mutex::new(file),
            dropped: AtomicBool::new(false),
        }
    }

    /// Table name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of live rows
    pub fn len(&self) -> usize {
        self.index.read().keys.len()
    }

    /// Check if the table has no rows
    pub fn is_empty(&self) -> bool {
        self.index.read().keys.is_empty()
    }

    /// Insert `key` or replace its value
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_live()?;

        let size = RECORD_HEADER_LEN + key.len() + value.len();
        if size > MAX_RECORD_SIZE {
            return Err(Error::ValueTooLarge(size));
        }

        let mut index = self.index.write();
        let row_id = match index.keys.get(key) {
            Some(location) => location.row_id,
            None => index.next_row_id,
        };

        let record = encode_record(RecordKind::Put, row_id, key, value);
        let offset = self.append(&mut index, &record)?;
        index.apply(RecordKind::Put, row_id, key, offset, record.len() as u32);

        self.maybe_compact(&mut index)
    }

    /// Get the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_live()?;

        let index = self.index.read();
        let location = match index.keys.get(key) {
            Some(location) => *location,
            None => return Ok(None),
        };

        let buf = read_at(&mut self.file.lock(), location)?;
        let (_, record) = parse_record(&buf)?;
        Ok(Some(record.value.to_vec()))
    }

    /// Indexed existence check, no file access
    pub fn contains(&self, key: &[u8]) -> Result<bool> {
        self.check_live()?;
        Ok(self.index.read().keys.contains_key(key))
    }

    /// Delete `key`, returning whether it existed
    pub fn delete(&self, key: &[u8]) -> Result<bool> {
        self.check_live()?;

        let mut index = self.index.write();
        let row_id = match index.keys.get(key) {
            Some(location) => location.row_id,
            None => return Ok(false),
        };

        let record = encode_record(RecordKind::Delete, row_id, key, &[]);
        let offset = self.append(&mut index, &record)?;
        index.apply(RecordKind::Delete, row_id, key, offset, record.len() as u32);

        self.maybe_compact(&mut index)?;
        Ok(true)
    }

    /// Snapshot of live row ids in ascending order
    pub fn row_ids(&self) -> Vec<u64> {
        self.index.read().rows.keys().copied().collect()
    }

    /// Key stored at `row_id`, if the row is still live
    pub fn key_at(&self, row_id: u64) -> Option<Vec<u8>> {
        self.index.read().rows.get(&row_id).cloned()
    }

    /// Key and value stored at `row_id`, if the row is still live
    pub fn get_row(&self, row_id: u64) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.check_live()?;

        let index = self.index.read();
        let location = match index.rows.get(&row_id).and_then(|key| index.keys.get(key)) {
            Some(location) => *location,
            None => return Ok(None),
        };

        let buf = read_at(&mut self.file.lock(), location)?;
        let (_, record) = parse_record(&buf)?;
        Ok(Some((record.key.to_vec(), record.value.to_vec())))
    }

    /// Flush and fsync the table file
    pub fn commit(&self) -> Result<()> {
        self.check_live()?;

        let mut file = self.file.lock();
        file.flush()?;
        file.sync_data()?;
        Ok(())
    }

    /// Rewrite the table file with live records only
    pub fn compact(&self) -> Result<()> {
        self.check_live()?;

        let mut index = self.index.write();
        self.compact_locked(&mut index)
    }

    /// Size of the table file in bytes
    pub fn file_len(&self) -> u64 {
        self.index.read().file_len
    }

    fn check_live(&self) -> Result<()> {
        if self.dropped.load(Ordering::Acquire) {
            return Err(Error::TableNotFound(self.name.clone()));
        }
        Ok(())
    }

    fn append(&self, index: &mut TableIndex, bytes: &[u8]) -> Result<u64> {
        let mut file = self.file.lock();
        let offset = index.file_len;

        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;

        index.file_len = offset + bytes.len() as u64;
        Ok(offset)
    }

    fn maybe_compact(&self, index: &mut TableIndex) -> Result<()> {
        if index.needs_compaction() {
            self.compact_locked(index)?;
        }
        Ok(())
    }

    fn compact_locked(&self, index: &mut TableIndex) -> Result<()> {
        let tmp_path = self.path.with_extension(COMPACT_EXTENSION);
        let mut out = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut file = self.file.lock();

        let header = create_header(TABLE_VERSION);
        out.write_all(&header)?;
        let mut offset = header.len() as u64;

        let mut keys = HashMap::with_capacity_and_hasher(index.keys.len(), RandomState::new());
        for (row_id, key) in index.rows.iter() {
            let Some(location) = index.keys.get(key).copied() else {
                continue;
            };
            let buf = read_at(&mut file, location)?;
            out.write_all(&buf)?;
            keys.insert(
                key.clone(),
                RowLocation {
                    row_id: *row_id,
                    offset,
                    len: location.len,
                },
            );
            offset += location.len as u64;
        }

        out.sync_data()?;
        fs::rename(&tmp_path, &self.path)?;
        *file = out;

        let reclaimed = index.file_len.saturating_sub(offset);
        index.keys = keys;
        index.file_len = offset;
        index.dead_bytes = 0;

        debug!(table = %self.name, bytes = offset, reclaimed, "compacted table");
        Ok(())
    }

    fn mark_dropped(&self) {
        self.dropped.store(true, Ordering::Release);
    }
}

fn read_at(file: &mut File, location: RowLocation) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(location.offset))?;
    let mut buf = vec![0u8; location.len as usize];
    file.read_exact(&mut buf)?;
    Ok(buf)
}

/// Database is the main storage handle: a directory of tables.
///
/// One handle is meant to be created at process start, shared as
/// `Arc<Database>` with every structure that needs disk space, and dropped
/// at shutdown. A temporary database deletes its directory when dropped.
pub struct Database {
    /// Directory holding the table files
    dir: PathBuf,

    /// Open tables by name
    tables: RwLock<HashMap<String, Arc<Table>, RandomState>>,

    /// Owns the directory of a temporary database; dropped last
    _temp_dir: Option<TempDir>,
}

impl Database {
    /// Open or create a database at the given path
    ///
    /// # Arguments
    /// * `path` - Directory path for the table files
    ///
    /// # Returns
    /// * `Result<Database>` - Database handle with every existing table loaded
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        fs::create_dir_all(path)?;

        let mut tables = HashMap::with_hasher(RandomState::new());
        for entry in fs::read_dir(path)? {
            let entry_path = entry?.path();
            let extension = entry_path.extension().and_then(|ext| ext.to_str());

            if extension == Some(COMPACT_EXTENSION) {
                // Leftover from an interrupted compaction; the .tbl file is intact
                fs::remove_file(&entry_path)?;
                continue;
            }
            if extension != Some(TABLE_EXTENSION) {
                continue;
            }

            let name = match entry_path.file_stem().and_then(|stem| stem.to_str()) {
                Some(name) => name.to_string(),
                None => continue,
            };
            let table = Table::open_existing(entry_path.clone(), &name)?;
            tables.insert(name, Arc::new(table));
        }

        info!(path = %path.display(), tables = tables.len(), "opened database");

        Ok(Self {
            dir: path.to_path_buf(),
            tables: RwLock::new(tables),
            _temp_dir: None,
        })
    }

    /// Create a database in a fresh temporary directory
    pub fn temporary() -> Result<Self> {
        let temp_dir = tempfile::Builder::new().prefix("spillstore-").tempdir()?;

        debug!(path = %temp_dir.path().display(), "created temporary database");

        Ok(Self {
            dir: temp_dir.path().to_path_buf(),
            tables: RwLock::new(HashMap::with_hasher(RandomState::new())),
            _temp_dir: Some(temp_dir),
        })
    }

    /// Directory holding the table files
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Create a new, empty table
    pub fn create_table(&self, name: &str) -> Result<Arc<Table>> {
        validate_table_name(name)?;

        let mut tables = self.tables.write();
        if tables.contains_key(name) {
            return Err(Error::TableExists(name.to_string()));
        }

        let path = self.table_path(name);
        let table = Arc::new(Table::create(path, name)?);
        tables.insert(name.to_string(), Arc::clone(&table));

        debug!(table = name, "created table");
        Ok(table)
    }

    /// Get a handle to an existing table
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    /// Check whether a table exists
    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.read().contains_key(name)
    }

    /// Names of all tables, sorted
    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a table and delete its file.
    ///
    /// Outstanding handles to the table fail with `TableNotFound` afterwards.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let table = self
            .tables
            .write()
            .remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;

        table.mark_dropped();
        fs::remove_file(&table.path)?;

        debug!(table = name, "dropped table");
        Ok(())
    }

    /// Flush and fsync every table
    pub fn commit(&self) -> Result<()> {
        let tables: Vec<Arc<Table>> = self.tables.read().values().cloned().collect();
        for table in tables {
            table.commit()?;
        }
        Ok(())
    }

    fn table_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", name, TABLE_EXTENSION))
    }
}

fn validate_table_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 128
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_');

    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("Invalid table name: {:?}", name)))
    }
}
