//! # spillstore
//!
//! Embedded table store used as the disk tier of spill-to-disk structures.
//!
//! ## Layout
//! - A [`Database`] is a directory of tables, shared as `Arc<Database>`
//! - A [`Table`] is an append-only record log with an in-memory key index
//! - A [`DiskDict`] is a typed dictionary over one private table
//! - A [`DiskList`] is a typed append-only list over one private table
//!
//! Keys and values are serialized with an explicit
//! [`SerializationStrategy`].

#![warn(missing_docs)]

mod codec;
mod disk_dict;
mod disk_list;
mod error;
mod record;
mod storage;

pub use codec::SerializationStrategy;
pub use disk_dict::{random_table_name, DiskDict, DEFAULT_TABLE_PREFIX};
pub use disk_list::{DiskList, DEFAULT_LIST_TABLE_PREFIX};
pub use error::{Error, Result};
pub use storage::{Database, Table};
