//! Error types for spillstore and the structures layered on top of it

use std::io;

use thiserror::Error;

/// Result type alias for spillstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for storage, dictionary, cache and queue operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Record parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Key or value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Record too large (max 64 MB)
    #[error("Record too large: {0} bytes (max 64 MB)")]
    ValueTooLarge(usize),

    /// Key not found
    #[error("Key not found")]
    NotFound,

    /// Table not found
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    /// Table already exists
    #[error("Table '{0}' already exists")]
    TableExists(String),

    /// A queued item is missing from both memory and disk
    #[error("Queue item '{0}' is missing from memory and disk")]
    MissingQueueItem(String),

    /// Invalid construction parameter
    #[error("Configuration error: {0}")]
    Config(String),

    /// A fixed-size structure cannot hold any more items
    #[error("Capacity exceeded: {capacity}")]
    CapacityExceeded {
        /// The configured capacity that was hit
        capacity: u64,
    },

    /// `task_done` was called more times than items were put
    #[error("task_done() called too many times")]
    TaskDoneOverflow,
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        Error::Parse(format!("{:?}", err))
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
