#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::{collections::HashMap, io, path::PathBuf};
use thiserror::Error;
use types::Value;

/// Logical identifier for a page in the storage layer.
///
/// Assigned by the page store, monotonically increasing, never reused.
/// Stored on disk as a 32-bit little-endian field in the page header.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct PageId(pub u32);

/// Opaque identity of a row, as stored in secondary indexes.
///
/// Never dereferenced on the read path; unique within a table between
/// mutations.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RecordId(pub u64);

/// A single table row as a column-name → value mapping.
pub type RowMap = HashMap<String, Value>;

/// Canonical error type shared across all storage subsystems.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("schema violation: {0}")]
    SchemaViolation(String),
    #[error("capacity: {0}")]
    Capacity(String),
    #[error("corruption: {0}")]
    Corruption(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias that carries a `DbError`.
pub type DbResult<T> = Result<T, DbError>;

/// Frame replacement policy used by the buffer pool.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    #[default]
    Lru,
    Fifo,
    Clock,
}

/// Runtime configuration for the storage engine.
///
/// # Example
/// ```
/// use common::{Config, EvictionPolicy};
/// use std::path::PathBuf;
///
/// let config = Config::builder()
///     .data_dir(PathBuf::from("./my_db"))
///     .buffer_frames(128)
///     .eviction(EvictionPolicy::Clock)
///     .build();
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Directory holding page files, catalog side-files, and index metadata.
    #[builder(default = PathBuf::from("./db_data"))]
    pub data_dir: PathBuf,
    /// Number of frames the buffer pool keeps resident.
    #[builder(default = 64)]
    pub buffer_frames: usize,
    /// Which frame to reclaim when the pool is full.
    #[builder(default)]
    pub eviction: EvictionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./db_data"),
            buffer_frames: 64,
            eviction: EvictionPolicy::Lru,
        }
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, DbError, DbResult, EvictionPolicy, PageId, RecordId, RowMap};
    pub use types::{ColumnType, Value};
}
