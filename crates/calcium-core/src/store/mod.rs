//! Key-value result store with atomic insert-if-absent per table.

pub mod catalog;
pub mod memory;
pub mod redb_store;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use catalog::Catalog;
pub use memory::MemoryStore;
pub use redb_store::RedbStore;

/// Logical tables of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Table {
    ParameterSets,
    ParameterHashes,
    Tasks,
    Processing,
    Curations,
    MotionCorrection,
    Segmentation,
    Fluorescence,
    Activity,
}

impl Table {
    pub const ALL: [Table; 9] = [
        Self::ParameterSets,
        Self::ParameterHashes,
        Self::Tasks,
        Self::Processing,
        Self::Curations,
        Self::MotionCorrection,
        Self::Segmentation,
        Self::Fluorescence,
        Self::Activity,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::ParameterSets => "parameter_sets",
            Self::ParameterHashes => "parameter_hashes",
            Self::Tasks => "tasks",
            Self::Processing => "processing",
            Self::Curations => "curations",
            Self::MotionCorrection => "motion_correction",
            Self::Segmentation => "segmentation",
            Self::Fluorescence => "fluorescence",
            Self::Activity => "activity",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared mutable state of the pipeline.
///
/// Each value is one complete record; `insert_if_absent` must be atomic so
/// that racing writers of the same key leave exactly one value behind.
pub trait ResultStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Insert unless `key` exists. Returns whether this call inserted.
    fn insert_if_absent(&self, table: Table, key: &str, value: &[u8]) -> Result<bool>;

    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>>;

    fn contains(&self, table: Table, key: &str) -> Result<bool> {
        Ok(self.get(table, key)?.is_some())
    }

    /// Keys of `table` in ascending order.
    fn keys(&self, table: Table) -> Result<Vec<String>>;

    /// Overwrite an existing value. Returns false when `key` is absent.
    fn replace(&self, table: Table, key: &str, value: &[u8]) -> Result<bool>;

    fn remove(&self, table: Table, key: &str) -> Result<bool>;

    fn count(&self, table: Table) -> Result<usize> {
        Ok(self.keys(table)?.len())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local, lost on exit.
    Memory,
    /// Single-file embedded database.
    Redb { path: PathBuf },
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::Redb {
            path: PathBuf::from("calcium.redb"),
        }
    }
}

pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn ResultStore>> {
    match config {
        StoreConfig::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreConfig::Redb { path } => Ok(Arc::new(RedbStore::open(path)?)),
    }
}
