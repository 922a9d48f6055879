use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::error::{ImagingError, Result};
use crate::store::{ResultStore, Table};

type Tables = HashMap<Table, BTreeMap<String, Vec<u8>>>;

/// In-process store; the write lock makes insert-if-absent atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T> {
        let tables = self
            .tables
            .read()
            .map_err(|_| ImagingError::Store("memory store lock poisoned".into()))?;
        Ok(f(&tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> T) -> Result<T> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| ImagingError::Store("memory store lock poisoned".into()))?;
        Ok(f(&mut tables))
    }
}

impl ResultStore for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn insert_if_absent(&self, table: Table, key: &str, value: &[u8]) -> Result<bool> {
        self.write(|tables| {
            let rows = tables.entry(table).or_default();
            if rows.contains_key(key) {
                false
            } else {
                rows.insert(key.to_string(), value.to_vec());
                true
            }
        })
    }

    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        self.read(|tables| tables.get(&table).and_then(|rows| rows.get(key)).cloned())
    }

    fn contains(&self, table: Table, key: &str) -> Result<bool> {
        self.read(|tables| tables.get(&table).is_some_and(|rows| rows.contains_key(key)))
    }

    fn keys(&self, table: Table) -> Result<Vec<String>> {
        self.read(|tables| {
            tables
                .get(&table)
                .map(|rows| rows.keys().cloned().collect())
                .unwrap_or_default()
        })
    }

    fn replace(&self, table: Table, key: &str, value: &[u8]) -> Result<bool> {
        self.write(|tables| match tables.get_mut(&table).and_then(|rows| rows.get_mut(key)) {
            Some(slot) => {
                *slot = value.to_vec();
                true
            }
            None => false,
        })
    }

    fn remove(&self, table: Table, key: &str) -> Result<bool> {
        self.write(|tables| {
            tables
                .get_mut(&table)
                .is_some_and(|rows| rows.remove(key).is_some())
        })
    }

    fn count(&self, table: Table) -> Result<usize> {
        self.read(|tables| tables.get(&table).map_or(0, BTreeMap::len))
    }
}
