use std::path::{Path, PathBuf};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::{ImagingError, Result};
use crate::store::{ResultStore, Table};

fn definition(table: Table) -> TableDefinition<'static, &'static str, &'static [u8]> {
    TableDefinition::new(table.name())
}

fn store_error(err: impl Into<redb::Error>) -> ImagingError {
    ImagingError::Store(err.into().to_string())
}

/// Embedded single-file store. Every write is its own ACID transaction and
/// redb admits one writer at a time.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
}

impl RedbStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_error)?;

        let txn = db.begin_write().map_err(store_error)?;
        for table in Table::ALL {
            txn.open_table(definition(table)).map_err(store_error)?;
        }
        txn.commit().map_err(store_error)?;

        debug!(path = %path.display(), "Opened result store");
        Ok(Self {
            db,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultStore for RedbStore {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn insert_if_absent(&self, table: Table, key: &str, value: &[u8]) -> Result<bool> {
        let txn = self.db.begin_write().map_err(store_error)?;
        let inserted = {
            let mut rows = txn.open_table(definition(table)).map_err(store_error)?;
            let exists = rows.get(key).map_err(store_error)?.is_some();
            if !exists {
                rows.insert(key, value).map_err(store_error)?;
            }
            !exists
        };
        if inserted {
            txn.commit().map_err(store_error)?;
        } else {
            txn.abort().map_err(store_error)?;
        }
        Ok(inserted)
    }

    fn get(&self, table: Table, key: &str) -> Result<Option<Vec<u8>>> {
        let txn = self.db.begin_read().map_err(store_error)?;
        let rows = txn.open_table(definition(table)).map_err(store_error)?;
        let value = rows.get(key).map_err(store_error)?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn keys(&self, table: Table) -> Result<Vec<String>> {
        let txn = self.db.begin_read().map_err(store_error)?;
        let rows = txn.open_table(definition(table)).map_err(store_error)?;
        let mut keys = Vec::new();
        for entry in rows.iter().map_err(store_error)? {
            let (key, _) = entry.map_err(store_error)?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    fn replace(&self, table: Table, key: &str, value: &[u8]) -> Result<bool> {
        let txn = self.db.begin_write().map_err(store_error)?;
        let replaced = {
            let mut rows = txn.open_table(definition(table)).map_err(store_error)?;
            let exists = rows.get(key).map_err(store_error)?.is_some();
            if exists {
                rows.insert(key, value).map_err(store_error)?;
            }
            exists
        };
        txn.commit().map_err(store_error)?;
        Ok(replaced)
    }

    fn remove(&self, table: Table, key: &str) -> Result<bool> {
        let txn = self.db.begin_write().map_err(store_error)?;
        let removed = {
            let mut rows = txn.open_table(definition(table)).map_err(store_error)?;
            let removed = rows.remove(key).map_err(store_error)?.is_some();
            removed
        };
        txn.commit().map_err(store_error)?;
        Ok(removed)
    }
}
