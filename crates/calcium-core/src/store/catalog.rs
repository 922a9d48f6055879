//! Typed access to the result store.
//!
//! Keys are JSON-encoded key structs, values are `bincode`-encoded records.
//! Each record is written with a single insert, so a stage's parent record
//! and all of its parts become visible together.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ImagingError, Result};
use crate::keys::{ActivityKey, CurationKey, RecordKey, TaskKey};
use crate::params::{content_hash, ParameterSet, ProcessingMethod};
use crate::records::{
    ActivityRecord, Curation, FluorescenceRecord, MotionCorrectionRecord, ProcessingResult,
    ProcessingTask, SegmentationRecord,
};
use crate::store::{ResultStore, Table};

#[derive(Clone)]
pub struct Catalog {
    store: Arc<dyn ResultStore>,
}

impl Catalog {
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    // ------------------------------------------------------------------
    // Generic access
    // ------------------------------------------------------------------

    /// Insert `record` under `key` unless a row exists. Returns whether this
    /// call inserted.
    pub fn insert_record<K: RecordKey, V: Serialize>(
        &self,
        table: Table,
        key: &K,
        record: &V,
    ) -> Result<bool> {
        let value = bincode::serialize(record)?;
        self.store.insert_if_absent(table, &key.encode()?, &value)
    }

    pub fn record<K: RecordKey, V: DeserializeOwned>(
        &self,
        table: Table,
        key: &K,
    ) -> Result<Option<V>> {
        match self.store.get(table, &key.encode()?)? {
            Some(raw) => Ok(Some(bincode::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn contains<K: RecordKey>(&self, table: Table, key: &K) -> Result<bool> {
        self.store.contains(table, &key.encode()?)
    }

    /// All keys of `table`, decoded and sorted by the key type's ordering.
    pub fn keys<K: RecordKey>(&self, table: Table) -> Result<Vec<K>> {
        let mut keys = self
            .store
            .keys(table)?
            .iter()
            .map(|raw| K::decode(raw))
            .collect::<Result<Vec<K>>>()?;
        keys.sort();
        Ok(keys)
    }

    pub fn count(&self, table: Table) -> Result<usize> {
        self.store.count(table)
    }

    fn require<K: RecordKey, V: DeserializeOwned>(&self, table: Table, key: &K) -> Result<V> {
        self.record(table, key)?
            .ok_or_else(|| ImagingError::NotFound(format!("{table} row for {key}")))
    }

    // ------------------------------------------------------------------
    // Parameter sets
    // ------------------------------------------------------------------

    /// Register a parameter set, deduplicated by content hash.
    ///
    /// Identical content under the same id is a no-op (`Ok(false)`).
    /// Identical content under a different id fails with
    /// `ParameterSetConflict`. Reusing an id for different content fails with
    /// `InvalidConfig`.
    pub fn insert_new_params(
        &self,
        method: ProcessingMethod,
        paramset_id: u32,
        description: &str,
        params: Value,
    ) -> Result<bool> {
        self.insert_parameter_set(ParameterSet::new(method, paramset_id, description, &params))
    }

    pub fn insert_parameter_set(&self, set: ParameterSet) -> Result<bool> {
        let id = set.paramset_id;
        let hash = set.content_hash.clone();

        if let Some(existing) = self.record::<u32, ParameterSet>(Table::ParameterSets, &id)? {
            return if existing.content_hash == hash {
                debug!(paramset_id = id, "Parameter set already registered");
                Ok(false)
            } else {
                Err(id_taken(id))
            };
        }

        if !self.insert_record(Table::ParameterHashes, &hash, &id)? {
            let existing: u32 = self.require(Table::ParameterHashes, &hash)?;
            return if existing == id {
                // Completes a registration interrupted between the two inserts.
                self.insert_record(Table::ParameterSets, &id, &set)
            } else {
                Err(ImagingError::ParameterSetConflict {
                    existing,
                    requested: id,
                })
            };
        }

        if !self.insert_record(Table::ParameterSets, &id, &set)? {
            let existing: ParameterSet = self.require(Table::ParameterSets, &id)?;
            if existing.content_hash == hash {
                return Ok(false);
            }
            // Another writer claimed the id with different content in between.
            warn!(paramset_id = id, "Parameter set id claimed concurrently");
            self.store.remove(Table::ParameterHashes, &hash.encode()?)?;
            return Err(id_taken(id));
        }

        debug!(paramset_id = id, method = %set.method, hash = %hash, "Registered parameter set");
        Ok(true)
    }

    pub fn parameter_set(&self, paramset_id: u32) -> Result<ParameterSet> {
        self.require(Table::ParameterSets, &paramset_id)
    }

    pub fn parameter_sets(&self) -> Result<Vec<ParameterSet>> {
        self.keys::<u32>(Table::ParameterSets)?
            .into_iter()
            .map(|id| self.parameter_set(id))
            .collect()
    }

    /// Id registered for identical content, if any.
    pub fn paramset_id_for(&self, params: &Value) -> Result<Option<u32>> {
        self.record(Table::ParameterHashes, &content_hash(params))
    }

    // ------------------------------------------------------------------
    // Tasks, processing and curations
    // ------------------------------------------------------------------

    pub fn insert_task(&self, task: &ProcessingTask) -> Result<bool> {
        self.parameter_set(task.key.paramset_id)?;
        self.insert_record(Table::Tasks, &task.key, task)
    }

    pub fn task(&self, key: &TaskKey) -> Result<ProcessingTask> {
        self.require(Table::Tasks, key)
    }

    /// Correct a task's output directory; the only mutation tasks allow.
    pub fn update_task_output_dir(&self, key: &TaskKey, output_dir: &Path) -> Result<()> {
        let mut task = self.task(key)?;
        task.output_dir = output_dir.to_path_buf();
        let value = bincode::serialize(&task)?;
        if self.store.replace(Table::Tasks, &key.encode()?, &value)? {
            debug!(key = %key, output_dir = %output_dir.display(), "Updated task output directory");
            Ok(())
        } else {
            Err(ImagingError::NotFound(format!("tasks row for {key}")))
        }
    }

    pub fn processing_result(&self, key: &TaskKey) -> Result<Option<ProcessingResult>> {
        self.record(Table::Processing, key)
    }

    pub fn insert_curation(&self, curation: &Curation) -> Result<bool> {
        self.insert_record(Table::Curations, &curation.key, curation)
    }

    pub fn curation(&self, key: &CurationKey) -> Result<Curation> {
        self.require(Table::Curations, key)
    }

    pub fn curations_for(&self, task: &TaskKey) -> Result<Vec<CurationKey>> {
        Ok(self
            .keys::<CurationKey>(Table::Curations)?
            .into_iter()
            .filter(|key| &key.task == task)
            .collect())
    }

    /// 0 for the first curation of a task, otherwise one past the highest id.
    pub fn next_curation_id(&self, task: &TaskKey) -> Result<u32> {
        Ok(self
            .curations_for(task)?
            .iter()
            .map(|key| key.curation_id + 1)
            .max()
            .unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Stage records
    // ------------------------------------------------------------------

    pub fn motion_correction(&self, key: &CurationKey) -> Result<Option<MotionCorrectionRecord>> {
        self.record(Table::MotionCorrection, key)
    }

    pub fn segmentation(&self, key: &CurationKey) -> Result<Option<SegmentationRecord>> {
        self.record(Table::Segmentation, key)
    }

    pub fn fluorescence(&self, key: &CurationKey) -> Result<Option<FluorescenceRecord>> {
        self.record(Table::Fluorescence, key)
    }

    pub fn activity(&self, key: &ActivityKey) -> Result<Option<ActivityRecord>> {
        self.record(Table::Activity, key)
    }
}

fn id_taken(paramset_id: u32) -> ImagingError {
    ImagingError::InvalidConfig(format!(
        "parameter set id {paramset_id} is already registered with different parameters"
    ))
}
