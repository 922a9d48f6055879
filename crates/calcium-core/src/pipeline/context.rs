use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::{ImagingError, Result};
use crate::keys::{CurationKey, ScanKey, TaskKey};
use crate::loader::{LoadedResult, LoaderRegistry};
use crate::params::ParameterSet;
use crate::paths::DataRoots;
use crate::records::{Curation, ProcessingTask, TaskMode};
use crate::scan::{ScanMetadata, ScanMetadataProvider};
use crate::store::Catalog;

/// Everything a stage needs, passed explicitly instead of living in globals.
#[derive(Clone)]
pub struct PipelineContext {
    pub catalog: Catalog,
    pub loaders: LoaderRegistry,
    pub scans: Arc<dyn ScanMetadataProvider>,
    pub roots: DataRoots,
}

impl PipelineContext {
    pub fn new(catalog: Catalog, scans: Arc<dyn ScanMetadataProvider>, roots: DataRoots) -> Self {
        Self {
            catalog,
            loaders: LoaderRegistry::default(),
            scans,
            roots,
        }
    }

    pub fn with_loaders(mut self, loaders: LoaderRegistry) -> Self {
        self.loaders = loaders;
        self
    }

    pub fn scan_metadata(&self, key: &ScanKey) -> Result<ScanMetadata> {
        self.scans
            .scan_metadata(key)
            .ok_or_else(|| ImagingError::NotFound(format!("scan metadata for {key}")))
    }

    /// Open the output directory of a curation with its task's loader.
    pub fn open_curation_result(
        &self,
        key: &CurationKey,
    ) -> Result<(Box<dyn LoadedResult>, ParameterSet)> {
        let curation = self.catalog.curation(key)?;
        let params = self.catalog.parameter_set(key.task.paramset_id)?;
        let dir = self.roots.find_full_path(&curation.output_dir)?;
        debug!(key = %key, dir = %dir.display(), method = %params.method, "Opening curation output");
        let result = self.loaders.open_method(&dir, params.method)?;
        Ok((result, params))
    }

    /// Create a task at the conventional output location, in load mode when
    /// that location already holds readable output and trigger mode otherwise.
    pub fn generate_task(&self, scan: &ScanKey, paramset_id: u32) -> Result<ProcessingTask> {
        let params = self.catalog.parameter_set(paramset_id)?;
        let metadata = self.scan_metadata(scan)?;
        let dir = self
            .roots
            .infer_output_dir(&metadata.scan_dir, params.method, paramset_id)?;

        let mode = match self.loaders.open_method(&dir, params.method) {
            Ok(_) => TaskMode::Load,
            Err(ImagingError::BackendFileMissing { .. }) => TaskMode::Trigger,
            Err(e) => return Err(e),
        };

        let task = ProcessingTask {
            key: TaskKey::new(scan.clone(), paramset_id),
            output_dir: self.roots.relative_to_processed(&dir),
            mode,
        };
        if self.catalog.insert_task(&task)? {
            info!(key = %task.key, mode = %mode, dir = %task.output_dir.display(), "Generated task");
        } else {
            debug!(key = %task.key, "Task already exists");
        }
        Ok(task)
    }

    /// Register a curation of a processed task and return its key.
    ///
    /// Without `output_dir` the curation points at the task's own output and
    /// is stamped with the output's curation time; a revised directory is
    /// stamped with the current time.
    pub fn create_curation(
        &self,
        task_key: &TaskKey,
        output_dir: Option<PathBuf>,
        is_manual: bool,
        note: &str,
    ) -> Result<CurationKey> {
        if self.catalog.processing_result(task_key)?.is_none() {
            return Err(ImagingError::NotFound(format!(
                "processing result for {task_key}"
            )));
        }
        let task = self.catalog.task(task_key)?;

        let (output_dir, created_at) = match output_dir {
            Some(dir) => (dir, Utc::now()),
            None => {
                let params = self.catalog.parameter_set(task_key.paramset_id)?;
                let full = self.roots.find_full_path(&task.output_dir)?;
                let result = self.loaders.open_method(&full, params.method)?;
                (task.output_dir.clone(), result.curation_time())
            }
        };

        loop {
            let key = CurationKey::new(task_key.clone(), self.catalog.next_curation_id(task_key)?);
            let curation = Curation {
                key: key.clone(),
                output_dir: output_dir.clone(),
                is_manual,
                note: note.to_string(),
                created_at,
            };
            if self.catalog.insert_curation(&curation)? {
                info!(key = %key, manual = is_manual, "Created curation");
                return Ok(key);
            }
            debug!(key = %key, "Curation id taken concurrently, retrying");
        }
    }
}
