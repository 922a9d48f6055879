//! Resolution of relative output directories against the configured roots.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ImagingError, Result};
use crate::params::ProcessingMethod;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataRoots {
    /// Raw data roots, searched in order.
    #[serde(default)]
    pub root_data_dirs: Vec<PathBuf>,
    /// Where processed output is written; defaults to the first data root.
    #[serde(default)]
    pub processed_root: Option<PathBuf>,
}

impl DataRoots {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root_data_dirs: vec![root.into()],
            processed_root: None,
        }
    }

    pub fn with_processed_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.processed_root = Some(root.into());
        self
    }

    pub fn get_root_data_directory(&self) -> Result<&Path> {
        self.root_data_dirs
            .first()
            .map(PathBuf::as_path)
            .ok_or_else(|| ImagingError::InvalidConfig("no root data directory configured".into()))
    }

    pub fn get_processed_root_directory(&self) -> Result<&Path> {
        match &self.processed_root {
            Some(root) => Ok(root),
            None => self.get_root_data_directory(),
        }
    }

    /// First existing location of `relative`, checking the processed root
    /// after the data roots. Absolute paths are only checked for existence.
    pub fn find_full_path(&self, relative: &Path) -> Result<PathBuf> {
        if relative.is_absolute() {
            return if relative.exists() {
                Ok(relative.to_path_buf())
            } else {
                Err(ImagingError::NotFound(relative.display().to_string()))
            };
        }

        self.root_data_dirs
            .iter()
            .chain(self.processed_root.iter())
            .map(|root| root.join(relative))
            .find(|candidate| candidate.exists())
            .ok_or_else(|| {
                ImagingError::NotFound(format!(
                    "{} under any of {} root(s)",
                    relative.display(),
                    self.root_data_dirs.len() + usize::from(self.processed_root.is_some())
                ))
            })
    }

    /// Conventional output location of a task: `<processed>/<scan_dir>/<method>_<id>`.
    pub fn infer_output_dir(
        &self,
        scan_dir: &Path,
        method: ProcessingMethod,
        paramset_id: u32,
    ) -> Result<PathBuf> {
        let name = format!("{}_{}", method.as_str().replace('.', "-"), paramset_id);
        Ok(self.get_processed_root_directory()?.join(scan_dir).join(name))
    }

    /// Strip the processed root from `path` when it lies beneath it.
    pub fn relative_to_processed(&self, path: &Path) -> PathBuf {
        self.get_processed_root_directory()
            .ok()
            .and_then(|root| path.strip_prefix(root).ok())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| path.to_path_buf())
    }
}
