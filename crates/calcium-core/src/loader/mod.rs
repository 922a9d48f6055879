//! Backend-specific readers behind one polymorphic interface.

pub mod caiman;
pub mod extract;
pub mod memo;
pub mod suite2p;
pub mod types;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use ndarray::{Array, ArrayD, Dimension};

use crate::error::{ImagingError, Result};
use crate::io::archive::ResultArchive;
use crate::io::npy::{into_dim, read_npy, NpyElement};
use crate::params::{ExtractionMethod, ProcessingMethod};

pub use memo::Memo;
pub use types::*;

/// Parsed output of one analysis run, exposed the same way for every tool.
///
/// Arrays are read on first access and cached for the lifetime of the
/// instance; accessors hand out owned copies.
pub trait LoadedResult: Send + Sync {
    fn method(&self) -> ProcessingMethod;

    fn output_dir(&self) -> &Path;

    /// When the tool finished (earliest output file).
    fn creation_time(&self) -> DateTime<Utc>;

    /// When the output was last revised (latest output file).
    fn curation_time(&self) -> DateTime<Utc>;

    fn alignment_channel(&self) -> Result<u32>;

    fn segmentation_channel(&self) -> Result<u32>;

    /// Plane indices in ascending order.
    fn plane_indices(&self) -> Vec<usize>;

    fn motion(&self) -> Result<MotionShifts>;

    fn summary_images(&self) -> Result<SummarySource>;

    /// Masks grouped by plane, in ascending plane order.
    fn masks(&self) -> Result<Vec<PlaneMasks>>;

    fn fluorescence(&self) -> Result<Vec<PlaneTraces>>;

    fn activity(&self, method: ExtractionMethod) -> Result<Vec<PlaneActivity>>;
}

/// Opens one tool's output directory.
pub trait ResultLoader: Send + Sync {
    fn method(&self) -> ProcessingMethod;

    fn open(&self, output_dir: &Path) -> Result<Box<dyn LoadedResult>>;
}

/// Method -> loader table consulted by the stages.
#[derive(Clone)]
pub struct LoaderRegistry {
    loaders: BTreeMap<ProcessingMethod, Arc<dyn ResultLoader>>,
}

impl LoaderRegistry {
    pub fn empty() -> Self {
        Self {
            loaders: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, loader: Arc<dyn ResultLoader>) {
        self.loaders.insert(loader.method(), loader);
    }

    pub fn methods(&self) -> Vec<ProcessingMethod> {
        self.loaders.keys().copied().collect()
    }

    /// Open `output_dir` with the loader named by `backend`.
    pub fn open(&self, output_dir: &Path, backend: &str) -> Result<Box<dyn LoadedResult>> {
        self.open_method(output_dir, backend.parse()?)
    }

    pub fn open_method(
        &self,
        output_dir: &Path,
        method: ProcessingMethod,
    ) -> Result<Box<dyn LoadedResult>> {
        let loader = self
            .loaders
            .get(&method)
            .ok_or_else(|| ImagingError::UnsupportedBackend(method.to_string()))?;
        loader.open(output_dir)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(suite2p::Suite2pLoader));
        registry.register(Arc::new(caiman::CaimanLoader));
        registry.register(Arc::new(extract::ExtractLoader));
        registry
    }
}

/// Open `output_dir` with the built-in loader for `backend`.
pub fn open_result(output_dir: &Path, backend: &str) -> Result<Box<dyn LoadedResult>> {
    LoaderRegistry::default().open(output_dir, backend)
}

pub(crate) fn modified_time(path: &Path) -> Result<DateTime<Utc>> {
    let modified: SystemTime = std::fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

pub(crate) fn read_optional_npy<T: NpyElement, D: Dimension>(
    path: &Path,
) -> Result<Option<Array<T, D>>> {
    if path.exists() {
        read_npy(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Fix the dimensionality of an archive member.
pub(crate) fn member_dim<T, D: Dimension>(
    archive: &ResultArchive,
    name: &str,
    array: ArrayD<T>,
) -> Result<Array<T, D>> {
    into_dim(array).map_err(|shape| {
        ImagingError::ShapeMismatch(format!(
            "{}:{name}: unexpected shape {shape:?}",
            archive.path().display()
        ))
    })
}

pub(crate) fn require_dir(backend: ProcessingMethod, dir: &Path, marker: &str) -> Result<PathBuf> {
    if dir.is_dir() {
        Ok(dir.to_path_buf())
    } else {
        Err(ImagingError::missing(
            backend.as_str(),
            dir,
            vec![marker.to_string()],
        ))
    }
}
