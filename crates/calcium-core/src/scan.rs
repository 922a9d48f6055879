//! Acquisition metadata consumed read-only by the normalizers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ImagingError, Result};
use crate::keys::ScanKey;

/// Geometry of one imaging field (one plane of a volume).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldGeometry {
    pub field_idx: usize,
    pub height: usize,
    pub width: usize,
    #[serde(default)]
    pub z: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanMetadata {
    pub frame_count: usize,
    pub frame_rate: f64,
    #[serde(default = "default_channel_count")]
    pub channel_count: usize,
    /// Number of scanned ROIs; non-zero for mesoscope-style acquisitions.
    #[serde(default)]
    pub nrois: usize,
    /// Scan directory relative to the data roots.
    #[serde(default)]
    pub scan_dir: PathBuf,
    #[serde(default)]
    pub fields: Vec<FieldGeometry>,
}

fn default_channel_count() -> usize {
    1
}

impl ScanMetadata {
    /// Number of distinct depths; a single-plane scan has one.
    pub fn depth_count(&self) -> usize {
        self.fields.len().max(1)
    }

    pub fn is_volumetric(&self) -> bool {
        self.depth_count() > 1
    }
}

/// Source of scan metadata, injected into the pipeline context.
pub trait ScanMetadataProvider: Send + Sync {
    fn scan_metadata(&self, key: &ScanKey) -> Option<ScanMetadata>;

    fn scan_keys(&self) -> Vec<ScanKey>;
}

/// In-memory scan registry, loadable from a TOML file of `[[scan]]` tables.
#[derive(Clone, Debug, Default)]
pub struct ScanCatalog {
    scans: BTreeMap<ScanKey, ScanMetadata>,
}

#[derive(Serialize, Deserialize)]
struct ScanCatalogFile {
    #[serde(default, rename = "scan")]
    scans: Vec<ScanEntry>,
}

#[derive(Serialize, Deserialize)]
struct ScanEntry {
    subject: String,
    session: String,
    scan_id: u32,
    #[serde(flatten)]
    metadata: ScanMetadata,
}

impl ScanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ScanKey, metadata: ScanMetadata) {
        self.scans.insert(key, metadata);
    }

    pub fn len(&self) -> usize {
        self.scans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scans.is_empty()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let file: ScanCatalogFile = toml::from_str(contents)
            .map_err(|e| ImagingError::InvalidConfig(format!("scan catalog: {e}")))?;
        let mut catalog = Self::new();
        for entry in file.scans {
            let key = ScanKey::new(entry.subject, entry.session, entry.scan_id);
            if catalog.scans.insert(key.clone(), entry.metadata).is_some() {
                return Err(ImagingError::InvalidConfig(format!(
                    "scan catalog lists {key} twice"
                )));
            }
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let file = ScanCatalogFile {
            scans: self
                .scans
                .iter()
                .map(|(key, metadata)| ScanEntry {
                    subject: key.subject.clone(),
                    session: key.session.clone(),
                    scan_id: key.scan_id,
                    metadata: metadata.clone(),
                })
                .collect(),
        };
        toml::to_string_pretty(&file).map_err(|e| ImagingError::Serialization(e.to_string()))
    }
}

impl ScanMetadataProvider for ScanCatalog {
    fn scan_metadata(&self, key: &ScanKey) -> Option<ScanMetadata> {
        self.scans.get(key).cloned()
    }

    fn scan_keys(&self) -> Vec<ScanKey> {
        self.scans.keys().cloned().collect()
    }
}

