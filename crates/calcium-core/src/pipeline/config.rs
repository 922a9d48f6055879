use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ImagingError, Result};
use crate::paths::DataRoots;
use crate::store::StoreConfig;

use super::types::StageName;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// TOML scan catalog of `[[scan]]` tables.
    pub scans: Option<PathBuf>,
    #[serde(default)]
    pub paths: DataRoots,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub populate: PopulateConfig,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulateConfig {
    /// Run independent keys of a stage on the rayon pool.
    pub parallel: bool,
    /// Stages run by `populate_all`, executed in dependency order.
    pub stages: Vec<StageName>,
}

impl Default for PopulateConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            stages: StageName::ALL.to_vec(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| ImagingError::InvalidConfig(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ImagingError::Serialization(e.to_string()))
    }
}
