//! Analysis methods and content-addressed parameter sets.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::consts::{
    CAIMAN_CLASSIFIER, CONTENT_HASH_HEX_LEN, SEGMENTATION_CHANNEL_PARAM, SUITE2P_CLASSIFIER,
};
use crate::error::{ImagingError, Result};

/// Third-party tool whose output a task ingests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMethod {
    Suite2p,
    Caiman,
    Extract,
}

impl ProcessingMethod {
    pub const ALL: [ProcessingMethod; 3] = [Self::Suite2p, Self::Caiman, Self::Extract];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suite2p => "suite2p",
            Self::Caiman => "caiman",
            Self::Extract => "extract",
        }
    }

    /// Activity extraction methods this tool's output supports.
    pub fn extraction_methods(&self) -> &'static [ExtractionMethod] {
        match self {
            Self::Suite2p => &[ExtractionMethod::Suite2pDeconvolution],
            Self::Caiman => &[
                ExtractionMethod::CaimanDeconvolution,
                ExtractionMethod::CaimanDff,
            ],
            Self::Extract => &[],
        }
    }

    /// Name recorded on mask classifications, for tools that classify.
    pub fn classifier(&self) -> Option<&'static str> {
        match self {
            Self::Suite2p => Some(SUITE2P_CLASSIFIER),
            Self::Caiman => Some(CAIMAN_CLASSIFIER),
            Self::Extract => None,
        }
    }
}

impl fmt::Display for ProcessingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingMethod {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == normalized)
            .ok_or_else(|| ImagingError::UnsupportedBackend(s.to_string()))
    }
}

/// Which derived series an activity trace copies from the loader.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    /// Suite2p deconvolved spikes (`spks`).
    Suite2pDeconvolution,
    /// CaImAn deconvolved spikes (`S`).
    CaimanDeconvolution,
    /// CaImAn fractional fluorescence change (`F_dff`).
    CaimanDff,
}

impl ExtractionMethod {
    pub const ALL: [ExtractionMethod; 3] = [
        Self::Suite2pDeconvolution,
        Self::CaimanDeconvolution,
        Self::CaimanDff,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suite2pDeconvolution => "suite2p_deconvolution",
            Self::CaimanDeconvolution => "caiman_deconvolution",
            Self::CaimanDff => "caiman_dff",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExtractionMethod {
    type Err = ImagingError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|method| method.as_str() == s.trim())
            .ok_or_else(|| ImagingError::InvalidConfig(format!("unknown extraction method '{s}'")))
    }
}

/// A named, hashed set of analysis parameters.
///
/// The parameter mapping is kept as canonical JSON text so the record stays
/// encodable by non-self-describing formats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterSet {
    pub method: ProcessingMethod,
    pub paramset_id: u32,
    pub description: String,
    pub content_hash: String,
    pub params_json: String,
    pub package_version: Option<String>,
}

impl ParameterSet {
    pub fn new(
        method: ProcessingMethod,
        paramset_id: u32,
        description: impl Into<String>,
        params: &Value,
    ) -> Self {
        Self {
            method,
            paramset_id,
            description: description.into(),
            content_hash: content_hash(params),
            params_json: canonical_json(params),
            package_version: None,
        }
    }

    pub fn with_package_version(mut self, version: impl Into<String>) -> Self {
        self.package_version = Some(version.into());
        self
    }

    pub fn params(&self) -> Result<Value> {
        Ok(serde_json::from_str(&self.params_json)?)
    }

    /// Explicit segmentation channel, when the parameters pin one.
    pub fn segmentation_channel(&self) -> Result<Option<u32>> {
        let params = self.params()?;
        match params.get(SEGMENTATION_CHANNEL_PARAM) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => value
                .as_u64()
                .and_then(|channel| u32::try_from(channel).ok())
                .map(Some)
                .ok_or_else(|| {
                    ImagingError::InvalidConfig(format!(
                        "{SEGMENTATION_CHANNEL_PARAM} must be a non-negative integer, got {value}"
                    ))
                }),
        }
    }
}

/// Deterministic digest of a parameter mapping, independent of key order.
pub fn content_hash(params: &Value) -> String {
    let digest = blake3::hash(canonical_json(params).as_bytes());
    digest.to_hex()[..CONTENT_HASH_HEX_LEN].to_string()
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

