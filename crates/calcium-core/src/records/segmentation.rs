use std::fmt;

use serde::{Deserialize, Serialize};

use crate::keys::CurationKey;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskType {
    Soma,
    Axon,
    Dendrite,
    Neuropil,
    Artefact,
    Unknown,
}

impl fmt::Display for MaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Soma => "soma",
            Self::Axon => "axon",
            Self::Dendrite => "dendrite",
            Self::Neuropil => "neuropil",
            Self::Artefact => "artefact",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A segmented region with pixel membership and per-pixel weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mask {
    pub mask_id: u32,
    /// Plane the loader reported this mask in.
    pub plane: usize,
    /// Position within that plane's native mask order.
    pub plane_mask_index: usize,
    pub segmentation_channel: u32,
    pub pixel_count: usize,
    pub center_x: i64,
    pub center_y: i64,
    pub center_z: i64,
    pub xpix: Vec<i64>,
    pub ypix: Vec<i64>,
    pub zpix: Vec<i64>,
    pub weights: Vec<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedMask {
    pub mask_id: u32,
    pub mask_type: MaskType,
    pub confidence: Option<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaskClassification {
    pub method: String,
    pub entries: Vec<ClassifiedMask>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SegmentationRecord {
    pub key: CurationKey,
    pub masks: Vec<Mask>,
    /// Absent when the tool has no classifier.
    pub classification: Option<MaskClassification>,
}

impl SegmentationRecord {
    pub fn mask(&self, mask_id: u32) -> Option<&Mask> {
        self.masks.iter().find(|m| m.mask_id == mask_id)
    }

    pub fn masks_in_plane(&self, plane: usize) -> impl Iterator<Item = &Mask> + '_ {
        self.masks.iter().filter(move |m| m.plane == plane)
    }

    pub fn classification_of(&self, mask_id: u32) -> Option<&ClassifiedMask> {
        self.classification
            .as_ref()
            .and_then(|c| c.entries.iter().find(|e| e.mask_id == mask_id))
    }
}
