use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::keys::{ActivityKey, CurationKey};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub mask_id: u32,
    pub channel: u32,
    pub fluorescence: Array1<f32>,
    pub neuropil: Option<Array1<f32>>,
}

/// Fluorescence of every mask of a curation, ordered by channel then mask.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FluorescenceRecord {
    pub key: CurationKey,
    pub traces: Vec<Trace>,
}

impl FluorescenceRecord {
    pub fn trace(&self, mask_id: u32, channel: u32) -> Option<&Trace> {
        self.traces
            .iter()
            .find(|t| t.mask_id == mask_id && t.channel == channel)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityTrace {
    pub mask_id: u32,
    pub channel: u32,
    pub activity: Array1<f32>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub key: ActivityKey,
    pub traces: Vec<ActivityTrace>,
}
