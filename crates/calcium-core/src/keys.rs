//! Composite identities of every table in the pipeline.
//!
//! Keys nest the way the tables depend on each other: a curation key embeds
//! its task key, which embeds its scan key. The store sees them as JSON
//! strings, so ordering and equality follow the derived impls.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::params::ExtractionMethod;

/// A key that can address a row in the result store.
pub trait RecordKey:
    Serialize + DeserializeOwned + Clone + Ord + fmt::Display + Send + Sync
{
    fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn decode(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// One acquisition.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ScanKey {
    pub subject: String,
    pub session: String,
    pub scan_id: u32,
}

impl ScanKey {
    pub fn new(subject: impl Into<String>, session: impl Into<String>, scan_id: u32) -> Self {
        Self {
            subject: subject.into(),
            session: session.into(),
            scan_id,
        }
    }
}

impl fmt::Display for ScanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/scan{}", self.subject, self.session, self.scan_id)
    }
}

/// One scan analysed with one parameter set.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskKey {
    pub scan: ScanKey,
    pub paramset_id: u32,
}

impl TaskKey {
    pub fn new(scan: ScanKey, paramset_id: u32) -> Self {
        Self { scan, paramset_id }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/params{}", self.scan, self.paramset_id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurationKey {
    pub task: TaskKey,
    pub curation_id: u32,
}

impl CurationKey {
    pub fn new(task: TaskKey, curation_id: u32) -> Self {
        Self { task, curation_id }
    }
}

impl fmt::Display for CurationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/curation{}", self.task, self.curation_id)
    }
}

/// Activity traces of one curation extracted with one method.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActivityKey {
    pub curation: CurationKey,
    pub method: ExtractionMethod,
}

impl fmt::Display for ActivityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.curation, self.method)
    }
}

impl RecordKey for ScanKey {}
impl RecordKey for TaskKey {}
impl RecordKey for CurationKey {}
impl RecordKey for ActivityKey {}

/// Parameter sets are addressed by their numeric id.
impl RecordKey for u32 {}

/// Content hashes index parameter sets by digest.
impl RecordKey for String {}

