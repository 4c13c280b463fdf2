use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{PermitRecord, SourceId};

pub mod normalizers;
pub mod registry;

pub use normalizers::{CanonicalField, SourceLayout, SourceNormalizer};
pub use registry::NormalizationRegistry;

/// One raw row as delivered by an external ingest: column name -> value
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// All raw rows fetched from one source for this run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeed {
    pub source_id: SourceId,
    pub rows: Vec<RawRow>,
}

impl RawFeed {
    pub fn new(source_id: SourceId, rows: Vec<RawRow>) -> Self {
        Self { source_id, rows }
    }
}

/// Per-source accounting for one normalization pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeReport {
    pub source_id: SourceId,
    pub rows_in: usize,
    pub normalized: usize,
    pub rejected: usize,
    /// Rejections keyed by `SchemaError::kind()`
    pub rejected_by_kind: BTreeMap<String, usize>,
    /// Records that normalized cleanly but carry no coordinates
    pub missing_geolocation: usize,
}

impl NormalizeReport {
    pub fn new(source_id: SourceId) -> Self {
        Self {
            source_id,
            rows_in: 0,
            normalized: 0,
            rejected: 0,
            rejected_by_kind: BTreeMap::new(),
            missing_geolocation: 0,
        }
    }
}

/// Canonical records for one source, in raw row order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedFeed {
    pub source_id: SourceId,
    pub records: Vec<PermitRecord>,
    pub report: NormalizeReport,
}
