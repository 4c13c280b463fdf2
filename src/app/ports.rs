use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::domain::SourceId;
use crate::pipeline::pipeline_config::SpatialConfig;
use crate::pipeline::processing::normalize::RawFeed;
use crate::pipeline::processing::spatial::DistrictSet;
use crate::pipeline::PipelineRun;

/// Supplies the raw rows of one municipal feed
#[async_trait]
pub trait FeedSourcePort: Send + Sync {
    async fn load_feed(&self, source_id: SourceId) -> anyhow::Result<RawFeed>;
}

/// Supplies the community district polygon set
#[async_trait]
pub trait PolygonSourcePort: Send + Sync {
    async fn load_districts(&self, spatial: &SpatialConfig) -> anyhow::Result<DistrictSet>;
}

/// Persists every stage boundary of a run. A write either fully commits or
/// leaves the previous committed output in place.
#[async_trait]
pub trait SnapshotPort: Send + Sync {
    async fn write_run(&self, run: &PipelineRun) -> anyhow::Result<SnapshotManifest>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub name: String,
    /// Records for NDJSON tables, 1 for JSON documents
    pub rows: usize,
    pub bytes: u64,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub run_id: uuid::Uuid,
    pub written_at: chrono::DateTime<chrono::Utc>,
    /// Committed directory; not serialized into the manifest itself
    #[serde(skip)]
    pub path: PathBuf,
    pub files: Vec<SnapshotFile>,
}

impl SnapshotManifest {
    pub fn file(&self, name: &str) -> Option<&SnapshotFile> {
        self.files.iter().find(|f| f.name == name)
    }
}
