use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::app::ports::{SnapshotFile, SnapshotManifest, SnapshotPort};
use crate::domain::SourceId;
use crate::observability::metrics;
use crate::pipeline::PipelineRun;

pub const CURRENT_DIR: &str = "current";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const COVERAGE_REPORT_FILE: &str = "coverage_report.json";

/// Writes every stage boundary of a run as NDJSON under `<root>/current`.
///
/// Files are first written to `<root>/.staging-<run_id>`; the staging directory
/// replaces `current` only after the manifest is written. Any failure removes
/// the staging directory and leaves the previous `current` untouched.
pub struct FileSnapshotAdapter {
    root: PathBuf,
}

impl FileSnapshotAdapter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn current_dir(&self) -> PathBuf {
        self.root.join(CURRENT_DIR)
    }

    pub fn staging_dir(&self, run: &PipelineRun) -> PathBuf {
        self.root.join(format!(".staging-{}", run.run_id))
    }

    async fn write_staged(&self, staging: &Path, run: &PipelineRun) -> Result<Vec<SnapshotFile>> {
        let mut files = Vec::new();

        for source_id in SourceId::all() {
            let records = run
                .normalized_for(source_id)
                .map(|f| f.records.as_slice())
                .unwrap_or_default();
            let name = format!("normalized_{}.ndjson", source_id.slug());
            files.push(write_ndjson(staging, &name, records).await?);
        }
        files.push(write_ndjson(staging, "unified.ndjson", &run.unified).await?);
        files.push(write_ndjson(staging, "collisions.ndjson", &run.collisions).await?);
        files.push(write_ndjson(staging, "attributed.ndjson", &run.attributed).await?);
        files.push(write_ndjson(staging, "monthly_all.ndjson", &run.series.all).await?);
        files.push(write_ndjson(staging, "monthly_modeling.ndjson", &run.series.modeling).await?);
        files.push(write_ndjson(staging, "monthly_unattributed.ndjson", &run.series.unattributed).await?);

        let coverage = serde_json::to_vec_pretty(&run.coverage)?;
        files.push(write_bytes(staging, COVERAGE_REPORT_FILE, &coverage, 1).await?);

        Ok(files)
    }

    /// Swap the staging directory into `current`, keeping the old one until the swap succeeds
    async fn commit(&self, staging: &Path, run: &PipelineRun) -> Result<PathBuf> {
        let current = self.current_dir();
        let previous = self.root.join(format!(".previous-{}", run.run_id));
        let had_current = tokio::fs::try_exists(&current).await.unwrap_or(false);

        if had_current {
            tokio::fs::rename(&current, &previous)
                .await
                .with_context(|| format!("Failed to move aside {}", current.display()))?;
        }

        if let Err(e) = tokio::fs::rename(staging, &current).await {
            if had_current {
                if let Err(restore) = tokio::fs::rename(&previous, &current).await {
                    warn!("Failed to restore previous snapshot {}: {}", previous.display(), restore);
                }
            }
            return Err(e).with_context(|| format!("Failed to commit {}", staging.display()));
        }

        if had_current {
            if let Err(e) = tokio::fs::remove_dir_all(&previous).await {
                warn!("Failed to remove old snapshot {}: {}", previous.display(), e);
            }
        }
        Ok(current)
    }

    async fn write_and_commit(&self, staging: &Path, run: &PipelineRun) -> Result<SnapshotManifest> {
        tokio::fs::create_dir(staging)
            .await
            .with_context(|| format!("Failed to create staging directory {}", staging.display()))?;

        let files = self.write_staged(staging, run).await?;
        let mut manifest = SnapshotManifest {
            run_id: run.run_id,
            written_at: Utc::now(),
            path: PathBuf::new(),
            files,
        };
        let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
        write_bytes(staging, MANIFEST_FILE, &manifest_bytes, 1).await?;

        manifest.path = self.commit(staging, run).await?;
        Ok(manifest)
    }
}

#[async_trait]
impl SnapshotPort for FileSnapshotAdapter {
    async fn write_run(&self, run: &PipelineRun) -> Result<SnapshotManifest> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("Failed to create output root {}", self.root.display()))?;

        let staging = self.staging_dir(run);
        match self.write_and_commit(&staging, run).await {
            Ok(manifest) => {
                metrics::snapshot::commit_success();
                info!(
                    "Committed run {} ({} files) to {}",
                    run.run_id,
                    manifest.files.len(),
                    manifest.path.display()
                );
                Ok(manifest)
            }
            Err(e) => {
                metrics::snapshot::commit_error();
                if tokio::fs::metadata(&staging).await.map(|m| m.is_dir()).unwrap_or(false) {
                    if let Err(cleanup) = tokio::fs::remove_dir_all(&staging).await {
                        warn!("Failed to remove staging directory {}: {}", staging.display(), cleanup);
                    }
                }
                Err(e)
            }
        }
    }
}

async fn write_ndjson<T: Serialize>(dir: &Path, name: &str, items: &[T]) -> Result<SnapshotFile> {
    let mut buf = Vec::new();
    for item in items {
        serde_json::to_writer(&mut buf, item).with_context(|| format!("Failed to serialize a row of {}", name))?;
        buf.push(b'\n');
    }
    write_bytes(dir, name, &buf, items.len()).await
}

async fn write_bytes(dir: &Path, name: &str, bytes: &[u8], rows: usize) -> Result<SnapshotFile> {
    let path = dir.join(name);
    tokio::fs::write(&path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    metrics::snapshot::file_written(bytes.len() as u64);
    debug!("Wrote {} ({} rows, {} bytes)", path.display(), rows, bytes.len());

    Ok(SnapshotFile {
        name: name.to_string(),
        rows,
        bytes: bytes.len() as u64,
        sha256: hex::encode(Sha256::digest(bytes)),
    })
}
