use anyhow::{Context, Result};
use tracing::{error, info};

use crate::app::ports::{FeedSourcePort, PolygonSourcePort, SnapshotManifest, SnapshotPort};
use crate::domain::SourceId;
use crate::observability::metrics;
use crate::pipeline::{PipelineOrchestrator, PipelineRun};

/// A committed run: the in-memory tables plus where they were persisted
pub struct RunOutcome {
    pub run: PipelineRun,
    pub manifest: SnapshotManifest,
}

/// Use case for one full reconciliation run: load inputs, run every stage,
/// commit all snapshots together.
pub struct RunPipelineUseCase {
    orchestrator: PipelineOrchestrator,
    feeds: Box<dyn FeedSourcePort>,
    polygons: Box<dyn PolygonSourcePort>,
    snapshots: Box<dyn SnapshotPort>,
}

impl RunPipelineUseCase {
    pub fn new(
        orchestrator: PipelineOrchestrator,
        feeds: Box<dyn FeedSourcePort>,
        polygons: Box<dyn PolygonSourcePort>,
        snapshots: Box<dyn SnapshotPort>,
    ) -> Self {
        Self {
            orchestrator,
            feeds,
            polygons,
            snapshots,
        }
    }

    pub async fn execute(&self) -> Result<RunOutcome> {
        let mut feeds = Vec::new();
        for source_id in SourceId::all() {
            let feed = self.feeds.load_feed(source_id).await.map_err(|e| {
                metrics::run::error("load");
                e.context(format!("Failed to load {} feed", source_id))
            })?;
            info!("Loaded {} rows from {}", feed.rows.len(), source_id);
            feeds.push(feed);
        }

        let districts = self
            .polygons
            .load_districts(&self.orchestrator.config().spatial)
            .await
            .map_err(|e| {
                metrics::run::error("load");
                e.context("Failed to load district polygons")
            })?;

        let run = self
            .orchestrator
            .run(&feeds, districts)
            .context("Pipeline run failed")?;

        let manifest = match self.snapshots.write_run(&run).await {
            Ok(manifest) => manifest,
            Err(e) => {
                metrics::run::error("snapshot");
                error!("Snapshot commit failed for run {}: {:#}", run.run_id, e);
                return Err(e.context("Failed to commit snapshots"));
            }
        };

        metrics::run::success();
        info!(
            "Run {} committed {} files to {}",
            run.run_id,
            manifest.files.len(),
            manifest.path.display()
        );

        Ok(RunOutcome { run, manifest })
    }
}
