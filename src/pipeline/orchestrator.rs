use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, info_span};
use uuid::Uuid;

use crate::domain::{SourceId, UnifiedRecord};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::pipeline_config::PipelineConfig;
use crate::pipeline::processing::aggregate::{AggregationReport, MonthlySeries, TemporalAggregator};
use crate::pipeline::processing::dedup::{CollisionPair, DedupReport, Deduplicator};
use crate::pipeline::processing::normalize::{NormalizationRegistry, NormalizeReport, NormalizedFeed, RawFeed};
use crate::pipeline::processing::spatial::{AttributionReport, DistrictCatalog, DistrictSet, SpatialAttributor};

/// Human-facing diagnostics for one run; never a modeling input
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub config: PipelineConfig,
    pub normalize: Vec<NormalizeReport>,
    pub dedup: DedupReport,
    pub polygon_count: usize,
    pub polygon_source_crs: String,
    pub spatial: AttributionReport,
    pub aggregate: AggregationReport,
}

/// Everything one run produced, stage by stage
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub normalized: Vec<NormalizedFeed>,
    pub unified: Vec<UnifiedRecord>,
    pub collisions: Vec<CollisionPair>,
    pub attributed: Vec<UnifiedRecord>,
    pub series: MonthlySeries,
    pub coverage: CoverageReport,
}

impl PipelineRun {
    pub fn normalized_for(&self, source_id: SourceId) -> Option<&NormalizedFeed> {
        self.normalized.iter().find(|f| f.source_id == source_id)
    }
}

/// Runs normalize -> dedup -> spatial -> aggregate over the full input.
///
/// Holds no state between calls; every run starts from the raw feeds.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    registry: NormalizationRegistry,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(Self {
            config,
            registry: NormalizationRegistry::new(),
        })
    }

    /// Use a custom registry, e.g. with an extra source layout
    pub fn with_registry(mut self, registry: NormalizationRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn catalog(&self) -> DistrictCatalog {
        match &self.config.spatial.valid_codes {
            Some(codes) => DistrictCatalog::from_codes(codes.iter().copied()),
            None => DistrictCatalog::nyc(),
        }
    }

    pub fn run(&self, feeds: &[RawFeed], districts: DistrictSet) -> Result<PipelineRun> {
        let run_id = Uuid::new_v4();
        let _span = info_span!("pipeline_run", %run_id).entered();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(
            "Starting run over {} feeds, {} district polygons",
            feeds.len(),
            districts.len()
        );

        let normalized = self
            .registry
            .normalize_all(feeds, self.config.normalize.schema_error_policy, self.config.parallel_execution)
            .inspect_err(|_| metrics::run::error("normalize"))?;

        let records = normalized.iter().flat_map(|f| f.records.iter().cloned()).collect();
        let mut dedup = Deduplicator::new(self.config.dedup.clone()).deduplicate(records);
        let collisions = std::mem::take(&mut dedup.report.pairs);

        let polygon_count = districts.len();
        let polygon_source_crs = districts.source_crs().to_string();
        metrics::spatial::polygons_loaded(polygon_count);
        let attributor = SpatialAttributor::new(
            districts,
            self.catalog(),
            self.config.spatial.invalid_code_policy.clone(),
        );
        let attribution = if self.config.parallel_execution {
            let workers = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            attributor
                .attribute_parallel(dedup.records.clone(), workers)
                .inspect_err(|_| metrics::run::error("spatial"))?
        } else {
            attributor.attribute(dedup.records.clone())
        };

        let series = TemporalAggregator::new(self.config.aggregate.clone()).aggregate(&attribution.records);

        let coverage = CoverageReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            config: self.config.clone(),
            normalize: normalized.iter().map(|f| f.report.clone()).collect(),
            dedup: dedup.report,
            polygon_count,
            polygon_source_crs,
            spatial: attribution.report,
            aggregate: series.report.clone(),
        };

        metrics::run::duration(started.elapsed().as_secs_f64());
        info!(
            "Run finished in {:.2}s: {} modeling points across {} districts",
            started.elapsed().as_secs_f64(),
            series.modeling.len(),
            series.report.included.len()
        );

        Ok(PipelineRun {
            run_id,
            normalized,
            unified: dedup.records,
            collisions,
            attributed: attribution.records,
            series,
            coverage,
        })
    }
}
