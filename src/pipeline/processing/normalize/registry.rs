use std::collections::HashMap;
use std::time::Instant;

use tracing::{debug, info, info_span, warn};

use super::normalizers::{DobNowNormalizer, HistoricalNormalizer, SourceNormalizer};
use super::{NormalizeReport, NormalizedFeed, RawFeed};
use crate::domain::SourceId;
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::pipeline_config::SchemaErrorPolicy;

/// Registry for source-specific normalization strategies
pub struct NormalizationRegistry {
    normalizers: HashMap<SourceId, Box<dyn SourceNormalizer>>,
}

impl NormalizationRegistry {
    /// Create a new normalization registry with the built-in source normalizers
    pub fn new() -> Self {
        let mut normalizers: HashMap<SourceId, Box<dyn SourceNormalizer>> = HashMap::new();

        normalizers.insert(SourceId::Historical, Box::new(HistoricalNormalizer::new()));
        normalizers.insert(SourceId::DobNow, Box::new(DobNowNormalizer::new()));

        Self { normalizers }
    }

    /// Register a normalizer, replacing any existing one for the same source
    pub fn register(&mut self, normalizer: Box<dyn SourceNormalizer>) {
        self.normalizers.insert(normalizer.source_id(), normalizer);
    }

    /// Get the normalizer for a source
    pub fn get(&self, source_id: SourceId) -> Option<&dyn SourceNormalizer> {
        self.normalizers.get(&source_id).map(|n| n.as_ref())
    }

    /// Normalize every row of one feed.
    ///
    /// Under `Skip`, bad rows are counted by kind and left out; under `Abort`,
    /// the first bad row fails the whole feed.
    pub fn normalize_feed(&self, feed: &RawFeed, policy: SchemaErrorPolicy) -> Result<NormalizedFeed> {
        let source_id = feed.source_id;
        let _span = info_span!("normalize", source = %source_id).entered();
        let started = Instant::now();

        let normalizer = self.get(source_id).ok_or_else(|| {
            PipelineError::Config(format!("No normalizer registered for source: {}", source_id))
        })?;
        debug!("Using {} for {} rows", normalizer.name(), feed.rows.len());

        let mut report = NormalizeReport::new(source_id);
        report.rows_in = feed.rows.len();
        let mut records = Vec::with_capacity(feed.rows.len());

        for (row, raw) in feed.rows.iter().enumerate() {
            match normalizer.normalize(row, raw) {
                Ok(record) => {
                    if record.location.is_none() {
                        report.missing_geolocation += 1;
                    }
                    records.push(record);
                }
                Err(err) => {
                    metrics::normalize::row_rejected(source_id.as_str(), err.kind());
                    match policy {
                        SchemaErrorPolicy::Abort => {
                            warn!("Aborting {} normalization: {}", source_id, err);
                            return Err(err.into());
                        }
                        SchemaErrorPolicy::Skip => {
                            debug!("Skipping row: {}", err);
                            report.rejected += 1;
                            *report
                                .rejected_by_kind
                                .entry(err.kind().to_string())
                                .or_insert(0) += 1;
                        }
                    }
                }
            }
        }
        report.normalized = records.len();

        metrics::normalize::rows_processed(source_id.as_str(), report.rows_in as u64);
        metrics::normalize::records_produced(source_id.as_str(), report.normalized as u64);
        metrics::normalize::missing_geolocation(source_id.as_str(), report.missing_geolocation as u64);
        metrics::normalize::duration(source_id.as_str(), started.elapsed().as_secs_f64());

        if report.rejected > 0 {
            warn!(
                "{}: skipped {} of {} rows ({:?})",
                source_id, report.rejected, report.rows_in, report.rejected_by_kind
            );
        }
        info!(
            "{}: normalized {} records ({} without coordinates)",
            source_id, report.normalized, report.missing_geolocation
        );

        Ok(NormalizedFeed {
            source_id,
            records,
            report,
        })
    }

    /// Normalize every feed, in the order given.
    ///
    /// With `parallel` set, each feed runs on its own scoped thread; the
    /// result is identical to the sequential pass.
    pub fn normalize_all(
        &self,
        feeds: &[RawFeed],
        policy: SchemaErrorPolicy,
        parallel: bool,
    ) -> Result<Vec<NormalizedFeed>> {
        if !parallel || feeds.len() < 2 {
            return feeds
                .iter()
                .map(|feed| self.normalize_feed(feed, policy))
                .collect();
        }

        std::thread::scope(|scope| {
            let handles: Vec<_> = feeds
                .iter()
                .map(|feed| scope.spawn(move || self.normalize_feed(feed, policy)))
                .collect();

            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or(Err(PipelineError::WorkerPanicked { stage: "normalize" }))
                })
                .collect()
        })
    }

    /// List all registered sources
    pub fn list_sources(&self) -> Vec<SourceId> {
        let mut sources: Vec<SourceId> = self.normalizers.keys().copied().collect();
        sources.sort();
        sources
    }
}

impl Default for NormalizationRegistry {
    fn default() -> Self {
        Self::new()
    }
}
