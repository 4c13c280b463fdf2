//! Metrics for the permit reconciliation pipeline
//!
//! Every stage records counters and histograms through the per-phase modules
//! below. Names follow Prometheus conventions and are enumerated in
//! [`MetricName`] so no stage uses a magic string.

use std::fmt;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Enum representing all metric names used in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Run metrics
    RunsSuccess,
    RunsError,
    RunDuration,

    // Normalize metrics
    NormalizeRowsProcessed,
    NormalizeRecordsProduced,
    NormalizeRowsRejected,
    NormalizeMissingGeolocation,
    NormalizeDuration,

    // Dedup metrics
    DedupInputRecords,
    DedupCollisions,
    DedupRecordsDropped,
    DedupRecordsTagged,
    DedupDuration,

    // Spatial metrics
    SpatialPolygonsLoaded,
    SpatialValid,
    SpatialInvalid,
    SpatialUnknown,
    SpatialDroppedByPolicy,
    SpatialRemapped,
    SpatialDuration,

    // Aggregate metrics
    AggregateSeriesPoints,
    AggregateDistrictsIncluded,
    AggregateDistrictsExcluded,
    AggregateUnattributedRecords,

    // Snapshot metrics
    SnapshotFilesWritten,
    SnapshotBytesWritten,
    SnapshotCommitSuccess,
    SnapshotCommitError,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MetricName {
    /// Get the metric name as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            // Run metrics
            MetricName::RunsSuccess => "permits_runs_success_total",
            MetricName::RunsError => "permits_runs_error_total",
            MetricName::RunDuration => "permits_run_duration_seconds",

            // Normalize metrics
            MetricName::NormalizeRowsProcessed => "permits_normalize_rows_total",
            MetricName::NormalizeRecordsProduced => "permits_normalize_records_total",
            MetricName::NormalizeRowsRejected => "permits_normalize_rejected_total",
            MetricName::NormalizeMissingGeolocation => "permits_normalize_missing_geolocation_total",
            MetricName::NormalizeDuration => "permits_normalize_duration_seconds",

            // Dedup metrics
            MetricName::DedupInputRecords => "permits_dedup_input_records_total",
            MetricName::DedupCollisions => "permits_dedup_collisions_total",
            MetricName::DedupRecordsDropped => "permits_dedup_dropped_total",
            MetricName::DedupRecordsTagged => "permits_dedup_tagged_total",
            MetricName::DedupDuration => "permits_dedup_duration_seconds",

            // Spatial metrics
            MetricName::SpatialPolygonsLoaded => "permits_spatial_polygons_loaded",
            MetricName::SpatialValid => "permits_spatial_valid_total",
            MetricName::SpatialInvalid => "permits_spatial_invalid_total",
            MetricName::SpatialUnknown => "permits_spatial_unknown_total",
            MetricName::SpatialDroppedByPolicy => "permits_spatial_dropped_total",
            MetricName::SpatialRemapped => "permits_spatial_remapped_total",
            MetricName::SpatialDuration => "permits_spatial_duration_seconds",

            // Aggregate metrics
            MetricName::AggregateSeriesPoints => "permits_aggregate_series_points",
            MetricName::AggregateDistrictsIncluded => "permits_aggregate_districts_included",
            MetricName::AggregateDistrictsExcluded => "permits_aggregate_districts_excluded",
            MetricName::AggregateUnattributedRecords => "permits_aggregate_unattributed_records",

            // Snapshot metrics
            MetricName::SnapshotFilesWritten => "permits_snapshot_files_written_total",
            MetricName::SnapshotBytesWritten => "permits_snapshot_bytes_written_total",
            MetricName::SnapshotCommitSuccess => "permits_snapshot_commit_success_total",
            MetricName::SnapshotCommitError => "permits_snapshot_commit_error_total",
        }
    }

    /// Get all metric names as an iterator
    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            RunsSuccess,
            RunsError,
            RunDuration,
            NormalizeRowsProcessed,
            NormalizeRecordsProduced,
            NormalizeRowsRejected,
            NormalizeMissingGeolocation,
            NormalizeDuration,
            DedupInputRecords,
            DedupCollisions,
            DedupRecordsDropped,
            DedupRecordsTagged,
            DedupDuration,
            SpatialPolygonsLoaded,
            SpatialValid,
            SpatialInvalid,
            SpatialUnknown,
            SpatialDroppedByPolicy,
            SpatialRemapped,
            SpatialDuration,
            AggregateSeriesPoints,
            AggregateDistrictsIncluded,
            AggregateDistrictsExcluded,
            AggregateUnattributedRecords,
            SnapshotFilesWritten,
            SnapshotBytesWritten,
            SnapshotCommitSuccess,
            SnapshotCommitError,
        ]
        .into_iter()
    }

    /// Returns (phase, description, unit)
    pub fn metadata(&self) -> (&'static str, &'static str, Option<&'static str>) {
        match self {
            MetricName::RunsSuccess => ("run", "Pipeline runs that committed output", None),
            MetricName::RunsError => ("run", "Pipeline runs that failed", None),
            MetricName::RunDuration => ("run", "End-to-end run duration", Some("s")),

            MetricName::NormalizeRowsProcessed => ("normalize", "Raw rows read per source", None),
            MetricName::NormalizeRecordsProduced => ("normalize", "Canonical records produced per source", None),
            MetricName::NormalizeRowsRejected => ("normalize", "Rows rejected with a schema error", None),
            MetricName::NormalizeMissingGeolocation => ("normalize", "Records without coordinates", None),
            MetricName::NormalizeDuration => ("normalize", "Normalization duration per source", Some("s")),

            MetricName::DedupInputRecords => ("dedup", "Records entering deduplication", None),
            MetricName::DedupCollisions => ("dedup", "Cross-source collision pairs", None),
            MetricName::DedupRecordsDropped => ("dedup", "Records removed by the collision policy", None),
            MetricName::DedupRecordsTagged => ("dedup", "Records tagged with duplicate_of", None),
            MetricName::DedupDuration => ("dedup", "Deduplication duration", Some("s")),

            MetricName::SpatialPolygonsLoaded => ("spatial", "District polygons loaded", None),
            MetricName::SpatialValid => ("spatial", "Records in a valid district", None),
            MetricName::SpatialInvalid => ("spatial", "Records marked INVALID", None),
            MetricName::SpatialUnknown => ("spatial", "Records marked UNKNOWN", None),
            MetricName::SpatialDroppedByPolicy => ("spatial", "Records dropped by invalid-code policy", None),
            MetricName::SpatialRemapped => ("spatial", "Records remapped to another code", None),
            MetricName::SpatialDuration => ("spatial", "Attribution duration", Some("s")),

            MetricName::AggregateSeriesPoints => ("aggregate", "Monthly points per output table", None),
            MetricName::AggregateDistrictsIncluded => ("aggregate", "Districts in the modeling table", None),
            MetricName::AggregateDistrictsExcluded => ("aggregate", "Districts below the volume threshold", None),
            MetricName::AggregateUnattributedRecords => ("aggregate", "Records counted in the unattributed series", None),

            MetricName::SnapshotFilesWritten => ("snapshot", "Snapshot files written", None),
            MetricName::SnapshotBytesWritten => ("snapshot", "Snapshot bytes written", Some("bytes")),
            MetricName::SnapshotCommitSuccess => ("snapshot", "Snapshot sets committed", None),
            MetricName::SnapshotCommitError => ("snapshot", "Snapshot sets abandoned", None),
        }
    }
}

/// Install the Prometheus recorder for this process and return its render handle
pub fn init() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;
    describe_all();
    info!("Metrics system initialized");
    Ok(handle)
}

/// Register help text and units for every metric with the active recorder
pub fn describe_all() {
    use ::metrics::{describe_counter, describe_gauge, describe_histogram, Unit};

    for metric in MetricName::all_metrics() {
        let (_, description, unit) = metric.metadata();
        let unit = match unit {
            Some("s") => Unit::Seconds,
            Some("bytes") => Unit::Bytes,
            _ => Unit::Count,
        };
        let name = metric.as_str();
        match metric {
            MetricName::RunDuration
            | MetricName::NormalizeDuration
            | MetricName::DedupDuration
            | MetricName::SpatialDuration => describe_histogram!(name, unit, description),
            MetricName::SpatialPolygonsLoaded
            | MetricName::AggregateSeriesPoints
            | MetricName::AggregateDistrictsIncluded
            | MetricName::AggregateDistrictsExcluded
            | MetricName::AggregateUnattributedRecords => describe_gauge!(name, unit, description),
            _ => describe_counter!(name, unit, description),
        }
    }
}

// ============================================================================
// Run Metrics
// ============================================================================

pub mod run {
    use super::MetricName;

    pub fn success() {
        ::metrics::counter!(MetricName::RunsSuccess.as_str()).increment(1);
    }

    pub fn error(stage: &str) {
        ::metrics::counter!(MetricName::RunsError.as_str(), "stage" => stage.to_string())
            .increment(1);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::RunDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    /// Record raw rows read for a source
    pub fn rows_processed(source: &str, count: u64) {
        ::metrics::counter!(MetricName::NormalizeRowsProcessed.as_str(), "source" => source.to_string())
            .increment(count);
    }

    /// Record canonical records produced for a source
    pub fn records_produced(source: &str, count: u64) {
        ::metrics::counter!(MetricName::NormalizeRecordsProduced.as_str(), "source" => source.to_string())
            .increment(count);
    }

    /// Record a rejected row by schema error kind
    pub fn row_rejected(source: &str, kind: &str) {
        ::metrics::counter!(
            MetricName::NormalizeRowsRejected.as_str(),
            "source" => source.to_string(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    pub fn missing_geolocation(source: &str, count: u64) {
        ::metrics::counter!(MetricName::NormalizeMissingGeolocation.as_str(), "source" => source.to_string())
            .increment(count);
    }

    pub fn duration(source: &str, secs: f64) {
        ::metrics::histogram!(MetricName::NormalizeDuration.as_str(), "source" => source.to_string())
            .record(secs);
    }
}

// ============================================================================
// Dedup Metrics
// ============================================================================

pub mod dedup {
    use super::MetricName;

    pub fn input_records(count: u64) {
        ::metrics::counter!(MetricName::DedupInputRecords.as_str()).increment(count);
    }

    /// Record collision pairs, split by whether they fell inside the overlap window
    pub fn collisions(in_window: u64, outside_window: u64) {
        ::metrics::counter!(MetricName::DedupCollisions.as_str(), "window" => "inside")
            .increment(in_window);
        ::metrics::counter!(MetricName::DedupCollisions.as_str(), "window" => "outside")
            .increment(outside_window);
    }

    pub fn dropped(count: u64) {
        ::metrics::counter!(MetricName::DedupRecordsDropped.as_str()).increment(count);
    }

    pub fn tagged(count: u64) {
        ::metrics::counter!(MetricName::DedupRecordsTagged.as_str()).increment(count);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::DedupDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Spatial Metrics
// ============================================================================

pub mod spatial {
    use super::MetricName;

    pub fn polygons_loaded(count: usize) {
        ::metrics::gauge!(MetricName::SpatialPolygonsLoaded.as_str()).set(count as f64);
    }

    pub fn valid(count: u64) {
        ::metrics::counter!(MetricName::SpatialValid.as_str()).increment(count);
    }

    /// Record INVALID records for one observed code (or the unmatched label)
    pub fn invalid(code: &str, count: u64) {
        ::metrics::counter!(MetricName::SpatialInvalid.as_str(), "code" => code.to_string())
            .increment(count);
    }

    pub fn unknown(count: u64) {
        ::metrics::counter!(MetricName::SpatialUnknown.as_str()).increment(count);
    }

    pub fn dropped_by_policy(count: u64) {
        ::metrics::counter!(MetricName::SpatialDroppedByPolicy.as_str()).increment(count);
    }

    pub fn remapped(count: u64) {
        ::metrics::counter!(MetricName::SpatialRemapped.as_str()).increment(count);
    }

    pub fn duration(secs: f64) {
        ::metrics::histogram!(MetricName::SpatialDuration.as_str()).record(secs);
    }
}

// ============================================================================
// Aggregate Metrics
// ============================================================================

pub mod aggregate {
    use super::MetricName;

    /// Record the number of points in an output table ("all", "modeling", "unattributed")
    pub fn series_points(table: &str, count: usize) {
        ::metrics::gauge!(MetricName::AggregateSeriesPoints.as_str(), "table" => table.to_string())
            .set(count as f64);
    }

    pub fn districts(included: usize, excluded: usize) {
        ::metrics::gauge!(MetricName::AggregateDistrictsIncluded.as_str()).set(included as f64);
        ::metrics::gauge!(MetricName::AggregateDistrictsExcluded.as_str()).set(excluded as f64);
    }

    pub fn unattributed_records(count: u64) {
        ::metrics::gauge!(MetricName::AggregateUnattributedRecords.as_str()).set(count as f64);
    }
}

// ============================================================================
// Snapshot Metrics
// ============================================================================

pub mod snapshot {
    use super::MetricName;

    pub fn file_written(bytes: u64) {
        ::metrics::counter!(MetricName::SnapshotFilesWritten.as_str()).increment(1);
        ::metrics::counter!(MetricName::SnapshotBytesWritten.as_str()).increment(bytes);
    }

    pub fn commit_success() {
        ::metrics::counter!(MetricName::SnapshotCommitSuccess.as_str()).increment(1);
    }

    pub fn commit_error() {
        ::metrics::counter!(MetricName::SnapshotCommitError.as_str()).increment(1);
    }
}
