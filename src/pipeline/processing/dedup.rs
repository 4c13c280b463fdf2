use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;
use tracing::{debug, info, info_span};

use crate::domain::{GeoPoint, PermitRecord, RecordRef, SourceId, UnifiedRecord};
use crate::observability::metrics;
use crate::pipeline::pipeline_config::{CollisionPolicy, DedupConfig, GeoTolerance};

/// Structural join key: geolocation under the configured tolerance plus the issued date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollisionKey {
    lat: i64,
    lon: i64,
    issued_date: NaiveDate,
}

impl CollisionKey {
    pub fn new(location: GeoPoint, issued_date: NaiveDate, tolerance: GeoTolerance) -> Self {
        let (lat, lon) = match tolerance {
            GeoTolerance::Exact => (exact_bits(location.latitude), exact_bits(location.longitude)),
            GeoTolerance::Rounded { decimals } => {
                let scale = 10f64.powi(decimals as i32);
                (
                    (location.latitude * scale).round() as i64,
                    (location.longitude * scale).round() as i64,
                )
            }
        };
        Self {
            lat,
            lon,
            issued_date,
        }
    }
}

// -0.0 and 0.0 are the same coordinate
fn exact_bits(value: f64) -> i64 {
    let value = if value == 0.0 { 0.0 } else { value };
    value.to_bits() as i64
}

/// How one collision pair was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The folded record was removed from the output
    Dropped,
    /// Both records were kept; the folded one carries `duplicate_of`
    Tagged,
}

/// A pair of records, one per source, judged to be the same permit event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionPair {
    /// The record that survives (HISTORICAL side)
    pub kept: RecordRef,
    /// The record folded into it (DOB_NOW side)
    pub folded: RecordRef,
    pub issued_date: NaiveDate,
    pub in_overlap_window: bool,
    pub resolution: Resolution,
}

/// Accumulated counts for one deduplication pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupReport {
    pub policy: CollisionPolicy,
    pub tolerance: GeoTolerance,
    pub input_records: usize,
    /// Records with coordinates, i.e. eligible for matching
    pub eligible: usize,
    pub collisions: usize,
    pub collisions_in_window: usize,
    pub dropped: usize,
    pub tagged: usize,
    /// Persisted separately; left out of the coverage report
    #[serde(skip)]
    pub pairs: Vec<CollisionPair>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupOutput {
    pub records: Vec<UnifiedRecord>,
    pub report: DedupReport,
}

/// Cross-source deduplicator.
///
/// HISTORICAL records are indexed by [`CollisionKey`]; each DOB_NOW record
/// with coordinates claims the earliest unclaimed HISTORICAL record under the
/// same key. Output keeps input order, so repeated runs are identical.
pub struct Deduplicator {
    config: DedupConfig,
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    pub fn deduplicate(&self, records: Vec<PermitRecord>) -> DedupOutput {
        let _span = info_span!("dedup", policy = ?self.config.policy).entered();
        let started = Instant::now();
        let tolerance = self.config.tolerance;

        let mut location_index: HashMap<CollisionKey, VecDeque<usize>> = HashMap::new();
        let mut eligible = 0;
        for (idx, record) in records.iter().enumerate() {
            if let Some(location) = record.location {
                eligible += 1;
                if record.source_id == SourceId::Historical {
                    location_index
                        .entry(CollisionKey::new(location, record.issued_date, tolerance))
                        .or_default()
                        .push_back(idx);
                }
            }
        }
        debug!("Indexed {} geo+date keys", location_index.len());

        // folded index -> (kept index, resolution)
        let mut folded: HashMap<usize, (usize, Resolution)> = HashMap::new();
        let mut pairs = Vec::new();
        for (idx, record) in records.iter().enumerate() {
            if record.source_id != SourceId::DobNow {
                continue;
            }
            let Some(location) = record.location else {
                continue;
            };
            let key = CollisionKey::new(location, record.issued_date, tolerance);
            let Some(kept_idx) = location_index.get_mut(&key).and_then(|q| q.pop_front()) else {
                continue;
            };

            let in_window = self.config.overlap_window.contains(record.issued_date);
            let resolution = self.resolve(in_window);
            folded.insert(idx, (kept_idx, resolution));
            pairs.push(CollisionPair {
                kept: records[kept_idx].record_ref(),
                folded: record.record_ref(),
                issued_date: record.issued_date,
                in_overlap_window: in_window,
                resolution,
            });
        }

        let input_records = records.len();
        let dropped_rows: HashSet<usize> = folded
            .iter()
            .filter(|(_, (_, resolution))| *resolution == Resolution::Dropped)
            .map(|(idx, _)| *idx)
            .collect();

        let refs: Vec<RecordRef> = records.iter().map(PermitRecord::record_ref).collect();
        let unified: Vec<UnifiedRecord> = records
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| !dropped_rows.contains(idx))
            .map(|(idx, record)| {
                let mut unified = UnifiedRecord::new(record);
                if let Some((kept_idx, Resolution::Tagged)) = folded.get(&idx) {
                    unified.duplicate_of = Some(refs[*kept_idx]);
                }
                unified
            })
            .collect();

        let collisions_in_window = pairs.iter().filter(|p| p.in_overlap_window).count();
        let report = DedupReport {
            policy: self.config.policy,
            tolerance,
            input_records,
            eligible,
            collisions: pairs.len(),
            collisions_in_window,
            dropped: dropped_rows.len(),
            tagged: pairs.len() - dropped_rows.len(),
            pairs,
        };

        metrics::dedup::input_records(input_records as u64);
        metrics::dedup::collisions(
            collisions_in_window as u64,
            (report.collisions - collisions_in_window) as u64,
        );
        metrics::dedup::dropped(report.dropped as u64);
        metrics::dedup::tagged(report.tagged as u64);
        metrics::dedup::duration(started.elapsed().as_secs_f64());

        info!(
            "Deduplicated {} records: {} collisions ({} in overlap window), {} dropped, {} tagged",
            input_records, report.collisions, collisions_in_window, report.dropped, report.tagged
        );

        DedupOutput {
            records: unified,
            report,
        }
    }

    fn resolve(&self, in_window: bool) -> Resolution {
        match self.config.policy {
            CollisionPolicy::Drop => Resolution::Dropped,
            CollisionPolicy::Tag => Resolution::Tagged,
            CollisionPolicy::PreferHistorical if in_window => Resolution::Dropped,
            CollisionPolicy::PreferHistorical => Resolution::Tagged,
        }
    }
}
