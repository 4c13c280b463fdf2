use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, info_span, warn};

pub mod districts;
pub mod geometry;
pub mod index;
pub mod projection;

pub use districts::{DistrictCatalog, DistrictPolygon, DistrictSet};
pub use geometry::{BoundingBox, Coord, MultiPolygon, Polygon};
pub use projection::Crs;

use crate::constants::UNMATCHED_DISTRICT_LABEL;
use crate::domain::{DistrictAssignment, DistrictCode, UnifiedRecord};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::pipeline_config::InvalidCodePolicy;

/// Coverage accounting for one attribution pass.
///
/// `valid + invalid + unknown + dropped_by_policy == total`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributionReport {
    pub total: usize,
    pub valid: usize,
    /// Records kept with an INVALID assignment
    pub invalid: usize,
    pub unknown: usize,
    pub dropped_by_policy: usize,
    /// Records whose observed code was replaced by the remap table (included in `valid`/`invalid`)
    pub remapped: usize,
    /// Every observed out-of-enumeration code, before policy, keyed by code or `unmatched`
    pub invalid_by_code: BTreeMap<String, usize>,
}

impl AttributionReport {
    fn merge(&mut self, other: AttributionReport) {
        self.total += other.total;
        self.valid += other.valid;
        self.invalid += other.invalid;
        self.unknown += other.unknown;
        self.dropped_by_policy += other.dropped_by_policy;
        self.remapped += other.remapped;
        for (code, count) in other.invalid_by_code {
            *self.invalid_by_code.entry(code).or_insert(0) += count;
        }
    }

    /// Codes sorted by descending count, for the coverage log line
    pub fn top_invalid_codes(&self, limit: usize) -> Vec<(&str, usize)> {
        let mut codes: Vec<(&str, usize)> = self
            .invalid_by_code
            .iter()
            .map(|(code, count)| (code.as_str(), *count))
            .collect();
        codes.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
        codes.truncate(limit);
        codes
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributionOutput {
    pub records: Vec<UnifiedRecord>,
    pub report: AttributionReport,
}

/// Run `work` over each batch on its own scoped thread, returning results in batch order
fn run_batches<I, T, F>(batches: Vec<I>, work: F) -> Result<Vec<T>>
where
    I: Send,
    T: Send,
    F: Fn(I) -> T + Sync,
{
    let work = &work;
    std::thread::scope(|scope| {
        let handles: Vec<_> = batches
            .into_iter()
            .map(|batch| scope.spawn(move || work(batch)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle.join().map_err(|_| {
                    warn!("Attribution worker panicked");
                    PipelineError::WorkerPanicked { stage: "spatial" }
                })
            })
            .collect()
    })
}

/// Assigns each record a community district by point-in-polygon containment
pub struct SpatialAttributor {
    districts: DistrictSet,
    catalog: DistrictCatalog,
    policy: InvalidCodePolicy,
}

impl SpatialAttributor {
    pub fn new(districts: DistrictSet, catalog: DistrictCatalog, policy: InvalidCodePolicy) -> Self {
        Self {
            districts,
            catalog,
            policy,
        }
    }

    pub fn districts(&self) -> &DistrictSet {
        &self.districts
    }

    pub fn catalog(&self) -> &DistrictCatalog {
        &self.catalog
    }

    /// Attribute every record on the calling thread
    pub fn attribute(&self, records: Vec<UnifiedRecord>) -> AttributionOutput {
        let _span = info_span!("spatial", records = records.len()).entered();
        let started = Instant::now();
        let output = self.attribute_batch(records);
        self.finish(&output.report, started);
        output
    }

    /// Attribute records in `workers` contiguous batches on scoped threads.
    ///
    /// Batches share only the immutable polygon set; results are stitched back
    /// in input order so the output equals [`attribute`](Self::attribute).
    /// A panicking worker fails the whole call; no partial output is returned.
    pub fn attribute_parallel(&self, records: Vec<UnifiedRecord>, workers: usize) -> Result<AttributionOutput> {
        let _span = info_span!("spatial", records = records.len(), workers).entered();
        let started = Instant::now();

        let workers = workers.max(1);
        let batch_size = records.len().div_ceil(workers).max(1);
        let mut batches = Vec::with_capacity(workers);
        let mut remaining = records.into_iter();
        loop {
            let batch: Vec<UnifiedRecord> = remaining.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            batches.push(batch);
        }
        debug!("Split into {} batches of up to {}", batches.len(), batch_size);

        let outputs = run_batches(batches, |batch| self.attribute_batch(batch))?;

        let mut merged = AttributionOutput {
            records: Vec::new(),
            report: AttributionReport::default(),
        };
        for output in outputs {
            merged.records.extend(output.records);
            merged.report.merge(output.report);
        }

        self.finish(&merged.report, started);
        Ok(merged)
    }

    fn attribute_batch(&self, records: Vec<UnifiedRecord>) -> AttributionOutput {
        let mut report = AttributionReport {
            total: records.len(),
            ..Default::default()
        };
        let mut kept = Vec::with_capacity(records.len());

        for mut record in records {
            let assignment = match record.record.location {
                None => DistrictAssignment::Unknown,
                Some(point) => match self.districts.locate(point) {
                    Some(code) if self.catalog.is_valid(code) => DistrictAssignment::Valid(code),
                    observed => {
                        let label = observed
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| UNMATCHED_DISTRICT_LABEL.to_string());
                        *report.invalid_by_code.entry(label).or_insert(0) += 1;
                        match self.apply_policy(observed, &mut report) {
                            Some(assignment) => assignment,
                            None => continue,
                        }
                    }
                },
            };

            match assignment {
                DistrictAssignment::Valid(_) => report.valid += 1,
                DistrictAssignment::Invalid(_) => report.invalid += 1,
                DistrictAssignment::Unknown => report.unknown += 1,
            }
            record.record.borough_community_district = Some(assignment);
            kept.push(record);
        }

        AttributionOutput {
            records: kept,
            report,
        }
    }

    /// Resolve a point that is unmatched or inside an out-of-enumeration polygon.
    /// `None` means the record is dropped.
    fn apply_policy(&self, observed: Option<DistrictCode>, report: &mut AttributionReport) -> Option<DistrictAssignment> {
        let Some(code) = observed else {
            // Unmatched points are always kept
            return Some(DistrictAssignment::Invalid(None));
        };
        match &self.policy {
            InvalidCodePolicy::KeepTagged => Some(DistrictAssignment::Invalid(Some(code))),
            InvalidCodePolicy::Drop => {
                report.dropped_by_policy += 1;
                None
            }
            InvalidCodePolicy::Remap { map } => match map.get(&code) {
                Some(&target) => {
                    report.remapped += 1;
                    if self.catalog.is_valid(target) {
                        Some(DistrictAssignment::Valid(target))
                    } else {
                        Some(DistrictAssignment::Invalid(Some(target)))
                    }
                }
                None => Some(DistrictAssignment::Invalid(Some(code))),
            },
        }
    }

    fn finish(&self, report: &AttributionReport, started: Instant) {
        metrics::spatial::valid(report.valid as u64);
        metrics::spatial::unknown(report.unknown as u64);
        for (code, count) in &report.invalid_by_code {
            metrics::spatial::invalid(code, *count as u64);
        }
        metrics::spatial::dropped_by_policy(report.dropped_by_policy as u64);
        metrics::spatial::remapped(report.remapped as u64);
        metrics::spatial::duration(started.elapsed().as_secs_f64());

        info!(
            "Attributed {} records: {} valid, {} invalid, {} unknown, {} dropped by policy",
            report.total, report.valid, report.invalid, report.unknown, report.dropped_by_policy
        );
        if !report.invalid_by_code.is_empty() {
            info!("Most frequent invalid codes: {:?}", report.top_invalid_codes(10));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{GeoPoint, PermitAttributes, PermitRecord, SourceId};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn square(code: u16, x0: f64, y0: f64, size: f64) -> DistrictPolygon {
        DistrictPolygon {
            district_code: DistrictCode(code),
            geometry: MultiPolygon::new(vec![Polygon::new(
                vec![
                    Coord::new(x0, y0),
                    Coord::new(x0 + size, y0),
                    Coord::new(x0 + size, y0 + size),
                    Coord::new(x0, y0 + size),
                    Coord::new(x0, y0),
                ],
                vec![],
            )]),
        }
    }

    /// 101 at [-74.02, -74.00] x [40.70, 40.72]; joint-interest area 164 east of it
    fn attributor(policy: InvalidCodePolicy) -> SpatialAttributor {
        let set = DistrictSet::from_polygons(
            vec![square(101, -74.02, 40.70, 0.02), square(164, -74.00, 40.70, 0.02)],
            0.01,
        )
        .unwrap();
        SpatialAttributor::new(set, DistrictCatalog::nyc(), policy)
    }

    fn record(row: usize, location: Option<(f64, f64)>) -> UnifiedRecord {
        UnifiedRecord::new(PermitRecord {
            source_id: SourceId::Historical,
            row,
            permit_key: row.to_string(),
            issued_date: NaiveDate::from_ymd_opt(2021, 1, 15).unwrap(),
            location: location.map(|(lat, lon)| GeoPoint::new(lat, lon)),
            borough_community_district: None,
            attributes: PermitAttributes::default(),
        })
    }

    fn mixed_records() -> Vec<UnifiedRecord> {
        vec![
            record(0, Some((40.71, -74.01))), // inside 101
            record(1, Some((40.71, -73.99))), // inside 164
            record(2, Some((45.0, -70.0))),   // outside everything
            record(3, None),
        ]
    }

    #[test]
    fn test_inside_point_gets_polygon_code() {
        let out = attributor(InvalidCodePolicy::KeepTagged).attribute(vec![record(0, Some((40.71, -74.01)))]);
        assert_eq!(
            out.records[0].record.borough_community_district,
            Some(DistrictAssignment::Valid(DistrictCode(101)))
        );
    }

    #[test]
    fn test_keep_tagged_classification_and_conservation() {
        let out = attributor(InvalidCodePolicy::KeepTagged).attribute(mixed_records());
        let report = &out.report;

        assert_eq!(out.records.len(), 4);
        assert_eq!(out.records[1].district(), DistrictAssignment::Invalid(Some(DistrictCode(164))));
        assert_eq!(out.records[2].district(), DistrictAssignment::Invalid(None));
        assert_eq!(out.records[3].district(), DistrictAssignment::Unknown);

        assert_eq!((report.valid, report.invalid, report.unknown), (1, 2, 1));
        assert_eq!(report.valid + report.invalid + report.unknown + report.dropped_by_policy, report.total);
        assert_eq!(report.invalid_by_code.get("164"), Some(&1));
        assert_eq!(report.invalid_by_code.get(UNMATCHED_DISTRICT_LABEL), Some(&1));
    }

    #[test]
    fn test_drop_policy_removes_only_contained_invalid_codes() {
        let out = attributor(InvalidCodePolicy::Drop).attribute(mixed_records());
        let report = &out.report;

        assert_eq!(out.records.len(), 3);
        assert_eq!(report.dropped_by_policy, 1);
        // The unmatched point is never dropped
        assert!(out
            .records
            .iter()
            .any(|r| r.district() == DistrictAssignment::Invalid(None)));
        assert_eq!(report.valid + report.invalid + report.unknown + report.dropped_by_policy, report.total);
        assert_eq!(report.invalid_by_code.get("164"), Some(&1));
    }

    #[test]
    fn test_remap_policy() {
        let mut map = BTreeMap::new();
        map.insert(DistrictCode(164), DistrictCode(105));
        let out = attributor(InvalidCodePolicy::Remap { map }).attribute(mixed_records());

        assert_eq!(out.records[1].district(), DistrictAssignment::Valid(DistrictCode(105)));
        assert_eq!(out.report.remapped, 1);
        assert_eq!(out.report.valid, 2);
        assert_eq!(out.report.invalid, 1);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let records: Vec<UnifiedRecord> = (0..25)
            .map(|i| match i % 4 {
                0 => record(i, Some((40.71, -74.01))),
                1 => record(i, Some((40.71, -73.99))),
                2 => record(i, Some((45.0, -70.0))),
                _ => record(i, None),
            })
            .collect();

        let attributor = attributor(InvalidCodePolicy::Drop);
        let sequential = attributor.attribute(records.clone());
        let parallel = attributor.attribute_parallel(records, 4).unwrap();
        assert_eq!(sequential, parallel);

        let single = attributor.attribute_parallel(Vec::new(), 4).unwrap();
        assert!(single.records.is_empty());
        assert_eq!(single.report.total, 0);
    }

    #[test]
    fn test_batches_keep_order() {
        let out = run_batches(vec![1, 2, 3], |n| n * 10).unwrap();
        assert_eq!(out, vec![10, 20, 30]);
    }

    #[test]
    fn test_panicking_batch_fails_instead_of_shrinking_output() {
        let result = run_batches(vec![1, 2, 3], |n| {
            if n == 2 {
                panic!("batch {} failed", n);
            }
            n
        });
        assert!(matches!(result, Err(PipelineError::WorkerPanicked { stage: "spatial" })));
    }

    #[test]
    fn test_overlapping_polygons_resolve_to_first_loaded() {
        let set = DistrictSet::from_polygons(
            vec![square(102, 0.0, 0.0, 1.0), square(101, 0.0, 0.0, 1.0)],
            0.25,
        )
        .unwrap();
        let attributor = SpatialAttributor::new(set, DistrictCatalog::nyc(), InvalidCodePolicy::KeepTagged);
        let out = attributor.attribute(vec![record(0, Some((0.5, 0.5)))]);
        assert_eq!(out.records[0].district(), DistrictAssignment::Valid(DistrictCode(102)));
    }

    #[test]
    fn test_top_invalid_codes() {
        let mut report = AttributionReport::default();
        report.invalid_by_code.insert("164".to_string(), 3);
        report.invalid_by_code.insert("unmatched".to_string(), 7);
        report.invalid_by_code.insert("355".to_string(), 3);
        assert_eq!(
            report.top_invalid_codes(2),
            vec![("unmatched", 7), ("164", 3)]
        );
    }
}
