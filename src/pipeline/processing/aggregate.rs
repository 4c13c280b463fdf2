use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, info_span};

use crate::domain::{month_start, DistrictAssignment, DistrictCode, MonthlySeriesPoint, UnifiedRecord};
use crate::observability::metrics;
use crate::pipeline::pipeline_config::AggregateConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnattributedStatus {
    Unknown,
    Invalid,
}

/// Monthly count of records that never reached a valid district
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnattributedPoint {
    pub status: UnattributedStatus,
    /// Observed out-of-enumeration code; `None` for UNKNOWN and unmatched points
    pub district_code: Option<DistrictCode>,
    pub year_month: NaiveDate,
    pub permit_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistrictTotal {
    pub district_code: DistrictCode,
    pub total_permits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationReport {
    pub min_total_permits: u64,
    pub records_in: usize,
    /// Tagged cross-source duplicates left out of every count
    pub skipped_duplicates: usize,
    pub unattributed_records: u64,
    pub included: Vec<DistrictTotal>,
    /// Districts below `min_total_permits`, absent from the modeling table
    pub excluded: Vec<DistrictTotal>,
}

/// The aggregator's three tables plus the filter report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlySeries {
    /// Every valid district, sorted by (district, month)
    pub all: Vec<MonthlySeriesPoint>,
    /// `all` restricted to districts at or above the volume threshold
    pub modeling: Vec<MonthlySeriesPoint>,
    pub unattributed: Vec<UnattributedPoint>,
    pub report: AggregationReport,
}

/// Buckets attributed records into district x month counts
pub struct TemporalAggregator {
    config: AggregateConfig,
}

impl TemporalAggregator {
    pub fn new(config: AggregateConfig) -> Self {
        Self { config }
    }

    pub fn aggregate(&self, records: &[UnifiedRecord]) -> MonthlySeries {
        let _span = info_span!("aggregate", records = records.len()).entered();

        let mut counts: BTreeMap<(DistrictCode, NaiveDate), u64> = BTreeMap::new();
        let mut unattributed: BTreeMap<(UnattributedStatus, Option<DistrictCode>, NaiveDate), u64> = BTreeMap::new();
        let mut skipped_duplicates = 0;

        for unified in records {
            if unified.is_tagged_duplicate() && !self.config.count_tagged_duplicates {
                skipped_duplicates += 1;
                continue;
            }
            let month = month_start(unified.record.issued_date);
            match unified.district() {
                DistrictAssignment::Valid(code) => *counts.entry((code, month)).or_insert(0) += 1,
                DistrictAssignment::Invalid(code) => {
                    *unattributed.entry((UnattributedStatus::Invalid, code, month)).or_insert(0) += 1
                }
                DistrictAssignment::Unknown => {
                    *unattributed.entry((UnattributedStatus::Unknown, None, month)).or_insert(0) += 1
                }
            }
        }

        let mut totals: BTreeMap<DistrictCode, u64> = BTreeMap::new();
        for ((code, _), count) in &counts {
            *totals.entry(*code).or_insert(0) += count;
        }

        let threshold = self.config.min_total_permits;
        let (included, excluded): (Vec<DistrictTotal>, Vec<DistrictTotal>) = totals
            .into_iter()
            .map(|(district_code, total_permits)| DistrictTotal {
                district_code,
                total_permits,
            })
            .partition(|t| t.total_permits >= threshold);

        let all: Vec<MonthlySeriesPoint> = counts
            .into_iter()
            .map(|((district_code, year_month), permit_count)| MonthlySeriesPoint {
                district_code,
                year_month,
                permit_count,
            })
            .collect();
        let modeling: Vec<MonthlySeriesPoint> = all
            .iter()
            .filter(|p| included.iter().any(|t| t.district_code == p.district_code))
            .cloned()
            .collect();

        let unattributed: Vec<UnattributedPoint> = unattributed
            .into_iter()
            .map(|((status, district_code, year_month), permit_count)| UnattributedPoint {
                status,
                district_code,
                year_month,
                permit_count,
            })
            .collect();
        let unattributed_records: u64 = unattributed.iter().map(|p| p.permit_count).sum();

        metrics::aggregate::series_points("all", all.len());
        metrics::aggregate::series_points("modeling", modeling.len());
        metrics::aggregate::series_points("unattributed", unattributed.len());
        metrics::aggregate::districts(included.len(), excluded.len());
        metrics::aggregate::unattributed_records(unattributed_records);

        info!(
            "Aggregated {} monthly points for {} districts ({} excluded below {} permits), {} unattributed records",
            all.len(),
            included.len() + excluded.len(),
            excluded.len(),
            threshold,
            unattributed_records
        );

        MonthlySeries {
            all,
            modeling,
            unattributed,
            report: AggregationReport {
                min_total_permits: threshold,
                records_in: records.len(),
                skipped_duplicates,
                unattributed_records,
                included,
                excluded,
            },
        }
    }
}
