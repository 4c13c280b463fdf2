use anyhow::Result;
use chrono::NaiveDate;
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

use permit_pipeline::app::run_pipeline_use_case::RunPipelineUseCase;
use permit_pipeline::domain::{DistrictAssignment, DistrictCode, SourceId};
use permit_pipeline::infra::{FileInputAdapter, FileSnapshotAdapter};
use permit_pipeline::pipeline::pipeline_config::CollisionPolicy;
use permit_pipeline::pipeline::processing::aggregate::UnattributedStatus;
use permit_pipeline::pipeline::{PipelineConfig, PipelineOrchestrator};

const DISTRICTS: &str = r#"{
    "type": "FeatureCollection",
    "features": [
        {
            "type": "Feature",
            "properties": {"BoroCD": 101},
            "geometry": {"type": "Polygon", "coordinates": [[
                [-74.02, 40.70], [-74.00, 40.70], [-74.00, 40.72], [-74.02, 40.72], [-74.02, 40.70]
            ]]}
        },
        {
            "type": "Feature",
            "properties": {"BoroCD": "164"},
            "geometry": {"type": "MultiPolygon", "coordinates": [[[
                [-73.96, 40.79], [-73.94, 40.79], [-73.94, 40.81], [-73.96, 40.81], [-73.96, 40.79]
            ]]]}
        }
    ]
}"#;

fn month(y: i32, m: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, 1).unwrap()
}

/// Historical feed as a JSON array, DOB NOW feed as NDJSON
fn write_inputs(dir: &Path) -> FileInputAdapter {
    let historical = json!([
        {"permit_si_no": "H1", "issuance_date": "01/15/2021", "job_type": "A2",
         "gis_latitude": "40.71", "gis_longitude": "-74.01"},
        {"permit_si_no": "H2", "issuance_date": "02/03/2021",
         "gis_latitude": "40.711", "gis_longitude": "-74.011"},
        {"permit_si_no": "H3", "issuance_date": "01/20/2021",
         "gis_latitude": "40.80", "gis_longitude": "-73.95"},
        {"permit_si_no": "H4", "issuance_date": "03/01/2021"},
        {"permit_si_no": "H5", "issuance_date": "not a date"}
    ]);
    let dob_now = [
        json!({"job_filing_number": "N1", "issued_date": "2021-01-15T00:00:00.000",
               "latitude": "40.71", "longitude": "-74.01"}),
        json!({"job_filing_number": "N2", "issued_date": "2021-02-10T09:30:00.000",
               "latitude": "40.712", "longitude": "-74.012"}),
        json!({"job_filing_number": "N3", "issued_date": "2021-02-11",
               "latitude": "41.5", "longitude": "-75.0"}),
    ]
    .iter()
    .map(|v| v.to_string())
    .collect::<Vec<_>>()
    .join("\n");

    let hist_path = dir.join("historical.json");
    let now_path = dir.join("dob_now.ndjson");
    let districts_path = dir.join("nycd.geojson");
    fs::write(&hist_path, historical.to_string()).unwrap();
    fs::write(&now_path, dob_now).unwrap();
    fs::write(&districts_path, DISTRICTS).unwrap();
    FileInputAdapter::new(hist_path, now_path, districts_path)
}

fn use_case(dir: &Path, policy: CollisionPolicy) -> RunPipelineUseCase {
    let mut config = PipelineConfig::default();
    config.dedup.policy = policy;
    config.aggregate.min_total_permits = 0;

    RunPipelineUseCase::new(
        PipelineOrchestrator::new(config).unwrap(),
        Box::new(write_inputs(dir)),
        Box::new(write_inputs(dir)),
        Box::new(FileSnapshotAdapter::new(dir.join("out"))),
    )
}

#[tokio::test]
async fn test_drop_policy_counts_collision_once_and_keeps_invalid_out_of_valid_rows() -> Result<()> {
    let dir = TempDir::new()?;
    let outcome = use_case(dir.path(), CollisionPolicy::Drop).execute().await?;
    let run = &outcome.run;

    // One bad date skipped, not fatal
    let historical = run.normalized_for(SourceId::Historical).unwrap();
    assert_eq!(historical.report.rows_in, 5);
    assert_eq!(historical.report.rejected, 1);
    assert_eq!(historical.report.missing_geolocation, 1);

    assert_eq!(run.coverage.dedup.collisions, 1);
    assert_eq!(run.coverage.dedup.dropped, 1);
    assert_eq!(run.unified.len(), 6);
    assert!(run.unified.iter().all(|r| r.record.permit_key != "N1"));

    let series: Vec<(DistrictCode, NaiveDate, u64)> = run
        .series
        .modeling
        .iter()
        .map(|p| (p.district_code, p.year_month, p.permit_count))
        .collect();
    assert_eq!(
        series,
        vec![
            (DistrictCode(101), month(2021, 1), 1),
            (DistrictCode(101), month(2021, 2), 2),
        ]
    );
    assert!(run.series.all.iter().all(|p| p.district_code != DistrictCode(164)));

    let unattributed = &run.series.unattributed;
    assert!(unattributed.iter().any(|p| p.status == UnattributedStatus::Invalid
        && p.district_code == Some(DistrictCode(164))
        && p.year_month == month(2021, 1)
        && p.permit_count == 1));
    assert!(unattributed.iter().any(|p| p.status == UnattributedStatus::Invalid
        && p.district_code.is_none()
        && p.year_month == month(2021, 2)));
    assert!(unattributed
        .iter()
        .any(|p| p.status == UnattributedStatus::Unknown && p.year_month == month(2021, 3)));
    assert_eq!(run.coverage.spatial.invalid_by_code.get("164"), Some(&1));
    assert_eq!(run.coverage.spatial.invalid_by_code.get("unmatched"), Some(&1));
    Ok(())
}

#[tokio::test]
async fn test_coverage_is_conserved() -> Result<()> {
    let dir = TempDir::new()?;
    let outcome = use_case(dir.path(), CollisionPolicy::Tag).execute().await?;
    let run = &outcome.run;

    let mut valid = 0;
    let mut invalid = 0;
    let mut unknown = 0;
    for record in &run.attributed {
        match record.district() {
            DistrictAssignment::Valid(_) => valid += 1,
            DistrictAssignment::Invalid(_) => invalid += 1,
            DistrictAssignment::Unknown => unknown += 1,
        }
    }
    assert_eq!(valid + invalid + unknown, run.unified.len());
    assert_eq!(run.coverage.spatial.total, run.unified.len());
    assert_eq!(run.coverage.spatial.valid, valid);
    assert_eq!(run.coverage.spatial.invalid, invalid);
    assert_eq!(run.coverage.spatial.unknown, unknown);

    // Tag keeps the duplicate but the aggregator skips it
    assert_eq!(run.unified.len(), 7);
    assert_eq!(run.coverage.aggregate.skipped_duplicates, 1);
    assert_eq!(run.series.modeling[0].permit_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_run_commits_every_table() -> Result<()> {
    let dir = TempDir::new()?;
    let outcome = use_case(dir.path(), CollisionPolicy::Drop).execute().await?;
    let current = dir.path().join("out").join("current");
    assert_eq!(outcome.manifest.path, current);

    let lines = |name: &str| -> usize {
        fs::read_to_string(current.join(name))
            .unwrap()
            .lines()
            .filter(|l| !l.is_empty())
            .count()
    };
    assert_eq!(lines("normalized_historical.ndjson"), 4);
    assert_eq!(lines("normalized_dob_now.ndjson"), 3);
    assert_eq!(lines("unified.ndjson"), 6);
    assert_eq!(lines("collisions.ndjson"), 1);
    assert_eq!(lines("attributed.ndjson"), 6);
    assert_eq!(lines("monthly_modeling.ndjson"), 2);

    let coverage: serde_json::Value = serde_json::from_str(&fs::read_to_string(current.join("coverage_report.json"))?)?;
    assert_eq!(coverage["dedup"]["collisions"], 1);
    assert_eq!(coverage["run_id"], outcome.run.run_id.to_string());
    Ok(())
}
