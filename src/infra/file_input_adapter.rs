use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::app::ports::{FeedSourcePort, PolygonSourcePort};
use crate::config::InputsConfig;
use crate::domain::SourceId;
use crate::pipeline::pipeline_config::SpatialConfig;
use crate::pipeline::processing::normalize::{RawFeed, RawRow};
use crate::pipeline::processing::spatial::DistrictSet;

/// Reads feed exports and the district polygon file from local disk.
///
/// Feeds may be a JSON array of row objects or NDJSON (one object per line).
pub struct FileInputAdapter {
    historical: PathBuf,
    dob_now: PathBuf,
    districts: PathBuf,
}

impl FileInputAdapter {
    pub fn new(historical: impl Into<PathBuf>, dob_now: impl Into<PathBuf>, districts: impl Into<PathBuf>) -> Self {
        Self {
            historical: historical.into(),
            dob_now: dob_now.into(),
            districts: districts.into(),
        }
    }

    pub fn from_config(inputs: &InputsConfig) -> Self {
        Self::new(&inputs.historical, &inputs.dob_now, &inputs.districts)
    }

    fn feed_path(&self, source_id: SourceId) -> &PathBuf {
        match source_id {
            SourceId::Historical => &self.historical,
            SourceId::DobNow => &self.dob_now,
        }
    }
}

/// Parse a feed export. A leading `[` means a JSON array, anything else NDJSON.
pub fn parse_feed_rows(text: &str) -> Result<Vec<RawRow>> {
    let trimmed = text.trim_start();
    if trimmed.starts_with('[') {
        let values: Vec<Value> = serde_json::from_str(trimmed).context("Feed is not a valid JSON array")?;
        return values
            .into_iter()
            .enumerate()
            .map(|(idx, value)| into_row(value).ok_or_else(|| anyhow!("Element {} is not a JSON object", idx)))
            .collect();
    }

    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let value: Value =
            serde_json::from_str(line).with_context(|| format!("Line {} is not valid JSON", line_no + 1))?;
        let row = into_row(value).ok_or_else(|| anyhow!("Line {} is not a JSON object", line_no + 1))?;
        rows.push(row);
    }
    Ok(rows)
}

fn into_row(value: Value) -> Option<RawRow> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

#[async_trait]
impl FeedSourcePort for FileInputAdapter {
    async fn load_feed(&self, source_id: SourceId) -> Result<RawFeed> {
        let path = self.feed_path(source_id);
        debug!("Reading {} feed from {}", source_id, path.display());
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let rows = parse_feed_rows(&text).with_context(|| format!("Failed to parse {}", path.display()))?;
        info!("Read {} {} rows from {}", rows.len(), source_id, path.display());
        Ok(RawFeed::new(source_id, rows))
    }
}

#[async_trait]
impl PolygonSourcePort for FileInputAdapter {
    async fn load_districts(&self, spatial: &SpatialConfig) -> Result<DistrictSet> {
        let text = tokio::fs::read_to_string(&self.districts)
            .await
            .with_context(|| format!("Failed to read {}", self.districts.display()))?;
        let districts = DistrictSet::from_geojson_str(
            &text,
            &spatial.code_property,
            spatial.polygon_crs.as_deref(),
            spatial.grid_cell_degrees,
        )
        .with_context(|| format!("Failed to load polygons from {}", self.districts.display()))?;
        info!(
            "Loaded {} district polygons ({} source CRS) from {}",
            districts.len(),
            districts.source_crs(),
            self.districts.display()
        );
        Ok(districts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DistrictCode, GeoPoint};
    use std::fs;
    use tempfile::TempDir;

    const DISTRICTS: &str = r#"{
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "properties": {"BoroCD": 101},
            "geometry": {"type": "Polygon", "coordinates": [[
                [-74.02, 40.70], [-74.00, 40.70], [-74.00, 40.72], [-74.02, 40.72], [-74.02, 40.70]
            ]]}
        }]
    }"#;

    #[test]
    fn test_parse_json_array_and_ndjson() {
        let array = parse_feed_rows(r#" [{"a": 1}, {"a": 2}] "#).unwrap();
        assert_eq!(array.len(), 2);

        let ndjson = parse_feed_rows("{\"a\": 1}\n\n{\"a\": 2}\n").unwrap();
        assert_eq!(ndjson, array);

        assert!(parse_feed_rows("[1, 2]").is_err());
        assert!(parse_feed_rows("{\"a\": 1}\nnot json").is_err());
        assert!(parse_feed_rows("").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_feed_and_districts() {
        let dir = TempDir::new().unwrap();
        let hist = dir.path().join("hist.ndjson");
        let now = dir.path().join("now.json");
        let polys = dir.path().join("nycd.geojson");
        fs::write(&hist, "{\"permit_si_no\": \"H1\"}\n").unwrap();
        fs::write(&now, "[]").unwrap();
        fs::write(&polys, DISTRICTS).unwrap();

        let adapter = FileInputAdapter::new(&hist, &now, &polys);
        let feed = adapter.load_feed(SourceId::Historical).await.unwrap();
        assert_eq!(feed.source_id, SourceId::Historical);
        assert_eq!(feed.rows.len(), 1);
        assert!(adapter.load_feed(SourceId::DobNow).await.unwrap().rows.is_empty());

        let districts = adapter.load_districts(&SpatialConfig::default()).await.unwrap();
        assert_eq!(districts.len(), 1);
        assert_eq!(districts.locate(GeoPoint::new(40.71, -74.01)), Some(DistrictCode(101)));
    }

    #[tokio::test]
    async fn test_missing_feed_is_an_error() {
        let dir = TempDir::new().unwrap();
        let adapter = FileInputAdapter::new(
            dir.path().join("missing.ndjson"),
            dir.path().join("missing.json"),
            dir.path().join("missing.geojson"),
        );
        assert!(adapter.load_feed(SourceId::Historical).await.is_err());
        assert!(adapter.load_districts(&SpatialConfig::default()).await.is_err());
    }
}
