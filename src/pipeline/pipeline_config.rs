use anyhow::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{
    DEFAULT_DISTRICT_CODE_PROPERTY, DEFAULT_GRID_CELL_DEGREES, DEFAULT_MIN_DISTRICT_TOTAL,
    DEFAULT_OVERLAP_END, DEFAULT_OVERLAP_START, DEFAULT_ROUNDING_DECIMALS,
};
use crate::domain::DistrictCode;

/// Configuration for a complete reconciliation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub normalize: NormalizeConfig,
    pub dedup: DedupConfig,
    pub spatial: SpatialConfig,
    pub aggregate: AggregateConfig,
    /// Run per-source normalization and per-batch attribution on worker threads
    pub parallel_execution: bool,
}

/// What to do when a raw row cannot be normalized
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaErrorPolicy {
    /// Skip the row and count it in the normalize report
    #[default]
    Skip,
    /// Abort the whole batch on the first bad row
    Abort,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizeConfig {
    pub schema_error_policy: SchemaErrorPolicy,
}

/// How cross-source collisions are resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Remove the DOB_NOW side of every collision pair
    Drop,
    /// Keep both sides; the DOB_NOW side carries `duplicate_of`
    #[default]
    Tag,
    /// Inside the overlap window keep only HISTORICAL; outside it, tag
    PreferHistorical,
}

impl std::str::FromStr for CollisionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop" => Ok(CollisionPolicy::Drop),
            "tag" => Ok(CollisionPolicy::Tag),
            "prefer_historical" => Ok(CollisionPolicy::PreferHistorical),
            other => Err(format!(
                "unknown collision policy '{}' (expected drop, tag or prefer_historical)",
                other
            )),
        }
    }
}

/// Geolocation comparison used for collision matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeoTolerance {
    /// Bit-identical coordinates
    Exact,
    /// Coordinates equal after rounding to `decimals` places
    Rounded { decimals: u32 },
}

impl Default for GeoTolerance {
    fn default() -> Self {
        GeoTolerance::Rounded {
            decimals: DEFAULT_ROUNDING_DECIMALS,
        }
    }
}

/// Inclusive date range in which both sources publish permits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl CoverageWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

impl Default for CoverageWindow {
    fn default() -> Self {
        let (sy, sm, sd) = DEFAULT_OVERLAP_START;
        let (ey, em, ed) = DEFAULT_OVERLAP_END;
        Self {
            start: NaiveDate::from_ymd_opt(sy, sm, sd).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(ey, em, ed).unwrap_or(NaiveDate::MAX),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub policy: CollisionPolicy,
    pub tolerance: GeoTolerance,
    pub overlap_window: CoverageWindow,
}

/// What to do with records whose containing polygon has a code outside the valid enumeration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidCodePolicy {
    /// Keep the record marked INVALID with its observed code
    #[default]
    KeepTagged,
    /// Remove the record and count it
    Drop,
    /// Replace observed codes using the mapping; unmapped codes stay INVALID
    Remap { map: BTreeMap<DistrictCode, DistrictCode> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Feature property holding the district code
    pub code_property: String,
    /// Overrides the CRS declared in the polygon document, e.g. "EPSG:2263"
    pub polygon_crs: Option<String>,
    pub grid_cell_degrees: f64,
    pub invalid_code_policy: InvalidCodePolicy,
    /// Overrides the built-in NYC community district enumeration
    pub valid_codes: Option<Vec<DistrictCode>>,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            code_property: DEFAULT_DISTRICT_CODE_PROPERTY.to_string(),
            polygon_crs: None,
            grid_cell_degrees: DEFAULT_GRID_CELL_DEGREES,
            invalid_code_policy: InvalidCodePolicy::default(),
            valid_codes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateConfig {
    /// Districts whose total permit count is below this are excluded from the modeling table
    pub min_total_permits: u64,
    /// Count records tagged as cross-source duplicates
    pub count_tagged_duplicates: bool,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            min_total_permits: DEFAULT_MIN_DISTRICT_TOTAL,
            count_tagged_duplicates: false,
        }
    }
}

impl PipelineConfig {
    /// Validate the pipeline configuration
    pub fn validate(&self) -> Result<()> {
        if let GeoTolerance::Rounded { decimals } = self.dedup.tolerance {
            if decimals > 9 {
                return Err(anyhow::anyhow!(
                    "Rounding to {} decimals is finer than coordinate precision",
                    decimals
                ));
            }
        }

        let window = self.dedup.overlap_window;
        if window.start > window.end {
            return Err(anyhow::anyhow!(
                "Overlap window starts ({}) after it ends ({})",
                window.start,
                window.end
            ));
        }

        if !(self.spatial.grid_cell_degrees.is_finite() && self.spatial.grid_cell_degrees > 0.0) {
            return Err(anyhow::anyhow!(
                "Grid cell size must be a positive number of degrees"
            ));
        }

        if self.spatial.code_property.trim().is_empty() {
            return Err(anyhow::anyhow!("District code property must not be empty"));
        }

        if let Some(codes) = &self.spatial.valid_codes {
            if codes.is_empty() {
                return Err(anyhow::anyhow!("valid_codes override must not be empty"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_documented_constants() {
        let config = PipelineConfig::default();
        assert_eq!(config.aggregate.min_total_permits, DEFAULT_MIN_DISTRICT_TOTAL);
        assert_eq!(config.dedup.policy, CollisionPolicy::Tag);
        assert_eq!(
            config.dedup.tolerance,
            GeoTolerance::Rounded { decimals: 5 }
        );
        assert_eq!(config.normalize.schema_error_policy, SchemaErrorPolicy::Skip);
        assert_eq!(config.spatial.invalid_code_policy, InvalidCodePolicy::KeepTagged);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_window() {
        let mut config = PipelineConfig::default();
        config.dedup.overlap_window = CoverageWindow {
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_grid() {
        let mut config = PipelineConfig::default();
        config.spatial.grid_cell_degrees = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_collision_policy_from_str() {
        assert_eq!("drop".parse::<CollisionPolicy>().unwrap(), CollisionPolicy::Drop);
        assert_eq!(
            "prefer-historical".parse::<CollisionPolicy>().unwrap(),
            CollisionPolicy::PreferHistorical
        );
        assert!("merge".parse::<CollisionPolicy>().is_err());
    }

    #[test]
    fn test_default_overlap_window() {
        let window = CoverageWindow::default();
        assert!(window.contains(NaiveDate::from_ymd_opt(2016, 1, 1).unwrap()));
        assert!(window.contains(NaiveDate::from_ymd_opt(2019, 12, 31).unwrap()));
        assert!(!window.contains(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()));
    }
}
