use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::constants::{DOB_NOW_DATASET_ID, HISTORICAL_DATASET_ID};

/// The municipal feed a permit record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceId {
    Historical,
    DobNow,
}

impl SourceId {
    /// Both sources, historical first.
    pub fn all() -> [SourceId; 2] {
        [SourceId::Historical, SourceId::DobNow]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Historical => "HISTORICAL",
            SourceId::DobNow => "DOB_NOW",
        }
    }

    pub fn dataset_id(&self) -> &'static str {
        match self {
            SourceId::Historical => HISTORICAL_DATASET_ID,
            SourceId::DobNow => DOB_NOW_DATASET_ID,
        }
    }

    /// File-name friendly form, used for per-source snapshots.
    pub fn slug(&self) -> &'static str {
        match self {
            SourceId::Historical => "historical",
            SourceId::DobNow => "dob_now",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "historical" | "dob_historical" | HISTORICAL_DATASET_ID => Ok(SourceId::Historical),
            "dob_now" | "dobnow" | DOB_NOW_DATASET_ID => Ok(SourceId::DobNow),
            other => Err(format!("unknown permit source '{}'", other)),
        }
    }
}

/// A WGS84 position. Latitude and longitude always travel together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }
}

/// Weak, lookup-only reference to a record: its source and row within that source's feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    pub source_id: SourceId,
    pub row: usize,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_id, self.row)
    }
}

/// Canonical identifier of a NYC community district (BoroCD), e.g. 101 for Manhattan CD 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct DistrictCode(pub u16);

impl DistrictCode {
    /// Accepts a float only when it is a whole number within `u16` range
    pub fn from_whole_number(value: f64) -> Option<Self> {
        (value.is_finite() && value.fract() == 0.0 && value >= 0.0 && value <= f64::from(u16::MAX))
            .then(|| DistrictCode(value as u16))
    }
}

impl fmt::Display for DistrictCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DistrictCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u16>() {
            return Ok(DistrictCode(code));
        }
        // Polygon files sometimes carry codes as floats ("101.0", "101.00")
        trimmed
            .parse::<f64>()
            .ok()
            .and_then(DistrictCode::from_whole_number)
            .ok_or_else(|| format!("invalid district code '{}'", s))
    }
}

// Accepts numbers and strings so codes work as TOML table keys and in loosely typed exports
impl<'de> Deserialize<'de> for DistrictCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct CodeVisitor;

        impl serde::de::Visitor<'_> for CodeVisitor {
            type Value = DistrictCode;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a community district code such as 101")
            }

            fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<DistrictCode, E> {
                u16::try_from(v)
                    .map(DistrictCode)
                    .map_err(|_| E::custom(format!("district code {} out of range", v)))
            }

            fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<DistrictCode, E> {
                u16::try_from(v)
                    .map(DistrictCode)
                    .map_err(|_| E::custom(format!("district code {} out of range", v)))
            }

            fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<DistrictCode, E> {
                DistrictCode::from_whole_number(v)
                    .ok_or_else(|| E::custom(format!("district code {} is not a whole number", v)))
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<DistrictCode, E> {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(CodeVisitor)
    }
}

/// Outcome of spatial attribution for one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistrictAssignment {
    /// Contained in a polygon whose code is in the valid enumeration.
    Valid(DistrictCode),
    /// Coordinates tested; either no polygon matched (`None`) or the containing
    /// polygon's code is outside the valid enumeration.
    Invalid(Option<DistrictCode>),
    /// No coordinates to test.
    Unknown,
}

impl DistrictAssignment {
    pub fn valid_code(&self) -> Option<DistrictCode> {
        match self {
            DistrictAssignment::Valid(code) => Some(*code),
            _ => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, DistrictAssignment::Valid(_))
    }
}

/// Optional attributes carried from the source feeds into the canonical record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermitAttributes {
    pub filing_date: Option<NaiveDate>,
    pub expiration_date: Option<NaiveDate>,
    pub permit_status: Option<String>,
    pub job_type: Option<String>,
    pub work_type: Option<String>,
    pub borough: Option<String>,
    pub bin: Option<String>,
    pub block: Option<String>,
    pub lot: Option<String>,
    pub zip_code: Option<String>,
    pub community_board: Option<String>,
    pub council_district: Option<String>,
    pub census_tract: Option<String>,
    pub nta: Option<String>,
    pub estimated_job_cost: Option<f64>,
}

/// A permit in the canonical schema shared by both sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermitRecord {
    pub source_id: SourceId,
    /// Row position within the source feed; together with `source_id` this is the record's identity.
    pub row: usize,
    /// Source-native identifier, not globally unique.
    pub permit_key: String,
    pub issued_date: NaiveDate,
    pub location: Option<GeoPoint>,
    /// Unset until spatial attribution runs.
    pub borough_community_district: Option<DistrictAssignment>,
    #[serde(default)]
    pub attributes: PermitAttributes,
}

impl PermitRecord {
    pub fn record_ref(&self) -> RecordRef {
        RecordRef {
            source_id: self.source_id,
            row: self.row,
        }
    }
}

/// A permit that has passed deduplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRecord {
    #[serde(flatten)]
    pub record: PermitRecord,
    /// Set when this record was matched to a record from the other source and folded away.
    pub duplicate_of: Option<RecordRef>,
}

impl UnifiedRecord {
    pub fn new(record: PermitRecord) -> Self {
        Self {
            record,
            duplicate_of: None,
        }
    }

    pub fn is_tagged_duplicate(&self) -> bool {
        self.duplicate_of.is_some()
    }

    /// District assignment, treating a never-attributed record as `Unknown`.
    pub fn district(&self) -> DistrictAssignment {
        self.record
            .borough_community_district
            .clone()
            .unwrap_or(DistrictAssignment::Unknown)
    }
}

/// One cell of the modeling table: permits issued in a district during a month.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthlySeriesPoint {
    pub district_code: DistrictCode,
    /// Always the first day of the month.
    pub year_month: NaiveDate,
    pub permit_count: u64,
}

/// Truncate a date to the first day of its month.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.day0()))
}

/// First day of the month before `month`.
pub fn previous_month(month: NaiveDate) -> NaiveDate {
    month_start(month_start(month) - Duration::days(1))
}

/// First day of the month after `month`.
pub fn next_month(month: NaiveDate) -> NaiveDate {
    month_start(month_start(month) + Duration::days(32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_month_helpers() {
        let d = NaiveDate::from_ymd_opt(2021, 3, 31).unwrap();
        assert_eq!(month_start(d), NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
        assert_eq!(previous_month(d), NaiveDate::from_ymd_opt(2021, 2, 1).unwrap());
        assert_eq!(next_month(d), NaiveDate::from_ymd_opt(2021, 4, 1).unwrap());

        let jan = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        assert_eq!(previous_month(jan), NaiveDate::from_ymd_opt(2020, 12, 1).unwrap());
        assert_eq!(next_month(NaiveDate::from_ymd_opt(2020, 12, 15).unwrap()), jan);
    }

    #[test]
    fn test_source_id_parsing() {
        assert_eq!("dob_historical".parse::<SourceId>().unwrap(), SourceId::Historical);
        assert_eq!("DOB_NOW".parse::<SourceId>().unwrap(), SourceId::DobNow);
        assert_eq!("rbx6-tga4".parse::<SourceId>().unwrap(), SourceId::DobNow);
        assert!("permits".parse::<SourceId>().is_err());
    }

    #[test]
    fn test_district_code_parsing() {
        assert_eq!("101".parse::<DistrictCode>().unwrap(), DistrictCode(101));
        assert_eq!(" 355.0 ".parse::<DistrictCode>().unwrap(), DistrictCode(355));
        assert_eq!("101.00".parse::<DistrictCode>().unwrap(), DistrictCode(101));
        assert!("101.5".parse::<DistrictCode>().is_err());
        assert!("70000".parse::<DistrictCode>().is_err());
        assert!("NaN".parse::<DistrictCode>().is_err());
        assert!("CD1".parse::<DistrictCode>().is_err());
    }

    #[test]
    fn test_district_code_deserializes_from_number_or_string() {
        let codes: Vec<DistrictCode> = serde_json::from_str(r#"[101, "164", "355.0"]"#).unwrap();
        assert_eq!(codes, vec![DistrictCode(101), DistrictCode(164), DistrictCode(355)]);
        assert!(serde_json::from_str::<DistrictCode>("70000").is_err());

        let map: std::collections::BTreeMap<DistrictCode, DistrictCode> =
            serde_json::from_str(r#"{"164": 107}"#).unwrap();
        assert_eq!(map[&DistrictCode(164)], DistrictCode(107));
    }

    #[test]
    fn test_assignment_serializes_with_status_tag() {
        let json = serde_json::to_value(DistrictAssignment::Valid(DistrictCode(101))).unwrap();
        assert_eq!(json["status"], "VALID");
        assert_eq!(json["code"], 101);

        let unknown = serde_json::to_value(DistrictAssignment::Unknown).unwrap();
        assert_eq!(unknown["status"], "UNKNOWN");
    }
}
