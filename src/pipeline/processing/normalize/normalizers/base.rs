use chrono::{NaiveDate, NaiveDateTime};
use serde_json::Value;

use super::super::RawRow;
use crate::domain::{GeoPoint, PermitAttributes, PermitRecord, SourceId};
use crate::error::SchemaError;

/// Canonical fields a source column can map onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalField {
    PermitKey,
    IssuedDate,
    FilingDate,
    ExpirationDate,
    PermitStatus,
    JobType,
    WorkType,
    Borough,
    Bin,
    Block,
    Lot,
    ZipCode,
    Latitude,
    Longitude,
    CommunityBoard,
    CouncilDistrict,
    CensusTract,
    Nta,
    EstimatedJobCost,
}

/// Static description of one source's native layout
#[derive(Debug, Clone, Copy)]
pub struct SourceLayout {
    /// Source column name -> canonical field. Columns not listed are dropped.
    pub field_map: &'static [(&'static str, CanonicalField)],
    /// Date formats tried in order for every date column of this source
    pub date_formats: &'static [&'static str],
}

impl SourceLayout {
    /// The source column that feeds a canonical field, if the source has one
    pub fn column_for(&self, field: CanonicalField) -> Option<&'static str> {
        self.field_map
            .iter()
            .find(|(_, canonical)| *canonical == field)
            .map(|(column, _)| *column)
    }
}

/// Base trait for source-specific normalizers
pub trait SourceNormalizer: Send + Sync {
    /// Get the source this normalizer handles
    fn source_id(&self) -> SourceId;

    /// Get a human-readable name for this normalizer
    fn name(&self) -> &str;

    /// The static field table and date formats for this source
    fn layout(&self) -> &SourceLayout;

    /// Normalize one raw row into the canonical permit shape
    fn normalize(&self, row: usize, raw: &RawRow) -> Result<PermitRecord, SchemaError> {
        LayoutReader::new(self.source_id(), row, self.layout(), raw).into_record()
    }
}

/// Reads canonical fields out of a raw row through a source layout
pub struct LayoutReader<'a> {
    source_id: SourceId,
    row: usize,
    layout: &'a SourceLayout,
    raw: &'a RawRow,
}

impl<'a> LayoutReader<'a> {
    pub fn new(source_id: SourceId, row: usize, layout: &'a SourceLayout, raw: &'a RawRow) -> Self {
        Self {
            source_id,
            row,
            layout,
            raw,
        }
    }

    pub fn into_record(self) -> Result<PermitRecord, SchemaError> {
        let permit_key = self.required_text(CanonicalField::PermitKey)?;
        let issued_date = self.required_date(CanonicalField::IssuedDate)?;
        let location = self.location()?;

        let attributes = PermitAttributes {
            filing_date: self.optional_date(CanonicalField::FilingDate),
            expiration_date: self.optional_date(CanonicalField::ExpirationDate),
            permit_status: self.text(CanonicalField::PermitStatus),
            job_type: self.text(CanonicalField::JobType),
            work_type: self.text(CanonicalField::WorkType),
            borough: self.text(CanonicalField::Borough),
            bin: self.text(CanonicalField::Bin),
            block: self.text(CanonicalField::Block),
            lot: self.text(CanonicalField::Lot),
            zip_code: self.text(CanonicalField::ZipCode),
            community_board: self.text(CanonicalField::CommunityBoard),
            council_district: self.text(CanonicalField::CouncilDistrict),
            census_tract: self.text(CanonicalField::CensusTract),
            nta: self.text(CanonicalField::Nta),
            estimated_job_cost: self
                .text(CanonicalField::EstimatedJobCost)
                .and_then(|s| NormalizerUtils::parse_number(&s)),
        };

        Ok(PermitRecord {
            source_id: self.source_id,
            row: self.row,
            permit_key,
            issued_date,
            location,
            borough_community_district: None,
            attributes,
        })
    }

    fn column(&self, field: CanonicalField) -> &'static str {
        self.layout.column_for(field).unwrap_or("<unmapped>")
    }

    fn text(&self, field: CanonicalField) -> Option<String> {
        let column = self.layout.column_for(field)?;
        self.raw.get(column).and_then(NormalizerUtils::value_text)
    }

    fn required_text(&self, field: CanonicalField) -> Result<String, SchemaError> {
        self.text(field).ok_or(SchemaError::MissingField {
            source_id: self.source_id,
            row: self.row,
            field: self.column(field),
        })
    }

    fn required_date(&self, field: CanonicalField) -> Result<NaiveDate, SchemaError> {
        let value = self.required_text(field)?;
        NormalizerUtils::parse_date(&value, self.layout.date_formats).ok_or_else(|| {
            SchemaError::UnparseableDate {
                source_id: self.source_id,
                row: self.row,
                field: self.column(field),
                value,
            }
        })
    }

    fn optional_date(&self, field: CanonicalField) -> Option<NaiveDate> {
        self.text(field)
            .and_then(|value| NormalizerUtils::parse_date(&value, self.layout.date_formats))
    }

    fn coordinate(&self, field: CanonicalField, limit: f64) -> Result<Option<f64>, SchemaError> {
        let Some(value) = self.text(field) else {
            return Ok(None);
        };
        let parsed = NormalizerUtils::parse_number(&value).ok_or_else(|| {
            SchemaError::UnparseableCoordinate {
                source_id: self.source_id,
                row: self.row,
                field: self.column(field),
                value: value.clone(),
            }
        })?;
        if parsed.abs() > limit {
            return Err(SchemaError::CoordinateOutOfRange {
                source_id: self.source_id,
                row: self.row,
                field: self.column(field),
                value: parsed,
            });
        }
        Ok(Some(parsed))
    }

    fn location(&self) -> Result<Option<GeoPoint>, SchemaError> {
        let latitude = self.coordinate(CanonicalField::Latitude, 90.0)?;
        let longitude = self.coordinate(CanonicalField::Longitude, 180.0)?;
        match (latitude, longitude) {
            (Some(lat), Some(lon)) => Ok(Some(GeoPoint::new(lat, lon))),
            (None, None) => Ok(None),
            _ => Err(SchemaError::PartialGeolocation {
                source_id: self.source_id,
                row: self.row,
            }),
        }
    }
}

/// Utility functions shared by the source normalizers
pub struct NormalizerUtils;

impl NormalizerUtils {
    /// Text content of a raw value; blank strings and nulls are absent
    pub fn value_text(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Parse a finite number, tolerating thousands separators and a leading '$'
    pub fn parse_number(text: &str) -> Option<f64> {
        let cleaned: String = text
            .trim()
            .trim_start_matches('$')
            .chars()
            .filter(|c| *c != ',')
            .collect();
        cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    /// Try each format in order; the first that consumes the whole string wins
    pub fn parse_date(text: &str, formats: &[&str]) -> Option<NaiveDate> {
        let text = text.trim();
        formats.iter().find_map(|format| {
            if Self::format_has_time(format) {
                NaiveDateTime::parse_from_str(text, format)
                    .ok()
                    .map(|dt| dt.date())
            } else {
                NaiveDate::parse_from_str(text, format).ok()
            }
        })
    }

    fn format_has_time(format: &str) -> bool {
        ["%H", "%I", "%M", "%S", "%T", "%R"]
            .iter()
            .any(|directive| format.contains(directive))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TEST_LAYOUT: SourceLayout = SourceLayout {
        field_map: &[
            ("id", CanonicalField::PermitKey),
            ("day", CanonicalField::IssuedDate),
            ("lat", CanonicalField::Latitude),
            ("lon", CanonicalField::Longitude),
            ("cost", CanonicalField::EstimatedJobCost),
        ],
        date_formats: &["%m/%d/%Y", "%Y-%m-%d"],
    };

    fn raw(value: serde_json::Value) -> RawRow {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_date_respects_priority() {
        // 01/02/2021 is read month-first because that format comes first
        let date = NormalizerUtils::parse_date("01/02/2021", &["%m/%d/%Y", "%d/%m/%Y"]).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2021, 1, 2).unwrap());

        let date = NormalizerUtils::parse_date("01/02/2021", &["%d/%m/%Y", "%m/%d/%Y"]).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2021, 2, 1).unwrap());
    }

    #[test]
    fn test_parse_date_with_time_component() {
        let date =
            NormalizerUtils::parse_date("2021-06-30T00:00:00.000", &["%Y-%m-%dT%H:%M:%S%.f"]).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2021, 6, 30).unwrap());

        // A date-only format must not accept a timestamp with trailing input
        assert!(NormalizerUtils::parse_date("2021-06-30T00:00:00.000", &["%Y-%m-%d"]).is_none());
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(NormalizerUtils::parse_number("$1,250.50"), Some(1250.5));
        assert_eq!(NormalizerUtils::parse_number("-73.98"), Some(-73.98));
        assert_eq!(NormalizerUtils::parse_number("n/a"), None);
        assert_eq!(NormalizerUtils::parse_number("NaN"), None);
    }

    #[test]
    fn test_reader_builds_record_and_drops_unmapped_columns() {
        let row = raw(json!({
            "id": "P-1",
            "day": "03/15/2018",
            "lat": "40.75",
            "lon": -73.99,
            "cost": "$10,000",
            "unrelated_column": "ignored"
        }));
        let record = LayoutReader::new(SourceId::Historical, 4, &TEST_LAYOUT, &row)
            .into_record()
            .unwrap();

        assert_eq!(record.permit_key, "P-1");
        assert_eq!(record.row, 4);
        assert_eq!(record.issued_date, NaiveDate::from_ymd_opt(2018, 3, 15).unwrap());
        assert_eq!(record.location, Some(GeoPoint::new(40.75, -73.99)));
        assert_eq!(record.attributes.estimated_job_cost, Some(10000.0));
        assert!(record.borough_community_district.is_none());
    }

    #[test]
    fn test_reader_accepts_missing_geolocation() {
        let row = raw(json!({"id": "P-2", "day": "2018-03-15", "lat": "", "lon": null}));
        let record = LayoutReader::new(SourceId::Historical, 0, &TEST_LAYOUT, &row)
            .into_record()
            .unwrap();
        assert!(record.location.is_none());
    }

    #[test]
    fn test_reader_rejects_half_geolocation() {
        let row = raw(json!({"id": "P-3", "day": "2018-03-15", "lat": "40.7"}));
        let err = LayoutReader::new(SourceId::DobNow, 9, &TEST_LAYOUT, &row)
            .into_record()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::PartialGeolocation {
                source_id: SourceId::DobNow,
                row: 9
            }
        );
    }

    #[test]
    fn test_reader_rejects_missing_and_bad_dates() {
        let missing = raw(json!({"id": "P-4"}));
        let err = LayoutReader::new(SourceId::Historical, 1, &TEST_LAYOUT, &missing)
            .into_record()
            .unwrap_err();
        assert_eq!(err.kind(), "missing_field");

        let bad = raw(json!({"id": "P-5", "day": "15.03.2018"}));
        let err = LayoutReader::new(SourceId::Historical, 2, &TEST_LAYOUT, &bad)
            .into_record()
            .unwrap_err();
        assert_eq!(err.kind(), "unparseable_date");
    }

    #[test]
    fn test_reader_rejects_out_of_range_coordinates() {
        let row = raw(json!({"id": "P-6", "day": "2018-03-15", "lat": "140.0", "lon": "-73.9"}));
        let err = LayoutReader::new(SourceId::Historical, 3, &TEST_LAYOUT, &row)
            .into_record()
            .unwrap_err();
        assert_eq!(err.kind(), "coordinate_out_of_range");
    }
}
