use super::base::{CanonicalField, SourceLayout, SourceNormalizer};
use crate::domain::SourceId;

/// Column layout of DOB NOW: Build - Approved Permits (rbx6-tga4)
pub const DOB_NOW_LAYOUT: SourceLayout = SourceLayout {
    field_map: &[
        ("job_filing_number", CanonicalField::PermitKey),
        ("issued_date", CanonicalField::IssuedDate),
        ("expired_date", CanonicalField::ExpirationDate),
        ("permit_status", CanonicalField::PermitStatus),
        ("work_type", CanonicalField::WorkType),
        ("borough", CanonicalField::Borough),
        ("bin", CanonicalField::Bin),
        ("block", CanonicalField::Block),
        ("lot", CanonicalField::Lot),
        ("zip_code", CanonicalField::ZipCode),
        ("latitude", CanonicalField::Latitude),
        ("longitude", CanonicalField::Longitude),
        ("community_board", CanonicalField::CommunityBoard),
        ("council_district", CanonicalField::CouncilDistrict),
        ("census_tract", CanonicalField::CensusTract),
        ("nta", CanonicalField::Nta),
        ("estimated_job_costs", CanonicalField::EstimatedJobCost),
    ],
    // Socrata floating timestamps first
    date_formats: &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d",
        "%m/%d/%Y",
        "%m/%d/%Y %I:%M:%S %p",
    ],
};

/// Normalizer for the DOB NOW approved permits feed
pub struct DobNowNormalizer;

impl DobNowNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DobNowNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceNormalizer for DobNowNormalizer {
    fn source_id(&self) -> SourceId {
        SourceId::DobNow
    }

    fn name(&self) -> &str {
        "DOB NOW Approved Permits Normalizer"
    }

    fn layout(&self) -> &SourceLayout {
        &DOB_NOW_LAYOUT
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    #[test]
    fn test_normalize_dob_now_row() {
        let normalizer = DobNowNormalizer::new();
        let raw = json!({
            "job_filing_number": "M00123456-I1",
            "issued_date": "2021-01-15T00:00:00.000",
            "expired_date": "2022-01-15T00:00:00.000",
            "work_type": "General Construction",
            "latitude": "40.70",
            "longitude": "-74.01",
            "estimated_job_costs": "125000"
        });

        let record = normalizer.normalize(3, raw.as_object().unwrap()).unwrap();

        assert_eq!(record.source_id, SourceId::DobNow);
        assert_eq!(record.row, 3);
        assert_eq!(record.permit_key, "M00123456-I1");
        assert_eq!(record.issued_date, NaiveDate::from_ymd_opt(2021, 1, 15).unwrap());
        assert_eq!(
            record.attributes.expiration_date,
            NaiveDate::from_ymd_opt(2022, 1, 15)
        );
        assert_eq!(record.attributes.estimated_job_cost, Some(125000.0));
        assert!(record.attributes.job_type.is_none());
    }

    #[test]
    fn test_dob_now_twelve_hour_format() {
        let normalizer = DobNowNormalizer::new();
        let raw = json!({
            "job_filing_number": "B1",
            "issued_date": "01/15/2021 03:45:00 PM"
        });
        let record = normalizer.normalize(0, raw.as_object().unwrap()).unwrap();
        assert_eq!(record.issued_date, NaiveDate::from_ymd_opt(2021, 1, 15).unwrap());
    }

    #[test]
    fn test_dob_now_does_not_read_historical_columns() {
        let normalizer = DobNowNormalizer::new();
        // A historical-shaped row has no DOB NOW permit key
        let raw = json!({"permit_si_no": "1", "issuance_date": "07/03/2017"});
        let err = normalizer.normalize(0, raw.as_object().unwrap()).unwrap_err();
        assert_eq!(err.kind(), "missing_field");
    }
}
