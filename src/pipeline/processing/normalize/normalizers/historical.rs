use super::base::{CanonicalField, SourceLayout, SourceNormalizer};
use crate::domain::SourceId;

/// Column layout of the DOB Permit Issuance dataset (ipu4-2q9a)
pub const HISTORICAL_LAYOUT: SourceLayout = SourceLayout {
    field_map: &[
        ("permit_si_no", CanonicalField::PermitKey),
        ("issuance_date", CanonicalField::IssuedDate),
        ("filing_date", CanonicalField::FilingDate),
        ("expiration_date", CanonicalField::ExpirationDate),
        ("permit_status", CanonicalField::PermitStatus),
        ("job_type", CanonicalField::JobType),
        ("work_type", CanonicalField::WorkType),
        ("borough", CanonicalField::Borough),
        ("bin__", CanonicalField::Bin),
        ("block", CanonicalField::Block),
        ("lot", CanonicalField::Lot),
        ("zip_code", CanonicalField::ZipCode),
        ("gis_latitude", CanonicalField::Latitude),
        ("gis_longitude", CanonicalField::Longitude),
        ("community_board", CanonicalField::CommunityBoard),
        ("gis_council_district", CanonicalField::CouncilDistrict),
        ("gis_census_tract", CanonicalField::CensusTract),
        ("gis_nta_name", CanonicalField::Nta),
    ],
    // The legacy system publishes US-style text dates
    date_formats: &[
        "%m/%d/%Y",
        "%Y-%m-%d",
        "%m/%d/%Y %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
    ],
};

/// Normalizer for the historical DOB permit issuance feed
pub struct HistoricalNormalizer;

impl HistoricalNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HistoricalNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceNormalizer for HistoricalNormalizer {
    fn source_id(&self) -> SourceId {
        SourceId::Historical
    }

    fn name(&self) -> &str {
        "DOB Permit Issuance Normalizer"
    }

    fn layout(&self) -> &SourceLayout {
        &HISTORICAL_LAYOUT
    }
}
