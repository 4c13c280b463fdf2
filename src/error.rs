use thiserror::Error;

use crate::domain::SourceId;

/// A raw row could not be mapped onto the canonical permit shape.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("{source_id} row {row}: missing required field '{field}'")]
    MissingField {
        source_id: SourceId,
        row: usize,
        field: &'static str,
    },

    #[error("{source_id} row {row}: unparseable date '{value}' in '{field}'")]
    UnparseableDate {
        source_id: SourceId,
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("{source_id} row {row}: unparseable coordinate '{value}' in '{field}'")]
    UnparseableCoordinate {
        source_id: SourceId,
        row: usize,
        field: &'static str,
        value: String,
    },

    #[error("{source_id} row {row}: coordinate {value} in '{field}' is outside WGS84 range")]
    CoordinateOutOfRange {
        source_id: SourceId,
        row: usize,
        field: &'static str,
        value: f64,
    },

    #[error("{source_id} row {row}: only one of latitude/longitude is present")]
    PartialGeolocation { source_id: SourceId, row: usize },
}

impl SchemaError {
    /// Stable label used when counting rejections per kind.
    pub fn kind(&self) -> &'static str {
        match self {
            SchemaError::MissingField { .. } => "missing_field",
            SchemaError::UnparseableDate { .. } => "unparseable_date",
            SchemaError::UnparseableCoordinate { .. } => "unparseable_coordinate",
            SchemaError::CoordinateOutOfRange { .. } => "coordinate_out_of_range",
            SchemaError::PartialGeolocation { .. } => "partial_geolocation",
        }
    }
}

/// The district polygon set could not be loaded or reprojected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Polygon document could not be parsed: {0}")]
    Parse(String),

    #[error("Feature {feature} has no usable '{property}' district code")]
    MissingDistrictCode { feature: usize, property: String },

    #[error("Feature {feature} has unsupported geometry type '{kind}'")]
    UnsupportedGeometry { feature: usize, kind: String },

    #[error("Feature {feature} contains an invalid ring: {reason}")]
    InvalidRing { feature: usize, reason: String },

    #[error("Unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    #[error("Feature {feature} reprojected outside WGS84 bounds")]
    Reprojection { feature: usize },

    #[error("Polygon set is empty")]
    EmptyPolygonSet,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Geometry error: {0}")]
    Geometry(#[from] GeometryError),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A {stage} worker thread panicked")]
    WorkerPanicked { stage: &'static str },
}

pub type Result<T> = std::result::Result<T, PipelineError>;
