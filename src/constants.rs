/// Dataset and default-value constants shared across the pipeline.
/// Every default a stage falls back to is named here so it is never silently hardcoded.

// Socrata dataset ids for the two permit feeds
pub const HISTORICAL_DATASET_ID: &str = "ipu4-2q9a";
pub const DOB_NOW_DATASET_ID: &str = "rbx6-tga4";

// Low-volume filter: districts with fewer permits than this over the full
// observed history are excluded from the modeling table.
pub const DEFAULT_MIN_DISTRICT_TOTAL: u64 = 5000;

// Collision tolerance: coordinates are compared after rounding to this many
// decimal places (~1.1 m at NYC latitudes).
pub const DEFAULT_ROUNDING_DECIMALS: u32 = 5;

// Window in which both feeds publish permits, as (year, month, day).
pub const DEFAULT_OVERLAP_START: (i32, u32, u32) = (2016, 1, 1);
pub const DEFAULT_OVERLAP_END: (i32, u32, u32) = (2019, 12, 31);

// Property holding the community district code in the DCP polygon file
pub const DEFAULT_DISTRICT_CODE_PROPERTY: &str = "BoroCD";

// Grid cell size for the polygon candidate index, in degrees
pub const DEFAULT_GRID_CELL_DEGREES: f64 = 0.01;

// Label used in coverage reports for points contained in no polygon
pub const UNMATCHED_DISTRICT_LABEL: &str = "unmatched";

// Default locations of inputs and outputs
pub const DEFAULT_CONFIG_PATH: &str = "permits.toml";
pub const DEFAULT_HISTORICAL_INPUT: &str = "data/raw/dob_historical.ndjson";
pub const DEFAULT_DOB_NOW_INPUT: &str = "data/raw/dob_now.ndjson";
pub const DEFAULT_DISTRICTS_INPUT: &str = "data/raw/nycd.geojson";
pub const DEFAULT_OUTPUT_DIR: &str = "data/processed";

/// Community districts per borough (borough digit, highest district number).
pub const NYC_BOROUGH_DISTRICTS: [(u16, u16); 5] = [(1, 12), (2, 12), (3, 18), (4, 14), (5, 3)];
