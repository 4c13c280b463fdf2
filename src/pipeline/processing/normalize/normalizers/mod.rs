// Base trait and utilities for source-specific normalizers
pub mod base;

// Individual normalizer implementations
pub mod dob_now;
pub mod historical;

// Re-export the main components
pub use base::{CanonicalField, NormalizerUtils, SourceLayout, SourceNormalizer};
pub use dob_now::DobNowNormalizer;
pub use historical::HistoricalNormalizer;
