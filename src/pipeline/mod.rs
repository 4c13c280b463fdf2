// Permit pipeline: normalize, dedup, spatial attribution, monthly aggregation

pub mod orchestrator;
pub mod pipeline_config;
pub mod processing;
pub mod series;

pub use orchestrator::{CoverageReport, PipelineOrchestrator, PipelineRun};
pub use pipeline_config::PipelineConfig;
