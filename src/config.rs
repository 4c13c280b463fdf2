use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::constants::{
    DEFAULT_DISTRICTS_INPUT, DEFAULT_DOB_NOW_INPUT, DEFAULT_HISTORICAL_INPUT, DEFAULT_OUTPUT_DIR,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::PipelineConfig;

/// Top-level configuration file: input locations, output root and the
/// per-stage pipeline settings (`[normalize]`, `[dedup]`, `[spatial]`, `[aggregate]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inputs: InputsConfig,
    pub output: OutputConfig,
    #[serde(flatten)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputsConfig {
    /// JSON array or NDJSON export of the historical permit feed
    pub historical: String,
    /// JSON array or NDJSON export of the DOB NOW permit feed
    pub dob_now: String,
    /// GeoJSON community district polygons
    pub districts: String,
}

impl Default for InputsConfig {
    fn default() -> Self {
        Self {
            historical: DEFAULT_HISTORICAL_INPUT.to_string(),
            dob_now: DEFAULT_DOB_NOW_INPUT.to_string(),
            districts: DEFAULT_DISTRICTS_INPUT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Snapshot root; each committed run lives in `<dir>/current`
    pub dir: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: DEFAULT_OUTPUT_DIR.to_string(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config_path = path.as_ref();
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config
            .pipeline
            .validate()
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        Ok(config)
    }
}
