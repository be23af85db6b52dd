//! Pipeline configuration, read from a TOML file.
//!
//! ```toml
//! patient_id_prefix = "MM"
//! include_updated = true
//! missing_sample_limit = 10
//!
//! [stratification]
//! policy = "fixed_threshold"
//! cuts = [0.2, 0.4, 0.6, 0.8]
//! labels = ["Very Low Risk", "Low Risk", "Medium Risk", "High Risk", "Very High Risk"]
//! ```
//!
//! Every field is optional; omitted fields take the values of
//! [`PipelineConfig::default`].

use crate::stratify::{StratificationPolicy, StratifyError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid stratification settings: {0}")]
    Stratification(#[from] StratifyError),
    #[error("missing_sample_limit must be at least 1.")]
    ZeroSampleLimit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Prefix of generated patient identifiers (`MM` gives `MM-001`, `MM-002`, ...).
    pub patient_id_prefix: String,
    /// Stamp each result with the assessment date and export an `Updated` column.
    pub include_updated: bool,
    /// How many missing feature names a schema-mismatch error lists.
    pub missing_sample_limit: usize,
    pub stratification: StratificationPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            patient_id_prefix: "MM".to_string(),
            include_updated: true,
            missing_sample_limit: 10,
            stratification: StratificationPolicy::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.missing_sample_limit == 0 {
            return Err(ConfigError::ZeroSampleLimit);
        }
        self.stratification.validate()?;
        Ok(())
    }

    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&toml_string)?;
        config.validate()?;
        log::info!(
            "Loaded pipeline configuration from '{}' ({} risk groups)",
            path.display(),
            config.stratification.labels().len()
        );
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
