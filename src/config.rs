//! Configuration module for evaluation runs.
//!
//! Handles YAML configuration loading. Every field has a default, so an
//! empty document yields the standard genic/phase setup.

use crate::classes::ClassSet;
use crate::scores::CompositeMetric;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML configuration: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Evaluation run configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvalConfig {
    /// Print confusion matrices and F1 summaries when the run completes
    #[serde(default = "default_print_to_stdout")]
    pub print_to_stdout: bool,
    /// Print the tables after every batch instead
    #[serde(default)]
    pub print_every_batch: bool,
    /// Directory for CSV exports of the tables
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
    /// Genic label set, in model output order
    #[serde(default = "ClassSet::genic")]
    pub genic_classes: ClassSet,
    /// Phase label set, in model output order
    #[serde(default = "ClassSet::phase")]
    pub phase_classes: ClassSet,
    /// Composite metrics scored after the genic classes
    #[serde(default = "CompositeMetric::genic_defaults")]
    pub composites: Vec<CompositeMetric>,
}

const fn default_print_to_stdout() -> bool {
    true
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            print_to_stdout: default_print_to_stdout(),
            print_every_batch: false,
            export_dir: None,
            genic_classes: ClassSet::genic(),
            phase_classes: ClassSet::phase(),
            composites: CompositeMetric::genic_defaults(),
        }
    }
}

impl EvalConfig {
    /// Load configuration from YAML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML cannot be parsed.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(yaml)?;
        Ok(config)
    }
}
