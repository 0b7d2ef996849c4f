//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration file not found; searched: {}", display_paths(.searched))]
    ConfigFileNotFound { searched: Vec<PathBuf> },

    #[error("Failed to read {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("Invalid YAML in {path}: {message}")]
    InvalidYaml { path: String, message: String },

    #[error("Missing required field {field}: {context}")]
    MissingRequiredField { field: String, context: String },

    #[error("Invalid value for {field} ({value}): {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid environment override {variable}={value}: {reason}")]
    InvalidEnvOverride {
        variable: String,
        value: String,
        reason: String,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ConfigurationError {
    pub fn config_file_not_found(searched: Vec<PathBuf>) -> Self {
        Self::ConfigFileNotFound { searched }
    }

    pub fn file_read_error(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::FileRead {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn invalid_yaml(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::InvalidYaml {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_env_override(
        variable: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidEnvOverride {
            variable: variable.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
