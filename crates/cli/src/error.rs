//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Publish value is not valid JSON
    #[error("Value is not valid JSON: {message}")]
    InvalidValue { message: String },

    /// Named sink is neither registered nor seeded
    #[error("Sink not found: {instance_id}")]
    SinkNotFound { instance_id: String },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::InvalidValue {
            message: message.into(),
        }
    }

    pub fn sink_not_found(instance_id: impl Into<String>) -> Self {
        Self::SinkNotFound {
            instance_id: instance_id.into(),
        }
    }
}
