//! Layered error definitions
//!
//! Categorized by source: config / registry / store / delivery

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    /// Sink kind is not in the constructor table
    #[error("sink '{instance_id}' has unknown kind '{kind}'")]
    UnknownSinkKind { instance_id: String, kind: String },

    /// Sink config does not match its kind
    #[error("sink '{instance_id}' has invalid config: {message}")]
    InvalidSinkConfig { instance_id: String, message: String },

    // ===== Registration Errors =====
    /// Bit is not a single flag position
    #[error("bit {bit:#x} is not a single flag position")]
    InvalidBit { bit: u64 },

    /// Bit is owned by another active sink
    #[error("bit {bit:#x} is already owned by active sink '{owner}'")]
    BitInUse { bit: u64, owner: String },

    /// Bit is still set on queued records from a retired sink
    #[error("bit {bit:#x} is still set on {records} queued record(s)")]
    BitStillReferenced { bit: u64, records: u64 },

    /// Sink instance already registered
    #[error("sink '{instance_id}' is already registered")]
    DuplicateSink { instance_id: String },

    // ===== Store Errors =====
    /// Persistence layer error
    #[error("store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Record with the same transaction id already exists
    #[error("record '{transaction_id}' already exists")]
    RecordExists { transaction_id: String },

    // ===== Delivery Errors =====
    /// Sink rejected or failed to apply a record
    #[error("sink '{sink_name}' delivery error: {message}")]
    Delivery { sink_name: String, message: String },

    /// Sink did not answer within its timeout
    #[error("sink '{sink_name}' timed out after {timeout_ms}ms")]
    DeliveryTimeout { sink_name: String, timeout_ms: u64 },

    // ===== General Errors =====
    /// Payload serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create invalid sink config error
    pub fn invalid_sink_config(instance_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSinkConfig {
            instance_id: instance_id.into(),
            message: message.into(),
        }
    }

    /// Create store error with its cause attached
    pub fn store<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Store {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create delivery error
    pub fn delivery(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delivery {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }

    /// Whether the error only affects a single delivery attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Delivery { .. } | Self::DeliveryTimeout { .. })
    }
}
