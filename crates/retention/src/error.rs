//! Retention error types

use thiserror::Error;

/// Retention-specific errors
#[derive(Debug, Error)]
pub enum RetentionError {
    /// Threshold of zero would archive nothing forever
    #[error("retention threshold must be at least 1")]
    ZeroThreshold,

    /// Store error (from contract)
    #[error("store error: {0}")]
    Contract(#[from] contracts::ContractError),
}
