//! Dispatcher error types

use thiserror::Error;

/// Errors that abort a whole poll
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Registry could not be read; the poll is skipped
    #[error("sink registry unavailable: {0}")]
    Registry(#[source] contracts::ContractError),

    /// Pending selection failed
    #[error("queue error: {0}")]
    Contract(#[from] contracts::ContractError),
}
