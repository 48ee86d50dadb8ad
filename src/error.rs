//! Error types for the Tollgate library.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for Tollgate operations.
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration-related errors (non-positive thresholds or intervals,
    /// unparseable config files). Rejected before any store interaction.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Counter store errors surfaced from `obtain`/`remains`.
    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    /// I/O errors (configuration file loading)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Tollgate operations.
pub type Result<T> = std::result::Result<T, TollgateError>;
