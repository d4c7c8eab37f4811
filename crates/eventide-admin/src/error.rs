//! Eventide admin error types.

use eventide_core::error::StoreError;
use thiserror::Error;

/// Runtime errors of the admin tool.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Database connection or pool error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Reading the stream failed.
    #[error("event store error: {0}")]
    Store(#[from] StoreError),

    /// Writing to stdout failed.
    #[error("output error: {0}")]
    Output(#[from] std::io::Error),

    /// An entry could not be written as JSON.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}
