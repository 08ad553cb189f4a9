use thiserror::Error;

use quoteflow_core::errors::StoreError;

pub mod quote;

pub use quote::SqlQuoteStore;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::Store(error) => error,
            other => StoreError::Backend(other.to_string()),
        }
    }
}
