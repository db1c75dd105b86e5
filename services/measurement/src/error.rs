//! Error taxonomy shared by the blob store, record store and pipeline.
//!
//! Client-caused failures (`Validation`, `NotFound`) carry enough context to
//! build a response; environment-caused failures (`Io`, `Store`) wrap the
//! underlying error and are logged, never echoed to clients.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("The field '{field}' must not be empty.")]
    Validation { field: &'static str },

    #[error("No measurements found for the given user_id.")]
    NotFound { owner_id: String },

    #[error("No measurement found with id {0}")]
    RecordNotFound(uuid::Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record store error: {0}")]
    Store(String),
}

impl ServiceError {
    /// Short machine-readable code used in API error bodies
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Validation { .. } => "VALIDATION_ERROR",
            ServiceError::NotFound { .. } | ServiceError::RecordNotFound(_) => "NOT_FOUND",
            ServiceError::Io(_) => "IO_FAILURE",
            ServiceError::Database(_) | ServiceError::Store(_) => "STORE_FAILURE",
        }
    }

    /// Whether the caller caused the failure
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServiceError::Validation { .. }
                | ServiceError::NotFound { .. }
                | ServiceError::RecordNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
