use thiserror::Error;

use crate::application::pagination::PaginationError;
use crate::application::repos::RepoError;
use crate::domain::error::DomainError;
use crate::infra::error::InfraError;

/// Errors surfaced to callers of the cache core.
///
/// Cache failures never appear here: they are absorbed by falling back to the
/// store. Store failures keep their kind so callers can tell a missing entity
/// from a transient outage.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("durable store unavailable")]
    StoreUnavailable(#[source] RepoError),
    #[error("store rejected the operation: {0}")]
    Rejected(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    /// Map a store error, naming the entity for `NotFound`.
    pub fn from_repo(entity: &'static str, err: RepoError) -> Self {
        match err {
            RepoError::NotFound => Self::NotFound { entity },
            RepoError::Persistence(_) | RepoError::Timeout => Self::StoreUnavailable(err),
            RepoError::Duplicate { .. }
            | RepoError::InvalidInput { .. }
            | RepoError::Integrity { .. } => Self::Rejected(err.to_string()),
        }
    }

    /// Whether the same request may succeed if the client tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::StoreUnavailable(_))
    }
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        Self::from_repo("record", err)
    }
}

impl From<PaginationError> for AppError {
    fn from(err: PaginationError) -> Self {
        Self::Validation(err.to_string())
    }
}
