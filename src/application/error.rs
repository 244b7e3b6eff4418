use thiserror::Error;

use crate::{application::repos::RepoError, domain::error::DomainError, infra::error::InfraError};

/// Application-level failure.
///
/// Only `Domain(Validation)` reaches callers of the mutation surface; store
/// and network failures are converted into logged soft failures before they
/// cross the service boundary, because the fast store is authoritative and
/// reconciliation guarantees durable-store catch-up.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Whether the error may be reported to an external caller, as opposed to
    /// being swallowed as a soft failure.
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, AppError::Domain(DomainError::Validation { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_errors_reach_callers() {
        let validation: AppError = DomainError::validation("cannot follow yourself").into();
        assert!(validation.is_caller_fault());

        let repo: AppError = RepoError::unavailable("connection refused").into();
        assert!(!repo.is_caller_fault());
        assert!(!AppError::unexpected("boom").is_caller_fault());
    }
}
