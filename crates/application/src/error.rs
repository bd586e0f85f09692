use domain::{DomainError, ErrorKind, RepositoryError};
use thiserror::Error;

use crate::jobs::QueueError;
use crate::password::PasswordHasherError;
use crate::token::TokenError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    #[error("password error: {0}")]
    Password(#[from] PasswordHasherError),
    #[error("token error: {0}")]
    Token(#[from] TokenError),
    #[error("task queue error: {0}")]
    Queue(#[from] QueueError),
}

impl ApplicationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApplicationError::Domain(err) => err.kind(),
            ApplicationError::Repository(err) => err.kind(),
            ApplicationError::Token(err) if err.is_client_error() => ErrorKind::Unauthorized,
            ApplicationError::Token(_)
            | ApplicationError::Password(_)
            | ApplicationError::Queue(_) => ErrorKind::Internal,
        }
    }

    /// 对外稳定的错误码；内部错误统一为 `INTERNAL_ERROR`
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(err) => err.code(),
            ApplicationError::Repository(RepositoryError::NotFound) => "NOT_FOUND",
            ApplicationError::Repository(RepositoryError::Conflict { .. }) => "CONFLICT",
            ApplicationError::Token(err) if err.is_client_error() => "INVALID_TOKEN",
            _ => "INTERNAL_ERROR",
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        ApplicationError::Repository(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_and_signing_failures_are_internal() {
        let err = ApplicationError::from(RepositoryError::storage("boom"));
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.code(), "INTERNAL_ERROR");

        let err = ApplicationError::from(TokenError::signing("bad key"));
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn invalid_token_is_unauthorized() {
        let err = ApplicationError::from(TokenError::Invalid);
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(err.code(), "INVALID_TOKEN");
    }

    #[test]
    fn domain_errors_keep_their_kind() {
        let err = ApplicationError::from(DomainError::AlreadyRoomMember);
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.code(), "MEMBERSHIP_EXISTS");
    }
}
