//! User-visible rejection taxonomy.
//!
//! Each variant carries a stable numeric code and the HTTP status class the
//! routing layer should map it to. Missing or malformed sessions are
//! rejections (`InvalidSession`), never `Internal`.

use thiserror::Error;

use crate::session::SessionError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Account not found")]
    AccountNotFound,

    #[error("Wrong password")]
    WrongPassword,

    #[error("Invalid session")]
    InvalidSession,

    #[error("No permission")]
    NoPermission,

    #[error("Password too long")]
    PasswordTooLong,

    #[error("No hierarchy permission")]
    NoHierarchyPermission,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn internal(context: &str, err: impl core::fmt::Display) -> Self {
        Self::Internal(format!("{context}: {err}"))
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::AccountNotFound => 10001,
            Self::WrongPassword => 10002,
            Self::InvalidSession => 10003,
            Self::NoPermission => 10004,
            Self::PasswordTooLong => 10005,
            Self::NoHierarchyPermission => 10011,
            Self::Internal(_) => 50000,
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::AccountNotFound => 404,
            Self::WrongPassword
            | Self::InvalidSession
            | Self::NoPermission
            | Self::NoHierarchyPermission => 401,
            Self::PasswordTooLong => 406,
            Self::Internal(_) => 500,
        }
    }

    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        if err.is_not_found() {
            return Self::InvalidSession;
        }
        match err {
            SessionError::InvalidToken(_) => Self::InvalidSession,
            other => Self::internal("session", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_sessions_are_rejections() {
        let err = AuthError::from(SessionError::NotFound);
        assert_eq!(err, AuthError::InvalidSession);
        assert_eq!(err.http_status(), 401);
        assert!(err.is_rejection());

        assert_eq!(
            AuthError::from(SessionError::InvalidToken("%".into())),
            AuthError::InvalidSession
        );
    }

    #[test]
    fn store_faults_are_internal() {
        let err = AuthError::from(SessionError::store("expire", "timeout"));
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(err.http_status(), 500);
        assert!(!err.is_rejection());
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(AuthError::AccountNotFound.code(), 10001);
        assert_eq!(AuthError::NoHierarchyPermission.code(), 10011);
        assert_eq!(AuthError::PasswordTooLong.http_status(), 406);
    }
}
