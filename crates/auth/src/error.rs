//! Authentication/authorization error taxonomy.

use thiserror::Error;

use crate::codec::TokenError;
use crate::store::StoreError;

/// Coarse outcome class, used by transports to pick a status code.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    /// Who you are could not be established (401).
    Unauthenticated,
    /// Who you are is known, but it is not enough (403).
    Forbidden,
    /// A named resource does not exist (404).
    NotFound,
    /// The request itself is malformed (400).
    BadRequest,
    /// The store or another dependency failed; never a denial (500).
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown user and wrong password collapse into this one kind.
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("user account is inactive")]
    UserInactive,

    #[error("device is not registered")]
    DeviceNotFound,

    #[error("device is not active")]
    DeviceNotActive,

    #[error("session not found")]
    SessionNotFound,

    #[error("session has expired")]
    SessionExpired,

    #[error("session is no longer valid")]
    SessionInvalid,

    #[error("invalid token")]
    InvalidToken,

    #[error("token has expired")]
    ExpiredToken,

    #[error("system '{0}' not found")]
    SystemNotFound(String),

    #[error("no access to system '{0}'")]
    NoSystemAccess(String),

    /// The resolver could not reach a decision. Callers must treat this as a deny.
    #[error("permission check failed: {0}")]
    PermissionCheckFailed(#[source] StoreError),

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),

    #[error("role '{0}' is built in and cannot be deleted")]
    ProtectedRole(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidCredentials
            | Self::SessionNotFound
            | Self::SessionExpired
            | Self::SessionInvalid
            | Self::InvalidToken
            | Self::ExpiredToken => ErrorClass::Unauthenticated,
            Self::UserInactive
            | Self::DeviceNotFound
            | Self::DeviceNotActive
            | Self::NoSystemAccess(_)
            | Self::Forbidden(_)
            | Self::ProtectedRole(_) => ErrorClass::Forbidden,
            Self::SystemNotFound(_) | Self::NotFound(_) => ErrorClass::NotFound,
            Self::InvalidInput(_) => ErrorClass::BadRequest,
            Self::PermissionCheckFailed(_) | Self::Store(_) | Self::Internal(_) => {
                ErrorClass::Infrastructure
            }
        }
    }

    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::UserInactive => "USER_INACTIVE",
            Self::DeviceNotFound => "DEVICE_NOT_REGISTERED",
            Self::DeviceNotActive => "DEVICE_INACTIVE",
            Self::SessionNotFound | Self::SessionExpired | Self::SessionInvalid => "SESSION_INVALID",
            Self::InvalidToken => "INVALID_TOKEN",
            Self::ExpiredToken => "TOKEN_EXPIRED",
            Self::SystemNotFound(_) => "SYSTEM_NOT_FOUND",
            Self::NoSystemAccess(_) => "NO_SYSTEM_ACCESS",
            Self::PermissionCheckFailed(_) => "PERMISSION_CHECK_FAILED",
            Self::Forbidden(_) | Self::ProtectedRole(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::InvalidInput(_) => "BAD_REQUEST",
            Self::Store(_) | Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to hand to clients. Infrastructure details stay in the logs.
    pub fn public_message(&self) -> String {
        match self.class() {
            ErrorClass::Infrastructure => match self {
                Self::PermissionCheckFailed(_) => "failed to check permission".to_string(),
                _ => "internal server error".to_string(),
            },
            _ => self.to_string(),
        }
    }

    /// Wrap a store failure hit while resolving permissions.
    pub fn permission_check(err: StoreError) -> Self {
        Self::PermissionCheckFailed(err)
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::ExpiredToken,
            TokenError::Invalid(_) => Self::InvalidToken,
            TokenError::MissingSystemGrant | TokenError::Encoding(_) => Self::Internal(err.to_string()),
        }
    }
}
