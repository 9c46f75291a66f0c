//! Error taxonomy for the identity core
//!
//! Storage errors are translated into [`StoreError`] exactly once, at the
//! storage boundary. Everything above the store speaks [`AuthError`].

use std::fmt;
use thiserror::Error;

/// Errors produced by a storage backend
#[derive(Debug, Error)]
pub enum StoreError {
    /// Unique constraint or serialization failure
    #[error("Storage conflict: {0}")]
    Conflict(String),

    #[error("Record not found")]
    NotFound,

    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// SQLSTATE codes that mean "another transaction won"
const CONFLICT_CODES: &[&str] = &[
    "23505", // unique_violation
    "40001", // serialization_failure
    "40P01", // deadlock_detected
];

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) => match db.code() {
                Some(code) if CONFLICT_CODES.iter().any(|c| *c == code) => {
                    StoreError::Conflict(db.message().to_string())
                }
                _ => StoreError::Backend(err.to_string()),
            },
            _ => StoreError::Backend(err.to_string()),
        }
    }
}

/// Errors from the stateless credential signer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    #[error("Credential signature invalid")]
    SignatureInvalid,

    #[error("Credential expired")]
    Expired,
}

/// Internal reason a refresh attempt was rejected.
///
/// Logged distinctly; never surfaced to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRejection {
    Invalid,
    NotFound,
    Revoked,
    Expired,
    StaleSession,
    Suspended,
}

impl RefreshRejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshRejection::Invalid => "invalid",
            RefreshRejection::NotFound => "not_found",
            RefreshRejection::Revoked => "revoked",
            RefreshRejection::Expired => "expired",
            RefreshRejection::StaleSession => "stale_session",
            RefreshRejection::Suspended => "suspended",
        }
    }
}

impl fmt::Display for RefreshRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity core error taxonomy
#[derive(Debug, Error)]
pub enum AuthError {
    /// Unknown account or wrong password; the two are never distinguished
    #[error("Invalid email or password")]
    InvalidCredential,

    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Credential signature invalid")]
    SignatureInvalid,

    #[error("Credential expired")]
    Expired,

    /// Session version mismatch
    #[error("Session revoked, please log in again")]
    StaleSession,

    #[error("Account disabled or suspended")]
    Suspended,

    #[error("Refresh token invalid")]
    RefreshInvalid(RefreshRejection),

    #[error("Token not found")]
    TokenNotFound,

    #[error("Token already used")]
    TokenAlreadyUsed,

    #[error("Token expired")]
    TokenExpired,

    #[error("Provider assertion invalid: {0}")]
    ProviderAssertionInvalid(String),

    #[error("Provider assertion missing required claims: {0}")]
    MissingClaims(String),

    #[error("Concurrent account creation conflict")]
    DuplicateAccountConflict,

    #[error("Email address not verified")]
    EmailNotVerified,

    #[error("Email address already registered")]
    EmailTaken,

    #[error("Password does not meet the policy")]
    WeakPassword(Vec<String>),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Account not found")]
    AccountNotFound,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<CredentialError> for AuthError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::SignatureInvalid => AuthError::SignatureInvalid,
            CredentialError::Expired => AuthError::Expired,
        }
    }
}

pub type AuthResult<T> = Result<T, AuthError>;
pub type StoreResult<T> = Result<T, StoreError>;
