//! Error types for the marketplace API

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use identity_core::AuthError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Service not ready: {0}")]
    NotReady(String),
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: String,
    code: &'static str,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            ApiError::InvalidRequest(msg) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg.clone())
            }
            ApiError::NotReady(cause) => {
                error!(cause = %cause, "Readiness check failed");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "NOT_READY",
                    "Service not ready".to_string(),
                )
            }
            ApiError::Auth(err) => auth_parts(err),
        }
    }
}

fn auth_parts(err: &AuthError) -> (StatusCode, &'static str, String) {
    match err {
        AuthError::InvalidCredential => (
            StatusCode::UNAUTHORIZED,
            "INVALID_CREDENTIALS",
            err.to_string(),
        ),
        AuthError::MissingCredential | AuthError::SignatureInvalid | AuthError::Expired => (
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "Authentication required".to_string(),
        ),
        AuthError::StaleSession => (
            StatusCode::UNAUTHORIZED,
            "SESSION_REVOKED",
            "Session revoked, please log in again".to_string(),
        ),
        AuthError::RefreshInvalid(_) => (
            StatusCode::UNAUTHORIZED,
            "REFRESH_INVALID",
            "Refresh token invalid or expired".to_string(),
        ),
        AuthError::Suspended => (
            StatusCode::FORBIDDEN,
            "ACCOUNT_SUSPENDED",
            err.to_string(),
        ),
        AuthError::EmailNotVerified => (
            StatusCode::FORBIDDEN,
            "EMAIL_NOT_VERIFIED",
            err.to_string(),
        ),
        AuthError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
        AuthError::TokenNotFound => (
            StatusCode::BAD_REQUEST,
            "TOKEN_INVALID",
            "Token invalid".to_string(),
        ),
        AuthError::TokenAlreadyUsed => (
            StatusCode::BAD_REQUEST,
            "TOKEN_USED",
            "Token already used".to_string(),
        ),
        AuthError::TokenExpired => (
            StatusCode::BAD_REQUEST,
            "TOKEN_EXPIRED",
            "Token expired".to_string(),
        ),
        AuthError::ProviderAssertionInvalid(detail) => {
            warn!(detail = %detail, "Provider token rejected");
            (
                StatusCode::UNAUTHORIZED,
                "PROVIDER_TOKEN_INVALID",
                "Provider token invalid".to_string(),
            )
        }
        AuthError::MissingClaims(claims) => (
            StatusCode::BAD_REQUEST,
            "MISSING_CLAIMS",
            format!("Provider did not supply: {}", claims),
        ),
        AuthError::DuplicateAccountConflict => (
            StatusCode::CONFLICT,
            "CONFLICT",
            "Concurrent sign-in in progress, please retry".to_string(),
        ),
        AuthError::EmailTaken => (StatusCode::CONFLICT, "EMAIL_TAKEN", err.to_string()),
        AuthError::WeakPassword(issues) => {
            (StatusCode::BAD_REQUEST, "WEAK_PASSWORD", issues.join("; "))
        }
        AuthError::InvalidRequest(msg) => {
            (StatusCode::BAD_REQUEST, "INVALID_REQUEST", msg.clone())
        }
        AuthError::AccountNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Account not found".to_string(),
        ),
        AuthError::RateLimited => (
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
            "Too many requests, please slow down".to_string(),
        ),
        AuthError::Store(e) => {
            error!(error = %e, "Storage error");
            internal()
        }
        AuthError::Internal(e) => {
            error!(error = %e, "Internal error");
            internal()
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "Internal server error".to_string(),
    )
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        let body = ErrorResponse {
            success: false,
            error: message,
            code,
        };

        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
