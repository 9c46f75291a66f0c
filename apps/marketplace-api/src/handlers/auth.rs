//! Local account endpoints under `/auth`

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use identity_core::rate_limit::Bucket;
use identity_core::service::Registration;
use identity_core::AuthError;

use super::{deliver, with_refresh_cookie};
use crate::cookies::clear_refresh_cookie;
use crate::error::{ApiError, ApiResult};
use crate::extract::{refresh_credential, Client, CurrentUser, JsonBody};
use crate::mailer::Mail;
use crate::models::*;
use crate::state::SharedState;

const FORGOT_MESSAGE: &str = "If an account exists for this email, a reset link has been sent";
const RESEND_MESSAGE: &str =
    "If this address belongs to an unverified account, a new confirmation link has been sent";

/// Create a local account
pub async fn register(
    State(state): State<SharedState>,
    Client(client): Client,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> ApiResult<Response> {
    state.throttle(Bucket::Register, &client).await?;

    let registered = state
        .service
        .register(
            Registration {
                email: req.email,
                password: req.password,
                name: req.name,
                role: req.role,
            },
            &client,
        )
        .await?;

    let link = state.verification_link(&registered.verification_secret);
    let verification_link = if state.mailer_disabled {
        Some(link)
    } else {
        if let Some(email) = &registered.account.email {
            deliver(&state, Mail::email_verification(email, &link)).await;
        }
        None
    };

    let body = RegisterResponse {
        success: true,
        message: "Account created, check your email to confirm your address",
        user: UserView::from(&registered.account),
        verification_link,
        access_token: registered
            .credentials
            .as_ref()
            .map(|c| c.access.token.clone()),
        refresh_token: registered
            .credentials
            .as_ref()
            .and_then(|c| c.refresh.as_ref())
            .map(|r| r.token.clone()),
    };

    let response = (StatusCode::CREATED, Json(body));
    Ok(match &registered.credentials {
        Some(credentials) => with_refresh_cookie(&state, credentials, response),
        None => response.into_response(),
    })
}

/// Consume an email-verification token
pub async fn verify_email(
    State(state): State<SharedState>,
    JsonBody(req): JsonBody<TokenRequest>,
) -> ApiResult<Json<UserResponse>> {
    let account = state.service.verify_email(req.token.trim()).await?;
    Ok(Json(UserResponse {
        success: true,
        user: UserView::from(&account),
    }))
}

pub async fn resend_verification(
    State(state): State<SharedState>,
    Client(client): Client,
    JsonBody(req): JsonBody<EmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.throttle(Bucket::ResendVerification, &client).await?;

    let mut link = None;
    if let Some((account, secret)) = state.service.resend_verification(&req.email).await? {
        let url = state.verification_link(&secret);
        if state.mailer_disabled {
            link = Some(url);
        } else if let Some(email) = &account.email {
            deliver(&state, Mail::email_verification(email, &url)).await;
        }
    }

    Ok(Json(MessageResponse::new(RESEND_MESSAGE).with_link(link)))
}

/// Email and password sign-in
pub async fn login(
    State(state): State<SharedState>,
    Client(client): Client,
    JsonBody(req): JsonBody<LoginRequest>,
) -> ApiResult<Response> {
    state.throttle(Bucket::Login, &client).await?;

    let signed_in = state
        .service
        .login(&req.email, &req.password, &client)
        .await?;

    let body = TokenResponse::new(
        &signed_in.credentials,
        Some(UserView::from(&signed_in.account)),
    );
    Ok(with_refresh_cookie(&state, &signed_in.credentials, Json(body)))
}

/// Exchange a refresh credential for new credentials
pub async fn refresh(
    State(state): State<SharedState>,
    Client(client): Client,
    headers: HeaderMap,
    body: Option<JsonBody<RefreshRequest>>,
) -> ApiResult<Response> {
    state.throttle(Bucket::Refresh, &client).await?;

    let presented = body.and_then(|JsonBody(b)| b.refresh_token);
    let presented = refresh_credential(&headers, presented.as_deref())
        .ok_or_else(|| ApiError::InvalidRequest("refresh_token is required".to_string()))?;

    let refreshed = state.service.refresh(&presented, &client).await?;

    let body = TokenResponse::new(
        &refreshed.credentials,
        Some(UserView::from(&refreshed.account)),
    );
    Ok(with_refresh_cookie(&state, &refreshed.credentials, Json(body)))
}

/// Best-effort revocation; the answer never depends on the credential
pub async fn logout(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Option<JsonBody<RefreshRequest>>,
) -> Response {
    let presented = body.and_then(|JsonBody(b)| b.refresh_token);
    let presented = refresh_credential(&headers, presented.as_deref());
    state.service.logout(presented.as_deref()).await;

    let mut response = Json(MessageResponse::new("Logged out")).into_response();
    if let Some(cookie) = clear_refresh_cookie(&state.service.config().cookie) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    response
}

pub async fn forgot_password(
    State(state): State<SharedState>,
    Client(client): Client,
    JsonBody(req): JsonBody<EmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    state.throttle(Bucket::ForgotPassword, &client).await?;

    let mut link = None;
    if let Some((account, secret)) = state.service.forgot_password(&req.email).await? {
        let url = state.reset_link(&secret);
        if state.mailer_disabled {
            link = Some(url);
        } else if let Some(email) = &account.email {
            deliver(&state, Mail::password_reset(email, &url)).await;
        }
    }

    Ok(Json(MessageResponse::new(FORGOT_MESSAGE).with_link(link)))
}

pub async fn reset_password(
    State(state): State<SharedState>,
    Client(client): Client,
    JsonBody(req): JsonBody<ResetPasswordRequest>,
) -> ApiResult<Response> {
    state.throttle(Bucket::ResetPassword, &client).await?;

    if req.token.trim().is_empty() {
        return Err(AuthError::TokenNotFound.into());
    }
    state
        .service
        .reset_password(req.token.trim(), &req.password)
        .await?;

    let mut response =
        Json(MessageResponse::new("Password updated, please log in again")).into_response();
    if let Some(cookie) = clear_refresh_cookie(&state.service.config().cookie) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
    Ok(response)
}

/// Current account, as seen by the request guard
pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserResponse> {
    Json(UserResponse {
        success: true,
        user: UserView::from(user),
    })
}
