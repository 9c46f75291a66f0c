//! HTTP handlers for the marketplace API

pub mod admin;
pub mod auth;
pub mod health;
pub mod oauth;

use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use identity_core::rotation::CredentialPair;
use tracing::warn;

use crate::cookies::refresh_cookie;
use crate::mailer::Mail;
use crate::state::AppState;

/// Send a message, logging rather than failing the request on error
async fn deliver(state: &AppState, mail: Mail) {
    let to = mail.to.clone();
    if let Err(e) = state.mailer.send(mail).await {
        warn!(to = %to, error = %e, "Mail delivery failed");
    }
}

/// Attach the refresh cookie when a refresh credential was issued
fn with_refresh_cookie(
    state: &AppState,
    credentials: &CredentialPair,
    response: impl IntoResponse,
) -> Response {
    let mut response = response.into_response();
    if let Some(refresh) = &credentials.refresh {
        let max_age = state.service.config().refresh_ttl.num_seconds();
        if let Some(cookie) = refresh_cookie(&state.service.config().cookie, &refresh.token, max_age)
        {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }
    response
}
