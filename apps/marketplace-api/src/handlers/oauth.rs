//! Provider sign-in under `/oauth/{provider}`

use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use identity_core::rate_limit::Bucket;
use identity_core::Provider;

use super::with_refresh_cookie;
use crate::error::{ApiError, ApiResult};
use crate::extract::{Client, JsonBody};
use crate::models::{OAuthRequest, TokenResponse, UserView};
use crate::state::SharedState;

pub async fn oauth_login(
    State(state): State<SharedState>,
    Path(provider): Path<String>,
    Client(client): Client,
    JsonBody(req): JsonBody<OAuthRequest>,
) -> ApiResult<Response> {
    let provider: Provider = provider
        .to_ascii_lowercase()
        .parse()
        .map_err(ApiError::InvalidRequest)?;
    state.throttle(Bucket::OAuth, &client).await?;

    let identity = state.verifier.verify(provider, req.token.trim()).await?;
    let signed_in = state.service.oauth_login(&identity, &client).await?;

    let body = TokenResponse::new(
        &signed_in.credentials,
        Some(UserView::from(&signed_in.account)),
    );
    Ok(with_refresh_cookie(&state, &signed_in.credentials, Json(body)))
}
