//! Request extractors

use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, ConnectInfo, FromRequest, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use identity_core::{extract_bearer_token, AuthenticatedUser, ClientInfo};

use crate::cookies::{read_cookie, REFRESH_COOKIE};
use crate::error::ApiError;
use crate::state::SharedState;

/// JSON body whose rejections use the API error shape
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct JsonBody<T>(pub T);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::InvalidRequest(rejection.body_text())
    }
}

/// Caller's user agent and address
pub struct Client(pub ClientInfo);

/// First `X-Forwarded-For` hop, as written by the fronting proxy
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl FromRequestParts<SharedState> for Client {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.chars().take(512).collect::<String>());

        let forwarded = if state.trust_proxy {
            forwarded_for(&parts.headers)
        } else {
            None
        };
        let ip = forwarded.or_else(|| {
            parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        });

        Ok(Client(ClientInfo { user_agent, ip }))
    }
}

/// Authenticated caller, checked by the request guard
pub struct CurrentUser(pub AuthenticatedUser);

#[async_trait]
impl FromRequestParts<SharedState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let user = state.service.authenticate(header).await?;
        Ok(CurrentUser(user))
    }
}

/// Refresh credential from the body, the `Authorization` header or the
/// refresh cookie, in that order
pub fn refresh_credential(headers: &HeaderMap, body: Option<&str>) -> Option<String> {
    body.map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .or_else(|| {
            let header = headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok());
            extract_bearer_token(header).map(str::to_string)
        })
        .or_else(|| read_cookie(headers, REFRESH_COOKIE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_for(&headers), None);

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(forwarded_for(&headers).as_deref(), Some("203.0.113.7"));

        headers.insert("x-forwarded-for", HeaderValue::from_static(" "));
        assert_eq!(forwarded_for(&headers), None);
    }

    #[test]
    fn test_refresh_credential_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(refresh_credential(&headers, None), None);

        headers.insert(header::COOKIE, HeaderValue::from_static("refresh_token=from-cookie"));
        assert_eq!(
            refresh_credential(&headers, None).as_deref(),
            Some("from-cookie")
        );

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        assert_eq!(
            refresh_credential(&headers, None).as_deref(),
            Some("from-header")
        );

        assert_eq!(
            refresh_credential(&headers, Some("from-body")).as_deref(),
            Some("from-body")
        );
        assert_eq!(
            refresh_credential(&headers, Some("  ")).as_deref(),
            Some("from-header")
        );
    }
}
