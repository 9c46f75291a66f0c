//! Marketplace authentication API
//!
//! axum surface over `identity-core`:
//!
//! - `/auth/*` local accounts, credentials and password recovery
//! - `/oauth/{provider}` Google and Facebook sign-in
//! - `/admin/users/{id}/*` suspension and session revocation
//! - `/admin/audit-logs` record of those actions
//! - `/health`, `/ready`

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

pub mod config;
pub mod cookies;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod mailer;
pub mod models;
pub mod provider;
pub mod state;


pub use state::{AppState, RateLimits, SharedState};

/// CORS policy: any origin when none are configured, otherwise the listed
/// origins with credentials allowed so the refresh cookie travels
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %o, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

/// Build the application router
pub fn build_router(state: SharedState, cors: CorsLayer) -> Router {
    use handlers::{admin, auth, health, oauth};

    Router::new()
        // Health
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        // Local accounts
        .route("/auth/register", post(auth::register))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/resend-verification", post(auth::resend_verification))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        .route("/auth/me", get(auth::me))
        // Provider sign-in
        .route("/oauth/:provider", post(oauth::oauth_login))
        // Administration
        .route("/admin/users/:id/suspend", post(admin::suspend))
        .route("/admin/users/:id/unsuspend", post(admin::unsuspend))
        .route("/admin/users/:id/revoke-sessions", post(admin::revoke_sessions))
        .route("/admin/audit-logs", get(admin::audit_logs))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}
