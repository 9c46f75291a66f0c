//! Application state for the marketplace API

use std::sync::Arc;

use identity_core::rate_limit::Bucket;
use identity_core::{ClientInfo, IdentityService, RateLimiter};

use crate::error::ApiResult;
use crate::mailer::Mailer;
use crate::provider::ProviderVerifier;

pub type SharedState = Arc<AppState>;

/// Limiters for the two bucket classes
#[derive(Clone)]
pub struct RateLimits {
    pub auth: Arc<dyn RateLimiter>,
    pub tight: Arc<dyn RateLimiter>,
}

pub struct AppState {
    pub service: IdentityService,
    pub verifier: Arc<dyn ProviderVerifier>,
    pub mailer: Arc<dyn Mailer>,
    pub limits: RateLimits,
    /// Return raw links in responses instead of mailing them
    pub mailer_disabled: bool,
    pub app_base_url: String,
    /// Key clients by `X-Forwarded-For` instead of the peer address
    pub trust_proxy: bool,
}

impl AppState {
    /// Count a hit against `bucket` for this client
    pub async fn throttle(&self, bucket: Bucket, client: &ClientInfo) -> ApiResult<()> {
        let limiter = if bucket.is_tight() {
            &self.limits.tight
        } else {
            &self.limits.auth
        };
        let key = bucket.key(client.ip.as_deref().unwrap_or("unknown"));
        limiter.check(&key).await?;
        Ok(())
    }

    pub fn verification_link(&self, secret: &str) -> String {
        format!(
            "{}/verify-email?token={}",
            self.app_base_url.trim_end_matches('/'),
            secret
        )
    }

    pub fn reset_link(&self, secret: &str) -> String {
        format!(
            "{}/reset-password?token={}",
            self.app_base_url.trim_end_matches('/'),
            secret
        )
    }
}
