//! Request throttling for the authentication endpoints
//!
//! Keys are `"{bucket}:{client}"`. Two backends: an in-process keyed GCRA
//! limiter for single-instance and test deployments, and a fixed-window
//! counter table in PostgreSQL shared by every instance.

use std::num::NonZeroU32;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use governor::{DefaultKeyedRateLimiter, Quota};
use sqlx::postgres::PgPool;
use tracing::debug;

use crate::config::ConfigError;
use crate::error::{AuthError, AuthResult, StoreError};

/// Named limit buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Register,
    Login,
    Refresh,
    ForgotPassword,
    ResetPassword,
    ResendVerification,
    OAuth,
}

impl Bucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::Register => "register",
            Bucket::Login => "login",
            Bucket::Refresh => "refresh",
            Bucket::ForgotPassword => "forgot",
            Bucket::ResetPassword => "reset",
            Bucket::ResendVerification => "resend",
            Bucket::OAuth => "oauth",
        }
    }

    /// Buckets guarding flows that send mail or consume secrets get the
    /// tighter limit
    pub fn is_tight(&self) -> bool {
        matches!(
            self,
            Bucket::ForgotPassword | Bucket::ResetPassword | Bucket::ResendVerification
        )
    }

    pub fn key(&self, client: &str) -> String {
        format!("{}:{}", self.as_str(), client)
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Record a hit for `key`, returning whether it is within the limit
    async fn allow(&self, key: &str) -> AuthResult<bool>;

    /// Like [`RateLimiter::allow`], failing with `RateLimited` when over
    async fn check(&self, key: &str) -> AuthResult<()> {
        if self.allow(key).await? {
            Ok(())
        } else {
            debug!(key, "Rate limit exceeded");
            Err(AuthError::RateLimited)
        }
    }

    /// Drop state for windows that have closed, returning how many keys
    /// were removed when the backend can tell
    async fn purge(&self) -> AuthResult<u64> {
        Ok(0)
    }
}

/// In-process keyed limiter
pub struct GovernorRateLimiter {
    limiter: DefaultKeyedRateLimiter<String>,
}

impl GovernorRateLimiter {
    /// Allow `max` hits per `window`, replenishing evenly across it
    pub fn new(max: u32, window: Duration) -> Result<Self, ConfigError> {
        let burst = NonZeroU32::new(max).ok_or_else(|| {
            ConfigError::InvalidValue("rate limit max", "must be positive".to_string())
        })?;
        let quota = Quota::with_period(window / max)
            .ok_or_else(|| {
                ConfigError::InvalidValue("rate limit window", "must be positive".to_string())
            })?
            .allow_burst(burst);

        Ok(Self {
            limiter: governor::RateLimiter::keyed(quota),
        })
    }

    pub fn tracked_keys(&self) -> usize {
        self.limiter.len()
    }
}

#[async_trait]
impl RateLimiter for GovernorRateLimiter {
    async fn allow(&self, key: &str) -> AuthResult<bool> {
        Ok(self.limiter.check_key(&key.to_string()).is_ok())
    }

    async fn purge(&self) -> AuthResult<u64> {
        let before = self.limiter.len();
        self.limiter.retain_recent();
        self.limiter.shrink_to_fit();
        Ok(before.saturating_sub(self.limiter.len()) as u64)
    }
}

/// Fixed-window counters in the `rate_limit_counters` table
#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
    max: u32,
    window: chrono::Duration,
}

impl PgRateLimiter {
    pub fn new(pool: PgPool, max: u32, window: Duration) -> Result<Self, ConfigError> {
        if max == 0 {
            return Err(ConfigError::InvalidValue(
                "rate limit max",
                "must be positive".to_string(),
            ));
        }
        let window = chrono::Duration::from_std(window)
            .ok()
            .filter(|w| *w > chrono::Duration::zero())
            .ok_or_else(|| {
                ConfigError::InvalidValue("rate limit window", "must be positive".to_string())
            })?;
        Ok(Self { pool, max, window })
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn allow(&self, key: &str) -> AuthResult<bool> {
        let now = Utc::now();
        let cutoff = now - self.window;

        let hits: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO rate_limit_counters (key, window_start, hits)
            VALUES ($1, $2, 1)
            ON CONFLICT (key) DO UPDATE SET
                hits = CASE WHEN rate_limit_counters.window_start <= $3
                            THEN 1 ELSE rate_limit_counters.hits + 1 END,
                window_start = CASE WHEN rate_limit_counters.window_start <= $3
                                    THEN EXCLUDED.window_start
                                    ELSE rate_limit_counters.window_start END
            RETURNING hits
            "#,
        )
        .bind(key)
        .bind(now)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(hits >= 0 && (hits as u32) <= self.max)
    }

    async fn purge(&self) -> AuthResult<u64> {
        let cutoff = Utc::now() - self.window;
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE window_start <= $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(StoreError::from)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_governor_limits_per_key() {
        let limiter = GovernorRateLimiter::new(3, Duration::from_secs(900)).unwrap();
        let login = Bucket::Login.key("10.0.0.1");
        let other = Bucket::Login.key("10.0.0.2");

        for _ in 0..3 {
            assert!(limiter.allow(&login).await.unwrap());
        }
        assert!(!limiter.allow(&login).await.unwrap());
        assert!(matches!(
            limiter.check(&login).await,
            Err(AuthError::RateLimited)
        ));
        assert!(limiter.allow(&other).await.unwrap());
        assert_eq!(limiter.tracked_keys(), 2);
        limiter.purge().await.unwrap();
    }

    #[test]
    fn test_zero_limits_rejected() {
        assert!(GovernorRateLimiter::new(0, Duration::from_secs(60)).is_err());
        assert!(GovernorRateLimiter::new(10, Duration::ZERO).is_err());
    }

    struct AlwaysAllow;

    #[async_trait]
    impl RateLimiter for AlwaysAllow {
        async fn allow(&self, _key: &str) -> AuthResult<bool> {
            Ok(true)
        }
    }

    #[test]
    fn test_default_purge_is_noop() {
        assert!(tokio_test::block_on(AlwaysAllow.check("login:x")).is_ok());
        assert_eq!(tokio_test::block_on(AlwaysAllow.purge()).unwrap(), 0);
    }

    #[test]
    fn test_bucket_keys() {
        assert_eq!(Bucket::ForgotPassword.key("1.2.3.4"), "forgot:1.2.3.4");
        assert!(Bucket::ResetPassword.is_tight());
        assert!(!Bucket::Login.is_tight());
    }
}
