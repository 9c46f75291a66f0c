//! Validated identity configuration
//!
//! Built once at process start and shared by reference with every component.

use chrono::Duration;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minimum signing key length in bytes
pub const MIN_KEY_LEN: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} signing key must be at least {min} bytes", min = MIN_KEY_LEN)]
    KeyTooShort(&'static str),

    #[error("Access and refresh signing keys must differ")]
    SharedSigningKey,

    #[error("{0} must be positive")]
    NonPositiveTtl(&'static str),

    #[error("Access token TTL must be shorter than refresh token TTL")]
    AccessOutlivesRefresh,

    #[error("SameSite=None cookies require the Secure flag")]
    InsecureSameSiteNone,

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

/// Cookie SameSite policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl fmt::Display for SameSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SameSite::Strict => write!(f, "Strict"),
            SameSite::Lax => write!(f, "Lax"),
            SameSite::None => write!(f, "None"),
        }
    }
}

impl FromStr for SameSite {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(SameSite::Strict),
            "lax" => Ok(SameSite::Lax),
            "none" => Ok(SameSite::None),
            other => Err(ConfigError::InvalidValue("same-site", other.to_string())),
        }
    }
}

/// Attributes of the refresh credential cookie
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieConfig {
    pub secure: bool,
    pub same_site: SameSite,
    pub domain: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            secure: true,
            same_site: SameSite::Lax,
            domain: None,
        }
    }
}

/// Identity and session settings
#[derive(Clone)]
pub struct AuthConfig {
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub access_key: String,
    pub refresh_key: String,
    /// Replace the refresh credential on every refresh
    pub rotate_refresh: bool,
    /// Refuse local login until the email address is verified
    pub require_email_verification: bool,
    /// Hand out a refresh credential on login (otherwise access only)
    pub issue_refresh_on_login: bool,
    pub email_verify_ttl: Duration,
    pub password_reset_ttl: Duration,
    pub cookie: CookieConfig,
}

// Keys stay out of debug output.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("rotate_refresh", &self.rotate_refresh)
            .field("require_email_verification", &self.require_email_verification)
            .field("issue_refresh_on_login", &self.issue_refresh_on_login)
            .field("email_verify_ttl", &self.email_verify_ttl)
            .field("password_reset_ttl", &self.password_reset_ttl)
            .field("cookie", &self.cookie)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    /// Config with the default lifetimes and policies for the given keys
    pub fn with_keys(access_key: impl Into<String>, refresh_key: impl Into<String>) -> Self {
        Self {
            access_ttl: Duration::hours(1),
            refresh_ttl: Duration::days(30),
            access_key: access_key.into(),
            refresh_key: refresh_key.into(),
            rotate_refresh: true,
            require_email_verification: false,
            issue_refresh_on_login: true,
            email_verify_ttl: Duration::hours(24),
            password_reset_ttl: Duration::hours(1),
            cookie: CookieConfig::default(),
        }
    }

    /// Check the invariants every component relies on
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.access_key.len() < MIN_KEY_LEN {
            return Err(ConfigError::KeyTooShort("Access"));
        }
        if self.refresh_key.len() < MIN_KEY_LEN {
            return Err(ConfigError::KeyTooShort("Refresh"));
        }
        if self.access_key == self.refresh_key {
            return Err(ConfigError::SharedSigningKey);
        }

        for (name, ttl) in [
            ("Access token TTL", self.access_ttl),
            ("Refresh token TTL", self.refresh_ttl),
            ("Email verification TTL", self.email_verify_ttl),
            ("Password reset TTL", self.password_reset_ttl),
        ] {
            if ttl <= Duration::zero() {
                return Err(ConfigError::NonPositiveTtl(name));
            }
        }

        if self.access_ttl >= self.refresh_ttl {
            return Err(ConfigError::AccessOutlivesRefresh);
        }

        if self.cookie.same_site == SameSite::None && !self.cookie.secure {
            return Err(ConfigError::InsecureSameSiteNone);
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACCESS: &str = "access-secret-key-at-least-32-bytes-long";
    const REFRESH: &str = "refresh-secret-key-at-least-32-bytes-long";

    #[test]
    fn test_defaults_validate() {
        let config = AuthConfig::with_keys(ACCESS, REFRESH).validate().unwrap();
        assert_eq!(config.access_ttl, Duration::hours(1));
        assert_eq!(config.refresh_ttl, Duration::days(30));
        assert!(config.rotate_refresh);
    }

    #[test]
    fn test_short_and_shared_keys_rejected() {
        assert_eq!(
            AuthConfig::with_keys("short", REFRESH).validate().unwrap_err(),
            ConfigError::KeyTooShort("Access")
        );
        assert_eq!(
            AuthConfig::with_keys(ACCESS, ACCESS).validate().unwrap_err(),
            ConfigError::SharedSigningKey
        );
    }

    #[test]
    fn test_ttl_ordering_enforced() {
        let mut config = AuthConfig::with_keys(ACCESS, REFRESH);
        config.access_ttl = Duration::days(60);
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::AccessOutlivesRefresh
        );

        let mut config = AuthConfig::with_keys(ACCESS, REFRESH);
        config.password_reset_ttl = Duration::zero();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveTtl(_))
        ));
    }

    #[test]
    fn test_same_site_none_requires_secure() {
        let mut config = AuthConfig::with_keys(ACCESS, REFRESH);
        config.cookie.same_site = SameSite::None;
        config.cookie.secure = false;
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::InsecureSameSiteNone
        );
    }

    #[test]
    fn test_same_site_parsing() {
        assert_eq!("Strict".parse::<SameSite>().unwrap(), SameSite::Strict);
        assert_eq!("none".parse::<SameSite>().unwrap(), SameSite::None);
        assert!("sideways".parse::<SameSite>().is_err());
    }

    #[test]
    fn test_debug_hides_keys() {
        let config = AuthConfig::with_keys(ACCESS, REFRESH);
        let debug = format!("{:?}", config);
        assert!(!debug.contains(ACCESS));
        assert!(!debug.contains(REFRESH));
    }
}
