//! Command-line and environment configuration

use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use identity_core::{AuthConfig, ConfigError, CookieConfig, SameSite};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Command-line arguments for the marketplace API. Every option can also be
/// given through the environment (or a `.env` file).
#[derive(Parser, Debug, Clone)]
#[command(name = "marketplace-api")]
#[command(about = "Marketplace authentication API")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,

    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value = "10")]
    pub max_connections: u32,

    /// Keep all state in process memory instead of PostgreSQL
    #[arg(long)]
    pub in_memory: bool,

    /// Access credential signing key
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    /// Refresh credential signing key
    #[arg(long, env = "REFRESH_TOKEN_SECRET", hide_env_values = true)]
    pub refresh_token_secret: String,

    #[arg(long, env = "ACCESS_TOKEN_TTL_SECS", default_value_t = 3600)]
    pub access_token_ttl_secs: i64,

    #[arg(long, env = "REFRESH_TOKEN_TTL_SECS", default_value_t = 2_592_000)]
    pub refresh_token_ttl_secs: i64,

    #[arg(long, env = "ROTATE_REFRESH_TOKENS", default_value_t = true, action = ArgAction::Set)]
    pub rotate_refresh_tokens: bool,

    #[arg(long, env = "REQUIRE_EMAIL_VERIFICATION", default_value_t = false, action = ArgAction::Set)]
    pub require_email_verification: bool,

    #[arg(long, env = "ISSUE_REFRESH_ON_LOGIN", default_value_t = true, action = ArgAction::Set)]
    pub issue_refresh_on_login: bool,

    #[arg(long, env = "EMAIL_VERIFY_TTL_SECS", default_value_t = 86_400)]
    pub email_verify_ttl_secs: i64,

    #[arg(long, env = "PASSWORD_RESET_TTL_SECS", default_value_t = 3600)]
    pub password_reset_ttl_secs: i64,

    #[arg(long, env = "COOKIE_SECURE", default_value_t = true, action = ArgAction::Set)]
    pub cookie_secure: bool,

    /// strict, lax or none
    #[arg(long, env = "COOKIE_SAME_SITE", default_value = "lax")]
    pub cookie_same_site: String,

    #[arg(long, env = "COOKIE_DOMAIN")]
    pub cookie_domain: Option<String>,

    /// Skip outbound mail and return links in responses instead
    #[arg(long, env = "MAILER_DISABLED", default_value_t = false, action = ArgAction::Set)]
    pub mailer_disabled: bool,

    /// Public base URL used in emailed links
    #[arg(long, env = "APP_BASE_URL", default_value = "http://localhost:3000")]
    pub app_base_url: String,

    /// Allowed CORS origins, comma separated. Empty allows any origin.
    #[arg(long, env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,

    /// Take the client address from `X-Forwarded-For`. Only safe behind a
    /// reverse proxy that overwrites the header.
    #[arg(long, env = "TRUST_PROXY", default_value_t = false, action = ArgAction::Set)]
    pub trust_proxy: bool,

    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value_t = 900)]
    pub rate_limit_window_secs: u64,

    /// Requests per window for the login, register and refresh buckets
    #[arg(long, env = "RATE_LIMIT_MAX_AUTH", default_value_t = 100)]
    pub rate_limit_max_auth: u32,

    /// Requests per window for the forgot and reset buckets
    #[arg(long, env = "RATE_LIMIT_MAX_TIGHT", default_value_t = 20)]
    pub rate_limit_max_tight: u32,

    /// Accepted Google OAuth client ids, comma separated
    #[arg(long, env = "GOOGLE_CLIENT_IDS", value_delimiter = ',')]
    pub google_client_ids: Vec<String>,

    #[arg(long, env = "FACEBOOK_APP_ID")]
    pub facebook_app_id: Option<String>,

    #[arg(long, env = "FACEBOOK_APP_SECRET", hide_env_values = true)]
    pub facebook_app_secret: Option<String>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Build and validate the identity configuration
    pub fn auth_config(&self) -> Result<AuthConfig, ConfigError> {
        let same_site: SameSite = self.cookie_same_site.parse()?;

        let config = AuthConfig {
            access_ttl: chrono::Duration::seconds(self.access_token_ttl_secs),
            refresh_ttl: chrono::Duration::seconds(self.refresh_token_ttl_secs),
            access_key: self.jwt_secret.clone(),
            refresh_key: self.refresh_token_secret.clone(),
            rotate_refresh: self.rotate_refresh_tokens,
            require_email_verification: self.require_email_verification,
            issue_refresh_on_login: self.issue_refresh_on_login,
            email_verify_ttl: chrono::Duration::seconds(self.email_verify_ttl_secs),
            password_reset_ttl: chrono::Duration::seconds(self.password_reset_ttl_secs),
            cookie: CookieConfig {
                secure: self.cookie_secure,
                same_site,
                domain: self.cookie_domain.clone().filter(|d| !d.is_empty()),
            },
        };
        config.validate()
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn cors_origins(&self) -> Vec<String> {
        self.cors_origins
            .iter()
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect()
    }
}
