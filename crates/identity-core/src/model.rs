//! Identity records and their lifecycle types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric account identifier
pub type AccountId = i64;

/// Account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Visitor,
    Worker,
    Company,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Visitor => "visitor",
            Role::Worker => "worker",
            Role::Company => "company",
            Role::Admin => "admin",
        }
    }

    /// Roles a user may pick for themselves at registration
    pub fn is_self_assignable(&self) -> bool {
        !matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "visitor" => Ok(Role::Visitor),
            "worker" => Ok(Role::Worker),
            "company" => Ok(Role::Company),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// External identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Facebook,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Facebook => "facebook",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google" => Ok(Provider::Google),
            "facebook" => Ok(Provider::Facebook),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Primary authentication method recorded on an account
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Local,
    Provider(Provider),
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Local => "local",
            AuthMethod::Provider(p) => p.as_str(),
        }
    }
}

impl FromStr for AuthMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(AuthMethod::Local),
            other => other.parse().map(AuthMethod::Provider),
        }
    }
}

/// Account as seen by the identity core
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: AccountId,
    pub email: Option<String>,
    pub name: String,
    pub role: Role,
    /// Absent for provider-only accounts
    pub password_hash: Option<String>,
    pub auth_method: AuthMethod,
    pub session_version: i64,
    pub is_active: bool,
    pub suspended_at: Option<DateTime<Utc>>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn is_suspended(&self) -> bool {
        !self.is_active || self.suspended_at.is_some()
    }

    /// Suspension blocks every role except administrators, whose status is
    /// managed directly in the database.
    pub fn blocked_by_suspension(&self) -> bool {
        self.role != Role::Admin && self.is_suspended()
    }

    pub fn email_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

/// Fields needed to create an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: Option<String>,
    pub name: String,
    pub role: Role,
    pub password_hash: Option<String>,
    pub auth_method: AuthMethod,
    pub email_verified_at: Option<DateTime<Utc>>,
}

/// Persisted record of one issued refresh credential
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshRecord {
    pub identifier: String,
    pub account_id: AccountId,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}

impl RefreshRecord {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

/// Link between an external identity and a local account
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderLink {
    pub provider: Provider,
    pub subject: String,
    pub account_id: AccountId,
    pub email: Option<String>,
    pub linked_at: DateTime<Utc>,
}

/// What a single-use token may be spent on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    EmailVerify,
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::EmailVerify => "email_verify",
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

impl FromStr for TokenPurpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email_verify" => Ok(TokenPurpose::EmailVerify),
            "password_reset" => Ok(TokenPurpose::PasswordReset),
            other => Err(format!("unknown token purpose: {}", other)),
        }
    }
}

/// Stored single-use token. Only the hash of the secret is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleUseToken {
    pub token_hash: String,
    pub purpose: TokenPurpose,
    pub account_id: AccountId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

/// Administrative action recorded in the audit log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    SuspendUser,
    UnsuspendUser,
    RevokeSessions,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::SuspendUser => "SUSPEND_USER",
            AuditAction::UnsuspendUser => "UNSUSPEND_USER",
            AuditAction::RevokeSessions => "REVOKE_SESSIONS",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUSPEND_USER" => Ok(AuditAction::SuspendUser),
            "UNSUSPEND_USER" => Ok(AuditAction::UnsuspendUser),
            "REVOKE_SESSIONS" => Ok(AuditAction::RevokeSessions),
            other => Err(format!("unknown audit action: {}", other)),
        }
    }
}

/// Audit entry to append, written in the same transaction as its action
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub actor_id: AccountId,
    pub action: AuditAction,
    pub target_id: AccountId,
    pub metadata: serde_json::Value,
}

/// Stored audit entry
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: i64,
    pub actor_id: AccountId,
    pub action: AuditAction,
    pub target_id: AccountId,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Request metadata recorded alongside refresh records
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip: Option<String>,
}
