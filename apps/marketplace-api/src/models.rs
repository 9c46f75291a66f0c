//! Request and response bodies

use chrono::{DateTime, Utc};
use identity_core::rotation::CredentialPair;
use identity_core::{
    Account, AccountId, AuditAction, AuditEntry, AuditPage, AuthenticatedUser, Role,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    #[serde(alias = "new_password")]
    pub password: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OAuthRequest {
    #[serde(alias = "id_token", alias = "access_token")]
    pub token: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SuspendRequest {
    #[serde(default)]
    pub force_logout: bool,
}

/// Public view of an account
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: AccountId,
    pub name: String,
    pub role: Role,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl From<&Account> for UserView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            name: account.name.clone(),
            role: account.role,
            email: account.email.clone(),
            email_verified: account.email_verified(),
        }
    }
}

impl From<AuthenticatedUser> for UserView {
    fn from(user: AuthenticatedUser) -> Self {
        Self {
            id: user.id,
            name: user.name,
            role: user.role,
            email: user.email,
            email_verified: user.email_verified,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub success: bool,
    pub access_token: String,
    /// Same value as `access_token`, kept for older clients
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserView>,
}

impl TokenResponse {
    pub fn new(credentials: &CredentialPair, user: Option<UserView>) -> Self {
        let now: DateTime<Utc> = Utc::now();
        Self {
            success: true,
            access_token: credentials.access.token.clone(),
            token: credentials.access.token.clone(),
            token_type: "Bearer",
            expires_in: (credentials.access.expires_at - now).num_seconds().max(0),
            refresh_token: credentials.refresh.as_ref().map(|r| r.token.clone()),
            user,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub message: &'static str,
    pub user: UserView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_link: Option<String>,
    /// Present when sign-in does not wait for email verification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl MessageResponse {
    pub fn new(message: &'static str) -> Self {
        Self {
            success: true,
            message,
            link: None,
        }
    }

    pub fn with_link(mut self, link: Option<String>) -> Self {
        self.link = link;
        self
    }
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub user: UserView,
}

#[derive(Debug, Serialize)]
pub struct AdminAccountResponse {
    pub success: bool,
    pub user: UserView,
    pub suspended: bool,
    pub suspended_at: Option<DateTime<Utc>>,
}

impl From<&Account> for AdminAccountResponse {
    fn from(account: &Account) -> Self {
        Self {
            success: true,
            user: UserView::from(account),
            suspended: account.is_suspended(),
            suspended_at: account.suspended_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct AuditEntryView {
    pub id: i64,
    pub actor_id: AccountId,
    pub action: AuditAction,
    pub target_id: AccountId,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<&AuditEntry> for AuditEntryView {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            id: entry.id,
            actor_id: entry.actor_id,
            action: entry.action,
            target_id: entry.target_id,
            metadata: entry.metadata.clone(),
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total: i64,
}

#[derive(Debug, Serialize)]
pub struct AuditLogResponse {
    pub success: bool,
    pub items: Vec<AuditEntryView>,
    pub meta: PageMeta,
}

impl From<&AuditPage> for AuditLogResponse {
    fn from(page: &AuditPage) -> Self {
        Self {
            success: true,
            items: page.entries.iter().map(AuditEntryView::from).collect(),
            meta: PageMeta {
                page: page.pagination.page,
                limit: page.pagination.limit,
                total: page.total,
            },
        }
    }
}
