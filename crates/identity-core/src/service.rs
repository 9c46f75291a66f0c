//! Authentication flows composed from the identity components
//!
//! Each flow opens at most a couple of short transactions. Password hashing
//! and verification always happen outside a transaction.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::config::AuthConfig;
use crate::credentials::CredentialSigner;
use crate::error::{AuthError, AuthResult, StoreError};
use crate::guard::{AuthenticatedUser, RequestGuard};
use crate::linker::{IdentityLinker, ProviderIdentity};
use crate::model::{
    Account, AccountId, AuditAction, AuditEntry, AuthMethod, ClientInfo, NewAccount,
    NewAuditEntry, Role, TokenPurpose,
};
use crate::password::{
    hash_password_blocking, normalize_email, validate_email, validate_password_strength,
    verify_stored_password,
};
use crate::rotation::{CredentialPair, Refreshed, RotationEngine};
use crate::sessions::{self, Invalidation};
use crate::store::{IdentityStore, Isolation};
use crate::vault;

/// Self-service registration input
#[derive(Debug, Clone)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    pub role: Option<Role>,
}

#[derive(Debug, Clone)]
pub struct Registered {
    pub account: Account,
    /// Plaintext email-verification secret, for the mailer only
    pub verification_secret: String,
    /// Present when email verification is not required to sign in
    pub credentials: Option<CredentialPair>,
}

#[derive(Debug, Clone)]
pub struct SignedIn {
    pub account: Account,
    pub credentials: CredentialPair,
}

/// Page request for admin listings. Pages start at 1; page size is clamped
/// to 5..=50 and defaults to 20.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    pub fn new(page: Option<u32>, limit: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(20).clamp(5, 50),
        }
    }

    fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.limit)
    }
}

#[derive(Debug, Clone)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub pagination: Pagination,
    pub total: i64,
}

#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn IdentityStore>,
    config: Arc<AuthConfig>,
    rotation: RotationEngine,
    linker: IdentityLinker,
    guard: RequestGuard,
}

impl IdentityService {
    pub fn new(store: Arc<dyn IdentityStore>, config: AuthConfig) -> Self {
        let signer = CredentialSigner::new(&config);
        Self {
            rotation: RotationEngine::new(store.clone(), signer.clone(), config.rotate_refresh),
            linker: IdentityLinker::new(store.clone()),
            guard: RequestGuard::new(store.clone(), signer),
            config: Arc::new(config),
            store,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn IdentityStore> {
        &self.store
    }

    pub fn guard(&self) -> &RequestGuard {
        &self.guard
    }

    /// Create a local account and its first email-verification token
    pub async fn register(
        &self,
        input: Registration,
        client: &ClientInfo,
    ) -> AuthResult<Registered> {
        validate_email(&input.email).map_err(AuthError::InvalidRequest)?;
        validate_password_strength(&input.password).map_err(AuthError::WeakPassword)?;
        let role = input.role.unwrap_or_default();
        if !role.is_self_assignable() {
            return Err(AuthError::InvalidRequest(format!(
                "role {} cannot be chosen at registration",
                role
            )));
        }

        let email = normalize_email(&input.email);
        let name = input
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        let password_hash = hash_password_blocking(input.password).await?;

        let now = Utc::now();
        let mut tx = self.store.begin(Isolation::default()).await?;
        if tx.account_by_email_for_update(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }
        let account = tx
            .insert_account(
                NewAccount {
                    email: Some(email),
                    name,
                    role,
                    password_hash: Some(password_hash),
                    auth_method: AuthMethod::Local,
                    email_verified_at: None,
                },
                now,
            )
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => AuthError::EmailTaken,
                other => other.into(),
            })?;

        let verification_secret = vault::issue_in(
            tx.as_mut(),
            account.id,
            TokenPurpose::EmailVerify,
            self.config.email_verify_ttl,
            now,
        )
        .await?;

        let credentials = if self.config.require_email_verification {
            None
        } else {
            Some(
                self.rotation
                    .issue_pair_in(
                        tx.as_mut(),
                        &account,
                        client,
                        self.config.issue_refresh_on_login,
                        now,
                    )
                    .await?,
            )
        };
        tx.commit().await?;

        info!(
            target: "audit",
            event = "register",
            account_id = account.id,
            role = %account.role
        );
        Ok(Registered {
            account,
            verification_secret,
            credentials,
        })
    }

    /// Consume an email-verification secret and mark the owner verified
    pub async fn verify_email(&self, secret: &str) -> AuthResult<Account> {
        let now = Utc::now();
        let mut tx = self.store.begin(Isolation::default()).await?;
        let account_id =
            vault::consume_in(tx.as_mut(), secret, TokenPurpose::EmailVerify, now).await?;
        tx.set_email_verified(account_id, now).await?;
        let account = tx
            .account_by_id(account_id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        tx.commit().await?;

        info!(target: "audit", event = "email_verified", account_id);
        Ok(account)
    }

    /// Issue a fresh verification secret. `None` when there is nothing to
    /// verify; callers answer identically either way.
    pub async fn resend_verification(&self, email: &str) -> AuthResult<Option<(Account, String)>> {
        let email = normalize_email(email);
        let Some(account) = self.store.account_by_email(&email).await? else {
            return Ok(None);
        };
        if account.email_verified() || account.blocked_by_suspension() {
            return Ok(None);
        }

        let mut tx = self.store.begin(Isolation::default()).await?;
        let secret = vault::issue_in(
            tx.as_mut(),
            account.id,
            TokenPurpose::EmailVerify,
            self.config.email_verify_ttl,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;
        Ok(Some((account, secret)))
    }

    /// Email and password sign-in
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        client: &ClientInfo,
    ) -> AuthResult<SignedIn> {
        let email = normalize_email(email);
        let account = self.store.account_by_email(&email).await?;

        let stored = account.as_ref().and_then(|a| a.password_hash.clone());
        let verified = verify_stored_password(password.to_string(), stored).await?;
        let account = match account {
            Some(account) if verified => account,
            _ => {
                info!(target: "audit", event = "login_failed", ip = client.ip.as_deref());
                return Err(AuthError::InvalidCredential);
            }
        };

        if account.blocked_by_suspension() {
            info!(target: "audit", event = "login_blocked", account_id = account.id);
            return Err(AuthError::Suspended);
        }
        if self.config.require_email_verification && !account.email_verified() {
            return Err(AuthError::EmailNotVerified);
        }

        let signed_in = self.sign_in(account.id, client).await?;
        info!(target: "audit", event = "login", account_id = signed_in.account.id);
        Ok(signed_in)
    }

    /// Record the login and issue credentials against the account's
    /// current state
    async fn sign_in(&self, account_id: AccountId, client: &ClientInfo) -> AuthResult<SignedIn> {
        let now = Utc::now();
        let mut tx = self.store.begin(Isolation::default()).await?;
        tx.set_last_login(account_id, now).await?;
        let account = tx
            .account_by_id(account_id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        let credentials = self
            .rotation
            .issue_pair_in(
                tx.as_mut(),
                &account,
                client,
                self.config.issue_refresh_on_login,
                now,
            )
            .await?;
        tx.commit().await?;
        Ok(SignedIn {
            account,
            credentials,
        })
    }

    pub async fn refresh(&self, presented: &str, client: &ClientInfo) -> AuthResult<Refreshed> {
        self.rotation.refresh(presented, client).await
    }

    /// Best-effort: revoke the presented refresh record if there is one
    pub async fn logout(&self, presented: Option<&str>) {
        let Some(presented) = presented else {
            return;
        };
        match self.rotation.revoke_presented(presented).await {
            Ok(true) => info!(target: "audit", event = "logout"),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Logout revocation failed"),
        }
    }

    /// Issue a password-reset secret. `None` for unknown emails; callers
    /// answer identically either way.
    pub async fn forgot_password(&self, email: &str) -> AuthResult<Option<(Account, String)>> {
        let email = normalize_email(email);
        let Some(account) = self.store.account_by_email(&email).await? else {
            return Ok(None);
        };
        if account.blocked_by_suspension() {
            return Ok(None);
        }

        let mut tx = self.store.begin(Isolation::default()).await?;
        let secret = vault::issue_in(
            tx.as_mut(),
            account.id,
            TokenPurpose::PasswordReset,
            self.config.password_reset_ttl,
            Utc::now(),
        )
        .await?;
        tx.commit().await?;

        info!(target: "audit", event = "password_reset_requested", account_id = account.id);
        Ok(Some((account, secret)))
    }

    /// Consume a reset secret, set the new password and end every session
    pub async fn reset_password(&self, secret: &str, new_password: &str) -> AuthResult<AccountId> {
        validate_password_strength(new_password).map_err(AuthError::WeakPassword)?;
        let password_hash = hash_password_blocking(new_password.to_string()).await?;

        let mut tx = self.store.begin(Isolation::default()).await?;
        let account_id =
            vault::consume_in(tx.as_mut(), secret, TokenPurpose::PasswordReset, Utc::now())
                .await?;
        tx.set_password_hash(account_id, &password_hash).await?;
        tx.commit().await?;

        info!(target: "audit", event = "password_reset", account_id);
        Ok(account_id)
    }

    /// Sign in with an already-verified provider identity
    pub async fn oauth_login(
        &self,
        identity: &ProviderIdentity,
        client: &ClientInfo,
    ) -> AuthResult<SignedIn> {
        let outcome = self.linker.link(identity).await?;
        if outcome.account.blocked_by_suspension() {
            info!(target: "audit", event = "login_blocked", account_id = outcome.account.id);
            return Err(AuthError::Suspended);
        }

        let signed_in = self.sign_in(outcome.account.id, client).await?;
        info!(
            target: "audit",
            event = "oauth_login",
            account_id = signed_in.account.id,
            provider = %identity.provider,
            created = outcome.created
        );
        Ok(signed_in)
    }

    pub async fn authenticate(&self, authorization: Option<&str>) -> AuthResult<AuthenticatedUser> {
        self.guard.authenticate_header(authorization).await
    }

    pub async fn account(&self, id: AccountId) -> AuthResult<Account> {
        self.store
            .account_by_id(id)
            .await?
            .ok_or(AuthError::AccountNotFound)
    }

    /// Suspend an account, optionally ending its sessions at once
    pub async fn suspend(
        &self,
        actor: &AuthenticatedUser,
        target: AccountId,
        force_logout: bool,
    ) -> AuthResult<Account> {
        actor.require_role(&[Role::Admin])?;
        let now = Utc::now();

        let mut tx = self.store.begin(Isolation::default()).await?;
        let account = admin_target(tx.account_by_id(target).await?)?;
        tx.set_suspension(account.id, Some(now)).await?;
        let invalidation = if force_logout {
            Some(sessions::invalidate_in(tx.as_mut(), account.id, now).await?)
        } else {
            None
        };
        tx.insert_audit_entry(
            &NewAuditEntry {
                actor_id: actor.id,
                action: AuditAction::SuspendUser,
                target_id: account.id,
                metadata: json!({ "force_logout": force_logout }),
            },
            now,
        )
        .await?;
        let account = tx
            .account_by_id(account.id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        tx.commit().await?;

        info!(
            target: "audit",
            event = "account_suspended",
            actor_id = actor.id,
            account_id = account.id,
            force_logout,
            revoked_refresh = invalidation.map(|i| i.revoked_refresh)
        );
        Ok(account)
    }

    pub async fn unsuspend(
        &self,
        actor: &AuthenticatedUser,
        target: AccountId,
    ) -> AuthResult<Account> {
        actor.require_role(&[Role::Admin])?;
        let now = Utc::now();

        let mut tx = self.store.begin(Isolation::default()).await?;
        let account = admin_target(tx.account_by_id(target).await?)?;
        tx.set_suspension(account.id, None).await?;
        tx.insert_audit_entry(
            &NewAuditEntry {
                actor_id: actor.id,
                action: AuditAction::UnsuspendUser,
                target_id: account.id,
                metadata: json!({}),
            },
            now,
        )
        .await?;
        let account = tx
            .account_by_id(account.id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        tx.commit().await?;

        info!(
            target: "audit",
            event = "account_unsuspended",
            actor_id = actor.id,
            account_id = account.id
        );
        Ok(account)
    }

    pub async fn revoke_sessions(
        &self,
        actor: &AuthenticatedUser,
        target: AccountId,
    ) -> AuthResult<Invalidation> {
        actor.require_role(&[Role::Admin])?;
        let now = Utc::now();

        let mut tx = self.store.begin(Isolation::default()).await?;
        let account = admin_target(tx.account_by_id(target).await?)?;
        let invalidation = sessions::invalidate_in(tx.as_mut(), account.id, now).await?;
        tx.insert_audit_entry(
            &NewAuditEntry {
                actor_id: actor.id,
                action: AuditAction::RevokeSessions,
                target_id: account.id,
                metadata: json!({ "revoked_refresh": invalidation.revoked_refresh }),
            },
            now,
        )
        .await?;
        tx.commit().await?;

        info!(
            target: "audit",
            event = "sessions_revoked",
            actor_id = actor.id,
            account_id = account.id,
            revoked_refresh = invalidation.revoked_refresh
        );
        Ok(invalidation)
    }

    /// Administrative actions, newest first
    pub async fn audit_log(
        &self,
        actor: &AuthenticatedUser,
        pagination: Pagination,
    ) -> AuthResult<AuditPage> {
        actor.require_role(&[Role::Admin])?;
        let (entries, total) = self
            .store
            .audit_entries(i64::from(pagination.limit), pagination.offset())
            .await?;
        Ok(AuditPage {
            entries,
            pagination,
            total,
        })
    }
}

/// Administrators cannot be managed through the API
fn admin_target(account: Option<Account>) -> AuthResult<Account> {
    match account {
        None => Err(AuthError::AccountNotFound),
        Some(account) if account.role == Role::Admin => Err(AuthError::Forbidden(
            "administrator accounts cannot be modified".to_string(),
        )),
        Some(account) => Ok(account),
    }
}
