//! Binding third-party identities to accounts
//!
//! Resolution order for a verified provider identity:
//!
//! 1. an existing provider link wins outright;
//! 2. otherwise an account with the same (normalised) email is adopted;
//! 3. otherwise a fresh account is created;
//!
//! and in cases 2 and 3 the link is then recorded. All of it runs in one
//! serializable transaction with the email row locked, so two concurrent
//! first-time logins for the same identity end on the same account.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{AuthError, AuthResult, StoreError};
use crate::model::{Account, AuthMethod, NewAccount, Provider, ProviderLink, Role};
use crate::password::normalize_email;
use crate::store::{IdentityStore, Isolation, StoreTx};

/// Attempts before a serialization conflict is surfaced
const MAX_ATTEMPTS: usize = 3;

/// Identity asserted by a provider after server-side verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderIdentity {
    pub provider: Provider,
    pub subject: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub email_verified: bool,
}

#[derive(Debug, Clone)]
pub struct LinkOutcome {
    pub account: Account,
    pub created: bool,
}

#[derive(Clone)]
pub struct IdentityLinker {
    store: Arc<dyn IdentityStore>,
}

impl IdentityLinker {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Resolve or create the account for a provider identity
    pub async fn link(&self, identity: &ProviderIdentity) -> AuthResult<LinkOutcome> {
        if identity.subject.trim().is_empty() {
            return Err(AuthError::MissingClaims("subject".to_string()));
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.link_once(identity, Utc::now()).await {
                Err(AuthError::Store(StoreError::Conflict(detail))) => {
                    if attempt >= MAX_ATTEMPTS {
                        warn!(
                            provider = %identity.provider,
                            attempts = attempt,
                            detail = %detail,
                            "Giving up on provider link after repeated conflicts"
                        );
                        return Err(AuthError::DuplicateAccountConflict);
                    }
                    warn!(
                        provider = %identity.provider,
                        attempt,
                        detail = %detail,
                        "Provider link conflicted, retrying"
                    );
                }
                other => return other,
            }
        }
    }

    async fn link_once(
        &self,
        identity: &ProviderIdentity,
        now: DateTime<Utc>,
    ) -> AuthResult<LinkOutcome> {
        let mut tx = self.store.begin(Isolation::Serializable).await?;

        if let Some(link) = tx.provider_link(identity.provider, &identity.subject).await? {
            let account = tx.account_by_id(link.account_id).await?.ok_or_else(|| {
                AuthError::Internal(format!(
                    "provider link {}:{} points at missing account {}",
                    link.provider, link.subject, link.account_id
                ))
            })?;
            tx.commit().await?;
            return Ok(LinkOutcome {
                account,
                created: false,
            });
        }

        let email = identity
            .email
            .as_deref()
            .map(normalize_email)
            .filter(|e| !e.is_empty());

        let existing = match &email {
            Some(email) => tx.account_by_email_for_update(email).await?,
            None => None,
        };

        let (account, created) = match existing {
            Some(account) => {
                let account = adopt(tx.as_mut(), account, identity, now).await?;
                (account, false)
            }
            None => {
                let account = tx
                    .insert_account(
                        NewAccount {
                            email: email.clone(),
                            name: display_name(identity, email.as_deref()),
                            role: Role::Visitor,
                            password_hash: None,
                            auth_method: AuthMethod::Provider(identity.provider),
                            email_verified_at: identity.email_verified.then_some(now),
                        },
                        now,
                    )
                    .await?;
                (account, true)
            }
        };

        tx.upsert_provider_link(&ProviderLink {
            provider: identity.provider,
            subject: identity.subject.clone(),
            account_id: account.id,
            email,
            linked_at: now,
        })
        .await?;
        tx.commit().await?;

        info!(
            account_id = account.id,
            provider = %identity.provider,
            created,
            "Provider identity linked"
        );
        Ok(LinkOutcome { account, created })
    }
}

/// Adopt an email-matched account, correcting stale fields on the way
async fn adopt(
    tx: &mut dyn StoreTx,
    account: Account,
    identity: &ProviderIdentity,
    now: DateTime<Utc>,
) -> AuthResult<Account> {
    let mut changed = false;

    // A local account that never had a password cannot sign in locally
    if account.auth_method == AuthMethod::Local && account.password_hash.is_none() {
        tx.set_auth_method(account.id, AuthMethod::Provider(identity.provider))
            .await?;
        changed = true;
    }
    if identity.email_verified && account.email_verified_at.is_none() {
        tx.set_email_verified(account.id, now).await?;
        changed = true;
    }

    if !changed {
        return Ok(account);
    }
    tx.account_by_id(account.id)
        .await?
        .ok_or(AuthError::AccountNotFound)
}

fn display_name(identity: &ProviderIdentity, email: Option<&str>) -> String {
    identity
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| email.and_then(|e| e.split('@').next()).map(str::to_string))
        .unwrap_or_else(|| format!("{} user", identity.provider))
}
