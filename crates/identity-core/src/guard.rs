//! Per-request authentication
//!
//! A signature check alone is not enough: the account is re-read on every
//! request so that a session-version bump or a suspension takes effect on
//! the very next call, not when the access credential expires.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::credentials::{extract_bearer_token, CredentialSigner};
use crate::error::{AuthError, AuthResult};
use crate::model::{AccountId, Role};
use crate::store::IdentityStore;

/// Identity attached to an authenticated request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthenticatedUser {
    pub id: AccountId,
    pub role: Role,
    pub email: Option<String>,
    pub name: String,
    pub email_verified: bool,
    #[serde(skip)]
    pub session_version: i64,
}

impl AuthenticatedUser {
    pub fn has_role(&self, roles: &[Role]) -> bool {
        roles.contains(&self.role)
    }

    pub fn require_role(&self, roles: &[Role]) -> AuthResult<()> {
        if self.has_role(roles) {
            Ok(())
        } else {
            Err(AuthError::Forbidden(format!(
                "role {} may not perform this action",
                self.role
            )))
        }
    }
}

#[derive(Clone)]
pub struct RequestGuard {
    store: Arc<dyn IdentityStore>,
    signer: CredentialSigner,
}

impl RequestGuard {
    pub fn new(store: Arc<dyn IdentityStore>, signer: CredentialSigner) -> Self {
        Self { store, signer }
    }

    /// Authenticate from a raw `Authorization` header value
    pub async fn authenticate_header(&self, header: Option<&str>) -> AuthResult<AuthenticatedUser> {
        let token = extract_bearer_token(header).ok_or(AuthError::MissingCredential)?;
        self.authenticate(token).await
    }

    pub async fn authenticate(&self, token: &str) -> AuthResult<AuthenticatedUser> {
        let claims = self.signer.verify_access(token)?;

        let Some(account) = self.store.account_by_id(claims.sub).await? else {
            debug!(account_id = claims.sub, "Access credential for unknown account");
            return Err(AuthError::SignatureInvalid);
        };
        if claims.sv != account.session_version {
            debug!(
                account_id = account.id,
                presented = claims.sv,
                current = account.session_version,
                "Stale session version"
            );
            return Err(AuthError::StaleSession);
        }
        if account.blocked_by_suspension() {
            return Err(AuthError::Suspended);
        }

        Ok(AuthenticatedUser {
            id: account.id,
            role: account.role,
            email_verified: account.email_verified(),
            email: account.email,
            name: account.name,
            session_version: account.session_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::model::{AuthMethod, NewAccount};
    use crate::store::{Isolation, MemoryStore};
    use chrono::Utc;

    async fn setup(role: Role) -> (MemoryStore, RequestGuard, CredentialSigner, AccountId) {
        let store = MemoryStore::new();
        let mut tx = store.begin(Isolation::default()).await.unwrap();
        let account = tx
            .insert_account(
                NewAccount {
                    email: Some("g@example.com".into()),
                    name: "Guarded".into(),
                    role,
                    password_hash: None,
                    auth_method: AuthMethod::Local,
                    email_verified_at: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let signer = CredentialSigner::new(&AuthConfig::with_keys(
            "guard-access-key-guard-access-key-0001",
            "guard-refresh-key-guard-refresh-key-01",
        ));
        let guard = RequestGuard::new(Arc::new(store.clone()), signer.clone());
        (store, guard, signer, account.id)
    }

    async fn token_for(store: &MemoryStore, signer: &CredentialSigner, id: AccountId) -> String {
        let account = store.account_by_id(id).await.unwrap().unwrap();
        signer.issue_access(&account).unwrap().token
    }

    #[tokio::test]
    async fn test_valid_credential() {
        let (store, guard, signer, id) = setup(Role::Company).await;
        let token = token_for(&store, &signer, id).await;
        let header = format!("Bearer {}", token);

        let user = guard.authenticate_header(Some(&header)).await.unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.role, Role::Company);
        assert!(user.require_role(&[Role::Company, Role::Admin]).is_ok());
        assert!(matches!(
            user.require_role(&[Role::Admin]),
            Err(AuthError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_and_malformed() {
        let (_store, guard, _signer, _id) = setup(Role::Visitor).await;
        assert!(matches!(
            guard.authenticate_header(None).await,
            Err(AuthError::MissingCredential)
        ));
        assert!(matches!(
            guard.authenticate_header(Some("Basic abc")).await,
            Err(AuthError::MissingCredential)
        ));
        assert!(matches!(
            guard.authenticate("a.b.c").await,
            Err(AuthError::SignatureInvalid)
        ));
    }

    #[tokio::test]
    async fn test_version_bump_kills_credential() {
        let (store, guard, signer, id) = setup(Role::Worker).await;
        let token = token_for(&store, &signer, id).await;

        let mut tx = store.begin(Isolation::default()).await.unwrap();
        tx.increment_session_version(id).await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            guard.authenticate(&token).await,
            Err(AuthError::StaleSession)
        ));
    }

    #[tokio::test]
    async fn test_suspension_blocks_except_admin() {
        for (role, blocked) in [(Role::Worker, true), (Role::Admin, false)] {
            let (store, guard, signer, id) = setup(role).await;
            let token = token_for(&store, &signer, id).await;

            let mut tx = store.begin(Isolation::default()).await.unwrap();
            tx.set_suspension(id, Some(Utc::now())).await.unwrap();
            tx.commit().await.unwrap();

            let result = guard.authenticate(&token).await;
            if blocked {
                assert!(matches!(result, Err(AuthError::Suspended)));
            } else {
                assert!(result.is_ok());
            }
        }
    }
}
