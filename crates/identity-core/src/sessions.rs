//! Session invalidation
//!
//! Bumping an account's session version kills every outstanding access
//! credential at its next use. Revoking the refresh records stops new ones
//! from being minted. Credential-changing operations do both.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::AuthResult;
use crate::model::AccountId;
use crate::refresh;
use crate::store::{IdentityStore, Isolation, StoreTx};

/// Result of a full invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidation {
    pub session_version: i64,
    pub revoked_refresh: u64,
}

/// Version bump plus refresh revocation inside the caller's transaction
pub async fn invalidate_in(
    tx: &mut dyn StoreTx,
    account_id: AccountId,
    now: DateTime<Utc>,
) -> AuthResult<Invalidation> {
    let session_version = tx.increment_session_version(account_id).await?;
    let revoked_refresh = refresh::revoke_all(tx, account_id, now).await?;
    Ok(Invalidation {
        session_version,
        revoked_refresh,
    })
}

/// Standalone invalidation, each call in its own transaction
#[derive(Clone)]
pub struct SessionInvalidator {
    store: Arc<dyn IdentityStore>,
}

impl SessionInvalidator {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    pub async fn bump_version(&self, account_id: AccountId) -> AuthResult<i64> {
        let mut tx = self.store.begin(Isolation::default()).await?;
        let version = tx.increment_session_version(account_id).await?;
        tx.commit().await?;
        Ok(version)
    }

    pub async fn revoke_all_refresh(&self, account_id: AccountId) -> AuthResult<u64> {
        let mut tx = self.store.begin(Isolation::default()).await?;
        let revoked = refresh::revoke_all(tx.as_mut(), account_id, Utc::now()).await?;
        tx.commit().await?;
        Ok(revoked)
    }

    pub async fn invalidate(&self, account_id: AccountId) -> AuthResult<Invalidation> {
        let mut tx = self.store.begin(Isolation::default()).await?;
        let outcome = invalidate_in(tx.as_mut(), account_id, Utc::now()).await?;
        tx.commit().await?;

        info!(
            account_id,
            session_version = outcome.session_version,
            revoked_refresh = outcome.revoked_refresh,
            "Sessions invalidated"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthMethod, ClientInfo, NewAccount, Role};
    use crate::store::MemoryStore;
    use chrono::Duration;

    #[tokio::test]
    async fn test_invalidate_bumps_and_revokes() {
        let store = MemoryStore::new();
        let now = Utc::now();

        let mut tx = store.begin(Isolation::default()).await.unwrap();
        let account = tx
            .insert_account(
                NewAccount {
                    email: Some("s@example.com".into()),
                    name: "S".into(),
                    role: Role::Company,
                    password_hash: None,
                    auth_method: AuthMethod::Local,
                    email_verified_at: None,
                },
                now,
            )
            .await
            .unwrap();
        for _ in 0..2 {
            refresh::insert(tx.as_mut(), account.id, &ClientInfo::default(), Duration::days(1), now)
                .await
                .unwrap();
        }
        tx.commit().await.unwrap();

        let invalidator = SessionInvalidator::new(Arc::new(store.clone()));
        let outcome = invalidator.invalidate(account.id).await.unwrap();
        assert_eq!(
            outcome,
            Invalidation {
                session_version: 1,
                revoked_refresh: 2
            }
        );

        assert_eq!(invalidator.bump_version(account.id).await.unwrap(), 2);
        assert_eq!(invalidator.revoke_all_refresh(account.id).await.unwrap(), 0);
        assert!(store
            .refresh_records_for(account.id)
            .await
            .iter()
            .all(|r| r.revoked_at.is_some()));
    }

    #[tokio::test]
    async fn test_unknown_account_fails() {
        let invalidator = SessionInvalidator::new(Arc::new(MemoryStore::new()));
        assert!(invalidator.bump_version(404).await.is_err());
    }
}
