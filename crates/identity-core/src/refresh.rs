//! Server-side refresh records
//!
//! Thin operations over an open transaction. The record identifier is the
//! `jti` embedded in the refresh credential; the credential itself is never
//! stored.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::AuthResult;
use crate::model::{AccountId, ClientInfo, RefreshRecord};
use crate::store::StoreTx;

/// Fresh random record identifier
pub fn new_identifier() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Create and persist a live record for `account_id`
pub async fn insert(
    tx: &mut dyn StoreTx,
    account_id: AccountId,
    client: &ClientInfo,
    ttl: Duration,
    now: DateTime<Utc>,
) -> AuthResult<RefreshRecord> {
    let record = RefreshRecord {
        identifier: new_identifier(),
        account_id,
        issued_at: now,
        expires_at: now + ttl,
        revoked_at: None,
        user_agent: client.user_agent.clone(),
        ip: client.ip.clone(),
    };
    tx.insert_refresh_record(&record).await?;
    Ok(record)
}

/// Locking lookup; the row stays locked until the transaction ends
pub async fn lookup(tx: &mut dyn StoreTx, identifier: &str) -> AuthResult<Option<RefreshRecord>> {
    Ok(tx.refresh_record_for_update(identifier).await?)
}

/// Revoke one record. `false` means it was already revoked or never existed.
pub async fn revoke(tx: &mut dyn StoreTx, identifier: &str, now: DateTime<Utc>) -> AuthResult<bool> {
    Ok(tx.revoke_refresh_record(identifier, now).await?)
}

pub async fn revoke_all(
    tx: &mut dyn StoreTx,
    account_id: AccountId,
    now: DateTime<Utc>,
) -> AuthResult<u64> {
    Ok(tx.revoke_all_refresh_records(account_id, now).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AuthMethod, NewAccount, Role};
    use crate::store::{IdentityStore, Isolation, MemoryStore};

    async fn seeded() -> (MemoryStore, AccountId) {
        let store = MemoryStore::new();
        let mut tx = store.begin(Isolation::default()).await.unwrap();
        let account = tx
            .insert_account(
                NewAccount {
                    email: Some("r@example.com".into()),
                    name: "R".into(),
                    role: Role::Worker,
                    password_hash: None,
                    auth_method: AuthMethod::Local,
                    email_verified_at: None,
                },
                Utc::now(),
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();
        (store, account.id)
    }

    #[test]
    fn test_identifiers_are_unique() {
        let a = new_identifier();
        let b = new_identifier();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[tokio::test]
    async fn test_insert_lookup_revoke() {
        let (store, account_id) = seeded().await;
        let now = Utc::now();
        let client = ClientInfo {
            user_agent: Some("curl/8".into()),
            ip: Some("10.0.0.1".into()),
        };

        let mut tx = store.begin(Isolation::default()).await.unwrap();
        let record = insert(tx.as_mut(), account_id, &client, Duration::days(30), now)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin(Isolation::default()).await.unwrap();
        let found = lookup(tx.as_mut(), &record.identifier).await.unwrap().unwrap();
        assert_eq!(found.user_agent.as_deref(), Some("curl/8"));
        assert!(found.is_valid_at(now));

        assert!(revoke(tx.as_mut(), &record.identifier, now).await.unwrap());
        assert!(!revoke(tx.as_mut(), &record.identifier, now).await.unwrap());
        assert!(!revoke(tx.as_mut(), "missing", now).await.unwrap());
        tx.commit().await.unwrap();

        let records = store.refresh_records_for(account_id).await;
        assert_eq!(records.len(), 1);
        assert!(records[0].revoked_at.is_some());
    }

    #[tokio::test]
    async fn test_revoke_all_counts_only_live_records() {
        let (store, account_id) = seeded().await;
        let now = Utc::now();

        let mut tx = store.begin(Isolation::default()).await.unwrap();
        let first = insert(tx.as_mut(), account_id, &ClientInfo::default(), Duration::days(1), now)
            .await
            .unwrap();
        insert(tx.as_mut(), account_id, &ClientInfo::default(), Duration::days(1), now)
            .await
            .unwrap();
        insert(tx.as_mut(), account_id, &ClientInfo::default(), Duration::days(1), now)
            .await
            .unwrap();
        revoke(tx.as_mut(), &first.identifier, now).await.unwrap();

        assert_eq!(revoke_all(tx.as_mut(), account_id, now).await.unwrap(), 2);
        assert_eq!(revoke_all(tx.as_mut(), account_id, now).await.unwrap(), 0);
        tx.commit().await.unwrap();
    }
}
