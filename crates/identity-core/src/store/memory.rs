//! Process-local identity store for tests and `--in-memory` runs
//!
//! A transaction holds the store-wide lock for its whole lifetime and works on
//! a private copy of the state. Commit swaps the copy in; drop discards it.
//! Transactions are therefore fully serialised.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{IdentityStore, Isolation, StoreTx};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    Account, AccountId, AuditEntry, AuthMethod, NewAccount, NewAuditEntry, Provider, ProviderLink,
    RefreshRecord, Role, SingleUseToken, TokenPurpose,
};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_account_id: AccountId,
    accounts: HashMap<AccountId, Account>,
    refresh_records: HashMap<String, RefreshRecord>,
    provider_links: HashMap<(Provider, String), ProviderLink>,
    single_use_tokens: HashMap<String, SingleUseToken>,
    /// Append-only, oldest first
    audit_log: Vec<AuditEntry>,
}

impl MemoryState {
    fn account_mut(&mut self, id: AccountId) -> StoreResult<&mut Account> {
        self.accounts.get_mut(&id).ok_or(StoreError::NotFound)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn account_count(&self) -> usize {
        self.state.lock().await.accounts.len()
    }

    pub async fn provider_link_count(&self) -> usize {
        self.state.lock().await.provider_links.len()
    }

    pub async fn refresh_records_for(&self, account_id: AccountId) -> Vec<RefreshRecord> {
        let state = self.state.lock().await;
        let mut records: Vec<RefreshRecord> = state
            .refresh_records
            .values()
            .filter(|r| r.account_id == account_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.issued_at);
        records
    }

    /// Change an account's role, standing in for a manual database update
    pub async fn set_role(&self, id: AccountId, role: Role) -> StoreResult<()> {
        self.state.lock().await.account_mut(id)?.role = role;
        Ok(())
    }

    pub async fn single_use_tokens_for(&self, account_id: AccountId) -> Vec<SingleUseToken> {
        let state = self.state.lock().await;
        state
            .single_use_tokens
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn begin(&self, _isolation: Isolation) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let working = MemoryState::clone(&guard);
        Ok(Box::new(MemoryTx { guard, working }))
    }

    async fn account_by_id(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(&id).cloned())
    }

    async fn account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .state
            .lock()
            .await
            .accounts
            .values()
            .find(|a| a.email.as_deref() == Some(email))
            .cloned())
    }

    async fn audit_entries(
        &self,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<AuditEntry>, i64)> {
        let state = self.state.lock().await;
        let page = state
            .audit_log
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, state.audit_log.len() as i64))
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn account_by_id(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.working.accounts.get(&id).cloned())
    }

    async fn account_by_email_for_update(
        &mut self,
        email: &str,
    ) -> StoreResult<Option<Account>> {
        Ok(self
            .working
            .accounts
            .values()
            .find(|a| a.email.as_deref() == Some(email))
            .cloned())
    }

    async fn insert_account(
        &mut self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> StoreResult<Account> {
        if let Some(email) = &account.email {
            if self
                .working
                .accounts
                .values()
                .any(|a| a.email.as_ref() == Some(email))
            {
                return Err(StoreError::Conflict(format!(
                    "duplicate key value violates unique constraint \"accounts_email_key\" ({})",
                    email
                )));
            }
        }

        self.working.next_account_id += 1;
        let created = Account {
            id: self.working.next_account_id,
            email: account.email,
            name: account.name,
            role: account.role,
            password_hash: account.password_hash,
            auth_method: account.auth_method,
            session_version: 0,
            is_active: true,
            suspended_at: None,
            email_verified_at: account.email_verified_at,
            last_login_at: None,
            created_at: now,
        };
        self.working.accounts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn set_auth_method(&mut self, id: AccountId, method: AuthMethod) -> StoreResult<()> {
        self.working.account_mut(id)?.auth_method = method;
        Ok(())
    }

    async fn set_email_verified(&mut self, id: AccountId, at: DateTime<Utc>) -> StoreResult<()> {
        let account = self.working.account_mut(id)?;
        if account.email_verified_at.is_none() {
            account.email_verified_at = Some(at);
        }
        Ok(())
    }

    async fn set_password_hash(&mut self, id: AccountId, hash: &str) -> StoreResult<()> {
        self.working.account_mut(id)?.password_hash = Some(hash.to_string());
        Ok(())
    }

    async fn set_last_login(&mut self, id: AccountId, at: DateTime<Utc>) -> StoreResult<()> {
        self.working.account_mut(id)?.last_login_at = Some(at);
        Ok(())
    }

    async fn increment_session_version(&mut self, id: AccountId) -> StoreResult<i64> {
        let account = self.working.account_mut(id)?;
        account.session_version += 1;
        Ok(account.session_version)
    }

    async fn set_suspension(
        &mut self,
        id: AccountId,
        suspended_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let account = self.working.account_mut(id)?;
        account.is_active = suspended_at.is_none();
        account.suspended_at = suspended_at;
        Ok(())
    }

    async fn insert_refresh_record(&mut self, record: &RefreshRecord) -> StoreResult<()> {
        if self.working.refresh_records.contains_key(&record.identifier) {
            return Err(StoreError::Conflict(format!(
                "refresh record {} already exists",
                record.identifier
            )));
        }
        self.working
            .refresh_records
            .insert(record.identifier.clone(), record.clone());
        Ok(())
    }

    async fn refresh_record_for_update(
        &mut self,
        identifier: &str,
    ) -> StoreResult<Option<RefreshRecord>> {
        Ok(self.working.refresh_records.get(identifier).cloned())
    }

    async fn revoke_refresh_record(
        &mut self,
        identifier: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        match self.working.refresh_records.get_mut(identifier) {
            Some(record) if record.revoked_at.is_none() => {
                record.revoked_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_refresh_records(
        &mut self,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut revoked = 0;
        for record in self.working.refresh_records.values_mut() {
            if record.account_id == account_id && record.revoked_at.is_none() {
                record.revoked_at = Some(at);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn provider_link(
        &mut self,
        provider: Provider,
        subject: &str,
    ) -> StoreResult<Option<ProviderLink>> {
        Ok(self
            .working
            .provider_links
            .get(&(provider, subject.to_string()))
            .cloned())
    }

    async fn upsert_provider_link(&mut self, link: &ProviderLink) -> StoreResult<()> {
        self.working
            .provider_links
            .entry((link.provider, link.subject.clone()))
            .and_modify(|existing| existing.email = link.email.clone())
            .or_insert_with(|| link.clone());
        Ok(())
    }

    async fn insert_single_use_token(&mut self, token: &SingleUseToken) -> StoreResult<()> {
        if self.working.single_use_tokens.contains_key(&token.token_hash) {
            return Err(StoreError::Conflict("single-use token hash collision".to_string()));
        }
        self.working
            .single_use_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn single_use_token_for_update(
        &mut self,
        token_hash: &str,
        purpose: TokenPurpose,
    ) -> StoreResult<Option<SingleUseToken>> {
        Ok(self
            .working
            .single_use_tokens
            .get(token_hash)
            .filter(|t| t.purpose == purpose)
            .cloned())
    }

    async fn mark_single_use_token_used(
        &mut self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        match self.working.single_use_tokens.get_mut(token_hash) {
            Some(token) if token.used_at.is_none() => {
                token.used_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn insert_audit_entry(
        &mut self,
        entry: &NewAuditEntry,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let id = self.working.audit_log.len() as i64 + 1;
        self.working.audit_log.push(AuditEntry {
            id,
            actor_id: entry.actor_id,
            action: entry.action,
            target_id: entry.target_id,
            metadata: entry.metadata.clone(),
            created_at: at,
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuditAction;

    #[tokio::test]
    async fn test_updates_on_missing_account_are_not_found() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let mut tx = store.begin(Isolation::default()).await.unwrap();

        assert!(matches!(
            tx.set_auth_method(42, AuthMethod::Provider(Provider::Google)).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            tx.set_password_hash(42, "$argon2id$x").await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            tx.set_email_verified(42, now).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            tx.set_suspension(42, None).await,
            Err(StoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_audit_entries_roll_back_with_their_transaction() {
        let store = MemoryStore::new();
        let entry = |action| NewAuditEntry {
            actor_id: 1,
            action,
            target_id: 2,
            metadata: serde_json::json!({}),
        };

        let mut tx = store.begin(Isolation::default()).await.unwrap();
        tx.insert_audit_entry(&entry(AuditAction::SuspendUser), Utc::now())
            .await
            .unwrap();
        drop(tx);
        assert_eq!(store.audit_entries(10, 0).await.unwrap().1, 0);

        let mut tx = store.begin(Isolation::default()).await.unwrap();
        for action in [AuditAction::SuspendUser, AuditAction::UnsuspendUser] {
            tx.insert_audit_entry(&entry(action), Utc::now()).await.unwrap();
        }
        tx.commit().await.unwrap();

        let (page, total) = store.audit_entries(1, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].action, AuditAction::UnsuspendUser);
        assert_eq!(page[0].id, 2);

        let (rest, _) = store.audit_entries(10, 1).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].action, AuditAction::SuspendUser);
    }
}
