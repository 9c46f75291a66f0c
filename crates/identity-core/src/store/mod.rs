//! Storage abstraction for identity records
//!
//! All mutation goes through a [`StoreTx`]. A transaction that is dropped
//! without [`StoreTx::commit`] is rolled back, so every early return, `?`
//! and cancelled future leaves storage untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::model::{
    Account, AccountId, AuditEntry, AuthMethod, NewAccount, NewAuditEntry, Provider, ProviderLink,
    RefreshRecord, SingleUseToken, TokenPurpose,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Isolation requested when opening a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Isolation {
    #[default]
    ReadCommitted,
    Serializable,
}

/// Handle to the identity tables
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Open a scoped transaction
    async fn begin(&self, isolation: Isolation) -> StoreResult<Box<dyn StoreTx>>;

    /// Non-transactional account read for the per-request guard
    async fn account_by_id(&self, id: AccountId) -> StoreResult<Option<Account>>;

    /// Non-locking read by normalised email
    async fn account_by_email(&self, email: &str) -> StoreResult<Option<Account>>;

    /// One page of the admin audit log, newest first, with the total count
    async fn audit_entries(&self, limit: i64, offset: i64)
        -> StoreResult<(Vec<AuditEntry>, i64)>;

    /// Cheap liveness check
    async fn ping(&self) -> StoreResult<()>;
}

/// Operations available inside one transaction
#[async_trait]
pub trait StoreTx: Send {
    // Accounts

    async fn account_by_id(&mut self, id: AccountId) -> StoreResult<Option<Account>>;

    /// Look up by normalised email, holding a row lock until the transaction
    /// ends. Also serialises concurrent callers for an email that has no row
    /// yet.
    async fn account_by_email_for_update(&mut self, email: &str)
        -> StoreResult<Option<Account>>;

    /// Insert an account. A taken email yields `StoreError::Conflict`.
    async fn insert_account(&mut self, account: NewAccount, now: DateTime<Utc>)
        -> StoreResult<Account>;

    async fn set_auth_method(&mut self, id: AccountId, method: AuthMethod) -> StoreResult<()>;

    async fn set_email_verified(&mut self, id: AccountId, at: DateTime<Utc>) -> StoreResult<()>;

    async fn set_password_hash(&mut self, id: AccountId, hash: &str) -> StoreResult<()>;

    async fn set_last_login(&mut self, id: AccountId, at: DateTime<Utc>) -> StoreResult<()>;

    /// Atomically add one to the session version, returning the new value
    async fn increment_session_version(&mut self, id: AccountId) -> StoreResult<i64>;

    /// Suspend (`Some(at)`) or reinstate (`None`) an account
    async fn set_suspension(
        &mut self,
        id: AccountId,
        suspended_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    // Refresh records

    async fn insert_refresh_record(&mut self, record: &RefreshRecord) -> StoreResult<()>;

    /// Look up by identifier, holding a row lock until the transaction ends
    async fn refresh_record_for_update(
        &mut self,
        identifier: &str,
    ) -> StoreResult<Option<RefreshRecord>>;

    /// Set `revoked_at` if it is still unset. Returns whether this call did it.
    async fn revoke_refresh_record(
        &mut self,
        identifier: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Revoke every live refresh record of an account, returning how many
    async fn revoke_all_refresh_records(
        &mut self,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> StoreResult<u64>;

    // Provider links

    async fn provider_link(
        &mut self,
        provider: Provider,
        subject: &str,
    ) -> StoreResult<Option<ProviderLink>>;

    /// Insert the link, or refresh its stored email when it already exists
    async fn upsert_provider_link(&mut self, link: &ProviderLink) -> StoreResult<()>;

    // Single-use tokens

    async fn insert_single_use_token(&mut self, token: &SingleUseToken) -> StoreResult<()>;

    /// Look up by hash and purpose, holding a row lock until the transaction
    /// ends
    async fn single_use_token_for_update(
        &mut self,
        token_hash: &str,
        purpose: TokenPurpose,
    ) -> StoreResult<Option<SingleUseToken>>;

    /// Set `used_at` if it is still unset. Returns whether this call did it.
    async fn mark_single_use_token_used(
        &mut self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    // Audit log

    async fn insert_audit_entry(
        &mut self,
        entry: &NewAuditEntry,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Make the transaction's writes visible
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
