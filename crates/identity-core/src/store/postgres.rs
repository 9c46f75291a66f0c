//! PostgreSQL identity store
//!
//! Row locks (`FOR UPDATE`) linearise refresh rotation and single-use token
//! consumption. Account resolution by email additionally takes a
//! transaction-scoped advisory lock on the email, which serialises callers
//! even before the account row exists.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgArguments, PgPool, PgPoolOptions};
use sqlx::query::Query;
use sqlx::{FromRow, Postgres, Transaction};

use super::{IdentityStore, Isolation, StoreTx};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    Account, AccountId, AuditEntry, AuthMethod, NewAccount, NewAuditEntry, Provider, ProviderLink,
    RefreshRecord, SingleUseToken, TokenPurpose,
};

const ACCOUNT_COLUMNS: &str = "id, email, name, role, password_hash, auth_method, \
     session_version, is_active, suspended_at, email_verified_at, last_login_at, created_at";

const MIGRATIONS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS accounts (
        id BIGSERIAL PRIMARY KEY,
        email TEXT UNIQUE,
        name TEXT NOT NULL DEFAULT '',
        role TEXT NOT NULL DEFAULT 'visitor',
        password_hash TEXT,
        auth_method TEXT NOT NULL DEFAULT 'local',
        session_version BIGINT NOT NULL DEFAULT 0,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        suspended_at TIMESTAMPTZ,
        email_verified_at TIMESTAMPTZ,
        last_login_at TIMESTAMPTZ,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS refresh_records (
        identifier TEXT PRIMARY KEY,
        account_id BIGINT NOT NULL REFERENCES accounts(id),
        issued_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        revoked_at TIMESTAMPTZ,
        user_agent TEXT,
        ip TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_refresh_records_live
        ON refresh_records(account_id) WHERE revoked_at IS NULL
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS provider_links (
        provider TEXT NOT NULL,
        subject TEXT NOT NULL,
        account_id BIGINT NOT NULL REFERENCES accounts(id),
        email TEXT,
        linked_at TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (provider, subject)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS single_use_tokens (
        token_hash TEXT PRIMARY KEY,
        purpose TEXT NOT NULL,
        account_id BIGINT NOT NULL REFERENCES accounts(id),
        created_at TIMESTAMPTZ NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL,
        used_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS admin_audit_logs (
        id BIGSERIAL PRIMARY KEY,
        actor_id BIGINT NOT NULL REFERENCES accounts(id),
        action TEXT NOT NULL,
        target_id BIGINT NOT NULL REFERENCES accounts(id),
        metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_admin_audit_logs_created
        ON admin_audit_logs(created_at DESC, id DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS rate_limit_counters (
        key TEXT PRIMARY KEY,
        window_start TIMESTAMPTZ NOT NULL,
        hits INTEGER NOT NULL
    )
    "#,
];

#[derive(Debug, FromRow)]
struct AccountRow {
    id: i64,
    email: Option<String>,
    name: String,
    role: String,
    password_hash: Option<String>,
    auth_method: String,
    session_version: i64,
    is_active: bool,
    suspended_at: Option<DateTime<Utc>>,
    email_verified_at: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Account {
            id: row.id,
            email: row.email,
            name: row.name,
            role: row.role.parse().map_err(StoreError::Backend)?,
            password_hash: row.password_hash,
            auth_method: row.auth_method.parse().map_err(StoreError::Backend)?,
            session_version: row.session_version,
            is_active: row.is_active,
            suspended_at: row.suspended_at,
            email_verified_at: row.email_verified_at,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RefreshRow {
    identifier: String,
    account_id: i64,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
    user_agent: Option<String>,
    ip: Option<String>,
}

impl From<RefreshRow> for RefreshRecord {
    fn from(row: RefreshRow) -> Self {
        RefreshRecord {
            identifier: row.identifier,
            account_id: row.account_id,
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            user_agent: row.user_agent,
            ip: row.ip,
        }
    }
}

#[derive(Debug, FromRow)]
struct ProviderLinkRow {
    provider: String,
    subject: String,
    account_id: i64,
    email: Option<String>,
    linked_at: DateTime<Utc>,
}

impl TryFrom<ProviderLinkRow> for ProviderLink {
    type Error = StoreError;

    fn try_from(row: ProviderLinkRow) -> Result<Self, Self::Error> {
        Ok(ProviderLink {
            provider: row.provider.parse().map_err(StoreError::Backend)?,
            subject: row.subject,
            account_id: row.account_id,
            email: row.email,
            linked_at: row.linked_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SingleUseRow {
    token_hash: String,
    purpose: String,
    account_id: i64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    used_at: Option<DateTime<Utc>>,
}

impl TryFrom<SingleUseRow> for SingleUseToken {
    type Error = StoreError;

    fn try_from(row: SingleUseRow) -> Result<Self, Self::Error> {
        Ok(SingleUseToken {
            token_hash: row.token_hash,
            purpose: row.purpose.parse().map_err(StoreError::Backend)?,
            account_id: row.account_id,
            created_at: row.created_at,
            expires_at: row.expires_at,
            used_at: row.used_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AuditRow {
    id: i64,
    actor_id: i64,
    action: String,
    target_id: i64,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = StoreError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: row.id,
            actor_id: row.actor_id,
            action: row.action.parse().map_err(StoreError::Backend)?,
            target_id: row.target_id,
            metadata: row.metadata,
            created_at: row.created_at,
        })
    }
}

/// Identity store backed by a PostgreSQL pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and bring the schema up to date
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        tracing::info!("Running identity schema migrations...");
        for statement in MIGRATIONS {
            sqlx::query(*statement).execute(&self.pool).await?;
        }
        tracing::info!("Migrations complete");
        Ok(())
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn begin(&self, isolation: Isolation) -> StoreResult<Box<dyn StoreTx>> {
        let mut tx = self.pool.begin().await?;
        if isolation == Isolation::Serializable {
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *tx)
                .await?;
        }
        Ok(Box::new(PgTx { tx }))
    }

    async fn account_by_id(&self, id: AccountId) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> =
            sqlx::query_as(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Account::try_from).transpose()
    }

    async fn account_by_email(&self, email: &str) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts WHERE email = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Account::try_from).transpose()
    }

    async fn audit_entries(
        &self,
        limit: i64,
        offset: i64,
    ) -> StoreResult<(Vec<AuditEntry>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_audit_logs")
            .fetch_one(&self.pool)
            .await?;
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, actor_id, action, target_id, metadata, created_at
            FROM admin_audit_logs
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let entries = rows
            .into_iter()
            .map(AuditEntry::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok((entries, total))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    /// Run an update that must touch exactly one account row
    async fn expect_one(&mut self, query: Query<'_, Postgres, PgArguments>) -> StoreResult<()> {
        let affected = query.execute(&mut *self.tx).await?.rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn account_by_id(&mut self, id: AccountId) -> StoreResult<Option<Account>> {
        let row: Option<AccountRow> =
            sqlx::query_as(&format!("SELECT {} FROM accounts WHERE id = $1", ACCOUNT_COLUMNS))
                .bind(id)
                .fetch_optional(&mut *self.tx)
                .await?;
        row.map(Account::try_from).transpose()
    }

    async fn account_by_email_for_update(
        &mut self,
        email: &str,
    ) -> StoreResult<Option<Account>> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(email)
            .execute(&mut *self.tx)
            .await?;

        let row: Option<AccountRow> = sqlx::query_as(&format!(
            "SELECT {} FROM accounts WHERE email = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(Account::try_from).transpose()
    }

    async fn insert_account(
        &mut self,
        account: NewAccount,
        now: DateTime<Utc>,
    ) -> StoreResult<Account> {
        let row: AccountRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO accounts (email, name, role, password_hash, auth_method, email_verified_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(&account.email)
        .bind(&account.name)
        .bind(account.role.as_str())
        .bind(&account.password_hash)
        .bind(account.auth_method.as_str())
        .bind(account.email_verified_at)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await?;
        Account::try_from(row)
    }

    async fn set_auth_method(&mut self, id: AccountId, method: AuthMethod) -> StoreResult<()> {
        self.expect_one(
            sqlx::query("UPDATE accounts SET auth_method = $1 WHERE id = $2")
                .bind(method.as_str())
                .bind(id),
        )
        .await
    }

    async fn set_email_verified(&mut self, id: AccountId, at: DateTime<Utc>) -> StoreResult<()> {
        self.expect_one(
            sqlx::query(
                "UPDATE accounts SET email_verified_at = COALESCE(email_verified_at, $1) WHERE id = $2",
            )
            .bind(at)
            .bind(id),
        )
        .await
    }

    async fn set_password_hash(&mut self, id: AccountId, hash: &str) -> StoreResult<()> {
        self.expect_one(
            sqlx::query("UPDATE accounts SET password_hash = $1 WHERE id = $2")
                .bind(hash)
                .bind(id),
        )
        .await
    }

    async fn set_last_login(&mut self, id: AccountId, at: DateTime<Utc>) -> StoreResult<()> {
        self.expect_one(
            sqlx::query("UPDATE accounts SET last_login_at = $1 WHERE id = $2")
                .bind(at)
                .bind(id),
        )
        .await
    }

    async fn increment_session_version(&mut self, id: AccountId) -> StoreResult<i64> {
        let version: Option<i64> = sqlx::query_scalar(
            "UPDATE accounts SET session_version = session_version + 1 WHERE id = $1 RETURNING session_version",
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        version.ok_or(StoreError::NotFound)
    }

    async fn set_suspension(
        &mut self,
        id: AccountId,
        suspended_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let query = match suspended_at {
            Some(at) => sqlx::query(
                "UPDATE accounts SET is_active = FALSE, suspended_at = $1 WHERE id = $2",
            )
            .bind(at)
            .bind(id),
            None => sqlx::query(
                "UPDATE accounts SET is_active = TRUE, suspended_at = NULL WHERE id = $1",
            )
            .bind(id),
        };
        self.expect_one(query).await
    }

    async fn insert_refresh_record(&mut self, record: &RefreshRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_records (identifier, account_id, issued_at, expires_at, user_agent, ip)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.identifier)
        .bind(record.account_id)
        .bind(record.issued_at)
        .bind(record.expires_at)
        .bind(&record.user_agent)
        .bind(&record.ip)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn refresh_record_for_update(
        &mut self,
        identifier: &str,
    ) -> StoreResult<Option<RefreshRecord>> {
        let row: Option<RefreshRow> = sqlx::query_as(
            r#"
            SELECT identifier, account_id, issued_at, expires_at, revoked_at, user_agent, ip
            FROM refresh_records
            WHERE identifier = $1
            FOR UPDATE
            "#,
        )
        .bind(identifier)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(RefreshRecord::from))
    }

    async fn revoke_refresh_record(
        &mut self,
        identifier: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let affected = sqlx::query(
            "UPDATE refresh_records SET revoked_at = $1 WHERE identifier = $2 AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(identifier)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn revoke_all_refresh_records(
        &mut self,
        account_id: AccountId,
        at: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let affected = sqlx::query(
            "UPDATE refresh_records SET revoked_at = $1 WHERE account_id = $2 AND revoked_at IS NULL",
        )
        .bind(at)
        .bind(account_id)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(affected)
    }

    async fn provider_link(
        &mut self,
        provider: Provider,
        subject: &str,
    ) -> StoreResult<Option<ProviderLink>> {
        let row: Option<ProviderLinkRow> = sqlx::query_as(
            r#"
            SELECT provider, subject, account_id, email, linked_at
            FROM provider_links
            WHERE provider = $1 AND subject = $2
            "#,
        )
        .bind(provider.as_str())
        .bind(subject)
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(ProviderLink::try_from).transpose()
    }

    async fn upsert_provider_link(&mut self, link: &ProviderLink) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO provider_links (provider, subject, account_id, email, linked_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (provider, subject) DO UPDATE SET email = EXCLUDED.email
            "#,
        )
        .bind(link.provider.as_str())
        .bind(&link.subject)
        .bind(link.account_id)
        .bind(&link.email)
        .bind(link.linked_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_single_use_token(&mut self, token: &SingleUseToken) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO single_use_tokens (token_hash, purpose, account_id, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.purpose.as_str())
        .bind(token.account_id)
        .bind(token.created_at)
        .bind(token.expires_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn single_use_token_for_update(
        &mut self,
        token_hash: &str,
        purpose: TokenPurpose,
    ) -> StoreResult<Option<SingleUseToken>> {
        let row: Option<SingleUseRow> = sqlx::query_as(
            r#"
            SELECT token_hash, purpose, account_id, created_at, expires_at, used_at
            FROM single_use_tokens
            WHERE token_hash = $1 AND purpose = $2
            FOR UPDATE
            "#,
        )
        .bind(token_hash)
        .bind(purpose.as_str())
        .fetch_optional(&mut *self.tx)
        .await?;
        row.map(SingleUseToken::try_from).transpose()
    }

    async fn mark_single_use_token_used(
        &mut self,
        token_hash: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let affected = sqlx::query(
            "UPDATE single_use_tokens SET used_at = $1 WHERE token_hash = $2 AND used_at IS NULL",
        )
        .bind(at)
        .bind(token_hash)
        .execute(&mut *self.tx)
        .await?
        .rows_affected();
        Ok(affected == 1)
    }

    async fn insert_audit_entry(
        &mut self,
        entry: &NewAuditEntry,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO admin_audit_logs (actor_id, action, target_id, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(entry.actor_id)
        .bind(entry.action.as_str())
        .bind(entry.target_id)
        .bind(&entry.metadata)
        .bind(at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
