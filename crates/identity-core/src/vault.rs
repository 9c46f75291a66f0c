//! Single-use tokens for email verification and password reset
//!
//! Only the SHA-256 of a secret is persisted. Consumption locks the row,
//! classifies it, and marks it used in the same transaction, so a secret is
//! honoured at most once however many requests race on it.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{AuthError, AuthResult};
use crate::model::{AccountId, SingleUseToken, TokenPurpose};
use crate::sessions;
use crate::store::{IdentityStore, Isolation, StoreTx};

const SECRET_BYTES: usize = 32;

/// 32 bytes from the OS RNG, URL-safe base64 without padding
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Lowercase hex SHA-256, the only form that reaches storage
pub fn hash_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Persist a new token and return its plaintext secret
pub async fn issue_in(
    tx: &mut dyn StoreTx,
    account_id: AccountId,
    purpose: TokenPurpose,
    ttl: Duration,
    now: DateTime<Utc>,
) -> AuthResult<String> {
    let secret = generate_secret();
    let token = SingleUseToken {
        token_hash: hash_secret(&secret),
        purpose,
        account_id,
        created_at: now,
        expires_at: now + ttl,
        used_at: None,
    };
    tx.insert_single_use_token(&token).await?;
    debug!(account_id, purpose = purpose.as_str(), "Issued single-use token");
    Ok(secret)
}

/// Consume a secret inside the caller's transaction.
///
/// Password-reset tokens also invalidate every session of the owner.
pub async fn consume_in(
    tx: &mut dyn StoreTx,
    secret: &str,
    purpose: TokenPurpose,
    now: DateTime<Utc>,
) -> AuthResult<AccountId> {
    let token_hash = hash_secret(secret);

    let token = tx
        .single_use_token_for_update(&token_hash, purpose)
        .await?
        .ok_or(AuthError::TokenNotFound)?;
    if token.used_at.is_some() {
        return Err(AuthError::TokenAlreadyUsed);
    }
    if token.expires_at <= now {
        return Err(AuthError::TokenExpired);
    }
    if !tx.mark_single_use_token_used(&token_hash, now).await? {
        return Err(AuthError::TokenAlreadyUsed);
    }

    if purpose == TokenPurpose::PasswordReset {
        sessions::invalidate_in(tx, token.account_id, now).await?;
    }

    Ok(token.account_id)
}

/// Standalone vault, each call in its own transaction
#[derive(Clone)]
pub struct TokenVault {
    store: Arc<dyn IdentityStore>,
}

impl TokenVault {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    pub async fn issue(
        &self,
        account_id: AccountId,
        purpose: TokenPurpose,
        ttl: Duration,
    ) -> AuthResult<String> {
        let mut tx = self.store.begin(Isolation::default()).await?;
        let secret = issue_in(tx.as_mut(), account_id, purpose, ttl, Utc::now()).await?;
        tx.commit().await?;
        Ok(secret)
    }

    pub async fn consume(&self, secret: &str, purpose: TokenPurpose) -> AuthResult<AccountId> {
        let mut tx = self.store.begin(Isolation::default()).await?;
        let account_id = consume_in(tx.as_mut(), secret, purpose, Utc::now()).await?;
        tx.commit().await?;
        Ok(account_id)
    }
}
