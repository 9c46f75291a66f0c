//! Credential issuance and the refresh state machine
//!
//! A presented refresh credential moves through
//! `Presented -> SignatureChecked -> RecordFound -> AccountCurrent -> Accepted`
//! and falls out to `Rejected(reason)` at the first failed check. Every
//! rejection leaves storage untouched and is reported outwards as the same
//! `RefreshInvalid`; the reason is only logged.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::credentials::{CredentialSigner, IssuedCredential};
use crate::error::{AuthError, AuthResult, RefreshRejection};
use crate::model::{Account, ClientInfo};
use crate::refresh;
use crate::store::{IdentityStore, Isolation, StoreTx};

/// Access credential plus, when issued, a refresh credential
#[derive(Debug, Clone)]
pub struct CredentialPair {
    pub access: IssuedCredential,
    pub refresh: Option<IssuedCredential>,
}

/// Successful refresh: the account as of now and the new credentials
#[derive(Debug, Clone)]
pub struct Refreshed {
    pub account: Account,
    pub credentials: CredentialPair,
}

#[derive(Clone)]
pub struct RotationEngine {
    store: Arc<dyn IdentityStore>,
    signer: CredentialSigner,
    rotate: bool,
}

fn reject(reason: RefreshRejection) -> AuthError {
    warn!(reason = reason.as_str(), "Refresh rejected");
    AuthError::RefreshInvalid(reason)
}

impl RotationEngine {
    pub fn new(store: Arc<dyn IdentityStore>, signer: CredentialSigner, rotate: bool) -> Self {
        Self {
            store,
            signer,
            rotate,
        }
    }

    pub fn signer(&self) -> &CredentialSigner {
        &self.signer
    }

    /// Issue credentials inside the caller's transaction. The refresh record
    /// commits or rolls back with everything else the caller does.
    pub async fn issue_pair_in(
        &self,
        tx: &mut dyn StoreTx,
        account: &Account,
        client: &ClientInfo,
        include_refresh: bool,
        now: DateTime<Utc>,
    ) -> AuthResult<CredentialPair> {
        let access = self.signer.issue_access_at(account, now)?;
        let refresh = if include_refresh {
            Some(self.mint_refresh(tx, account, client, now).await?)
        } else {
            None
        };
        Ok(CredentialPair { access, refresh })
    }

    pub async fn issue_pair(
        &self,
        account: &Account,
        client: &ClientInfo,
        include_refresh: bool,
    ) -> AuthResult<CredentialPair> {
        let mut tx = self.store.begin(Isolation::default()).await?;
        let pair = self
            .issue_pair_in(tx.as_mut(), account, client, include_refresh, Utc::now())
            .await?;
        tx.commit().await?;
        Ok(pair)
    }

    async fn mint_refresh(
        &self,
        tx: &mut dyn StoreTx,
        account: &Account,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> AuthResult<IssuedCredential> {
        let ttl: Duration = self.signer.refresh_ttl();
        let record = refresh::insert(tx, account.id, client, ttl, now).await?;
        self.signer
            .issue_refresh(account, &record.identifier, record.issued_at, record.expires_at)
    }

    /// Exchange a refresh credential for new credentials
    pub async fn refresh(&self, presented: &str, client: &ClientInfo) -> AuthResult<Refreshed> {
        self.refresh_at(presented, client, Utc::now()).await
    }

    pub async fn refresh_at(
        &self,
        presented: &str,
        client: &ClientInfo,
        now: DateTime<Utc>,
    ) -> AuthResult<Refreshed> {
        // Presented -> SignatureChecked
        let claims = self.signer.verify_refresh_at(presented, now).map_err(|e| {
            debug!(error = %e, "Refresh credential failed verification");
            reject(RefreshRejection::Invalid)
        })?;

        let mut tx = self.store.begin(Isolation::default()).await?;

        // SignatureChecked -> RecordFound
        let record = match refresh::lookup(tx.as_mut(), &claims.jti).await? {
            Some(record) if record.account_id == claims.sub => record,
            _ => return Err(reject(RefreshRejection::NotFound)),
        };
        if record.revoked_at.is_some() {
            return Err(reject(RefreshRejection::Revoked));
        }
        if record.expires_at <= now {
            return Err(reject(RefreshRejection::Expired));
        }

        // RecordFound -> AccountCurrent
        let Some(account) = tx.account_by_id(claims.sub).await? else {
            // Orphaned record; retire it so it cannot be tried again
            refresh::revoke(tx.as_mut(), &record.identifier, now).await?;
            tx.commit().await?;
            return Err(reject(RefreshRejection::NotFound));
        };
        if claims.sv != account.session_version {
            return Err(reject(RefreshRejection::StaleSession));
        }
        if account.blocked_by_suspension() {
            return Err(reject(RefreshRejection::Suspended));
        }

        // AccountCurrent -> Accepted
        let access = self.signer.issue_access_at(&account, now)?;
        let refresh = if self.rotate {
            if !refresh::revoke(tx.as_mut(), &record.identifier, now).await? {
                return Err(reject(RefreshRejection::Revoked));
            }
            Some(self.mint_refresh(tx.as_mut(), &account, client, now).await?)
        } else {
            None
        };
        tx.commit().await?;

        info!(account_id = account.id, rotated = self.rotate, "Credentials refreshed");
        Ok(Refreshed {
            account,
            credentials: CredentialPair { access, refresh },
        })
    }

    /// Revoke the record behind a refresh credential.
    ///
    /// Returns whether a live record was revoked. An unverifiable credential
    /// is not an error here; there is simply nothing to revoke.
    pub async fn revoke_presented(&self, presented: &str) -> AuthResult<bool> {
        let claims = match self.signer.verify_refresh(presented) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Logout with unverifiable refresh credential");
                return Ok(false);
            }
        };

        let mut tx = self.store.begin(Isolation::default()).await?;
        let revoked = match refresh::lookup(tx.as_mut(), &claims.jti).await? {
            Some(record) if record.account_id == claims.sub => {
                refresh::revoke(tx.as_mut(), &record.identifier, Utc::now()).await?
            }
            _ => false,
        };
        tx.commit().await?;
        Ok(revoked)
    }
}
