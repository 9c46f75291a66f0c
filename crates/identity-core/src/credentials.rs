//! Credential signer
//!
//! Stateless creation and verification of access and refresh credentials.
//! Both are HS256 JWTs, signed with distinct keys so that compromise of one
//! key cannot forge the other kind. Verification never touches storage.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::Sha256;

use crate::config::AuthConfig;
use crate::error::{AuthError, CredentialError};
use crate::model::{Account, AccountId, Role};

type HmacSha256 = Hmac<Sha256>;

const ACCESS_TYPE: &str = "access";
const REFRESH_TYPE: &str = "refresh";

/// JWT Header for HS256
#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

impl Default for JwtHeader {
    fn default() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Claims carried by an access credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (account ID)
    pub sub: AccountId,
    pub role: Role,
    /// Session version at issuance
    pub sv: i64,
    pub token_type: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Claims carried by a refresh credential
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: AccountId,
    pub role: Role,
    pub sv: i64,
    /// Identifier of the backing refresh record
    pub jti: String,
    pub token_type: String,
    pub iat: i64,
    pub exp: i64,
}

trait TypedClaims {
    fn token_type(&self) -> &str;
    fn exp(&self) -> i64;
}

impl TypedClaims for AccessClaims {
    fn token_type(&self) -> &str {
        &self.token_type
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

impl TypedClaims for RefreshClaims {
    fn token_type(&self) -> &str {
        &self.token_type
    }
    fn exp(&self) -> i64 {
        self.exp
    }
}

/// A freshly signed credential and its expiry
#[derive(Debug, Clone)]
pub struct IssuedCredential {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies credentials with the configured keys and lifetimes
#[derive(Clone)]
pub struct CredentialSigner {
    access_key: Vec<u8>,
    refresh_key: Vec<u8>,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl CredentialSigner {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            access_key: config.access_key.as_bytes().to_vec(),
            refresh_key: config.refresh_key.as_bytes().to_vec(),
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Issue an access credential for the account's current session version
    pub fn issue_access(&self, account: &Account) -> Result<IssuedCredential, AuthError> {
        self.issue_access_at(account, Utc::now())
    }

    pub fn issue_access_at(
        &self,
        account: &Account,
        now: DateTime<Utc>,
    ) -> Result<IssuedCredential, AuthError> {
        let expires_at = now + self.access_ttl;
        let claims = AccessClaims {
            sub: account.id,
            role: account.role,
            sv: account.session_version,
            token_type: ACCESS_TYPE.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode_jwt(&claims, &self.access_key)?;
        Ok(IssuedCredential { token, expires_at })
    }

    /// Issue a refresh credential bound to a refresh record identifier.
    ///
    /// `expires_at` is the record's expiry, so the credential and the record
    /// lapse together.
    pub fn issue_refresh(
        &self,
        account: &Account,
        identifier: &str,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<IssuedCredential, AuthError> {
        let claims = RefreshClaims {
            sub: account.id,
            role: account.role,
            sv: account.session_version,
            jti: identifier.to_string(),
            token_type: REFRESH_TYPE.to_string(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let token = encode_jwt(&claims, &self.refresh_key)?;
        Ok(IssuedCredential { token, expires_at })
    }

    pub fn verify_access(&self, token: &str) -> Result<AccessClaims, CredentialError> {
        self.verify_access_at(token, Utc::now())
    }

    pub fn verify_access_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<AccessClaims, CredentialError> {
        verify(token, &self.access_key, ACCESS_TYPE, now)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims, CredentialError> {
        self.verify_refresh_at(token, Utc::now())
    }

    pub fn verify_refresh_at(
        &self,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<RefreshClaims, CredentialError> {
        verify(token, &self.refresh_key, REFRESH_TYPE, now)
    }
}

/// Check signature, type and expiry of a credential
fn verify<T: DeserializeOwned + TypedClaims>(
    token: &str,
    key: &[u8],
    expected_type: &str,
    now: DateTime<Utc>,
) -> Result<T, CredentialError> {
    let claims: T = decode_jwt(token, key)?;

    if claims.token_type() != expected_type {
        return Err(CredentialError::SignatureInvalid);
    }

    if claims.exp() <= now.timestamp() {
        return Err(CredentialError::Expired);
    }

    Ok(claims)
}

/// Encode claims to JWT using HS256
fn encode_jwt<T: Serialize>(claims: &T, key: &[u8]) -> Result<String, AuthError> {
    let header_json = serde_json::to_string(&JwtHeader::default())
        .map_err(|e| AuthError::Internal(format!("JWT header encoding: {}", e)))?;
    let header_b64 = URL_SAFE_NO_PAD.encode(header_json.as_bytes());

    let payload_json = serde_json::to_string(claims)
        .map_err(|e| AuthError::Internal(format!("JWT payload encoding: {}", e)))?;
    let payload_b64 = URL_SAFE_NO_PAD.encode(payload_json.as_bytes());

    let signing_input = format!("{}.{}", header_b64, payload_b64);

    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| AuthError::Internal(format!("HMAC error: {}", e)))?;
    mac.update(signing_input.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature_b64))
}

/// Decode a JWT after checking its HS256 signature.
///
/// Any structural problem is reported as `SignatureInvalid`; callers never
/// need to know which part was malformed.
fn decode_jwt<T: DeserializeOwned>(token: &str, key: &[u8]) -> Result<T, CredentialError> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(CredentialError::SignatureInvalid);
    };

    let signing_input = format!("{}.{}", header_b64, payload_b64);
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|_| CredentialError::SignatureInvalid)?;
    mac.update(signing_input.as_bytes());

    let signature = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| CredentialError::SignatureInvalid)?;
    mac.verify_slice(&signature)
        .map_err(|_| CredentialError::SignatureInvalid)?;

    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| CredentialError::SignatureInvalid)?;
    let header: JwtHeader =
        serde_json::from_slice(&header_bytes).map_err(|_| CredentialError::SignatureInvalid)?;
    if header.alg != "HS256" {
        return Err(CredentialError::SignatureInvalid);
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| CredentialError::SignatureInvalid)?;
    serde_json::from_slice(&payload_bytes).map_err(|_| CredentialError::SignatureInvalid)
}

/// Extract Bearer token from Authorization header
pub fn extract_bearer_token(auth_header: Option<&str>) -> Option<&str> {
    auth_header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuthMethod;
    use proptest::prelude::*;

    const ACCESS_SECRET: &str = "access-secret-key-at-least-32-bytes-long";
    const REFRESH_SECRET: &str = "refresh-secret-key-at-least-32-bytes-long";

    fn signer() -> CredentialSigner {
        CredentialSigner::new(&AuthConfig::with_keys(ACCESS_SECRET, REFRESH_SECRET))
    }

    fn account(session_version: i64) -> Account {
        Account {
            id: 42,
            email: Some("worker@example.com".to_string()),
            name: "Worker".to_string(),
            role: Role::Worker,
            password_hash: None,
            auth_method: AuthMethod::Local,
            session_version,
            is_active: true,
            suspended_at: None,
            email_verified_at: None,
            last_login_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_access_token_generation_and_validation() {
        let signer = signer();
        let issued = signer.issue_access(&account(3)).unwrap();

        let claims = signer.verify_access(&issued.token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.role, Role::Worker);
        assert_eq!(claims.sv, 3);
        assert_eq!(claims.exp, issued.expires_at.timestamp());
    }

    #[test]
    fn test_refresh_token_carries_identifier() {
        let signer = signer();
        let now = Utc::now();
        let issued = signer
            .issue_refresh(&account(1), "rec-123", now, now + Duration::days(30))
            .unwrap();

        let claims = signer.verify_refresh(&issued.token).unwrap();
        assert_eq!(claims.jti, "rec-123");
        assert_eq!(claims.sv, 1);
    }

    #[test]
    fn test_keys_are_not_interchangeable() {
        let signer = signer();
        let now = Utc::now();
        let access = signer.issue_access(&account(0)).unwrap();
        let refresh = signer
            .issue_refresh(&account(0), "rec", now, now + Duration::days(1))
            .unwrap();

        assert_eq!(
            signer.verify_refresh(&access.token).unwrap_err(),
            CredentialError::SignatureInvalid
        );
        assert_eq!(
            signer.verify_access(&refresh.token).unwrap_err(),
            CredentialError::SignatureInvalid
        );
    }

    #[test]
    fn test_expired_access_token() {
        let signer = signer();
        let issued_at = Utc::now() - Duration::hours(2);
        let issued = signer.issue_access_at(&account(0), issued_at).unwrap();

        assert_eq!(
            signer.verify_access(&issued.token).unwrap_err(),
            CredentialError::Expired
        );
    }

    #[test]
    fn test_tampered_payload_rejected() {
        let signer = signer();
        let issued = signer.issue_access(&account(0)).unwrap();
        let parts: Vec<&str> = issued.token.split('.').collect();

        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&serde_json::json!({
                "sub": 1, "role": "admin", "sv": 0, "token_type": "access",
                "iat": 0, "exp": i64::MAX
            }))
            .unwrap(),
        );
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);

        assert_eq!(
            signer.verify_access(&forged).unwrap_err(),
            CredentialError::SignatureInvalid
        );
    }

    #[test]
    fn test_jwt_format() {
        let issued = signer().issue_access(&account(0)).unwrap();

        let parts: Vec<&str> = issued.token.split('.').collect();
        assert_eq!(parts.len(), 3);

        let header_bytes = URL_SAFE_NO_PAD.decode(parts[0]).unwrap();
        let header: JwtHeader = serde_json::from_slice(&header_bytes).unwrap();
        assert_eq!(header.alg, "HS256");
        assert_eq!(header.typ, "JWT");
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(Some("Bearer abc123")), Some("abc123"));
        assert_eq!(extract_bearer_token(Some("Bearer ")), None);
        assert_eq!(extract_bearer_token(Some("abc123")), None);
        assert_eq!(extract_bearer_token(None), None);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn garbage_never_verifies(token in "[A-Za-z0-9._-]{0,200}") {
            prop_assert!(signer().verify_access(&token).is_err());
            prop_assert!(signer().verify_refresh(&token).is_err());
        }

        #[test]
        fn claims_survive_signing(id in 1i64..1_000_000, sv in 0i64..10_000) {
            let signer = signer();
            let mut acct = account(sv);
            acct.id = id;
            let issued = signer.issue_access(&acct).unwrap();
            let claims = signer.verify_access(&issued.token).unwrap();
            prop_assert_eq!(claims.sub, id);
            prop_assert_eq!(claims.sv, sv);
        }
    }
}
