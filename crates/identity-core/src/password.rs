//! Password hashing using Argon2id, plus password and email input rules

use std::sync::OnceLock;

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::error::AuthError;

const MIN_PASSWORD_LEN: usize = 10;

const COMMON_FRAGMENTS: &[&str] = &["password", "123456", "123456789", "azerty", "qwerty"];

/// Hash a password using Argon2id, returning a PHC string
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AuthError::Internal(format!("Failed to hash password: {}", e)))
}

/// Verify a password against a stored PHC hash.
///
/// An unparseable hash verifies as `false`.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed_hash) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok(),
        Err(_) => false,
    }
}

/// Hash on the blocking pool; Argon2 is deliberately slow.
pub async fn hash_password_blocking(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| AuthError::Internal(format!("Password hashing task failed: {}", e)))?
}

pub async fn verify_password_blocking(password: String, hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| AuthError::Internal(format!("Password verification task failed: {}", e)))
}

/// Hash checked when an account is unknown or has no password, so every
/// login attempt costs one full Argon2 verification
fn decoy_hash() -> &'static str {
    static DECOY: OnceLock<String> = OnceLock::new();
    DECOY.get_or_init(|| hash_password("decoy-credential-never-matches").unwrap_or_default())
}

/// Verify against the stored hash, or against the decoy when there is none.
/// A missing hash never verifies.
pub async fn verify_stored_password(
    password: String,
    stored: Option<String>,
) -> Result<bool, AuthError> {
    match stored {
        Some(hash) => verify_password_blocking(password, hash).await,
        None => tokio::task::spawn_blocking(move || {
            verify_password(&password, decoy_hash());
            false
        })
        .await
        .map_err(|e| AuthError::Internal(format!("Password verification task failed: {}", e))),
    }
}

/// Validate password strength, collecting every issue found
pub fn validate_password_strength(password: &str) -> Result<(), Vec<String>> {
    let mut issues = Vec::new();

    if password.chars().count() < MIN_PASSWORD_LEN {
        issues.push(format!(
            "Password must be at least {} characters long",
            MIN_PASSWORD_LEN
        ));
    }
    if !password.chars().any(|c| c.is_lowercase()) {
        issues.push("Password must contain at least one lowercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_uppercase()) {
        issues.push("Password must contain at least one uppercase letter".to_string());
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        issues.push("Password must contain at least one number".to_string());
    }
    if !password
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace() && c != '_')
    {
        issues.push("Password must contain at least one special character".to_string());
    }
    if password.chars().any(char::is_whitespace) {
        issues.push("Password must not contain spaces".to_string());
    }

    let lowered = password.to_lowercase();
    if COMMON_FRAGMENTS.iter().any(|c| lowered.contains(c)) {
        issues.push("Password is too common".to_string());
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

/// Canonical form used for every email lookup and insert
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Validate email format (basic validation)
pub fn validate_email(email: &str) -> Result<(), String> {
    let email = normalize_email(email);

    if email.len() < 5 {
        return Err("Email is too short".to_string());
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err("Email must contain @".to_string());
    };

    if local.is_empty() {
        return Err("Email local part cannot be empty".to_string());
    }

    if domain.contains('@') {
        return Err("Invalid email format".to_string());
    }

    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err("Email domain must contain a dot".to_string());
    }

    Ok(())
}
