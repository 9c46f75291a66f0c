#![allow(dead_code)]

use std::sync::Arc;

use identity_core::service::{Registration, SignedIn};
use identity_core::{AuthConfig, ClientInfo, IdentityService, MemoryStore, Role};

pub const PASSWORD: &str = "Marketplace#2024";

pub fn config() -> AuthConfig {
    AuthConfig::with_keys(
        "integration-access-key-0123456789abcdef",
        "integration-refresh-key-0123456789abcdef",
    )
}

pub fn service_with(config: AuthConfig) -> (MemoryStore, IdentityService) {
    let store = MemoryStore::new();
    let service = IdentityService::new(Arc::new(store.clone()), config);
    (store, service)
}

pub fn service() -> (MemoryStore, IdentityService) {
    service_with(config())
}

pub fn device(name: &str) -> ClientInfo {
    ClientInfo {
        user_agent: Some(name.to_string()),
        ip: Some("127.0.0.1".to_string()),
    }
}

pub async fn register(service: &IdentityService, email: &str) -> String {
    service
        .register(
            Registration {
                email: email.to_string(),
                password: PASSWORD.to_string(),
                name: Some("Test User".to_string()),
                role: Some(Role::Worker),
            },
            &ClientInfo::default(),
        )
        .await
        .expect("registration should succeed")
        .verification_secret
}

pub async fn login(service: &IdentityService, email: &str, client: &ClientInfo) -> SignedIn {
    service
        .login(email, PASSWORD, client)
        .await
        .expect("login should succeed")
}

pub fn refresh_token(signed_in: &SignedIn) -> String {
    signed_in
        .credentials
        .refresh
        .as_ref()
        .expect("login issues a refresh credential")
        .token
        .clone()
}
