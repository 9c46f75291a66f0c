//! Flows against a real PostgreSQL. Skipped unless `TEST_DATABASE_URL` is set.

mod common;

use std::sync::Arc;

use common::*;
use identity_core::linker::ProviderIdentity;
use identity_core::service::{Pagination, Registration};
use identity_core::{
    AuditAction, AuthError, AuthMethod, ClientInfo, IdentityService, IdentityStore, Isolation, PgRateLimiter,
    PgStore, Provider, RateLimiter, Role, StoreError,
};

async fn pg_service() -> Option<(PgStore, IdentityService)> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 10).await.expect("connect to test database");
    let service = IdentityService::new(Arc::new(store.clone()), config());
    Some((store, service))
}

fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.com", prefix, uuid::Uuid::new_v4().simple())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_rotation_race() {
    let Some((_store, service)) = pg_service().await else {
        return;
    };
    let email = unique_email("race");
    service
        .register(
            Registration {
                email: email.clone(),
                password: PASSWORD.to_string(),
                name: None,
                role: Some(Role::Company),
            },
            &ClientInfo::default(),
        )
        .await
        .unwrap();
    let signed_in = login(&service, &email, &ClientInfo::default()).await;
    let token = refresh_token(&signed_in);

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let service = service.clone();
            let token = token.clone();
            tokio::spawn(async move { service.refresh(&token, &ClientInfo::default()).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pg_concurrent_oauth_first_login() {
    let Some((_store, service)) = pg_service().await else {
        return;
    };
    let identity = ProviderIdentity {
        provider: Provider::Google,
        subject: uuid::Uuid::new_v4().to_string(),
        email: Some(unique_email("oauth")),
        name: None,
        email_verified: true,
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let service = service.clone();
            let identity = identity.clone();
            tokio::spawn(async move { service.oauth_login(&identity, &ClientInfo::default()).await })
        })
        .collect();

    let mut ids = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(signed_in) => ids.push(signed_in.account.id),
            Err(AuthError::DuplicateAccountConflict) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }
    assert!(!ids.is_empty());
    assert!(ids.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn test_pg_verification_single_use() {
    let Some((_store, service)) = pg_service().await else {
        return;
    };
    let secret = register(&service, &unique_email("verify")).await;
    service.verify_email(&secret).await.unwrap();
    assert!(matches!(
        service.verify_email(&secret).await,
        Err(AuthError::TokenAlreadyUsed)
    ));
}

#[tokio::test]
async fn test_pg_rate_limiter_window() {
    let Some((store, _service)) = pg_service().await else {
        return;
    };
    let limiter =
        PgRateLimiter::new(store.pool().clone(), 2, std::time::Duration::from_secs(60)).unwrap();
    let key = format!("login:{}", uuid::Uuid::new_v4());

    assert!(limiter.allow(&key).await.unwrap());
    assert!(limiter.allow(&key).await.unwrap());
    assert!(!limiter.allow(&key).await.unwrap());
}

#[tokio::test]
async fn test_pg_updates_on_missing_account_are_not_found() {
    let Some((store, _service)) = pg_service().await else {
        return;
    };
    let missing = i64::MAX;
    let now = chrono::Utc::now();
    let mut tx = store.begin(Isolation::default()).await.unwrap();

    assert!(matches!(
        tx.set_auth_method(missing, AuthMethod::Provider(Provider::Google)).await,
        Err(StoreError::NotFound)
    ));
    assert!(matches!(
        tx.set_password_hash(missing, "$argon2id$x").await,
        Err(StoreError::NotFound)
    ));
    assert!(matches!(
        tx.set_email_verified(missing, now).await,
        Err(StoreError::NotFound)
    ));
    assert!(matches!(
        tx.set_suspension(missing, Some(now)).await,
        Err(StoreError::NotFound)
    ));
    assert!(matches!(
        tx.set_suspension(missing, None).await,
        Err(StoreError::NotFound)
    ));
}

#[tokio::test]
async fn test_pg_suspension_is_audited() {
    let Some((store, service)) = pg_service().await else {
        return;
    };
    let admin_email = unique_email("admin");
    register(&service, &admin_email).await;
    let admin_id = store.account_by_email(&admin_email).await.unwrap().unwrap().id;
    sqlx::query("UPDATE accounts SET role = 'admin' WHERE id = $1")
        .bind(admin_id)
        .execute(store.pool())
        .await
        .unwrap();
    let signed_in = login(&service, &admin_email, &ClientInfo::default()).await;
    let header = format!("Bearer {}", signed_in.credentials.access.token);
    let admin = service.authenticate(Some(&header)).await.unwrap();

    let target_email = unique_email("target");
    register(&service, &target_email).await;
    let target = store.account_by_email(&target_email).await.unwrap().unwrap().id;
    service.suspend(&admin, target, true).await.unwrap();

    let page = service
        .audit_log(&admin, Pagination::new(None, Some(50)))
        .await
        .unwrap();
    let entry = page
        .entries
        .iter()
        .find(|e| e.target_id == target)
        .expect("suspension recorded");
    assert_eq!(entry.action, AuditAction::SuspendUser);
    assert_eq!(entry.actor_id, admin_id);
    assert_eq!(entry.metadata["force_logout"], true);
}
