//! Administrative account controls

mod common;

use common::*;
use identity_core::model::AuditAction;
use identity_core::service::Pagination;
use identity_core::{
    AuthError, AuthenticatedUser, ClientInfo, IdentityService, IdentityStore, MemoryStore, Role,
};
use pretty_assertions::assert_eq;
use serde_json::json;

async fn admin(service: &IdentityService, store: &MemoryStore) -> AuthenticatedUser {
    register(service, "admin@example.com").await;
    let account = store
        .account_by_email("admin@example.com")
        .await
        .unwrap()
        .unwrap();
    store.set_role(account.id, Role::Admin).await.unwrap();

    let signed_in = login(service, "admin@example.com", &ClientInfo::default()).await;
    let header = format!("Bearer {}", signed_in.credentials.access.token);
    service.authenticate(Some(&header)).await.unwrap()
}

async fn account_id(store: &MemoryStore, email: &str) -> i64 {
    store.account_by_email(email).await.unwrap().unwrap().id
}

#[tokio::test]
async fn test_suspension_with_forced_logout() {
    let (store, service) = service();
    let admin = admin(&service, &store).await;
    register(&service, "worker@example.com").await;
    let worker = login(&service, "worker@example.com", &ClientInfo::default()).await;
    let header = format!("Bearer {}", worker.credentials.access.token);

    let suspended = service.suspend(&admin, worker.account.id, true).await.unwrap();
    assert!(suspended.is_suspended());

    assert!(matches!(
        service.authenticate(Some(&header)).await,
        Err(AuthError::StaleSession)
    ));
    assert!(matches!(
        service
            .login("worker@example.com", PASSWORD, &ClientInfo::default())
            .await,
        Err(AuthError::Suspended)
    ));
    assert!(matches!(
        service
            .refresh(&refresh_token(&worker), &ClientInfo::default())
            .await,
        Err(AuthError::RefreshInvalid(_))
    ));

    service.unsuspend(&admin, worker.account.id).await.unwrap();
    login(&service, "worker@example.com", &ClientInfo::default()).await;
}

#[tokio::test]
async fn test_suspension_without_logout_still_blocks_requests() {
    let (store, service) = service();
    let admin = admin(&service, &store).await;
    register(&service, "company@example.com").await;
    let company = login(&service, "company@example.com", &ClientInfo::default()).await;
    let header = format!("Bearer {}", company.credentials.access.token);

    service.suspend(&admin, company.account.id, false).await.unwrap();
    assert!(matches!(
        service.authenticate(Some(&header)).await,
        Err(AuthError::Suspended)
    ));

    service.unsuspend(&admin, company.account.id).await.unwrap();
    assert!(service.authenticate(Some(&header)).await.is_ok());
}

#[tokio::test]
async fn test_revoke_sessions() {
    let (store, service) = service();
    let admin = admin(&service, &store).await;
    register(&service, "target@example.com").await;
    let target = login(&service, "target@example.com", &ClientInfo::default()).await;

    let outcome = service.revoke_sessions(&admin, target.account.id).await.unwrap();
    assert_eq!(outcome.session_version, 1);
    assert_eq!(outcome.revoked_refresh, 2);

    let refreshed = service
        .refresh(&refresh_token(&target), &ClientInfo::default())
        .await;
    assert!(matches!(refreshed, Err(AuthError::RefreshInvalid(_))));
}

#[tokio::test]
async fn test_admin_only_and_admin_targets_refused() {
    let (store, service) = service();
    let admin = admin(&service, &store).await;
    register(&service, "plain@example.com").await;
    let plain_id = account_id(&store, "plain@example.com").await;

    let signed_in = login(&service, "plain@example.com", &ClientInfo::default()).await;
    let header = format!("Bearer {}", signed_in.credentials.access.token);
    let plain = service.authenticate(Some(&header)).await.unwrap();

    assert!(matches!(
        service.suspend(&plain, admin.id, false).await,
        Err(AuthError::Forbidden(_))
    ));
    assert!(matches!(
        service.suspend(&admin, admin.id, true).await,
        Err(AuthError::Forbidden(_))
    ));
    assert!(matches!(
        service.unsuspend(&admin, 9_999).await,
        Err(AuthError::AccountNotFound)
    ));
    assert!(service.suspend(&admin, plain_id, false).await.is_ok());
}

#[tokio::test]
async fn test_suspended_admin_is_not_locked_out() {
    let (store, service) = service();
    let admin = admin(&service, &store).await;

    let mut tx = store.begin(identity_core::Isolation::default()).await.unwrap();
    tx.set_suspension(admin.id, Some(chrono::Utc::now()))
        .await
        .unwrap();
    tx.commit().await.unwrap();

    login(&service, "admin@example.com", &ClientInfo::default()).await;
}

#[tokio::test]
async fn test_admin_actions_are_audited() {
    let (store, service) = service();
    let admin = admin(&service, &store).await;
    register(&service, "audited@example.com").await;
    let target = account_id(&store, "audited@example.com").await;

    service.suspend(&admin, target, true).await.unwrap();
    service.unsuspend(&admin, target).await.unwrap();
    service.revoke_sessions(&admin, target).await.unwrap();
    // Refused actions leave no trace
    assert!(service.suspend(&admin, admin.id, false).await.is_err());
    assert!(service.unsuspend(&admin, 9_999).await.is_err());

    let page = service
        .audit_log(&admin, Pagination::new(None, None))
        .await
        .unwrap();
    assert_eq!(page.total, 3);
    let actions: Vec<AuditAction> = page.entries.iter().map(|e| e.action).collect();
    assert_eq!(
        actions,
        vec![
            AuditAction::RevokeSessions,
            AuditAction::UnsuspendUser,
            AuditAction::SuspendUser
        ]
    );
    assert!(page
        .entries
        .iter()
        .all(|e| e.actor_id == admin.id && e.target_id == target));
    assert_eq!(page.entries[2].metadata, json!({ "force_logout": true }));

    let second = service
        .audit_log(&admin, Pagination::new(Some(2), Some(5)))
        .await
        .unwrap();
    assert!(second.entries.is_empty());
    assert_eq!(second.total, 3);
}

#[tokio::test]
async fn test_audit_log_is_admin_only() {
    let (_store, service) = service();
    register(&service, "curious@example.com").await;
    let signed_in = login(&service, "curious@example.com", &ClientInfo::default()).await;
    let header = format!("Bearer {}", signed_in.credentials.access.token);
    let curious = service.authenticate(Some(&header)).await.unwrap();

    assert!(matches!(
        service
            .audit_log(&curious, Pagination::new(None, None))
            .await,
        Err(AuthError::Forbidden(_))
    ));
}
