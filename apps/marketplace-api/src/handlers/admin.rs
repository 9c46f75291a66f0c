//! Administrative session controls under `/admin/users/{id}` and the audit
//! log they write

use axum::{
    extract::{Path, Query, State},
    Json,
};
use identity_core::{AccountId, Pagination};

use crate::error::ApiResult;
use crate::extract::{CurrentUser, JsonBody};
use crate::models::{
    AdminAccountResponse, AuditLogQuery, AuditLogResponse, MessageResponse, SuspendRequest,
};
use crate::state::SharedState;

pub async fn suspend(
    State(state): State<SharedState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<AccountId>,
    body: Option<JsonBody<SuspendRequest>>,
) -> ApiResult<Json<AdminAccountResponse>> {
    let force_logout = body.map(|JsonBody(b)| b.force_logout).unwrap_or(false);
    let account = state.service.suspend(&actor, id, force_logout).await?;
    Ok(Json(AdminAccountResponse::from(&account)))
}

pub async fn unsuspend(
    State(state): State<SharedState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<AccountId>,
) -> ApiResult<Json<AdminAccountResponse>> {
    let account = state.service.unsuspend(&actor, id).await?;
    Ok(Json(AdminAccountResponse::from(&account)))
}

pub async fn revoke_sessions(
    State(state): State<SharedState>,
    CurrentUser(actor): CurrentUser,
    Path(id): Path<AccountId>,
) -> ApiResult<Json<MessageResponse>> {
    state.service.revoke_sessions(&actor, id).await?;
    Ok(Json(MessageResponse::new("Sessions revoked")))
}

pub async fn audit_logs(
    State(state): State<SharedState>,
    CurrentUser(actor): CurrentUser,
    Query(query): Query<AuditLogQuery>,
) -> ApiResult<Json<AuditLogResponse>> {
    let page = state
        .service
        .audit_log(&actor, Pagination::new(query.page, query.limit))
        .await?;
    Ok(Json(AuditLogResponse::from(&page)))
}
