use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Liveness
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "marketplace-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: storage must answer
pub async fn ready(State(state): State<SharedState>) -> ApiResult<Json<Value>> {
    state
        .service
        .store()
        .ping()
        .await
        .map_err(|e| ApiError::NotReady(e.to_string()))?;
    Ok(Json(json!({ "status": "ready" })))
}
