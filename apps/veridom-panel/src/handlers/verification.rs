use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::AppState;
use crate::services::scheduler::StartError;

pub async fn start(
    State(state): State<AppState>,
    Path(domain_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.scheduler.start_attempt(domain_id).await {
        Ok(attempt) => (StatusCode::CREATED, Json(attempt)).into_response(),
        Err(StartError::AlreadyInProgress(_)) => (
            StatusCode::CONFLICT,
            "verification already in progress for this domain",
        )
            .into_response(),
        Err(StartError::DomainNotFound(_)) => {
            (StatusCode::NOT_FOUND, "domain not found").into_response()
        }
        Err(StartError::Store(e)) => {
            error!("Failed to start verification for domain {}: {:#}", domain_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn status(
    State(state): State<AppState>,
    Path(domain_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.scheduler.get_status(domain_id).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            error!("Failed to read verification status for domain {}: {:#}", domain_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(domain_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.scheduler.cancel(domain_id).await {
        Ok(cancelled) => Json(serde_json::json!({ "cancelled": cancelled })).into_response(),
        Err(e) => {
            error!("Failed to cancel verification for domain {}: {:#}", domain_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn sweep(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.scheduler.process_all_due().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!("Manual sweep failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
