use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::error;

use crate::AppState;

#[derive(Deserialize)]
pub struct ResolveForm {
    pub actor: String,
}

pub async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.ledger.stats().await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            error!("Failed to compute telemetry stats: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn failures(
    State(state): State<AppState>,
    Path(domain_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.ledger.summarize_failures(domain_id).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => {
            error!("Failed to summarize failures for domain {}: {:#}", domain_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn domain_events(
    State(state): State<AppState>,
    Path(domain_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.ledger.domain_events(domain_id).await {
        Ok(events) => Json(events).into_response(),
        Err(e) => {
            error!("Failed to fetch events for domain {}: {:#}", domain_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn resolve(
    State(state): State<AppState>,
    Path(event_id): Path<i64>,
    headers: HeaderMap,
    Json(form): Json<ResolveForm>,
) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.ledger.resolve(event_id, &form.actor).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            error!("Failed to resolve event {}: {:#}", event_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn resolve_all(
    State(state): State<AppState>,
    Path(domain_id): Path<i64>,
    headers: HeaderMap,
    Json(form): Json<ResolveForm>,
) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.ledger.resolve_all(domain_id, &form.actor).await {
        Ok(resolved) => Json(serde_json::json!({ "resolved": resolved })).into_response(),
        Err(e) => {
            error!("Failed to resolve events for domain {}: {:#}", domain_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
