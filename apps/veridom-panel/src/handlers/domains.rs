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
pub struct RegisterDomainForm {
    pub hostname: String,
    pub site_id: i64,
}

pub async fn register_domain(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(form): Json<RegisterDomainForm>,
) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    let hostname = form.hostname.trim().to_ascii_lowercase();
    if hostname.is_empty() || !hostname.contains('.') {
        return (StatusCode::UNPROCESSABLE_ENTITY, "invalid hostname").into_response();
    }

    match state.domains.get_by_hostname(&hostname).await {
        Ok(Some(_)) => {
            return (StatusCode::CONFLICT, "hostname already registered").into_response();
        }
        Ok(None) => {}
        Err(e) => {
            error!("Failed to look up hostname {}: {:#}", hostname, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match state.domains.register(&hostname, form.site_id).await {
        Ok(domain) => (StatusCode::CREATED, Json(domain)).into_response(),
        Err(e) => {
            error!("Failed to register domain {}: {:#}", hostname, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_domain(
    State(state): State<AppState>,
    Path(domain_id): Path<i64>,
    headers: HeaderMap,
) -> Response {
    if let Err(code) = super::authorize(&headers) {
        return code.into_response();
    }

    match state.domains.get(domain_id).await {
        Ok(Some(domain)) => Json(domain).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "domain not found").into_response(),
        Err(e) => {
            error!("Failed to fetch domain {}: {:#}", domain_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
