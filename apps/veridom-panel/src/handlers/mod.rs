pub mod domains;
pub mod telemetry;
pub mod verification;

use axum::{
    Router,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};

use crate::AppState;

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Internal operational surface: a single shared token, fail-closed when it
/// is not configured.
pub(crate) fn authorize(headers: &HeaderMap) -> Result<(), StatusCode> {
    let token = extract_bearer_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;
    if token.trim().is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    match std::env::var("INTERNAL_API_TOKEN") {
        Ok(expected) if !expected.trim().is_empty() && expected.trim() == token => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/domains", post(domains::register_domain))
        .route("/api/domains/{id}", get(domains::get_domain))
        .route(
            "/api/domains/{id}/verification",
            post(verification::start)
                .get(verification::status)
                .delete(verification::cancel),
        )
        .route("/api/verification/sweep", post(verification::sweep))
        .route("/api/domains/{id}/failures", get(telemetry::failures))
        .route("/api/domains/{id}/events", get(telemetry::domain_events))
        .route(
            "/api/domains/{id}/events/resolve-all",
            post(telemetry::resolve_all),
        )
        .route("/api/events/{id}/resolve", post(telemetry::resolve))
        .route("/api/telemetry/stats", get(telemetry::stats))
}
