use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness check. Reports whether a provider credential is present but
/// never fails on its absence.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "dentai-service",
            "version": env!("CARGO_PKG_VERSION"),
            "provider": state.gateway.provider_name(),
            "credential_configured": state.config.google.is_configured(),
            "workspaces": state.workspaces.len(),
        })),
    )
}

/// Readiness check: the generative provider must answer. Failures are
/// reported by kind only; provider messages stay in the logs.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.gateway.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "ready" }))),
        Err(e) => {
            tracing::warn!(error = %e, kind = e.kind(), "Provider health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "error": e.kind()
                })),
            )
        }
    }
}
