use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe; never touches the upstream provider.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "image-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe: the provider must accept our credentials.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.provider.health_check().await {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "provider": state.provider.name()
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Provider readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "provider": state.provider.name(),
                    "error": e.to_string()
                })),
            )
        }
    }
}
