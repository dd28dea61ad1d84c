use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::app::AppState;

/// GET / - service info
pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "tenant-gate",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Tenant-scoped record API",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "whoami": "/api/whoami (tenant)",
                "data": "/api/data/:collection[/:id] (tenant)",
                "batch": "/api/batch (tenant, member)",
            }
        }
    }))
}

/// GET /health - liveness plus storage reachability
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match state.repository.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "up"
                }
            })),
        ),
        Err(e) => {
            tracing::warn!("Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "database": "down"
                    }
                })),
            )
        }
    }
}
