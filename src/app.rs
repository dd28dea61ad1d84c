use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::{sync::Arc, time::Duration};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::database::{TenantBackend, TenantRepository};
use crate::error::ApiError;
use crate::handlers::{protected, public};
use crate::middleware::{tenant_gate_middleware, TenantGate};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub repository: TenantRepository,
}

/// Assemble the full router for `config` on top of `backend`
pub fn build(config: &AppConfig, backend: Arc<dyn TenantBackend>) -> anyhow::Result<Router> {
    let gate = TenantGate::from_config(config)
        .with_context(|| format!("invalid tenant header name '{}'", config.tenant.header_name))?;
    let state = AppState {
        repository: TenantRepository::new(backend),
    };

    let mut app = Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        // Everything under /api runs behind the tenant gate
        .merge(protected_routes(Arc::new(gate)))
        .with_state(state)
        // Extractors carry their own 2 MB default; lift it to the configured size
        .layer(DefaultBodyLimit::max(config.api.max_request_size_bytes))
        .layer(RequestBodyLimitLayer::new(config.api.max_request_size_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(config.api.request_timeout_secs)))
        .layer(middleware::map_response(timeout_envelope));

    if config.api.enable_request_logging {
        app = app.layer(TraceLayer::new_for_http());
    }
    if config.security.enable_cors {
        app = app.layer(cors_layer(&config.security.cors_origins));
    }

    // Outermost, so the gate and the trace span both see the id
    Ok(app
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid)))
}

/// `TimeoutLayer` answers with a bare 408; give it the usual error body
async fn timeout_envelope(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT {
        return ApiError::RequestTimeout.into_response();
    }
    response
}

fn protected_routes(gate: Arc<TenantGate>) -> Router<AppState> {
    use protected::{auth, batch, data};

    Router::new()
        .route("/api/whoami", get(auth::session_whoami))
        .route("/api/data/:collection", get(data::schema_get).post(data::schema_post))
        .route(
            "/api/data/:collection/:id",
            get(data::record_get).put(data::record_put).delete(data::record_delete),
        )
        .route("/api/batch", post(batch::post))
        .layer(middleware::from_fn_with_state(gate, tenant_gate_middleware))
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Claims;
    use crate::database::MemoryBackend;
    use crate::tenant::{IdFormat, Role};
    use axum::body::Body;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SECRET: &str = "app-test-secret";

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn timeouts_answer_with_the_error_envelope() {
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "done"
                }),
            )
            .layer(TimeoutLayer::new(Duration::from_millis(20)))
            .layer(middleware::map_response(timeout_envelope));

        let request = axum::http::Request::builder().uri("/slow").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(
            json_body(response).await,
            json!({ "success": false, "error": "Request timed out", "code": "REQUEST_TIMEOUT" })
        );
    }

    #[tokio::test]
    async fn json_bodies_may_use_the_configured_size() {
        let mut config = AppConfig::development();
        config.tenant.id_format = IdFormat::Any;
        config.security.jwt_secret = SECRET.to_string();
        config.api.enable_request_logging = false;
        config.api.max_request_size_bytes = 4 * 1024 * 1024;
        let app = build(&config, Arc::new(MemoryBackend::new())).unwrap();

        let claims = Claims {
            sub: "user-1".into(),
            tenant_id: None,
            role: Some(Role::Member),
            exp: chrono::Utc::now().timestamp() + 600,
            iat: chrono::Utc::now().timestamp(),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();

        // Above axum's 2 MB extractor default, below the configured limit
        let payload = json!({ "data": { "text": "x".repeat(3 * 1024 * 1024) } }).to_string();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/api/data/notes")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", token))
            .header("x-tenant-id", "11")
            .body(Body::from(payload))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }
}
