use axum::{
    extract::{Request, State},
    http::{header::InvalidHeaderName, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::{Claims, TokenVerifier};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::tenant::resolver::MAX_LOGGED_LEN;
use crate::tenant::{store, ClearGuard, Principal, RequestContext, TenantError, TenantResolver};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Everything the gate needs to admit or refuse a request
pub struct TenantGate {
    resolver: TenantResolver,
    verifier: TokenVerifier,
    audit: bool,
}

impl TenantGate {
    pub fn new(resolver: TenantResolver, verifier: TokenVerifier, audit: bool) -> Self {
        Self {
            resolver,
            verifier,
            audit,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, InvalidHeaderName> {
        Ok(Self::new(
            TenantResolver::new(&config.tenant.header_name, config.tenant.id_format)?,
            TokenVerifier::new(&config.security),
            config.security.enable_audit_logging,
        ))
    }

    /// Build the request's context from its headers, or say why not
    fn admit(&self, headers: &HeaderMap, request_id: &str) -> Result<RequestContext, Rejection> {
        let claims = self
            .verifier
            .verify_headers(headers)
            .map_err(|err| self.rejection(err, headers, None))?;

        let resolution = self
            .resolver
            .resolve(headers, claims.as_ref())
            .map_err(|err| self.rejection(err, headers, claims.as_ref()))?;

        store::mark_resolved().map_err(|err| self.rejection(err, headers, claims.as_ref()))?;

        let principal = claims.map(|c| Principal {
            subject: c.sub,
            role: c.role,
        });
        Ok(RequestContext::new(resolution, request_id, principal))
    }

    fn rejection(&self, error: TenantError, headers: &HeaderMap, claims: Option<&Claims>) -> Rejection {
        Rejection {
            attempted: self.resolver.attempted(headers, claims),
            error,
        }
    }
}

struct Rejection {
    error: TenantError,
    attempted: Option<String>,
}

/// First step of every protected request.
///
/// Opens a fresh context scope, resolves the tenant, installs the context
/// and only then runs the rest of the stack. A request that cannot be
/// resolved is answered here and never reaches a handler. The context is
/// cleared when the scope ends, however it ends.
pub async fn tenant_gate_middleware(
    State(gate): State<Arc<TenantGate>>,
    request: Request,
    next: Next,
) -> Response {
    store::scope(gate_request(gate, request, next)).await
}

async fn gate_request(gate: Arc<TenantGate>, request: Request, next: Next) -> Response {
    let _guard = ClearGuard::new();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|id| id.chars().take(MAX_LOGGED_LEN).collect::<String>())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let context = match gate.admit(request.headers(), &request_id) {
        Ok(context) => context,
        Err(Rejection { error, attempted }) => {
            let attempted = attempted.as_deref().unwrap_or("-");
            if error.is_defect() {
                tracing::error!(reason = error.code(), request_id = %request_id, attempted_tenant = attempted, "tenant gate failure");
            } else {
                tracing::warn!(reason = error.code(), request_id = %request_id, attempted_tenant = attempted, "request rejected by tenant gate");
            }
            store::clear();
            return ApiError::from(error).into_response();
        }
    };

    let context = match store::set(context) {
        Ok(context) => context,
        Err(error) => {
            tracing::error!(reason = error.code(), request_id = %request_id, "could not install tenant context");
            store::clear();
            return ApiError::from(error).into_response();
        }
    };

    if gate.audit {
        tracing::info!(
            tenant = %context.tenant_id(),
            source = ?context.source(),
            subject = context.principal().map(|p| p.subject.as_str()).unwrap_or("-"),
            request_id = %request_id,
            "tenant context admitted"
        );
    }

    next.run(request).await
}
