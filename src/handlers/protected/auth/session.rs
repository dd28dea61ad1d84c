use serde::Serialize;

use crate::middleware::{ApiResponse, ApiResult, CurrentTenant};
use crate::tenant::{RequestContext, Role};

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    #[serde(flatten)]
    pub context: RequestContext,
    pub role: Option<Role>,
}

/// GET /api/whoami - the tenant context this request runs under
///
/// ```json
/// {
///   "success": true,
///   "data": {
///     "tenant_id": "42",
///     "source": "claim",
///     "resolved_at": "2026-01-01T00:00:00Z",
///     "request_id": "…",
///     "principal": { "subject": "user-1", "role": "member" },
///     "role": "member"
///   }
/// }
/// ```
pub async fn whoami(tenant: CurrentTenant) -> ApiResult<WhoAmI> {
    let role = tenant.membership().map(|m| m.role);
    Ok(ApiResponse::success(WhoAmI {
        context: (*tenant.0).clone(),
        role,
    }))
}
