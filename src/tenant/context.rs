use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use super::error::TenantError;
use super::id::TenantId;
use super::membership::{Role, TenantMembership};

/// Where the tenant identity for a request came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionSource {
    Header,
    Claim,
}

/// Per-request lifecycle. Moves strictly forward; any failure before
/// `Active` ends the request without ever installing a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    Unresolved,
    Resolved,
    Active,
    Cleared,
}

impl LifecyclePhase {
    /// Whether `self -> next` is a legal move
    pub fn can_advance_to(self, next: LifecyclePhase) -> bool {
        use LifecyclePhase::*;
        matches!(
            (self, next),
            (Unresolved, Resolved)
                | (Resolved, Active)
                | (Unresolved, Cleared)
                | (Resolved, Cleared)
                | (Active, Cleared)
                | (Cleared, Cleared)
        )
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecyclePhase::Unresolved => "unresolved",
            LifecyclePhase::Resolved => "resolved",
            LifecyclePhase::Active => "active",
            LifecyclePhase::Cleared => "cleared",
        };
        f.write_str(name)
    }
}

/// Output of the resolver: the tenant and which signal produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub tenant_id: TenantId,
    pub source: ResolutionSource,
}

/// Authenticated caller taken from the bearer token
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject: String,
    pub role: Option<Role>,
}

/// Tenant identity for exactly one request. Built once by the gate and
/// shared read-only for the rest of the request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestContext {
    tenant_id: TenantId,
    source: ResolutionSource,
    resolved_at: DateTime<Utc>,
    request_id: String,
    principal: Option<Principal>,
}

impl RequestContext {
    pub fn new(resolution: Resolution, request_id: impl Into<String>, principal: Option<Principal>) -> Self {
        Self {
            tenant_id: resolution.tenant_id,
            source: resolution.source,
            resolved_at: Utc::now(),
            request_id: request_id.into(),
            principal,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn source(&self) -> ResolutionSource {
        self.source
    }

    pub fn resolved_at(&self) -> DateTime<Utc> {
        self.resolved_at
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Membership of the calling principal in this request's tenant, if authenticated
    pub fn membership(&self) -> Option<TenantMembership> {
        let principal = self.principal.as_ref()?;
        Some(TenantMembership {
            principal: principal.subject.clone(),
            tenant_id: self.tenant_id.clone(),
            role: principal.role.unwrap_or(Role::Viewer),
        })
    }

    /// Fails unless an authenticated principal holds at least `required`
    pub fn require_role(&self, required: Role) -> Result<(), TenantError> {
        let membership = self.membership().ok_or(TenantError::AuthenticationRequired)?;
        membership.authorize(&self.tenant_id, required)
    }
}
