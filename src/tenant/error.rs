use thiserror::Error;
use uuid::Uuid;

use super::context::LifecyclePhase;
use super::membership::Role;
use crate::database::DatabaseError;

/// Every way tenant resolution or enforcement can refuse an operation.
/// All of them are fail-closed and none of them are retryable.
#[derive(Debug, Error)]
pub enum TenantError {
    #[error("No tenant could be determined for this request")]
    MissingTenantContext,

    #[error("Token tenant '{claim}' does not match requested tenant '{header}'")]
    TenantMismatch { header: String, claim: String },

    #[error("Invalid tenant identifier: {0}")]
    InvalidTenantIdentifier(String),

    #[error("Invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("No active tenant context")]
    NoActiveContext,

    #[error("A tenant context is already active for this request")]
    ContextAlreadyActive,

    #[error("Illegal request lifecycle transition {from} -> {to}")]
    InvalidLifecycle { from: LifecyclePhase, to: LifecyclePhase },

    #[error("Tenant context store is not available outside a request scope")]
    ContextStoreUnavailable,

    #[error("Record {collection}/{id} belongs to a different tenant")]
    CrossTenantViolation { collection: String, id: Uuid },

    #[error("Referenced record {collection}/{id} does not exist")]
    ReferenceNotFound { collection: String, id: Uuid },

    #[error("Record {collection}/{id} is still referenced by other records")]
    ReferenceInUse { collection: String, id: Uuid },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Record {collection}/{id} not found")]
    RecordNotFound { collection: String, id: Uuid },

    #[error("This operation requires an authenticated principal")]
    AuthenticationRequired,

    #[error("Role '{actual}' is below the required role '{required}'")]
    InsufficientRole { required: Role, actual: Role },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl TenantError {
    /// Machine-readable code returned to clients
    pub fn code(&self) -> &'static str {
        match self {
            TenantError::MissingTenantContext => "MISSING_TENANT_CONTEXT",
            TenantError::TenantMismatch { .. } => "TENANT_MISMATCH",
            TenantError::InvalidTenantIdentifier(_) => "INVALID_TENANT_IDENTIFIER",
            TenantError::InvalidToken(_) => "INVALID_TOKEN",
            TenantError::CrossTenantViolation { .. } => "CROSS_TENANT_VIOLATION",
            TenantError::ReferenceNotFound { .. } => "REFERENCE_NOT_FOUND",
            TenantError::ReferenceInUse { .. } => "REFERENCE_IN_USE",
            TenantError::InvalidRecord(_) => "INVALID_RECORD",
            TenantError::RecordNotFound { .. } => "RECORD_NOT_FOUND",
            TenantError::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            TenantError::InsufficientRole { .. } => "INSUFFICIENT_ROLE",
            TenantError::NoActiveContext
            | TenantError::ContextAlreadyActive
            | TenantError::InvalidLifecycle { .. }
            | TenantError::ContextStoreUnavailable => "INTERNAL_SERVER_ERROR",
            TenantError::Database(_) => "DATABASE_ERROR",
        }
    }

    /// HTTP status classification
    pub fn status_code(&self) -> u16 {
        match self {
            TenantError::MissingTenantContext => 401,
            TenantError::InvalidToken(_) => 401,
            TenantError::AuthenticationRequired => 401,
            TenantError::TenantMismatch { .. } => 400,
            TenantError::InvalidTenantIdentifier(_) => 400,
            TenantError::CrossTenantViolation { .. } => 403,
            TenantError::InsufficientRole { .. } => 403,
            TenantError::InvalidRecord(_) => 400,
            TenantError::RecordNotFound { .. } => 404,
            TenantError::ReferenceNotFound { .. } => 422,
            TenantError::ReferenceInUse { .. } => 409,
            TenantError::NoActiveContext
            | TenantError::ContextAlreadyActive
            | TenantError::InvalidLifecycle { .. }
            | TenantError::ContextStoreUnavailable => 500,
            TenantError::Database(e) => e.status_code(),
        }
    }

    /// Errors that can only happen when a code path skipped the gate.
    /// These are defects, not client mistakes.
    pub fn is_defect(&self) -> bool {
        matches!(
            self,
            TenantError::NoActiveContext
                | TenantError::ContextAlreadyActive
                | TenantError::InvalidLifecycle { .. }
                | TenantError::ContextStoreUnavailable
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_taxonomy() {
        assert_eq!(TenantError::MissingTenantContext.status_code(), 401);
        assert_eq!(
            TenantError::TenantMismatch { header: "1".into(), claim: "2".into() }.status_code(),
            400
        );
        let violation = TenantError::CrossTenantViolation {
            collection: "orders".into(),
            id: Uuid::nil(),
        };
        assert_eq!(violation.status_code(), 403);
        assert_eq!(violation.code(), "CROSS_TENANT_VIOLATION");
        assert_eq!(TenantError::NoActiveContext.status_code(), 500);

        let in_use = TenantError::ReferenceInUse {
            collection: "customers".into(),
            id: Uuid::nil(),
        };
        assert_eq!(in_use.status_code(), 409);
        assert_eq!(in_use.code(), "REFERENCE_IN_USE");
        assert!(!in_use.is_defect());
    }

    #[test]
    fn defects_are_flagged() {
        assert!(TenantError::NoActiveContext.is_defect());
        assert!(!TenantError::MissingTenantContext.is_defect());
    }
}
