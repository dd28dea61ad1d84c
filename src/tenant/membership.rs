use serde::{Deserialize, Serialize};
use std::fmt;

use super::error::TenantError;
use super::id::TenantId;

/// Roles a principal can hold inside a tenant, weakest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Member,
    Admin,
    Owner,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Viewer => "viewer",
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Owner => "owner",
        };
        f.write_str(name)
    }
}

/// A principal's role within one tenant. Only consulted for
/// authorization; it never decides which tenant a request belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantMembership {
    pub principal: String,
    pub tenant_id: TenantId,
    pub role: Role,
}

impl TenantMembership {
    pub fn authorize(&self, tenant_id: &TenantId, required: Role) -> Result<(), TenantError> {
        if &self.tenant_id != tenant_id {
            tracing::warn!(
                principal = %self.principal,
                membership_tenant = %self.tenant_id,
                "membership does not belong to the active tenant"
            );
            return Err(TenantError::AuthenticationRequired);
        }
        if self.role < required {
            return Err(TenantError::InsufficientRole {
                required,
                actual: self.role,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_are_ordered() {
        assert!(Role::Viewer < Role::Member);
        assert!(Role::Member < Role::Admin);
        assert!(Role::Admin < Role::Owner);
    }

    #[test]
    fn membership_in_other_tenant_is_refused() {
        let membership = TenantMembership {
            principal: "bob".into(),
            tenant_id: TenantId::Int(1),
            role: Role::Owner,
        };
        assert!(membership.authorize(&TenantId::Int(1), Role::Admin).is_ok());
        assert!(membership.authorize(&TenantId::Int(2), Role::Viewer).is_err());
    }

    #[test]
    fn role_deserializes_lowercase() {
        let role: Role = serde_json::from_str("\"admin\"").unwrap();
        assert_eq!(role, Role::Admin);
    }
}
