pub mod context;
pub mod error;
pub mod id;
pub mod membership;
pub mod resolver;
pub mod store;

pub use context::{LifecyclePhase, Principal, RequestContext, Resolution, ResolutionSource};
pub use error::TenantError;
pub use id::{IdFormat, TenantId};
pub use membership::{Role, TenantMembership};
pub use resolver::TenantResolver;
pub use store::{current_tenant, ClearGuard};
