pub mod current_tenant;
pub mod response;
pub mod tenant_gate;

pub use current_tenant::CurrentTenant;
pub use response::{ApiResponse, ApiResult};
pub use tenant_gate::{tenant_gate_middleware, TenantGate, REQUEST_ID_HEADER};
