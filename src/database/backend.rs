use async_trait::async_trait;
use uuid::Uuid;

use super::error::DatabaseError;
use super::record::TenantRecord;
use crate::tenant::TenantId;

/// One staged write inside an atomic batch
#[derive(Debug, Clone)]
pub enum WriteOp {
    Insert(TenantRecord),
    Update(TenantRecord),
    Delete { collection: String, id: Uuid },
}

impl WriteOp {
    /// The record content this op will persist, if any
    pub fn record(&self) -> Option<&TenantRecord> {
        match self {
            WriteOp::Insert(r) | WriteOp::Update(r) => Some(r),
            WriteOp::Delete { .. } => None,
        }
    }
}

/// Storage collaborator behind the repository.
///
/// Every tenant-facing method takes the tenant explicitly, so a backend
/// has no way to run an unscoped read or write on behalf of a request.
/// `owner_of` and `referenced_by` are the only unscoped lookups. Only the
/// consistency checker uses them, and they reveal keys, never content.
///
/// `apply` re-checks reference integrity inside its own atomic section:
/// every reference written must point at a record of the batch's tenant,
/// and no deleted record may still be referenced once the batch is done.
#[async_trait]
pub trait TenantBackend: Send + Sync {
    async fn fetch(&self, tenant: &TenantId, collection: &str, id: Uuid) -> Result<Option<TenantRecord>, DatabaseError>;

    async fn list(&self, tenant: &TenantId, collection: &str) -> Result<Vec<TenantRecord>, DatabaseError>;

    async fn owner_of(&self, collection: &str, id: Uuid) -> Result<Option<TenantId>, DatabaseError>;

    /// Keys of the records whose references point at `collection/id`
    async fn referenced_by(&self, collection: &str, id: Uuid) -> Result<Vec<(String, Uuid)>, DatabaseError>;

    /// Apply every op or none of them
    async fn apply(&self, tenant: &TenantId, ops: Vec<WriteOp>) -> Result<(), DatabaseError>;

    async fn health_check(&self) -> Result<(), DatabaseError>;
}
