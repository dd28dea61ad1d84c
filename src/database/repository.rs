use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::backend::{TenantBackend, WriteOp};
use super::consistency::ConsistencyChecker;
use super::record::{validate_collection, validate_content, NewRecord, RecordChanges, TenantRecord};
use crate::tenant::{store, RequestContext, TenantError};

/// The only way request code reaches storage.
///
/// Every method starts by asking the context store for the active request
/// context and refuses to run without one, even if a caller found a way
/// around the HTTP gate. The tenant handed to the backend always comes
/// from that context, never from the caller.
#[derive(Clone)]
pub struct TenantRepository {
    backend: Arc<dyn TenantBackend>,
    checker: ConsistencyChecker,
}

impl TenantRepository {
    pub fn new(backend: Arc<dyn TenantBackend>) -> Self {
        Self {
            backend,
            checker: ConsistencyChecker::new(),
        }
    }

    fn guard(operation: &'static str) -> Result<Arc<RequestContext>, TenantError> {
        store::get().map_err(|err| {
            tracing::error!(
                operation,
                reason = err.code(),
                "data access attempted without an active tenant context"
            );
            err
        })
    }

    pub async fn find(&self, collection: &str, id: Uuid) -> Result<Option<TenantRecord>, TenantError> {
        let ctx = Self::guard("find")?;
        validate_collection(collection)?;
        Ok(self.backend.fetch(ctx.tenant_id(), collection, id).await?)
    }

    /// Like [`find`](Self::find) but a missing record is an error. Records of
    /// other tenants are indistinguishable from missing ones.
    pub async fn get(&self, collection: &str, id: Uuid) -> Result<TenantRecord, TenantError> {
        self.find(collection, id)
            .await?
            .ok_or_else(|| TenantError::RecordNotFound {
                collection: collection.to_string(),
                id,
            })
    }

    pub async fn list(&self, collection: &str) -> Result<Vec<TenantRecord>, TenantError> {
        let ctx = Self::guard("list")?;
        validate_collection(collection)?;
        Ok(self.backend.list(ctx.tenant_id(), collection).await?)
    }

    pub async fn create(&self, record: NewRecord) -> Result<TenantRecord, TenantError> {
        let mut work = self.unit_of_work();
        work.create(record);
        Self::single(work.commit().await?)
    }

    pub async fn update(&self, collection: &str, id: Uuid, changes: RecordChanges) -> Result<TenantRecord, TenantError> {
        let mut work = self.unit_of_work();
        work.update(collection, id, changes);
        Self::single(work.commit().await?)
    }

    /// Returns the record as it was before deletion
    pub async fn delete(&self, collection: &str, id: Uuid) -> Result<TenantRecord, TenantError> {
        let mut work = self.unit_of_work();
        work.delete(collection, id);
        Self::single(work.commit().await?)
    }

    pub fn unit_of_work(&self) -> UnitOfWork<'_> {
        UnitOfWork {
            repo: self,
            pending: Vec::new(),
        }
    }

    pub async fn health_check(&self) -> Result<(), TenantError> {
        Ok(self.backend.health_check().await?)
    }

    fn single(mut records: Vec<TenantRecord>) -> Result<TenantRecord, TenantError> {
        records
            .pop()
            .ok_or_else(|| TenantError::InvalidRecord("empty write".to_string()))
    }
}

#[derive(Debug)]
enum Pending {
    Create {
        id: Uuid,
        record: NewRecord,
    },
    Update {
        collection: String,
        id: Uuid,
        changes: RecordChanges,
    },
    Delete {
        collection: String,
        id: Uuid,
    },
}

/// Writes staged for one atomic commit. Either all of them become visible
/// or none do.
pub struct UnitOfWork<'a> {
    repo: &'a TenantRepository,
    pending: Vec<Pending>,
}

impl<'a> UnitOfWork<'a> {
    /// Stage a create. The id is fixed now so later staged records can
    /// reference it.
    pub fn create(&mut self, record: NewRecord) -> Uuid {
        let id = Uuid::new_v4();
        self.pending.push(Pending::Create { id, record });
        id
    }

    pub fn update(&mut self, collection: impl Into<String>, id: Uuid, changes: RecordChanges) {
        self.pending.push(Pending::Update {
            collection: collection.into(),
            id,
            changes,
        });
    }

    pub fn delete(&mut self, collection: impl Into<String>, id: Uuid) {
        self.pending.push(Pending::Delete {
            collection: collection.into(),
            id,
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Returns, in staging order, the stored state of each created or
    /// updated record and the prior state of each deleted one.
    pub async fn commit(self) -> Result<Vec<TenantRecord>, TenantError> {
        let ctx = TenantRepository::guard("commit")?;
        let tenant = ctx.tenant_id();
        let backend = self.repo.backend.as_ref();
        let now = Utc::now();

        let mut ops = Vec::with_capacity(self.pending.len());
        let mut results = Vec::with_capacity(self.pending.len());

        for pending in self.pending {
            match pending {
                Pending::Create { id, record: new } => {
                    validate_collection(&new.collection)?;
                    validate_content(&new.data, &new.references)?;

                    let record = TenantRecord {
                        id,
                        collection: new.collection,
                        tenant_id: tenant.clone(),
                        data: new.data,
                        references: new.references,
                        created_at: now,
                        updated_at: now,
                    };
                    ops.push(WriteOp::Insert(record.clone()));
                    results.push(record);
                }
                Pending::Update { collection, id, changes } => {
                    validate_collection(&collection)?;
                    validate_content(&changes.data, changes.references.as_deref().unwrap_or(&[]))?;

                    let existing = backend
                        .fetch(tenant, &collection, id)
                        .await?
                        .ok_or_else(|| TenantError::RecordNotFound { collection, id })?;

                    let references = changes
                        .references
                        .unwrap_or_else(|| existing.references.clone());
                    let record = TenantRecord {
                        data: changes.data,
                        references,
                        updated_at: now,
                        ..existing
                    };
                    ops.push(WriteOp::Update(record.clone()));
                    results.push(record);
                }
                Pending::Delete { collection, id } => {
                    validate_collection(&collection)?;
                    let existing = backend
                        .fetch(tenant, &collection, id)
                        .await?
                        .ok_or_else(|| TenantError::RecordNotFound {
                            collection: collection.clone(),
                            id,
                        })?;
                    ops.push(WriteOp::Delete { collection, id });
                    results.push(existing);
                }
            }
        }

        self.repo.checker.verify(&ctx, &ops, backend).await?;
        backend.apply(tenant, ops).await?;

        tracing::debug!(
            request_id = %ctx.request_id(),
            tenant = %tenant,
            writes = results.len(),
            "unit of work committed"
        );
        Ok(results)
    }
}
