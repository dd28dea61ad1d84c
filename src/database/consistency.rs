use futures::future::try_join_all;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::backend::{TenantBackend, WriteOp};
use super::record::RecordRef;
use crate::tenant::{RequestContext, TenantError, TenantId};

/// Verifies, before anything is committed, that every record a batch
/// writes and every record those writes point at belongs to the request's
/// tenant. A record may only be deleted once nothing outside the batch
/// still references it, so a reference that passed here stays valid.
#[derive(Debug, Clone, Default)]
pub struct ConsistencyChecker;

impl ConsistencyChecker {
    pub fn new() -> Self {
        Self
    }

    pub async fn verify(
        &self,
        ctx: &RequestContext,
        ops: &[WriteOp],
        backend: &dyn TenantBackend,
    ) -> Result<(), TenantError> {
        let tenant = ctx.tenant_id();

        // Targets created or kept alive by this batch, and targets it removes
        let mut staged: HashMap<(&str, Uuid), &TenantId> = HashMap::new();
        let mut deleted: HashSet<(&str, Uuid)> = HashSet::new();

        for op in ops {
            match op {
                WriteOp::Insert(record) | WriteOp::Update(record) => {
                    if &record.tenant_id != tenant {
                        return Err(self.violation(ctx, &record.collection, record.id));
                    }
                    staged.insert((record.collection.as_str(), record.id), &record.tenant_id);
                }
                WriteOp::Delete { collection, id } => {
                    deleted.insert((collection.as_str(), *id));
                }
            }
        }

        let mut lookups: Vec<&RecordRef> = Vec::new();
        for reference in ops.iter().filter_map(WriteOp::record).flat_map(|r| r.references.iter()) {
            let key = (reference.collection.as_str(), reference.id);
            if deleted.contains(&key) {
                return Err(self.dangling(ctx, reference));
            }
            match staged.get(&key) {
                Some(owner) if *owner == tenant => {}
                Some(_) => return Err(self.violation(ctx, &reference.collection, reference.id)),
                None => lookups.push(reference),
            }
        }

        let owners = try_join_all(
            lookups
                .iter()
                .map(|reference| backend.owner_of(&reference.collection, reference.id)),
        )
        .await?;

        for (reference, owner) in lookups.into_iter().zip(owners) {
            match owner {
                Some(owner) if &owner == tenant => {}
                Some(_) => return Err(self.violation(ctx, &reference.collection, reference.id)),
                None => return Err(self.dangling(ctx, reference)),
            }
        }

        // Referrers rewritten by this batch were checked above
        let deletes: Vec<(&str, Uuid)> = deleted.iter().copied().collect();
        let referrers = try_join_all(
            deletes
                .iter()
                .map(|(collection, id)| backend.referenced_by(collection, *id)),
        )
        .await?;

        for ((collection, id), referrers) in deletes.into_iter().zip(referrers) {
            let outside = referrers.iter().any(|(c, i)| {
                let key = (c.as_str(), *i);
                !deleted.contains(&key) && !staged.contains_key(&key)
            });
            if outside {
                return Err(self.in_use(ctx, collection, id));
            }
        }

        Ok(())
    }

    fn in_use(&self, ctx: &RequestContext, collection: &str, id: Uuid) -> TenantError {
        tracing::debug!(
            request_id = %ctx.request_id(),
            collection = %collection,
            record_id = %id,
            "delete rejected: record still referenced"
        );
        TenantError::ReferenceInUse {
            collection: collection.to_string(),
            id,
        }
    }

    fn violation(&self, ctx: &RequestContext, collection: &str, id: Uuid) -> TenantError {
        tracing::warn!(
            reason = "CROSS_TENANT_VIOLATION",
            request_id = %ctx.request_id(),
            tenant = %ctx.tenant_id(),
            collection = %collection,
            record_id = %id,
            "write rejected: record belongs to another tenant"
        );
        TenantError::CrossTenantViolation {
            collection: collection.to_string(),
            id,
        }
    }

    fn dangling(&self, ctx: &RequestContext, reference: &RecordRef) -> TenantError {
        tracing::debug!(
            request_id = %ctx.request_id(),
            collection = %reference.collection,
            record_id = %reference.id,
            "write rejected: reference target missing"
        );
        TenantError::ReferenceNotFound {
            collection: reference.collection.clone(),
            id: reference.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::MemoryBackend;
    use crate::database::record::TenantRecord;
    use crate::tenant::{Resolution, ResolutionSource};
    use chrono::Utc;
    use serde_json::Map;

    fn ctx(tenant: i64) -> RequestContext {
        RequestContext::new(
            Resolution {
                tenant_id: TenantId::Int(tenant),
                source: ResolutionSource::Header,
            },
            "req-check",
            None,
        )
    }

    fn record(tenant: i64, collection: &str, refs: Vec<RecordRef>) -> TenantRecord {
        let now = Utc::now();
        TenantRecord {
            id: Uuid::new_v4(),
            collection: collection.to_string(),
            tenant_id: TenantId::Int(tenant),
            data: Map::new(),
            references: refs,
            created_at: now,
            updated_at: now,
        }
    }

    fn link(target: &TenantRecord) -> RecordRef {
        RecordRef {
            field: "customer".into(),
            collection: target.collection.clone(),
            id: target.id,
        }
    }

    async fn seeded(records: &[TenantRecord]) -> MemoryBackend {
        let backend = MemoryBackend::new();
        for r in records {
            backend
                .apply(&r.tenant_id, vec![WriteOp::Insert(r.clone())])
                .await
                .unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn same_tenant_reference_passes() {
        let customer = record(1, "customers", vec![]);
        let backend = seeded(&[customer.clone()]).await;
        let order = record(1, "orders", vec![link(&customer)]);

        ConsistencyChecker::new()
            .verify(&ctx(1), &[WriteOp::Insert(order)], &backend)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn reference_into_other_tenant_is_violation() {
        let foreign = record(2, "customers", vec![]);
        let backend = seeded(&[foreign.clone()]).await;
        let order = record(1, "orders", vec![link(&foreign)]);

        let err = ConsistencyChecker::new()
            .verify(&ctx(1), &[WriteOp::Insert(order)], &backend)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::CrossTenantViolation { id, .. } if id == foreign.id));
    }

    #[tokio::test]
    async fn record_stamped_for_other_tenant_is_violation() {
        let backend = MemoryBackend::new();
        let stray = record(2, "orders", vec![]);
        let err = ConsistencyChecker::new()
            .verify(&ctx(1), &[WriteOp::Insert(stray)], &backend)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::CrossTenantViolation { .. }));
    }

    #[tokio::test]
    async fn staged_targets_satisfy_references() {
        let backend = MemoryBackend::new();
        let customer = record(1, "customers", vec![]);
        let order = record(1, "orders", vec![link(&customer)]);

        ConsistencyChecker::new()
            .verify(
                &ctx(1),
                &[WriteOp::Insert(customer), WriteOp::Insert(order)],
                &backend,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_or_deleted_targets_are_dangling() {
        let customer = record(1, "customers", vec![]);
        let backend = seeded(&[customer.clone()]).await;

        let ghost = record(1, "customers", vec![]);
        let order = record(1, "orders", vec![link(&ghost)]);
        let err = ConsistencyChecker::new()
            .verify(&ctx(1), &[WriteOp::Insert(order)], &backend)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::ReferenceNotFound { .. }));

        let order = record(1, "orders", vec![link(&customer)]);
        let delete = WriteOp::Delete {
            collection: customer.collection.clone(),
            id: customer.id,
        };
        let err = ConsistencyChecker::new()
            .verify(&ctx(1), &[delete, WriteOp::Insert(order)], &backend)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::ReferenceNotFound { .. }));
    }

    #[tokio::test]
    async fn referenced_record_cannot_be_deleted() {
        let customer = record(1, "customers", vec![]);
        let order = record(1, "orders", vec![link(&customer)]);
        let backend = seeded(&[customer.clone(), order.clone()]).await;
        let delete = WriteOp::Delete {
            collection: customer.collection.clone(),
            id: customer.id,
        };

        let err = ConsistencyChecker::new()
            .verify(&ctx(1), &[delete.clone()], &backend)
            .await
            .unwrap_err();
        assert!(matches!(err, TenantError::ReferenceInUse { id, .. } if id == customer.id));

        // Dropping the link or the referrer in the same batch frees the target
        let mut unlinked = order.clone();
        unlinked.references.clear();
        ConsistencyChecker::new()
            .verify(&ctx(1), &[WriteOp::Update(unlinked), delete.clone()], &backend)
            .await
            .unwrap();

        let drop_order = WriteOp::Delete {
            collection: order.collection.clone(),
            id: order.id,
        };
        ConsistencyChecker::new()
            .verify(&ctx(1), &[delete, drop_order], &backend)
            .await
            .unwrap();
    }
}
