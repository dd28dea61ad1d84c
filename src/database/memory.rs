use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::backend::{TenantBackend, WriteOp};
use super::error::DatabaseError;
use super::record::TenantRecord;
use crate::tenant::TenantId;

type RecordKey = (String, Uuid);

/// In-process backend for development and tests
#[derive(Debug, Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<RecordKey, TenantRecord>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total stored records across all tenants
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Apply one op in place, remembering what it replaced
    fn apply_one(
        records: &mut HashMap<RecordKey, TenantRecord>,
        undo: &mut Vec<(RecordKey, Option<TenantRecord>)>,
        tenant: &TenantId,
        op: WriteOp,
    ) -> Result<(), DatabaseError> {
        match op {
            WriteOp::Insert(record) => {
                Self::ensure_tenant(tenant, &record)?;
                let key = (record.collection.clone(), record.id);
                if records.contains_key(&key) {
                    return Err(DatabaseError::Conflict(format!(
                        "{}/{} already exists",
                        record.collection, record.id
                    )));
                }
                records.insert(key.clone(), record);
                undo.push((key, None));
            }
            WriteOp::Update(record) => {
                Self::ensure_tenant(tenant, &record)?;
                let key = (record.collection.clone(), record.id);
                match records.get(&key) {
                    Some(existing) if &existing.tenant_id == tenant => {
                        let previous = records.insert(key.clone(), record);
                        undo.push((key, previous));
                    }
                    _ => {
                        return Err(DatabaseError::NotFound(format!("{}/{}", record.collection, record.id)));
                    }
                }
            }
            WriteOp::Delete { collection, id } => {
                let key = (collection, id);
                match records.get(&key) {
                    Some(existing) if &existing.tenant_id == tenant => {
                        let previous = records.remove(&key);
                        undo.push((key, previous));
                    }
                    _ => return Err(DatabaseError::NotFound(format!("{}/{}", key.0, key.1))),
                }
            }
        }
        Ok(())
    }

    /// Reference integrity of every key the batch touched, against the
    /// state the batch leaves behind
    fn check_links(
        records: &HashMap<RecordKey, TenantRecord>,
        tenant: &TenantId,
        touched: &[(RecordKey, Option<TenantRecord>)],
    ) -> Result<(), DatabaseError> {
        for (key, _) in touched {
            match records.get(key) {
                Some(record) => {
                    for reference in &record.references {
                        let target = records.get(&(reference.collection.clone(), reference.id));
                        if !target.is_some_and(|t| &t.tenant_id == tenant) {
                            return Err(DatabaseError::Conflict(format!(
                                "{}/{} references missing record {}/{}",
                                key.0, key.1, reference.collection, reference.id
                            )));
                        }
                    }
                }
                None => {
                    let in_use = records.values().any(|r| {
                        r.references
                            .iter()
                            .any(|reference| reference.collection == key.0 && reference.id == key.1)
                    });
                    if in_use {
                        return Err(DatabaseError::Conflict(format!("{}/{} is still referenced", key.0, key.1)));
                    }
                }
            }
        }
        Ok(())
    }

    fn ensure_tenant(tenant: &TenantId, record: &TenantRecord) -> Result<(), DatabaseError> {
        if &record.tenant_id != tenant {
            return Err(DatabaseError::Conflict(format!(
                "{}/{} is stamped for a different tenant than the batch",
                record.collection, record.id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantBackend for MemoryBackend {
    async fn fetch(&self, tenant: &TenantId, collection: &str, id: Uuid) -> Result<Option<TenantRecord>, DatabaseError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(collection.to_string(), id))
            .filter(|r| &r.tenant_id == tenant)
            .cloned())
    }

    async fn list(&self, tenant: &TenantId, collection: &str) -> Result<Vec<TenantRecord>, DatabaseError> {
        let records = self.records.read().await;
        let mut found: Vec<TenantRecord> = records
            .values()
            .filter(|r| &r.tenant_id == tenant && r.collection == collection)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(found)
    }

    async fn owner_of(&self, collection: &str, id: Uuid) -> Result<Option<TenantId>, DatabaseError> {
        let records = self.records.read().await;
        Ok(records
            .get(&(collection.to_string(), id))
            .map(|r| r.tenant_id.clone()))
    }

    async fn referenced_by(&self, collection: &str, id: Uuid) -> Result<Vec<(String, Uuid)>, DatabaseError> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.references.iter().any(|reference| reference.collection == collection && reference.id == id))
            .map(|r| (r.collection.clone(), r.id))
            .collect())
    }

    async fn apply(&self, tenant: &TenantId, ops: Vec<WriteOp>) -> Result<(), DatabaseError> {
        let mut records = self.records.write().await;
        let mut undo = Vec::with_capacity(ops.len());

        let mut result = ops
            .into_iter()
            .try_for_each(|op| Self::apply_one(&mut records, &mut undo, tenant, op));
        if result.is_ok() {
            result = Self::check_links(&records, tenant, &undo);
        }

        if result.is_err() {
            for (key, previous) in undo.into_iter().rev() {
                match previous {
                    Some(record) => records.insert(key, record),
                    None => records.remove(&key),
                };
            }
        }
        result
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
