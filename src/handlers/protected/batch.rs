use axum::extract::{rejection::JsonRejection, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::app::AppState;
use crate::database::{NewRecord, RecordChanges, RecordRef, TenantRecord};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, CurrentTenant};
use crate::tenant::Role;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum BatchOperation {
    Create {
        collection: String,
        /// Batch-local label, so later operations can reference the new record
        #[serde(default)]
        key: Option<String>,
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        references: Vec<BatchReference>,
    },
    Update {
        collection: String,
        id: Uuid,
        #[serde(default)]
        data: Map<String, Value>,
        #[serde(default)]
        references: Option<Vec<BatchReference>>,
    },
    Delete {
        collection: String,
        id: Uuid,
    },
}

/// A reference inside a batch: either a stored record's `id` or the `key`
/// of a record created earlier in the same batch
#[derive(Debug, Deserialize)]
pub struct BatchReference {
    pub field: String,
    pub collection: String,
    #[serde(default)]
    pub id: Option<Uuid>,
    #[serde(default)]
    pub key: Option<String>,
}

impl BatchReference {
    fn resolve(self, keys: &HashMap<String, Uuid>) -> Result<RecordRef, ApiError> {
        let id = match (self.id, self.key) {
            (Some(id), None) => id,
            (None, Some(key)) => *keys
                .get(&key)
                .ok_or_else(|| ApiError::bad_request(format!("unknown batch key '{}'", key)))?,
            _ => return Err(ApiError::bad_request("a reference needs exactly one of 'id' or 'key'")),
        };
        Ok(RecordRef {
            field: self.field,
            collection: self.collection,
            id,
        })
    }
}

fn resolve_all(references: Vec<BatchReference>, keys: &HashMap<String, Uuid>) -> Result<Vec<RecordRef>, ApiError> {
    references.into_iter().map(|r| r.resolve(keys)).collect()
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub operations: Vec<BatchOperation>,
}

/// POST /api/batch - apply several writes atomically
///
/// Either every operation commits or none does. Results come back in
/// request order; a delete yields the record as it was. Ids of new records
/// are assigned by the server; a `key` only lives for the request.
pub async fn post(
    tenant: CurrentTenant,
    State(state): State<AppState>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Vec<TenantRecord>> {
    let Json(batch) = body?;
    if batch.operations.is_empty() {
        return Err(ApiError::bad_request("batch contains no operations"));
    }

    let has_delete = batch
        .operations
        .iter()
        .any(|op| matches!(op, BatchOperation::Delete { .. }));
    tenant.require_role(if has_delete { Role::Admin } else { Role::Member })?;

    let mut work = state.repository.unit_of_work();
    let mut keys: HashMap<String, Uuid> = HashMap::new();
    for op in batch.operations {
        match op {
            BatchOperation::Create {
                collection,
                key,
                data,
                references,
            } => {
                let mut record = NewRecord::new(collection, data);
                record.references = resolve_all(references, &keys)?;
                let id = work.create(record);
                if let Some(key) = key {
                    if keys.insert(key.clone(), id).is_some() {
                        return Err(ApiError::bad_request(format!("duplicate batch key '{}'", key)));
                    }
                }
            }
            BatchOperation::Update {
                collection,
                id,
                data,
                references,
            } => {
                let references = references.map(|r| resolve_all(r, &keys)).transpose()?;
                work.update(collection, id, RecordChanges { data, references })
            }
            BatchOperation::Delete { collection, id } => work.delete(collection, id),
        }
    }

    let records = work.commit().await?;
    Ok(ApiResponse::success(records))
}
