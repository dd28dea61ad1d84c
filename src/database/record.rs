use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::tenant::{TenantError, TenantId};

/// Field names owned by the storage layer; clients cannot write them
const SYSTEM_FIELDS: &[&str] = &["id", "tenant_id", "created_at", "updated_at"];

/// Foreign-key-like link from one record to another
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordRef {
    pub field: String,
    pub collection: String,
    pub id: Uuid,
}

/// A tenant-owned document. `tenant_id` is mandatory and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: Uuid,
    pub collection: String,
    pub tenant_id: TenantId,
    pub data: Map<String, Value>,
    #[serde(default)]
    pub references: Vec<RecordRef>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Client-supplied content for a create or update
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordInput {
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub references: Option<Vec<RecordRef>>,
}

/// A record to be created. The tenant is never part of the input; it is
/// stamped from the active request context at commit time. Ids are always
/// generated server-side.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub collection: String,
    pub data: Map<String, Value>,
    pub references: Vec<RecordRef>,
}

impl NewRecord {
    pub fn new(collection: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            collection: collection.into(),
            data,
            references: Vec::new(),
        }
    }

    pub fn from_input(collection: impl Into<String>, input: RecordInput) -> Self {
        Self {
            collection: collection.into(),
            data: input.data,
            references: input.references.unwrap_or_default(),
        }
    }

    pub fn with_reference(mut self, field: impl Into<String>, collection: impl Into<String>, id: Uuid) -> Self {
        self.references.push(RecordRef {
            field: field.into(),
            collection: collection.into(),
            id,
        });
        self
    }
}

/// Replacement content for an existing record. `references: None` keeps
/// the current links.
#[derive(Debug, Clone, Default)]
pub struct RecordChanges {
    pub data: Map<String, Value>,
    pub references: Option<Vec<RecordRef>>,
}

impl From<RecordInput> for RecordChanges {
    fn from(input: RecordInput) -> Self {
        Self {
            data: input.data,
            references: input.references,
        }
    }
}

/// Collection names end up in storage keys and SQL parameters; keep them boring
pub fn validate_collection(name: &str) -> Result<(), TenantError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(TenantError::InvalidRecord(format!("invalid collection name '{}'", name)))
    }
}

pub fn validate_content(data: &Map<String, Value>, references: &[RecordRef]) -> Result<(), TenantError> {
    if let Some(field) = SYSTEM_FIELDS.iter().find(|f| data.contains_key(**f)) {
        return Err(TenantError::InvalidRecord(format!(
            "system field '{}' cannot be set via API",
            field
        )));
    }
    for reference in references {
        validate_collection(&reference.collection)?;
        if reference.field.trim().is_empty() {
            return Err(TenantError::InvalidRecord("reference field name is empty".to_string()));
        }
    }
    Ok(())
}
