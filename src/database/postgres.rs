use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use sqlx::{postgres::PgPoolOptions, types::Json, FromRow, PgPool, Postgres, Transaction};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::backend::{TenantBackend, WriteOp};
use super::error::DatabaseError;
use super::record::{RecordRef, TenantRecord};
use crate::config::DatabaseConfig;
use crate::tenant::TenantId;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS tenant_records (
        collection  TEXT        NOT NULL,
        id          UUID        NOT NULL,
        tenant_id   TEXT        NOT NULL,
        data        JSONB       NOT NULL DEFAULT '{}'::jsonb,
        refs        JSONB       NOT NULL DEFAULT '[]'::jsonb,
        created_at  TIMESTAMPTZ NOT NULL,
        updated_at  TIMESTAMPTZ NOT NULL,
        PRIMARY KEY (collection, id)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS tenant_records_tenant_collection ON tenant_records (tenant_id, collection)",
    "CREATE INDEX IF NOT EXISTS tenant_records_refs ON tenant_records USING GIN (refs jsonb_path_ops)",
];

const SELECT_COLUMNS: &str = "collection, id, tenant_id, data, refs, created_at, updated_at";

const REFERRERS: &str = "SELECT collection, id FROM tenant_records WHERE refs @> $1";

/// Containment pattern matching any `refs` array that points at the target
fn reference_pattern(collection: &str, id: Uuid) -> Json<Value> {
    Json(json!([{ "collection": collection, "id": id }]))
}

#[derive(FromRow)]
struct RecordRow {
    collection: String,
    id: Uuid,
    tenant_id: String,
    data: Json<Map<String, Value>>,
    refs: Json<Vec<RecordRef>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RecordRow> for TenantRecord {
    type Error = DatabaseError;

    fn try_from(row: RecordRow) -> Result<Self, Self::Error> {
        let tenant_id = row
            .tenant_id
            .parse::<TenantId>()
            .map_err(|_| DatabaseError::Corrupt(format!("bad tenant_id on {}/{}", row.collection, row.id)))?;

        Ok(TenantRecord {
            id: row.id,
            collection: row.collection,
            tenant_id,
            data: row.data.0,
            references: row.refs.0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Shared-schema Postgres backend: one table, every row carries its tenant
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DatabaseError> {
        let url = config
            .url
            .as_deref()
            .ok_or(DatabaseError::ConfigMissing("DATABASE_URL"))?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout))
            .connect(url)
            .await?;

        info!("Created database pool ({} max connections)", config.max_connections);
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> Result<(), DatabaseError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Closed database pool");
    }

    async fn apply_one(
        tx: &mut Transaction<'_, Postgres>,
        tenant: &TenantId,
        op: WriteOp,
    ) -> Result<Touched, DatabaseError> {
        match op {
            WriteOp::Insert(record) => {
                if &record.tenant_id != tenant {
                    return Err(DatabaseError::Conflict(format!(
                        "{}/{} is stamped for a different tenant than the batch",
                        record.collection, record.id
                    )));
                }
                sqlx::query(
                    "INSERT INTO tenant_records (collection, id, tenant_id, data, refs, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                )
                .bind(&record.collection)
                .bind(record.id)
                .bind(tenant.to_string())
                .bind(Json(&record.data))
                .bind(Json(&record.references))
                .bind(record.created_at)
                .bind(record.updated_at)
                .execute(&mut **tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(db) if db.is_unique_violation() => DatabaseError::Conflict(format!(
                        "{}/{} already exists",
                        record.collection, record.id
                    )),
                    other => DatabaseError::Sqlx(other),
                })?;
                Ok(Touched::Written(record.collection, record.id, record.references))
            }
            WriteOp::Update(record) => {
                let result = sqlx::query(
                    "UPDATE tenant_records SET data = $1, refs = $2, updated_at = $3
                     WHERE tenant_id = $4 AND collection = $5 AND id = $6",
                )
                .bind(Json(&record.data))
                .bind(Json(&record.references))
                .bind(record.updated_at)
                .bind(tenant.to_string())
                .bind(&record.collection)
                .bind(record.id)
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() != 1 {
                    return Err(DatabaseError::NotFound(format!("{}/{}", record.collection, record.id)));
                }
                Ok(Touched::Written(record.collection, record.id, record.references))
            }
            WriteOp::Delete { collection, id } => {
                let result = sqlx::query(
                    "DELETE FROM tenant_records WHERE tenant_id = $1 AND collection = $2 AND id = $3",
                )
                .bind(tenant.to_string())
                .bind(&collection)
                .bind(id)
                .execute(&mut **tx)
                .await?;

                if result.rows_affected() != 1 {
                    return Err(DatabaseError::NotFound(format!("{}/{}", collection, id)));
                }
                Ok(Touched::Deleted(collection, id))
            }
        }
    }

    /// Reference integrity of one touched key, seen from inside the batch's
    /// transaction. Targets are share-locked so a concurrent delete has to
    /// wait for this batch and then sees its references.
    async fn check_links(
        tx: &mut Transaction<'_, Postgres>,
        tenant: &TenantId,
        touched: &Touched,
    ) -> Result<(), DatabaseError> {
        match touched {
            Touched::Written(collection, id, references) => {
                for reference in references {
                    let owner: Option<String> = sqlx::query_scalar(
                        "SELECT tenant_id FROM tenant_records WHERE collection = $1 AND id = $2 FOR KEY SHARE",
                    )
                    .bind(&reference.collection)
                    .bind(reference.id)
                    .fetch_optional(&mut **tx)
                    .await?;

                    if owner.as_deref() != Some(tenant.to_string().as_str()) {
                        return Err(DatabaseError::Conflict(format!(
                            "{}/{} references missing record {}/{}",
                            collection, id, reference.collection, reference.id
                        )));
                    }
                }
            }
            Touched::Deleted(collection, id) => {
                let referrer: Option<(String, Uuid)> = sqlx::query_as(&format!("{} LIMIT 1", REFERRERS))
                    .bind(reference_pattern(collection, *id))
                    .fetch_optional(&mut **tx)
                    .await?;

                if referrer.is_some() {
                    return Err(DatabaseError::Conflict(format!("{}/{} is still referenced", collection, id)));
                }
            }
        }
        Ok(())
    }
}

/// What one applied op left behind, for the integrity pass
enum Touched {
    Written(String, Uuid, Vec<RecordRef>),
    Deleted(String, Uuid),
}

#[async_trait]
impl TenantBackend for PgBackend {
    async fn fetch(&self, tenant: &TenantId, collection: &str, id: Uuid) -> Result<Option<TenantRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM tenant_records WHERE tenant_id = $1 AND collection = $2 AND id = $3",
            SELECT_COLUMNS
        );
        let row = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant.to_string())
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(TenantRecord::try_from).transpose()
    }

    async fn list(&self, tenant: &TenantId, collection: &str) -> Result<Vec<TenantRecord>, DatabaseError> {
        let sql = format!(
            "SELECT {} FROM tenant_records WHERE tenant_id = $1 AND collection = $2 ORDER BY created_at, id",
            SELECT_COLUMNS
        );
        let rows = sqlx::query_as::<_, RecordRow>(&sql)
            .bind(tenant.to_string())
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TenantRecord::try_from).collect()
    }

    async fn owner_of(&self, collection: &str, id: Uuid) -> Result<Option<TenantId>, DatabaseError> {
        let owner: Option<String> =
            sqlx::query_scalar("SELECT tenant_id FROM tenant_records WHERE collection = $1 AND id = $2")
                .bind(collection)
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        owner
            .map(|raw| {
                raw.parse::<TenantId>()
                    .map_err(|_| DatabaseError::Corrupt(format!("bad tenant_id on {}/{}", collection, id)))
            })
            .transpose()
    }

    async fn referenced_by(&self, collection: &str, id: Uuid) -> Result<Vec<(String, Uuid)>, DatabaseError> {
        let referrers: Vec<(String, Uuid)> = sqlx::query_as(REFERRERS)
            .bind(reference_pattern(collection, id))
            .fetch_all(&self.pool)
            .await?;
        Ok(referrers)
    }

    async fn apply(&self, tenant: &TenantId, ops: Vec<WriteOp>) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let mut touched = Vec::with_capacity(ops.len());
        for op in ops {
            // Returning early drops `tx`, which rolls the whole batch back
            touched.push(Self::apply_one(&mut tx, tenant, op).await?);
        }
        for key in &touched {
            Self::check_links(&mut tx, tenant, key).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
