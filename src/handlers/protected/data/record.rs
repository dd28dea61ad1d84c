use axum::extract::{
    rejection::{JsonRejection, PathRejection},
    Path, State,
};
use axum::Json;
use uuid::Uuid;

use crate::app::AppState;
use crate::database::{RecordInput, TenantRecord};
use crate::middleware::{ApiResponse, ApiResult, CurrentTenant};
use crate::tenant::Role;

type RecordPath = Result<Path<(String, Uuid)>, PathRejection>;

/// GET /api/data/:collection/:id - records of other tenants read as not found
pub async fn get(
    _tenant: CurrentTenant,
    State(state): State<AppState>,
    path: RecordPath,
) -> ApiResult<TenantRecord> {
    let Path((collection, id)) = path?;
    let record = state.repository.get(&collection, id).await?;
    Ok(ApiResponse::success(record))
}

/// PUT /api/data/:collection/:id - replace data; references kept unless given
pub async fn put(
    tenant: CurrentTenant,
    State(state): State<AppState>,
    path: RecordPath,
    body: Result<Json<RecordInput>, JsonRejection>,
) -> ApiResult<TenantRecord> {
    tenant.require_role(Role::Member)?;
    let Path((collection, id)) = path?;
    let Json(input) = body?;

    let record = state.repository.update(&collection, id, input.into()).await?;
    Ok(ApiResponse::success(record))
}

/// DELETE /api/data/:collection/:id - returns the deleted record
pub async fn delete(
    tenant: CurrentTenant,
    State(state): State<AppState>,
    path: RecordPath,
) -> ApiResult<TenantRecord> {
    tenant.require_role(Role::Admin)?;
    let Path((collection, id)) = path?;

    let record = state.repository.delete(&collection, id).await?;
    Ok(ApiResponse::success(record))
}
