use axum::extract::{rejection::JsonRejection, Path, State};
use axum::Json;

use crate::app::AppState;
use crate::database::{NewRecord, RecordInput, TenantRecord};
use crate::middleware::{ApiResponse, ApiResult, CurrentTenant};
use crate::tenant::Role;

/// GET /api/data/:collection - every record of the collection owned by the tenant
pub async fn get(
    _tenant: CurrentTenant,
    State(state): State<AppState>,
    Path(collection): Path<String>,
) -> ApiResult<Vec<TenantRecord>> {
    let records = state.repository.list(&collection).await?;
    Ok(ApiResponse::success(records))
}

/// POST /api/data/:collection - create one record for the tenant
pub async fn post(
    tenant: CurrentTenant,
    State(state): State<AppState>,
    Path(collection): Path<String>,
    body: Result<Json<RecordInput>, JsonRejection>,
) -> ApiResult<TenantRecord> {
    tenant.require_role(Role::Member)?;
    let Json(input) = body?;

    let record = state
        .repository
        .create(NewRecord::from_input(collection, input))
        .await?;
    Ok(ApiResponse::created(record))
}
