use crate::error::ApiResult;
use crate::AppState;
use authcore_models::{
    BusinessType, DefaultRole, NewBusinessType, NewDefaultRole, NewPermissionTemplate, PermissionTemplate,
};
use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFilter {
    pub tenant_id: Option<Uuid>,
}

/// POST /platform/business-types
pub async fn create_business_type(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewBusinessType>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<BusinessType>)> {
    let Json(request) = payload?;
    let business_type = state.catalog.create_business_type(request).await?;
    Ok((StatusCode::CREATED, Json(business_type)))
}

/// GET /platform/business-types
pub async fn list_business_types(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<BusinessType>>> {
    Ok(Json(state.catalog.list_business_types().await?))
}

/// GET /platform/business-types/:id
pub async fn get_business_type(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<BusinessType>> {
    Ok(Json(state.catalog.get_business_type(id).await?))
}

/// POST /platform/templates
pub async fn create_template(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewPermissionTemplate>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<PermissionTemplate>)> {
    let Json(request) = payload?;
    let template = state.catalog.create_template(request).await?;
    Ok((StatusCode::CREATED, Json(template)))
}

/// Global templates plus, when `tenantId` is given, that tenant's own.
/// GET /platform/templates
pub async fn list_templates(
    State(state): State<Arc<AppState>>,
    filter: Result<Query<TemplateFilter>, QueryRejection>,
) -> ApiResult<Json<Vec<PermissionTemplate>>> {
    let Query(filter) = filter?;
    Ok(Json(state.catalog.list_templates(filter.tenant_id).await?))
}

/// DELETE /platform/templates/:id
pub async fn delete_template(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> ApiResult<StatusCode> {
    state.catalog.delete_template(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /platform/default-roles
pub async fn create_default_role(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<NewDefaultRole>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<DefaultRole>)> {
    let Json(request) = payload?;
    let role = state.catalog.create_default_role(request).await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// GET /platform/default-roles
pub async fn list_default_roles(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<DefaultRole>>> {
    Ok(Json(state.catalog.list_default_roles().await?))
}
