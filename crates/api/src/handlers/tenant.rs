use crate::error::ApiResult;
use crate::middleware::AuthContext;
use crate::AppState;
use authcore_auth::validate_password;
use authcore_models::{CreateTenant, Tenant, TenantApiKey, TenantStatus, TenantView, UpdateModules};
use authcore_tenant::{ModuleUpdate, OnboardedTenant};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: TenantStatus,
}

/// Onboard a tenant: roles, API keys and its admin identity
/// POST /platform/tenants
pub async fn create_tenant(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateTenant>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<OnboardedTenant>)> {
    let Json(request) = payload?;

    let admin_password_hash = match &request.admin_password {
        Some(password) => {
            let min_length = request
                .module_config
                .authentication
                .as_ref()
                .map_or(8, |auth| auth.password_min_length);
            validate_password(password, min_length)?;
            Some(state.hasher.hash(password).await?)
        }
        None => None,
    };

    let onboarded = state.registry.create_tenant(request, admin_password_hash).await?;
    Ok((StatusCode::CREATED, Json(onboarded)))
}

/// GET /platform/tenants/:tenant_id
pub async fn get_tenant(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> ApiResult<Json<Tenant>> {
    Ok(Json(state.registry.get_tenant(tenant_id).await?))
}

/// Replace the enabled module set
/// PUT /platform/tenants/:tenant_id/modules
pub async fn update_modules(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    payload: Result<Json<UpdateModules>, JsonRejection>,
) -> ApiResult<Json<ModuleUpdate>> {
    let Json(update) = payload?;
    Ok(Json(state.registry.update_modules(tenant_id, None, update).await?))
}

/// PUT /platform/tenants/:tenant_id/status
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
    payload: Result<Json<SetStatusRequest>, JsonRejection>,
) -> ApiResult<Json<TenantView>> {
    let Json(request) = payload?;
    let tenant = state.registry.set_status(tenant_id, None, request.status).await?;
    Ok(Json(TenantView::from(tenant)))
}

/// Key metadata only; plaintexts are shown once at minting.
/// GET /platform/tenants/:tenant_id/api-keys
pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<Uuid>,
) -> ApiResult<Json<Vec<TenantApiKey>>> {
    state.registry.get_tenant(tenant_id).await?;
    Ok(Json(state.registry.list_api_keys(tenant_id).await?))
}

/// The caller's own tenant
/// GET /api/tenant
pub async fn current_tenant(Extension(context): Extension<AuthContext>) -> Json<TenantView> {
    Json(TenantView::from(context.tenant))
}
