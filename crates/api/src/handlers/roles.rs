use crate::error::ApiResult;
use crate::middleware::AuthContext;
use crate::AppState;
use authcore_models::{AssignRole, IdentityProfile, NewRole, Role, UpdateRole};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// GET /api/roles
pub async fn list_roles(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
) -> ApiResult<Json<Vec<Role>>> {
    Ok(Json(state.roles.list_roles(context.tenant_id()).await?))
}

/// GET /api/roles/:role_id
pub async fn get_role(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(role_id): Path<Uuid>,
) -> ApiResult<Json<Role>> {
    Ok(Json(state.roles.get_role(context.tenant_id(), role_id).await?))
}

/// POST /api/roles
pub async fn create_role(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    payload: Result<Json<NewRole>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Role>)> {
    let Json(request) = payload?;
    let role = state
        .roles
        .create_role(context.tenant_id(), context.identity_id(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(role)))
}

/// System roles and roles marked unmodifiable are rejected.
/// PATCH /api/roles/:role_id
pub async fn update_role(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(role_id): Path<Uuid>,
    payload: Result<Json<UpdateRole>, JsonRejection>,
) -> ApiResult<Json<Role>> {
    let Json(update) = payload?;
    let role = state
        .roles
        .update_role(context.tenant_id(), context.identity_id(), role_id, update)
        .await?;
    Ok(Json(role))
}

/// Refused with 409 while any identity still holds the role.
/// DELETE /api/roles/:role_id
pub async fn delete_role(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(role_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state
        .roles
        .delete_role(context.tenant_id(), context.identity_id(), role_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/identities/:identity_id/roles
pub async fn assign_role(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(identity_id): Path<Uuid>,
    payload: Result<Json<AssignRole>, JsonRejection>,
) -> ApiResult<Json<IdentityProfile>> {
    let Json(request) = payload?;
    let identity = state
        .roles
        .assign_role(context.tenant_id(), context.identity_id(), identity_id, request.role_id)
        .await?;
    Ok(Json(IdentityProfile::from(identity)))
}

/// DELETE /api/identities/:identity_id/roles/:role_id
pub async fn unassign_role(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path((identity_id, role_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<IdentityProfile>> {
    let identity = state
        .roles
        .unassign_role(context.tenant_id(), context.identity_id(), identity_id, role_id)
        .await?;
    Ok(Json(IdentityProfile::from(identity)))
}
