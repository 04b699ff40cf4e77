use crate::error::ApiResult;
use crate::middleware::AuthContext;
use crate::AppState;
use authcore_models::{AccountLockout, CreateIdentity, IdentityProfile, IdentityStatus, UnlockRequest};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct SetIdentityStatusRequest {
    pub status: IdentityStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectivePermissionsResponse {
    pub identity_id: Uuid,
    pub permissions: Vec<String>,
    pub all: bool,
}

/// GET /api/identities
pub async fn list_identities(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
) -> ApiResult<Json<Vec<IdentityProfile>>> {
    Ok(Json(state.identities.list_identities(context.tenant_id()).await?))
}

/// POST /api/identities
pub async fn create_identity(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    payload: Result<Json<CreateIdentity>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<IdentityProfile>)> {
    let Json(request) = payload?;
    let identity = state
        .identities
        .create_identity(&context.tenant, context.identity_id(), request)
        .await?;
    Ok((StatusCode::CREATED, Json(IdentityProfile::from(identity))))
}

/// GET /api/identities/:identity_id
pub async fn get_identity(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(identity_id): Path<Uuid>,
) -> ApiResult<Json<IdentityProfile>> {
    let identity = state.identities.get_identity(context.tenant_id(), identity_id).await?;
    Ok(Json(IdentityProfile::from(identity)))
}

/// Locking or suspending ends the identity's sessions.
/// PUT /api/identities/:identity_id/status
pub async fn set_status(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(identity_id): Path<Uuid>,
    payload: Result<Json<SetIdentityStatusRequest>, JsonRejection>,
) -> ApiResult<Json<IdentityProfile>> {
    let Json(request) = payload?;
    let identity = state
        .identities
        .set_status(context.tenant_id(), context.identity_id(), identity_id, request.status)
        .await?;
    Ok(Json(IdentityProfile::from(identity)))
}

/// GET /api/identities/:identity_id/permissions
pub async fn effective_permissions(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    Path(identity_id): Path<Uuid>,
) -> ApiResult<Json<EffectivePermissionsResponse>> {
    let effective = state
        .identities
        .effective_permissions(context.tenant_id(), identity_id)
        .await?;
    Ok(Json(EffectivePermissionsResponse {
        identity_id,
        all: effective.is_all(),
        permissions: effective.to_sorted_vec(),
    }))
}

/// Lift an open lockout before its cool-down ends
/// POST /api/lockouts/unlock
pub async fn unlock(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    payload: Result<Json<UnlockRequest>, JsonRejection>,
) -> ApiResult<Json<AccountLockout>> {
    let Json(request) = payload?;
    let lockout = state
        .lockout
        .unlock(context.tenant_id(), context.identity_id(), request)
        .await?;
    Ok(Json(lockout))
}
