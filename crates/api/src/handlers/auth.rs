use crate::error::ApiResult;
use crate::middleware::{bearer_token, AuthContext};
use crate::AppState;
use authcore_auth::{LoginOutcome, LoginRequest, RefreshedTokens};
use authcore_models::{IdentityProfile, ProviderKind};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub user: IdentityProfile,
    pub tenant_id: Uuid,
    pub org_id: String,
    pub provider_kind: ProviderKind,
    pub mfa_verified: bool,
    pub permissions: Vec<String>,
}

/// Local login
/// POST /auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<Json<LoginOutcome>> {
    let Json(request) = payload?;
    Ok(Json(state.sessions.login(request).await?))
}

/// Describe the caller's session
/// GET /auth/verify
pub async fn verify(Extension(context): Extension<AuthContext>) -> Json<VerifyResponse> {
    Json(VerifyResponse {
        user: IdentityProfile::from(&context.identity),
        tenant_id: context.tenant.id,
        org_id: context.tenant.org_id.clone(),
        provider_kind: context.provider_kind,
        mfa_verified: context.mfa_verified,
        permissions: context.permissions.to_sorted_vec(),
    })
}

/// Rotate a refresh token
/// POST /auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> ApiResult<Json<RefreshedTokens>> {
    let Json(request) = payload?;
    Ok(Json(state.sessions.refresh(&request.refresh_token).await?))
}

/// End the bearer's session
/// POST /auth/logout
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<StatusCode> {
    let token = bearer_token(&headers)?;
    state.sessions.logout(token).await?;
    Ok(StatusCode::NO_CONTENT)
}
