use crate::error::ApiResult;
use crate::middleware::{bearer_token, AuthContext};
use crate::AppState;
use authcore_auth::{EnrollMfa, IssuedChallenge, MfaEnrollment, MfaVerification};
use authcore_models::MfaMethodKind;
use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct InitiateMfaRequest {
    pub method: Option<MfaMethodKind>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMfaRequest {
    pub challenge_id: Uuid,
    pub code: String,
}

/// Issue a challenge for the login in progress or for step-up.
/// POST /auth/mfa/initiate
///
/// Accepts either the `mfaToken` from login or a session access token.
pub async fn initiate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<InitiateMfaRequest>, JsonRejection>,
) -> ApiResult<Json<IssuedChallenge>> {
    let token = bearer_token(&headers)?;
    let Json(request) = payload?;
    Ok(Json(state.sessions.initiate_mfa(token, request.method).await?))
}

/// POST /auth/mfa/verify
pub async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<VerifyMfaRequest>, JsonRejection>,
) -> ApiResult<Json<MfaVerification>> {
    let token = bearer_token(&headers)?;
    let Json(request) = payload?;
    Ok(Json(
        state
            .sessions
            .verify_mfa(token, request.challenge_id, &request.code)
            .await?,
    ))
}

/// Start enrolling a new method. Confirm it through /auth/mfa/verify.
/// POST /auth/mfa/enroll
pub async fn enroll(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    payload: Result<Json<EnrollMfa>, JsonRejection>,
) -> ApiResult<Json<MfaEnrollment>> {
    let Json(request) = payload?;
    let enrollment = state.mfa.enroll(&context.tenant, &context.identity, request).await?;
    tracing::info!(
        tenant_id = %context.tenant_id(),
        identity_id = %context.identity_id(),
        method = %enrollment.method,
        "MFA enrollment started"
    );
    Ok(Json(enrollment))
}
