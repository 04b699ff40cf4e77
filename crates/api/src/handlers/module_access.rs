use crate::middleware::AuthContext;
use axum::{extract::Path, Extension, Json};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleAccessResponse {
    pub module: String,
    pub tenant_id: Uuid,
    pub granted: bool,
    pub api_key_family: Option<String>,
}

/// Entitlement check. The middleware has already verified the bearer, the
/// tenant's API key and that the module is enabled.
/// GET /module-access/:module
pub async fn check(
    Extension(context): Extension<AuthContext>,
    Path(module): Path<String>,
) -> Json<ModuleAccessResponse> {
    Json(ModuleAccessResponse {
        module,
        tenant_id: context.tenant_id(),
        granted: true,
        api_key_family: context.api_key_family,
    })
}
