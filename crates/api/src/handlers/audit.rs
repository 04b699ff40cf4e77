use crate::error::ApiResult;
use crate::middleware::AuthContext;
use crate::AppState;
use authcore_models::{AuditEvent, AuditQuery};
use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Extension, Json,
};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Serialize)]
pub struct AuditEventsResponse {
    pub events: Vec<AuditEvent>,
    pub limit: i64,
    pub offset: i64,
}

/// Query the tenant's audit trail
/// GET /api/audit/events
pub async fn query_events(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<AuthContext>,
    query: Result<Query<AuditQuery>, QueryRejection>,
) -> ApiResult<Json<AuditEventsResponse>> {
    let Query(query) = query?;
    let events = state.audit.query(context.tenant_id(), &query).await?;

    Ok(Json(AuditEventsResponse {
        events,
        limit: query.effective_limit(),
        offset: query.effective_offset(),
    }))
}
