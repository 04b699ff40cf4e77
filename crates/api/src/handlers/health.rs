use crate::AppState;
use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub cache: String,
    pub database: Option<String>,
}

/// Health check endpoint. Reports 503 when a backing store is unreachable.
pub async fn health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let cache_ok = match state.cache.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, backend = state.cache.backend_name(), "Cache health check failed");
            false
        }
    };

    let database_ok = match &state.database {
        Some(db) => match db.ping().await {
            Ok(()) => Some(true),
            Err(e) => {
                tracing::warn!(error = %e, "Database health check failed");
                Some(false)
            }
        },
        None => None,
    };

    let healthy = cache_ok && database_ok.unwrap_or(true);
    let label = |ok: bool| if ok { "up" } else { "down" }.to_string();

    let status = if healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (
        status,
        Json(HealthResponse {
            status: if healthy { "healthy" } else { "degraded" }.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cache: format!("{}:{}", state.cache.backend_name(), label(cache_ok)),
            database: database_ok.map(label),
        }),
    )
}
