use authcore_auth::{AuthError, ErrorKind};
use authcore_authz::AuthzError;
use authcore_database::DatabaseError;
use authcore_tenant::TenantError;
use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ErrorResponse {
    pub fn new(error: &str, message: &str) -> Self {
        Self {
            error: error.to_string(),
            message: message.to_string(),
            module: None,
            hint: None,
            reason: None,
            expires_at: None,
        }
    }
}

/// A classified failure on its way to the client.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub kind: ErrorKind,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            body: ErrorResponse::new(kind.as_str(), &message),
        }
    }

    pub fn auth_required() -> Self {
        Self::new(ErrorKind::AuthRequired, "Authorization header with a Bearer token is required")
    }

    pub fn forbidden(missing: impl Into<String>) -> Self {
        let missing = missing.into();
        let mut err = Self::new(ErrorKind::Forbidden, format!("Missing requirement: {missing}"));
        err.body.reason = Some(missing);
        err
    }

    pub fn module_disabled(module: impl Into<String>) -> Self {
        let module = module.into();
        let mut err = Self::new(
            ErrorKind::ModuleDisabled,
            format!("Module '{module}' is not enabled for this tenant"),
        );
        err.body.hint = Some(format!("Ask a platform administrator to enable the '{module}' module"));
        err.body.module = Some(module);
        err
    }

    pub fn account_locked(reason: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        let mut err = Self::new(ErrorKind::AccountLocked, "Account is locked");
        err.body.reason = Some(reason.into());
        err.body.expires_at = expires_at;
        err
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Raw details go to the log only.
    pub fn internal(detail: impl std::fmt::Display) -> Self {
        tracing::error!(error = %detail, "Internal error");
        Self::new(ErrorKind::Internal, "An internal error occurred")
    }

    pub fn body(&self) -> &ErrorResponse {
        &self.body
    }

    fn classified(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::Internal => Self::internal(message),
            ErrorKind::AuthenticationFailed => {
                tracing::warn!(error = %message, "Identity provider rejected the login");
                Self::new(kind, "Authentication with the identity provider failed")
            }
            _ => Self::new(kind, message),
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
        ErrorKind::AuthRequired
        | ErrorKind::InvalidCredentials
        | ErrorKind::InvalidToken
        | ErrorKind::TokenExpired
        | ErrorKind::AuthenticationFailed => StatusCode::UNAUTHORIZED,
        ErrorKind::AccountLocked => StatusCode::LOCKED,
        ErrorKind::ModuleDisabled | ErrorKind::Forbidden | ErrorKind::TenantNotActive => StatusCode::FORBIDDEN,
        ErrorKind::InvalidStateTransition | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (status_for(self.kind), Json(self.body)).into_response()
    }
}

impl From<TenantError> for ApiError {
    fn from(err: TenantError) -> Self {
        match err {
            TenantError::ModuleDisabled(module) => ApiError::module_disabled(module),
            other => ApiError::classified(other.kind(), other.to_string()),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        ApiError::classified(err.kind(), err.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AccountLocked { reason, expires_at } => ApiError::account_locked(reason, expires_at),
            AuthError::ModuleDisabled(module) => ApiError::module_disabled(module),
            AuthError::Tenant(e) => e.into(),
            AuthError::Authz(e) => e.into(),
            other => ApiError::classified(other.kind(), other.to_string()),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        AuthzError::from(err).into()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::validation(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::validation(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use authcore_auth::ProviderError;
    use authcore_models::TenantStatus;

    #[test]
    fn kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::ValidationError), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::TokenExpired), StatusCode::UNAUTHORIZED);
        assert_eq!(status_for(ErrorKind::AccountLocked), StatusCode::LOCKED);
        assert_eq!(status_for(ErrorKind::TenantNotActive), StatusCode::FORBIDDEN);
        assert_eq!(status_for(ErrorKind::InvalidStateTransition), StatusCode::CONFLICT);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn locked_accounts_carry_reason_and_expiry_only() {
        let expires = Utc::now();
        let err = ApiError::from(AuthError::AccountLocked {
            reason: "too_many_failed_attempts".to_string(),
            expires_at: Some(expires),
        });
        assert_eq!(err.kind, ErrorKind::AccountLocked);
        assert_eq!(err.body().reason.as_deref(), Some("too_many_failed_attempts"));
        assert_eq!(err.body().expires_at, Some(expires));

        let json = serde_json::to_value(err.body()).unwrap();
        assert!(json.get("attemptsRemaining").is_none());
    }

    #[test]
    fn disabled_modules_name_the_module_with_a_hint() {
        let err = ApiError::from(AuthError::Tenant(TenantError::ModuleDisabled("billing".to_string())));
        assert_eq!(err.kind, ErrorKind::ModuleDisabled);
        assert_eq!(err.body().module.as_deref(), Some("billing"));
        assert!(err.body().hint.is_some());
    }

    #[test]
    fn provider_and_internal_details_stay_out_of_the_body() {
        let err = ApiError::from(AuthError::Provider(ProviderError::Exchange("upstream said 500 secret=abc".to_string())));
        assert_eq!(err.kind, ErrorKind::AuthenticationFailed);
        assert!(!err.body().message.contains("secret"));

        let err = ApiError::from(AuthError::Internal("connection refused to 10.0.0.5".to_string()));
        assert_eq!(err.body().error, "internal_error");
        assert!(!err.body().message.contains("10.0.0.5"));
    }

    #[test]
    fn tenant_state_errors_keep_distinct_codes() {
        let err = ApiError::from(TenantError::NotActive(TenantStatus::Suspended));
        assert_eq!(err.body().error, "tenant_not_active");
        let err = ApiError::from(TenantError::InvalidTransition {
            from: TenantStatus::Pending,
            to: TenantStatus::Suspended,
        });
        assert_eq!(status_for(err.kind), StatusCode::CONFLICT);
    }
}
