use authcore_authz::AuthzError;
use authcore_cache::CacheError;
use authcore_database::DatabaseError;
use authcore_models::ErrorKind;
use authcore_tenant::TenantError;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Failure inside an identity provider handshake. Never shown to clients
/// verbatim; it surfaces as `AuthenticationFailed`.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("state parameter rejected: {0}")]
    State(String),

    #[error("code exchange failed: {0}")]
    Exchange(String),

    #[error("profile lookup failed: {0}")]
    Profile(String),

    #[error("assertion rejected: {0}")]
    Assertion(String),

    #[error("provider is not configured for this tenant")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Authentication failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("Account locked")]
    AccountLocked {
        reason: String,
        expires_at: Option<DateTime<Utc>>,
    },

    #[error("Module '{0}' is not enabled for this tenant")]
    ModuleDisabled(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Tenant is not active")]
    TenantNotActive,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Password too weak: {0}")]
    WeakPassword(String),

    #[error("Password hashing error: {0}")]
    PasswordHash(String),

    #[error("JWT error: {0}")]
    Jwt(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Tenant(#[from] TenantError),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::Validation(_) | AuthError::WeakPassword(_) => ErrorKind::ValidationError,
            AuthError::AuthRequired => ErrorKind::AuthRequired,
            AuthError::InvalidCredentials => ErrorKind::InvalidCredentials,
            AuthError::InvalidToken(_) => ErrorKind::InvalidToken,
            AuthError::TokenExpired => ErrorKind::TokenExpired,
            AuthError::Provider(_) => ErrorKind::AuthenticationFailed,
            AuthError::AccountLocked { .. } => ErrorKind::AccountLocked,
            AuthError::ModuleDisabled(_) => ErrorKind::ModuleDisabled,
            AuthError::Forbidden(_) => ErrorKind::Forbidden,
            AuthError::TenantNotActive => ErrorKind::TenantNotActive,
            AuthError::NotFound(_) => ErrorKind::NotFound,
            AuthError::Conflict(_) => ErrorKind::Conflict,
            AuthError::PasswordHash(_) | AuthError::Jwt(_) | AuthError::Internal(_) => ErrorKind::Internal,
            AuthError::Tenant(e) => e.kind(),
            AuthError::Authz(e) => e.kind(),
            AuthError::Database(DatabaseError::DuplicateEntry(_)) => ErrorKind::Conflict,
            AuthError::Database(DatabaseError::NotFound(_)) => ErrorKind::NotFound,
            AuthError::Database(_) | AuthError::Cache(_) => ErrorKind::Internal,
        }
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
        match err.kind() {
            JwtErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::Jwt(err.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for AuthError {
    fn from(err: validator::ValidationErrors) -> Self {
        AuthError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        AuthError::Internal(format!("background task failed: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_surface_as_authentication_failed() {
        let err: AuthError = ProviderError::Exchange("HTTP 500".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[test]
    fn tenant_errors_keep_their_kind() {
        let err: AuthError = TenantError::NotFound.into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
