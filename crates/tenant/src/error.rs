use authcore_authz::AuthzError;
use authcore_cache::CacheError;
use authcore_database::DatabaseError;
use authcore_models::{ErrorKind, TenantStatus};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TenantError>;

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Tenant not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Tenant cannot move from {from} to {to}")]
    InvalidTransition { from: TenantStatus, to: TenantStatus },

    #[error("Tenant is {0}")]
    NotActive(TenantStatus),

    #[error("Module '{0}' is not enabled for this tenant")]
    ModuleDisabled(String),

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Onboarding failed: {0}")]
    Onboarding(String),

    #[error(transparent)]
    Authz(#[from] AuthzError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

impl TenantError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TenantError::Validation(_) => ErrorKind::ValidationError,
            TenantError::NotFound => ErrorKind::NotFound,
            TenantError::Conflict(_) => ErrorKind::Conflict,
            TenantError::InvalidTransition { .. } => ErrorKind::InvalidStateTransition,
            TenantError::NotActive(_) => ErrorKind::TenantNotActive,
            TenantError::ModuleDisabled(_) => ErrorKind::ModuleDisabled,
            TenantError::InvalidApiKey => ErrorKind::Forbidden,
            TenantError::Onboarding(_) => ErrorKind::Internal,
            TenantError::Authz(e) => e.kind(),
            TenantError::Database(DatabaseError::DuplicateEntry(_)) => ErrorKind::Conflict,
            TenantError::Database(DatabaseError::NotFound(_)) => ErrorKind::NotFound,
            TenantError::Database(_) | TenantError::Cache(_) => ErrorKind::Internal,
        }
    }
}

impl From<validator::ValidationErrors> for TenantError {
    fn from(errors: validator::ValidationErrors) -> Self {
        TenantError::Validation(errors.to_string())
    }
}
