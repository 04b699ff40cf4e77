use authcore_database::DatabaseError;
use authcore_models::ErrorKind;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthzError>;

/// Why a candidate module set was rejected. Always names the module at fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleSetError {
    #[error("unknown module '{0}'")]
    UnknownModule(String),

    #[error("required module '{0}' is missing")]
    MissingRequired(String),

    #[error("module '{module}' requires '{dependency}', which is not enabled")]
    MissingDependency { module: String, dependency: String },

    #[error("module '{0}' is listed more than once")]
    Duplicate(String),
}

impl ModuleSetError {
    /// The module id the caller has to add or fix.
    pub fn offending_module(&self) -> &str {
        match self {
            ModuleSetError::UnknownModule(id)
            | ModuleSetError::MissingRequired(id)
            | ModuleSetError::Duplicate(id) => id,
            ModuleSetError::MissingDependency { dependency, .. } => dependency,
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("Invalid module set: {0}")]
    InvalidModuleSet(#[from] ModuleSetError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Role '{0}' cannot be modified")]
    ImmutableRole(String),

    #[error("Cannot grant '{0}' without holding it")]
    PermissionNotHeld(String),

    #[error("Role '{0}' is still assigned to one or more identities")]
    RoleInUse(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl AuthzError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthzError::InvalidModuleSet(_) | AuthzError::Validation(_) => ErrorKind::ValidationError,
            AuthzError::NotFound(_) => ErrorKind::NotFound,
            AuthzError::Conflict(_) | AuthzError::RoleInUse(_) => ErrorKind::Conflict,
            AuthzError::ImmutableRole(_) | AuthzError::PermissionNotHeld(_) => ErrorKind::Forbidden,
            AuthzError::Database(DatabaseError::DuplicateEntry(_)) => ErrorKind::Conflict,
            AuthzError::Database(DatabaseError::NotFound(_)) => ErrorKind::NotFound,
            AuthzError::Database(_) => ErrorKind::Internal,
        }
    }
}

impl From<validator::ValidationErrors> for AuthzError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AuthzError::Validation(errors.to_string())
    }
}
