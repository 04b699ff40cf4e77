use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified failure kinds.
///
/// Every error that crosses the authorization boundary is reduced to exactly
/// one of these before it reaches a client or an audit record. Raw messages
/// from storage or identity providers never travel with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    AuthRequired,
    InvalidCredentials,
    InvalidToken,
    TokenExpired,
    AuthenticationFailed,
    AccountLocked,
    ModuleDisabled,
    Forbidden,
    TenantNotActive,
    InvalidStateTransition,
    Conflict,
    NotFound,
    #[serde(rename = "internal_error")]
    #[sqlx(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::AuthRequired => "auth_required",
            ErrorKind::InvalidCredentials => "invalid_credentials",
            ErrorKind::InvalidToken => "invalid_token",
            ErrorKind::TokenExpired => "token_expired",
            ErrorKind::AuthenticationFailed => "authentication_failed",
            ErrorKind::AccountLocked => "account_locked",
            ErrorKind::ModuleDisabled => "module_disabled",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::TenantNotActive => "tenant_not_active",
            ErrorKind::InvalidStateTransition => "invalid_state_transition",
            ErrorKind::Conflict => "conflict",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
