use crate::provider::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Server-side record behind an issued access/refresh token pair.
///
/// The access token is a signed JWT; `access_token_id` is its current `jti`.
/// The refresh token is an opaque handle of which only the SHA-256 hash is kept,
/// and it is replaced on every refresh.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuthSession {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub identity_id: Uuid,
    pub provider_kind: ProviderKind,
    pub mfa_verified: bool,

    pub access_token_id: Uuid,
    #[serde(skip_serializing)]
    pub refresh_token_hash: String,
    pub refresh_expires_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && now < self.refresh_expires_at
    }
}

#[derive(Debug, Clone)]
pub struct NewAuthSession {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub identity_id: Uuid,
    pub provider_kind: ProviderKind,
    pub mfa_verified: bool,
    pub access_token_id: Uuid,
    pub refresh_token_hash: String,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Replacement values applied when a refresh handle is rotated.
#[derive(Debug, Clone)]
pub struct SessionRotation {
    pub old_refresh_hash: String,
    pub new_refresh_hash: String,
    pub new_access_token_id: Uuid,
}

/// Entry in the token revocation list, keyed by access token id.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RevokedToken {
    pub token_id: Uuid,
    pub tenant_id: Uuid,
    pub reason: String,
    /// The entry is only needed until the token would have expired anyway.
    pub expires_at: DateTime<Utc>,
    pub revoked_at: DateTime<Utc>,
}
