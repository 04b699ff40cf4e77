use crate::mfa::MfaMethod;
use crate::provider::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// A tenant-scoped user account. Email is unique per tenant, not globally.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Identity {
    pub id: Uuid,
    pub tenant_id: Uuid,

    /// Stored lowercased.
    pub email: String,
    pub display_name: Option<String>,

    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,

    /// External provider linkage: provider kind + subject id at that provider.
    pub external_provider: Option<ProviderKind>,
    pub external_subject: Option<String>,

    pub status: IdentityStatus,
    pub role_ids: Vec<Uuid>,

    #[sqlx(json)]
    pub mfa_methods: Vec<MfaMethod>,

    pub last_login_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Identity {
    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }

    /// Verified second factors; an identity without any skips MFA at login.
    pub fn verified_mfa_methods(&self) -> impl Iterator<Item = &MfaMethod> {
        self.mfa_methods.iter().filter(|m| m.verified)
    }

    pub fn has_mfa(&self) -> bool {
        self.verified_mfa_methods().next().is_some()
    }

    pub fn is_linked_to(&self, provider: ProviderKind, subject: &str) -> bool {
        self.external_provider == Some(provider) && self.external_subject.as_deref() == Some(subject)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum IdentityStatus {
    Active,
    Suspended,
    Locked,
}

impl fmt::Display for IdentityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityStatus::Active => write!(f, "active"),
            IdentityStatus::Suspended => write!(f, "suspended"),
            IdentityStatus::Locked => write!(f, "locked"),
        }
    }
}

/// Fields needed to persist a new identity. The password arrives already hashed.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub password_hash: Option<String>,
    pub external_provider: Option<ProviderKind>,
    pub external_subject: Option<String>,
    pub role_ids: Vec<Uuid>,
}

/// Admin request to create a local identity.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateIdentity {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1, max = 255))]
    pub display_name: Option<String>,

    #[validate(length(min = 8, max = 128))]
    pub password: Option<String>,

    #[serde(default)]
    pub role_ids: Vec<Uuid>,
}

/// Public view of an identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
    pub status: IdentityStatus,
    pub role_ids: Vec<Uuid>,
    pub mfa_enabled: bool,
    pub external_provider: Option<ProviderKind>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<&Identity> for IdentityProfile {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            tenant_id: identity.tenant_id,
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            status: identity.status,
            role_ids: identity.role_ids.clone(),
            mfa_enabled: identity.has_mfa(),
            external_provider: identity.external_provider,
            last_login_at: identity.last_login_at,
        }
    }
}

impl From<Identity> for IdentityProfile {
    fn from(identity: Identity) -> Self {
        IdentityProfile::from(&identity)
    }
}

/// Normalize an email for tenant-scoped lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
