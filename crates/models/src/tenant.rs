use crate::module::{ModuleConfigs, ModuleId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;
use validator::Validate;

lazy_static::lazy_static! {
    static ref ORG_ID_REGEX: regex::Regex = regex::Regex::new(r"^[a-z0-9][a-z0-9-]{1,62}$").unwrap();
}

/// An isolated customer organization.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    /// Globally unique, human-facing organization slug.
    pub org_id: String,
    pub name: String,
    pub status: TenantStatus,

    /// Enabled modules, in the order they were requested.
    #[sqlx(json)]
    pub enabled_modules: Vec<ModuleId>,

    pub business_type_id: Option<Uuid>,

    #[sqlx(json)]
    pub module_config: ModuleConfigs,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    pub fn is_active(&self) -> bool {
        self.status == TenantStatus::Active
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.enabled_modules.iter().any(|m| m.as_str() == module)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Pending,
    Active,
    Suspended,
}

impl TenantStatus {
    /// The only permitted transitions: pending→active, active→suspended, suspended→active.
    pub fn can_transition_to(&self, next: TenantStatus) -> bool {
        matches!(
            (self, next),
            (TenantStatus::Pending, TenantStatus::Active)
                | (TenantStatus::Active, TenantStatus::Suspended)
                | (TenantStatus::Suspended, TenantStatus::Active)
        )
    }
}

impl fmt::Display for TenantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantStatus::Pending => write!(f, "pending"),
            TenantStatus::Active => write!(f, "active"),
            TenantStatus::Suspended => write!(f, "suspended"),
        }
    }
}

/// Onboarding request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateTenant {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(min = 2, max = 63))]
    pub org_id: String,

    #[validate(email)]
    pub admin_email: String,

    /// Optional initial password for the admin identity.
    #[validate(length(min = 8, max = 128))]
    pub admin_password: Option<String>,

    pub enabled_modules: Vec<ModuleId>,

    pub business_type_id: Option<Uuid>,

    #[serde(default)]
    pub module_config: ModuleConfigs,
}

/// Returns true when `org_id` is a lowercase slug.
pub fn is_valid_org_id(org_id: &str) -> bool {
    ORG_ID_REGEX.is_match(org_id)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateModules {
    pub enabled_modules: Vec<ModuleId>,

    /// Replaces the whole per-module configuration when present.
    pub module_config: Option<ModuleConfigs>,
}

/// Result of a module-set update, reported to the caller and notified to the tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleDiff {
    pub enabled: Vec<ModuleId>,
    pub disabled: Vec<ModuleId>,
}

impl ModuleDiff {
    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty() && self.disabled.is_empty()
    }
}

/// Stored API key. Only the SHA-256 hash of the secret is persisted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantApiKey {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Module family the key belongs to; also the visible key prefix.
    pub family: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    /// First characters of the key, for display.
    pub key_hint: String,
    pub created_at: DateTime<Utc>,
}

/// A freshly minted key. The plaintext is only ever returned once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedApiKey {
    pub family: String,
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantView {
    pub id: Uuid,
    pub org_id: String,
    pub name: String,
    pub status: TenantStatus,
    pub enabled_modules: Vec<ModuleId>,
    pub configured_modules: Vec<String>,
    pub business_type_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<Tenant> for TenantView {
    fn from(tenant: Tenant) -> Self {
        Self {
            id: tenant.id,
            configured_modules: tenant
                .module_config
                .configured_modules()
                .into_iter()
                .map(str::to_string)
                .collect(),
            org_id: tenant.org_id,
            name: tenant.name,
            status: tenant.status,
            enabled_modules: tenant.enabled_modules,
            business_type_id: tenant.business_type_id,
            created_at: tenant.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions() {
        use TenantStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Active.can_transition_to(Suspended));
        assert!(Suspended.can_transition_to(Active));

        assert!(!Pending.can_transition_to(Suspended));
        assert!(!Active.can_transition_to(Pending));
        assert!(!Suspended.can_transition_to(Pending));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn org_id_format() {
        assert!(is_valid_org_id("acme-health"));
        assert!(!is_valid_org_id("Acme"));
        assert!(!is_valid_org_id("-acme"));
        assert!(!is_valid_org_id("a"));
    }
}
