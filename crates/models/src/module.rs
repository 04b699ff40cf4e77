use crate::mfa::MfaMethodKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::Validate;

/// Identifier of a product module (`authentication`, `rbac`, `patient_records`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl ModuleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModuleId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ModuleId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

pub mod ids {
    pub const AUTHENTICATION: &str = "authentication";
    pub const RBAC: &str = "rbac";
    pub const MFA: &str = "mfa";
    pub const ENTERPRISE_SSO: &str = "enterprise_sso";
    pub const SAML: &str = "saml";
    pub const AUDIT: &str = "audit";
    pub const COMPLIANCE: &str = "compliance";
    pub const PATIENT_RECORDS: &str = "patient_records";
    pub const SCHEDULING: &str = "scheduling";
    pub const BILLING: &str = "billing";
}

/// Per-module configuration for a tenant.
///
/// Each module that needs settings gets its own typed struct. A config block
/// for a module the tenant has not enabled is rejected at validation time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfigs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationModuleConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa: Option<MfaModuleConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enterprise_sso: Option<EnterpriseSsoConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saml: Option<SamlConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit: Option<AuditModuleConfig>,
}

impl ModuleConfigs {
    /// Module ids for which a config block is present.
    pub fn configured_modules(&self) -> Vec<&'static str> {
        let mut configured = Vec::new();
        if self.authentication.is_some() {
            configured.push(ids::AUTHENTICATION);
        }
        if self.mfa.is_some() {
            configured.push(ids::MFA);
        }
        if self.enterprise_sso.is_some() {
            configured.push(ids::ENTERPRISE_SSO);
        }
        if self.saml.is_some() {
            configured.push(ids::SAML);
        }
        if self.audit.is_some() {
            configured.push(ids::AUDIT);
        }
        configured
    }

    /// Drop blocks for modules not in `enabled`.
    pub fn retain_enabled(&mut self, enabled: &[ModuleId]) {
        let on = |id: &str| enabled.iter().any(|m| m.as_str() == id);
        if !on(ids::AUTHENTICATION) {
            self.authentication = None;
        }
        if !on(ids::MFA) {
            self.mfa = None;
        }
        if !on(ids::ENTERPRISE_SSO) {
            self.enterprise_sso = None;
        }
        if !on(ids::SAML) {
            self.saml = None;
        }
        if !on(ids::AUDIT) {
            self.audit = None;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AuthenticationModuleConfig {
    #[validate(range(min = 8, max = 128))]
    #[serde(default = "default_password_min_length")]
    pub password_min_length: usize,

    /// Overrides the platform lockout policy for this tenant.
    #[serde(default)]
    pub lockout: Option<LockoutPolicy>,
}

impl Default for AuthenticationModuleConfig {
    fn default() -> Self {
        Self {
            password_min_length: default_password_min_length(),
            lockout: None,
        }
    }
}

fn default_password_min_length() -> usize {
    8
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct MfaModuleConfig {
    #[validate(length(min = 1))]
    pub allowed_methods: Vec<MfaMethodKind>,

    /// Every identity must complete a second factor at login.
    #[serde(default)]
    pub required_for_all: bool,
}

/// OAuth-style enterprise SSO connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct EnterpriseSsoConfig {
    #[validate(url)]
    pub authorize_url: String,

    #[validate(url)]
    pub token_url: String,

    #[validate(url)]
    pub userinfo_url: String,

    #[validate(length(min = 1, max = 255))]
    pub client_id: String,

    #[validate(length(min = 1))]
    pub client_secret: String,

    #[validate(url)]
    pub redirect_uri: String,

    #[serde(default = "default_sso_scopes")]
    pub default_scopes: Vec<String>,
}

fn default_sso_scopes() -> Vec<String> {
    vec!["openid".to_string(), "email".to_string(), "profile".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SamlConfig {
    #[validate(url)]
    pub entry_point: String,

    #[validate(length(min = 1))]
    pub idp_issuer: String,

    /// PEM-encoded signing certificate of the identity provider.
    #[validate(length(min = 1))]
    pub idp_certificate: String,

    #[validate(length(min = 1))]
    pub sp_entity_id: String,

    #[validate(url)]
    pub acs_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct AuditModuleConfig {
    #[validate(range(min = 1, max = 3650))]
    pub retention_days: u32,
}

/// Cool-down applied once the failure threshold is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cooldown {
    Fixed { minutes: i64 },
    /// `base_minutes * 2^(previous lockouts)`, capped at `max_minutes`.
    Exponential { base_minutes: i64, max_minutes: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub window_minutes: i64,
    pub cooldown: Cooldown,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window_minutes: 15,
            cooldown: Cooldown::Fixed { minutes: 15 },
        }
    }
}

impl LockoutPolicy {
    /// Cool-down length for a lockout, given how many lockouts preceded it.
    pub fn cooldown_minutes(&self, previous_lockouts: u32) -> i64 {
        match self.cooldown {
            Cooldown::Fixed { minutes } => minutes,
            Cooldown::Exponential {
                base_minutes,
                max_minutes,
            } => {
                let factor = 1i64.checked_shl(previous_lockouts.min(30)).unwrap_or(i64::MAX);
                base_minutes.saturating_mul(factor).min(max_minutes)
            }
        }
    }

    pub fn validate_policy(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("lockout.max_attempts must be at least 1".to_string());
        }
        if self.window_minutes <= 0 {
            return Err("lockout.window_minutes must be positive".to_string());
        }
        match self.cooldown {
            Cooldown::Fixed { minutes } if minutes <= 0 => {
                Err("lockout.cooldown.minutes must be positive".to_string())
            }
            Cooldown::Exponential {
                base_minutes,
                max_minutes,
            } if base_minutes <= 0 || max_minutes < base_minutes => Err(
                "lockout.cooldown requires 0 < base_minutes <= max_minutes".to_string(),
            ),
            _ => Ok(()),
        }
    }
}
