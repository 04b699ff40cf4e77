pub mod audit;
pub mod error_kind;
pub mod identity;
pub mod lockout;
pub mod mfa;
pub mod module;
pub mod permission;
pub mod provider;
pub mod role;
pub mod session;
pub mod tenant;

pub use audit::{
    events, AuditCategory, AuditEvent, AuditEventBuilder, AuditOutcome, AuditQuery, NewAuditEvent,
};
pub use error_kind::ErrorKind;
pub use identity::{
    normalize_email, CreateIdentity, Identity, IdentityProfile, IdentityStatus, NewIdentity,
};
pub use lockout::{AccountLockout, FailureCounter, NewLockout, UnlockRequest};
pub use mfa::{ChallengeAttempt, ChallengePurpose, MfaChallenge, MfaMethod, MfaMethodKind};
pub use module::{
    AuditModuleConfig, AuthenticationModuleConfig, Cooldown, EnterpriseSsoConfig, LockoutPolicy,
    MfaModuleConfig, ModuleConfigs, ModuleId, SamlConfig,
};
pub use permission::{parse_permissions, InvalidPermission, Permission, WILDCARD};
pub use provider::ProviderKind;
pub use role::{
    AssignRole, BusinessType, DefaultRole, NewBusinessType, NewDefaultRole, NewPermissionTemplate,
    NewRole, PermissionTemplate, RiskLevel, Role, RoleRecord, RoleSettings, UpdateRole,
};
pub use session::{AuthSession, NewAuthSession, RevokedToken, SessionRotation};
pub use tenant::{
    is_valid_org_id, CreateTenant, IssuedApiKey, ModuleDiff, Tenant, TenantApiKey, TenantStatus,
    TenantView, UpdateModules,
};
