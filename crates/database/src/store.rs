//! Storage interface consumed by the services.
//!
//! Every query is scoped by tenant id except catalog reads (platform
//! blueprints) and the two unique-key lookups that arrive without a tenant:
//! API key hash and refresh token hash. Operations that guard security state
//! (failure counters, lockouts, refresh rotation, challenge attempts, role
//! deletion) are single atomic steps in every implementation.

use crate::error::Result;
use async_trait::async_trait;
use authcore_models::{
    AccountLockout, AuditEvent, AuditQuery, AuthSession, BusinessType, ChallengeAttempt,
    DefaultRole, Identity, IdentityStatus, MfaChallenge, MfaMethod, ModuleConfigs, ModuleId,
    NewAuditEvent, NewAuthSession, NewBusinessType, NewDefaultRole, NewIdentity, NewLockout,
    NewPermissionTemplate, PermissionTemplate, ProviderKind, RevokedToken, Role, RoleRecord,
    SessionRotation, Tenant, TenantApiKey, TenantStatus, UpdateRole,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct NewTenantRecord {
    pub org_id: String,
    pub name: String,
    pub enabled_modules: Vec<ModuleId>,
    pub business_type_id: Option<Uuid>,
    pub module_config: ModuleConfigs,
    /// Cap on tenants sharing `business_type_id`, checked in the same step as the insert.
    pub max_tenants: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub tenant_id: Uuid,
    pub family: String,
    pub key_hash: String,
    pub key_hint: String,
}

/// Outcome of a guarded role delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleDeletion {
    Deleted,
    StillAssigned,
    NotFound,
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Fails with `DuplicateEntry` when the org id is taken and with
    /// `ConstraintViolation` when the business type is at `max_tenants`.
    async fn create_tenant(&self, tenant: NewTenantRecord) -> Result<Tenant>;
    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>>;
    async fn get_tenant_by_org_id(&self, org_id: &str) -> Result<Option<Tenant>>;
    async fn update_tenant_modules(
        &self,
        id: Uuid,
        modules: Vec<ModuleId>,
        config: ModuleConfigs,
    ) -> Result<Tenant>;
    /// Compare-and-set on status. Returns `None` when the current status is not `from`.
    async fn transition_tenant_status(
        &self,
        id: Uuid,
        from: TenantStatus,
        to: TenantStatus,
    ) -> Result<Option<Tenant>>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Fails with `DuplicateEntry` on a hash collision; callers retry with a fresh key.
    async fn insert_api_key(&self, key: NewApiKey) -> Result<TenantApiKey>;
    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<TenantApiKey>>;
    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<TenantApiKey>>;
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Fails with `DuplicateEntry` when the email exists in the tenant.
    async fn create_identity(&self, identity: NewIdentity) -> Result<Identity>;
    async fn get_identity(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Identity>>;
    async fn find_identity_by_email(&self, tenant_id: Uuid, email: &str) -> Result<Option<Identity>>;
    async fn find_identity_by_external(
        &self,
        tenant_id: Uuid,
        provider: ProviderKind,
        subject: &str,
    ) -> Result<Option<Identity>>;
    async fn list_identities(&self, tenant_id: Uuid) -> Result<Vec<Identity>>;
    async fn link_external_identity(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        provider: ProviderKind,
        subject: &str,
    ) -> Result<Identity>;
    async fn set_identity_status(&self, tenant_id: Uuid, id: Uuid, status: IdentityStatus) -> Result<Identity>;
    /// Idempotent.
    async fn add_identity_role(&self, tenant_id: Uuid, id: Uuid, role_id: Uuid) -> Result<Identity>;
    /// Idempotent.
    async fn remove_identity_role(&self, tenant_id: Uuid, id: Uuid, role_id: Uuid) -> Result<Identity>;
    /// Insert or replace (by method id) one MFA method.
    async fn save_mfa_method(&self, tenant_id: Uuid, id: Uuid, method: MfaMethod) -> Result<Identity>;
    async fn record_login(&self, tenant_id: Uuid, id: Uuid, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait RoleStore: Send + Sync {
    /// Fails with `DuplicateEntry` when the name exists in the tenant.
    async fn create_role(&self, role: RoleRecord) -> Result<Role>;
    async fn get_role(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Role>>;
    /// Missing ids are skipped.
    async fn get_roles(&self, tenant_id: Uuid, ids: &[Uuid]) -> Result<Vec<Role>>;
    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>>;
    async fn update_role(&self, tenant_id: Uuid, id: Uuid, update: UpdateRole) -> Result<Role>;
    /// Deletes only when no identity in the tenant holds the role, checked in the same step.
    async fn delete_role_if_unassigned(&self, tenant_id: Uuid, id: Uuid) -> Result<RoleDeletion>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn create_business_type(&self, business_type: NewBusinessType) -> Result<BusinessType>;
    async fn get_business_type(&self, id: Uuid) -> Result<Option<BusinessType>>;
    async fn get_business_types(&self, ids: &[Uuid]) -> Result<Vec<BusinessType>>;
    async fn list_business_types(&self) -> Result<Vec<BusinessType>>;

    async fn create_template(&self, template: NewPermissionTemplate) -> Result<PermissionTemplate>;
    async fn get_templates(&self, ids: &[Uuid]) -> Result<Vec<PermissionTemplate>>;
    /// Global templates plus those owned by `tenant_id` when given.
    async fn list_templates(&self, tenant_id: Option<Uuid>) -> Result<Vec<PermissionTemplate>>;
    /// Never deletes a default template; returns whether a row was removed.
    async fn delete_template(&self, id: Uuid) -> Result<bool>;

    async fn create_default_role(&self, role: NewDefaultRole) -> Result<DefaultRole>;
    async fn list_default_roles(&self) -> Result<Vec<DefaultRole>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: NewAuthSession) -> Result<AuthSession>;
    async fn get_session(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<AuthSession>>;
    /// Swap the refresh hash only if `old_refresh_hash` is still current, unrevoked
    /// and unexpired. Of any number of concurrent callers at most one gets `Some`.
    async fn rotate_refresh(&self, rotation: SessionRotation, now: DateTime<Utc>) -> Result<Option<AuthSession>>;
    /// Re-point an open session at a new access token (step-up MFA).
    async fn upgrade_session(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        access_token_id: Uuid,
        mfa_verified: bool,
    ) -> Result<Option<AuthSession>>;
    async fn revoke_session(&self, tenant_id: Uuid, id: Uuid, now: DateTime<Utc>) -> Result<Option<AuthSession>>;
    /// Revokes every open session of the identity and returns them.
    async fn revoke_identity_sessions(
        &self,
        tenant_id: Uuid,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthSession>>;

    async fn revoke_token(&self, token: RevokedToken) -> Result<()>;
    async fn is_token_revoked(&self, token_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait LockoutStore: Send + Sync {
    /// Atomically increment the failure counter, restarting it when the current
    /// window began before `window_start`. Returns the count after increment.
    async fn record_login_failure(
        &self,
        tenant_id: Uuid,
        email: &str,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i32>;
    async fn reset_login_failures(&self, tenant_id: Uuid, email: &str) -> Result<()>;

    async fn active_lockout(&self, tenant_id: Uuid, email: &str, now: DateTime<Utc>) -> Result<Option<AccountLockout>>;
    /// Create a lockout unless one is already open; returns the open lockout and
    /// whether this call created it.
    async fn open_lockout(&self, lockout: NewLockout, now: DateTime<Utc>) -> Result<(AccountLockout, bool)>;
    async fn count_lockouts(&self, tenant_id: Uuid, email: &str) -> Result<i64>;
    async fn unlock(
        &self,
        tenant_id: Uuid,
        email: &str,
        unlocked_by: Option<Uuid>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccountLockout>>;
}

#[async_trait]
pub trait MfaChallengeStore: Send + Sync {
    async fn create_challenge(&self, challenge: MfaChallenge) -> Result<MfaChallenge>;
    async fn get_challenge(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<MfaChallenge>>;
    /// Record one verification attempt. Success consumes the challenge; a
    /// failure spends one attempt and consumes it when the budget hits zero.
    async fn attempt_challenge(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        code_matched: bool,
        now: DateTime<Utc>,
    ) -> Result<ChallengeAttempt>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append_audit_event(&self, event: NewAuditEvent) -> Result<AuditEvent>;
    async fn list_audit_events(&self, tenant_id: Uuid, query: &AuditQuery) -> Result<Vec<AuditEvent>>;
}

/// Everything the services need from persistence.
pub trait Store:
    TenantStore
    + ApiKeyStore
    + IdentityStore
    + RoleStore
    + CatalogStore
    + SessionStore
    + LockoutStore
    + MfaChallengeStore
    + AuditStore
{
}

impl<T> Store for T where
    T: TenantStore
        + ApiKeyStore
        + IdentityStore
        + RoleStore
        + CatalogStore
        + SessionStore
        + LockoutStore
        + MfaChallengeStore
        + AuditStore
{
}
