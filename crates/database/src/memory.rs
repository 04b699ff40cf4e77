//! In-process store for tests and single-node development.
//!
//! All state sits behind one lock, so each trait method is atomic with respect
//! to every other one.

use crate::error::{DatabaseError, Result};
use crate::store::*;
use async_trait::async_trait;
use authcore_models::{
    AccountLockout, AuditEvent, AuditQuery, AuthSession, BusinessType, ChallengeAttempt,
    DefaultRole, FailureCounter, Identity, IdentityStatus, MfaChallenge, MfaMethod, ModuleConfigs,
    ModuleId, NewAuditEvent, NewAuthSession, NewBusinessType, NewDefaultRole, NewIdentity,
    NewLockout, NewPermissionTemplate, PermissionTemplate, ProviderKind, RevokedToken, Role,
    RoleRecord, SessionRotation, Tenant, TenantApiKey, TenantStatus, UpdateRole,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Default)]
struct State {
    tenants: HashMap<Uuid, Tenant>,
    api_keys: HashMap<String, TenantApiKey>,
    identities: HashMap<Uuid, Identity>,
    roles: HashMap<Uuid, Role>,
    business_types: HashMap<Uuid, BusinessType>,
    templates: HashMap<Uuid, PermissionTemplate>,
    default_roles: HashMap<Uuid, DefaultRole>,
    sessions: HashMap<Uuid, AuthSession>,
    revoked_tokens: HashMap<Uuid, RevokedToken>,
    failures: HashMap<(Uuid, String), FailureCounter>,
    lockouts: Vec<AccountLockout>,
    challenges: HashMap<Uuid, MfaChallenge>,
    audit_events: Vec<AuditEvent>,
}

impl State {
    fn identity_mut(&mut self, tenant_id: Uuid, id: Uuid) -> Result<&mut Identity> {
        self.identities
            .get_mut(&id)
            .filter(|identity| identity.tenant_id == tenant_id)
            .ok_or_else(|| DatabaseError::not_found("Identity", &id.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TenantStore for MemoryStore {
    async fn create_tenant(&self, tenant: NewTenantRecord) -> Result<Tenant> {
        let mut state = self.state.write();
        if state.tenants.values().any(|t| t.org_id == tenant.org_id) {
            return Err(DatabaseError::duplicate("Tenant", "org_id"));
        }
        if let (Some(business_type_id), Some(cap)) = (tenant.business_type_id, tenant.max_tenants) {
            let existing = state
                .tenants
                .values()
                .filter(|t| t.business_type_id == Some(business_type_id))
                .count();
            if existing >= usize::try_from(cap).unwrap_or(0) {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "business type {business_type_id} is at its tenant cap"
                )));
            }
        }
        let now = Utc::now();
        let created = Tenant {
            id: Uuid::new_v4(),
            org_id: tenant.org_id,
            name: tenant.name,
            status: TenantStatus::Pending,
            enabled_modules: tenant.enabled_modules,
            business_type_id: tenant.business_type_id,
            module_config: tenant.module_config,
            created_at: now,
            updated_at: now,
        };
        state.tenants.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        Ok(self.state.read().tenants.get(&id).cloned())
    }

    async fn get_tenant_by_org_id(&self, org_id: &str) -> Result<Option<Tenant>> {
        Ok(self
            .state
            .read()
            .tenants
            .values()
            .find(|t| t.org_id == org_id)
            .cloned())
    }

    async fn update_tenant_modules(
        &self,
        id: Uuid,
        modules: Vec<ModuleId>,
        config: ModuleConfigs,
    ) -> Result<Tenant> {
        let mut state = self.state.write();
        let tenant = state
            .tenants
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Tenant", &id.to_string()))?;
        tenant.enabled_modules = modules;
        tenant.module_config = config;
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }

    async fn transition_tenant_status(
        &self,
        id: Uuid,
        from: TenantStatus,
        to: TenantStatus,
    ) -> Result<Option<Tenant>> {
        let mut state = self.state.write();
        let tenant = state
            .tenants
            .get_mut(&id)
            .ok_or_else(|| DatabaseError::not_found("Tenant", &id.to_string()))?;
        if tenant.status != from {
            return Ok(None);
        }
        tenant.status = to;
        tenant.updated_at = Utc::now();
        Ok(Some(tenant.clone()))
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn insert_api_key(&self, key: NewApiKey) -> Result<TenantApiKey> {
        let mut state = self.state.write();
        if state.api_keys.contains_key(&key.key_hash) {
            return Err(DatabaseError::DuplicateEntry("tenant_api_keys_key_hash_key".to_string()));
        }
        if state
            .api_keys
            .values()
            .any(|k| k.tenant_id == key.tenant_id && k.family == key.family)
        {
            return Err(DatabaseError::DuplicateEntry("tenant_api_keys_family_key".to_string()));
        }
        let stored = TenantApiKey {
            id: Uuid::new_v4(),
            tenant_id: key.tenant_id,
            family: key.family,
            key_hash: key.key_hash,
            key_hint: key.key_hint,
            created_at: Utc::now(),
        };
        state.api_keys.insert(stored.key_hash.clone(), stored.clone());
        Ok(stored)
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<TenantApiKey>> {
        Ok(self.state.read().api_keys.get(key_hash).cloned())
    }

    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<TenantApiKey>> {
        let mut keys: Vec<_> = self
            .state
            .read()
            .api_keys
            .values()
            .filter(|k| k.tenant_id == tenant_id)
            .cloned()
            .collect();
        keys.sort_by(|a, b| a.family.cmp(&b.family));
        Ok(keys)
    }
}

#[async_trait]
impl IdentityStore for MemoryStore {
    async fn create_identity(&self, identity: NewIdentity) -> Result<Identity> {
        let mut state = self.state.write();
        let duplicate_email = state
            .identities
            .values()
            .any(|i| i.tenant_id == identity.tenant_id && i.email == identity.email);
        if duplicate_email {
            return Err(DatabaseError::duplicate("Identity", "email"));
        }
        if let (Some(provider), Some(subject)) = (identity.external_provider, identity.external_subject.as_deref()) {
            if state
                .identities
                .values()
                .any(|i| i.tenant_id == identity.tenant_id && i.is_linked_to(provider, subject))
            {
                return Err(DatabaseError::duplicate("Identity", "external_subject"));
            }
        }
        let now = Utc::now();
        let created = Identity {
            id: Uuid::new_v4(),
            tenant_id: identity.tenant_id,
            email: identity.email,
            display_name: identity.display_name,
            password_hash: identity.password_hash,
            external_provider: identity.external_provider,
            external_subject: identity.external_subject,
            status: IdentityStatus::Active,
            role_ids: identity.role_ids,
            mfa_methods: Vec::new(),
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        state.identities.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_identity(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Identity>> {
        Ok(self
            .state
            .read()
            .identities
            .get(&id)
            .filter(|i| i.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_identity_by_email(&self, tenant_id: Uuid, email: &str) -> Result<Option<Identity>> {
        Ok(self
            .state
            .read()
            .identities
            .values()
            .find(|i| i.tenant_id == tenant_id && i.email == email)
            .cloned())
    }

    async fn find_identity_by_external(
        &self,
        tenant_id: Uuid,
        provider: ProviderKind,
        subject: &str,
    ) -> Result<Option<Identity>> {
        Ok(self
            .state
            .read()
            .identities
            .values()
            .find(|i| i.tenant_id == tenant_id && i.is_linked_to(provider, subject))
            .cloned())
    }

    async fn list_identities(&self, tenant_id: Uuid) -> Result<Vec<Identity>> {
        let mut identities: Vec<_> = self
            .state
            .read()
            .identities
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .cloned()
            .collect();
        identities.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(identities)
    }

    async fn link_external_identity(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        provider: ProviderKind,
        subject: &str,
    ) -> Result<Identity> {
        let mut state = self.state.write();
        let taken = state
            .identities
            .values()
            .any(|i| i.tenant_id == tenant_id && i.id != id && i.is_linked_to(provider, subject));
        if taken {
            return Err(DatabaseError::duplicate("Identity", "external_subject"));
        }
        let identity = state.identity_mut(tenant_id, id)?;
        identity.external_provider = Some(provider);
        identity.external_subject = Some(subject.to_string());
        identity.updated_at = Utc::now();
        Ok(identity.clone())
    }

    async fn set_identity_status(&self, tenant_id: Uuid, id: Uuid, status: IdentityStatus) -> Result<Identity> {
        let mut state = self.state.write();
        let identity = state.identity_mut(tenant_id, id)?;
        identity.status = status;
        identity.updated_at = Utc::now();
        Ok(identity.clone())
    }

    async fn add_identity_role(&self, tenant_id: Uuid, id: Uuid, role_id: Uuid) -> Result<Identity> {
        let mut state = self.state.write();
        let role_in_tenant = state
            .roles
            .get(&role_id)
            .map_or(false, |r| r.tenant_id == tenant_id);
        if !role_in_tenant {
            return Err(DatabaseError::not_found("Role", &role_id.to_string()));
        }
        let identity = state.identity_mut(tenant_id, id)?;
        if !identity.role_ids.contains(&role_id) {
            identity.role_ids.push(role_id);
            identity.updated_at = Utc::now();
        }
        Ok(identity.clone())
    }

    async fn remove_identity_role(&self, tenant_id: Uuid, id: Uuid, role_id: Uuid) -> Result<Identity> {
        let mut state = self.state.write();
        let identity = state.identity_mut(tenant_id, id)?;
        let before = identity.role_ids.len();
        identity.role_ids.retain(|r| *r != role_id);
        if identity.role_ids.len() != before {
            identity.updated_at = Utc::now();
        }
        Ok(identity.clone())
    }

    async fn save_mfa_method(&self, tenant_id: Uuid, id: Uuid, method: MfaMethod) -> Result<Identity> {
        let mut state = self.state.write();
        let identity = state.identity_mut(tenant_id, id)?;
        match identity.mfa_methods.iter_mut().find(|m| m.id == method.id) {
            Some(existing) => *existing = method,
            None => identity.mfa_methods.push(method),
        }
        identity.updated_at = Utc::now();
        Ok(identity.clone())
    }

    async fn record_login(&self, tenant_id: Uuid, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write();
        state.identity_mut(tenant_id, id)?.last_login_at = Some(at);
        Ok(())
    }
}

#[async_trait]
impl RoleStore for MemoryStore {
    async fn create_role(&self, role: RoleRecord) -> Result<Role> {
        let mut state = self.state.write();
        if state
            .roles
            .values()
            .any(|r| r.tenant_id == role.tenant_id && r.name == role.name)
        {
            return Err(DatabaseError::duplicate("Role", "name"));
        }
        let now = Utc::now();
        let created = Role {
            id: Uuid::new_v4(),
            tenant_id: role.tenant_id,
            name: role.name,
            description: role.description,
            permissions: role.permissions,
            template_id: role.template_id,
            business_type_id: role.business_type_id,
            is_system_role: role.is_system_role,
            can_be_modified: role.can_be_modified,
            is_default: role.is_default,
            priority: role.priority,
            settings: role.settings,
            created_at: now,
            updated_at: now,
        };
        state.roles.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_role(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Role>> {
        Ok(self
            .state
            .read()
            .roles
            .get(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .cloned())
    }

    async fn get_roles(&self, tenant_id: Uuid, ids: &[Uuid]) -> Result<Vec<Role>> {
        let state = self.state.read();
        Ok(ids
            .iter()
            .filter_map(|id| state.roles.get(id))
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect())
    }

    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>> {
        let mut roles: Vec<_> = self
            .state
            .read()
            .roles
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        roles.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }

    async fn update_role(&self, tenant_id: Uuid, id: Uuid, update: UpdateRole) -> Result<Role> {
        let mut state = self.state.write();
        if let Some(name) = update.name.as_deref() {
            if state
                .roles
                .values()
                .any(|r| r.tenant_id == tenant_id && r.id != id && r.name == name)
            {
                return Err(DatabaseError::duplicate("Role", "name"));
            }
        }
        let role = state
            .roles
            .get_mut(&id)
            .filter(|r| r.tenant_id == tenant_id)
            .ok_or_else(|| DatabaseError::not_found("Role", &id.to_string()))?;

        if let Some(name) = update.name {
            role.name = name;
        }
        if let Some(description) = update.description {
            role.description = Some(description);
        }
        if let Some(permissions) = update.permissions {
            role.permissions = permissions;
        }
        if let Some(is_default) = update.is_default {
            role.is_default = is_default;
        }
        if let Some(priority) = update.priority {
            role.priority = priority;
        }
        if let Some(settings) = update.settings {
            role.settings = settings;
        }
        role.updated_at = Utc::now();
        Ok(role.clone())
    }

    async fn delete_role_if_unassigned(&self, tenant_id: Uuid, id: Uuid) -> Result<RoleDeletion> {
        let mut state = self.state.write();
        if !state.roles.get(&id).map_or(false, |r| r.tenant_id == tenant_id) {
            return Ok(RoleDeletion::NotFound);
        }
        let assigned = state
            .identities
            .values()
            .any(|i| i.tenant_id == tenant_id && i.role_ids.contains(&id));
        if assigned {
            return Ok(RoleDeletion::StillAssigned);
        }
        state.roles.remove(&id);
        Ok(RoleDeletion::Deleted)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn create_business_type(&self, business_type: NewBusinessType) -> Result<BusinessType> {
        let mut state = self.state.write();
        if state.business_types.values().any(|b| b.name == business_type.name) {
            return Err(DatabaseError::duplicate("BusinessType", "name"));
        }
        let created = BusinessType {
            id: Uuid::new_v4(),
            name: business_type.name,
            description: business_type.description,
            risk_level: business_type.risk_level,
            compliance_frameworks: business_type.compliance_frameworks,
            default_permissions: business_type.default_permissions,
            max_tenants: business_type.max_tenants,
            created_at: Utc::now(),
        };
        state.business_types.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_business_type(&self, id: Uuid) -> Result<Option<BusinessType>> {
        Ok(self.state.read().business_types.get(&id).cloned())
    }

    async fn get_business_types(&self, ids: &[Uuid]) -> Result<Vec<BusinessType>> {
        let state = self.state.read();
        Ok(ids.iter().filter_map(|id| state.business_types.get(id).cloned()).collect())
    }

    async fn list_business_types(&self) -> Result<Vec<BusinessType>> {
        let mut types: Vec<_> = self.state.read().business_types.values().cloned().collect();
        types.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(types)
    }

    async fn create_template(&self, template: NewPermissionTemplate) -> Result<PermissionTemplate> {
        let created = PermissionTemplate {
            id: Uuid::new_v4(),
            tenant_id: template.tenant_id,
            name: template.name,
            description: template.description,
            permissions: template.permissions,
            business_type_ids: template.business_type_ids,
            is_default: template.is_default,
            created_at: Utc::now(),
        };
        self.state.write().templates.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_templates(&self, ids: &[Uuid]) -> Result<Vec<PermissionTemplate>> {
        let state = self.state.read();
        Ok(ids.iter().filter_map(|id| state.templates.get(id).cloned()).collect())
    }

    async fn list_templates(&self, tenant_id: Option<Uuid>) -> Result<Vec<PermissionTemplate>> {
        let mut templates: Vec<_> = self
            .state
            .read()
            .templates
            .values()
            .filter(|t| t.tenant_id.is_none() || t.tenant_id == tenant_id)
            .cloned()
            .collect();
        templates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(templates)
    }

    async fn delete_template(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write();
        match state.templates.get(&id) {
            Some(template) if !template.is_default => {
                state.templates.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_default_role(&self, role: NewDefaultRole) -> Result<DefaultRole> {
        let created = DefaultRole {
            id: Uuid::new_v4(),
            name: role.name,
            description: role.description,
            business_type_id: role.business_type_id,
            template_id: role.template_id,
            permissions: role.permissions,
            priority: role.priority,
            settings: role.settings,
            is_system_role: role.is_system_role,
            created_at: Utc::now(),
        };
        self.state.write().default_roles.insert(created.id, created.clone());
        Ok(created)
    }

    async fn list_default_roles(&self) -> Result<Vec<DefaultRole>> {
        let mut roles: Vec<_> = self.state.read().default_roles.values().cloned().collect();
        roles.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(roles)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_session(&self, session: NewAuthSession) -> Result<AuthSession> {
        let mut state = self.state.write();
        if state
            .sessions
            .values()
            .any(|s| s.refresh_token_hash == session.refresh_token_hash)
        {
            return Err(DatabaseError::DuplicateEntry("auth_sessions_refresh_hash_key".to_string()));
        }
        let created = AuthSession {
            id: session.id,
            tenant_id: session.tenant_id,
            identity_id: session.identity_id,
            provider_kind: session.provider_kind,
            mfa_verified: session.mfa_verified,
            access_token_id: session.access_token_id,
            refresh_token_hash: session.refresh_token_hash,
            refresh_expires_at: session.refresh_expires_at,
            created_at: Utc::now(),
            last_refreshed_at: None,
            revoked_at: None,
        };
        state.sessions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_session(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<AuthSession>> {
        Ok(self
            .state
            .read()
            .sessions
            .get(&id)
            .filter(|s| s.tenant_id == tenant_id)
            .cloned())
    }

    async fn rotate_refresh(&self, rotation: SessionRotation, now: DateTime<Utc>) -> Result<Option<AuthSession>> {
        let mut state = self.state.write();
        let session = state
            .sessions
            .values_mut()
            .find(|s| s.refresh_token_hash == rotation.old_refresh_hash && s.is_usable(now));
        Ok(session.map(|session| {
            session.refresh_token_hash = rotation.new_refresh_hash;
            session.access_token_id = rotation.new_access_token_id;
            session.last_refreshed_at = Some(now);
            session.clone()
        }))
    }

    async fn upgrade_session(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        access_token_id: Uuid,
        mfa_verified: bool,
    ) -> Result<Option<AuthSession>> {
        let mut state = self.state.write();
        Ok(state
            .sessions
            .get_mut(&id)
            .filter(|s| s.tenant_id == tenant_id && s.revoked_at.is_none())
            .map(|session| {
                session.access_token_id = access_token_id;
                session.mfa_verified = mfa_verified;
                session.clone()
            }))
    }

    async fn revoke_session(&self, tenant_id: Uuid, id: Uuid, now: DateTime<Utc>) -> Result<Option<AuthSession>> {
        let mut state = self.state.write();
        Ok(state
            .sessions
            .get_mut(&id)
            .filter(|s| s.tenant_id == tenant_id && s.revoked_at.is_none())
            .map(|session| {
                session.revoked_at = Some(now);
                session.clone()
            }))
    }

    async fn revoke_identity_sessions(
        &self,
        tenant_id: Uuid,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthSession>> {
        let mut state = self.state.write();
        Ok(state
            .sessions
            .values_mut()
            .filter(|s| s.tenant_id == tenant_id && s.identity_id == identity_id && s.revoked_at.is_none())
            .map(|session| {
                session.revoked_at = Some(now);
                session.clone()
            })
            .collect())
    }

    async fn revoke_token(&self, token: RevokedToken) -> Result<()> {
        self.state.write().revoked_tokens.entry(token.token_id).or_insert(token);
        Ok(())
    }

    async fn is_token_revoked(&self, token_id: Uuid) -> Result<bool> {
        Ok(self.state.read().revoked_tokens.contains_key(&token_id))
    }
}

#[async_trait]
impl LockoutStore for MemoryStore {
    async fn record_login_failure(
        &self,
        tenant_id: Uuid,
        email: &str,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i32> {
        let mut state = self.state.write();
        let counter = state
            .failures
            .entry((tenant_id, email.to_string()))
            .or_insert_with(|| FailureCounter {
                tenant_id,
                email: email.to_string(),
                failures: 0,
                window_started_at: now,
            });
        if counter.window_started_at < window_start {
            counter.failures = 0;
            counter.window_started_at = now;
        }
        counter.failures += 1;
        Ok(counter.failures)
    }

    async fn reset_login_failures(&self, tenant_id: Uuid, email: &str) -> Result<()> {
        self.state.write().failures.remove(&(tenant_id, email.to_string()));
        Ok(())
    }

    async fn active_lockout(&self, tenant_id: Uuid, email: &str, now: DateTime<Utc>) -> Result<Option<AccountLockout>> {
        Ok(self
            .state
            .read()
            .lockouts
            .iter()
            .find(|l| l.tenant_id == tenant_id && l.email == email && l.is_active(now))
            .cloned())
    }

    async fn open_lockout(&self, lockout: NewLockout, now: DateTime<Utc>) -> Result<(AccountLockout, bool)> {
        let mut state = self.state.write();
        if let Some(open) = state
            .lockouts
            .iter()
            .find(|l| l.tenant_id == lockout.tenant_id && l.email == lockout.email && l.is_active(now))
        {
            return Ok((open.clone(), false));
        }
        let created = AccountLockout {
            id: Uuid::new_v4(),
            tenant_id: lockout.tenant_id,
            email: lockout.email,
            reason: lockout.reason,
            locked_at: now,
            expires_at: lockout.expires_at,
            unlocked_at: None,
            unlocked_by: None,
            unlock_reason: None,
        };
        state.lockouts.push(created.clone());
        Ok((created, true))
    }

    async fn count_lockouts(&self, tenant_id: Uuid, email: &str) -> Result<i64> {
        Ok(self
            .state
            .read()
            .lockouts
            .iter()
            .filter(|l| l.tenant_id == tenant_id && l.email == email)
            .count() as i64)
    }

    async fn unlock(
        &self,
        tenant_id: Uuid,
        email: &str,
        unlocked_by: Option<Uuid>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccountLockout>> {
        let mut state = self.state.write();
        Ok(state
            .lockouts
            .iter_mut()
            .find(|l| l.tenant_id == tenant_id && l.email == email && l.is_active(now))
            .map(|lockout| {
                lockout.unlocked_at = Some(now);
                lockout.unlocked_by = unlocked_by;
                lockout.unlock_reason = Some(reason.to_string());
                lockout.clone()
            }))
    }
}

#[async_trait]
impl MfaChallengeStore for MemoryStore {
    async fn create_challenge(&self, challenge: MfaChallenge) -> Result<MfaChallenge> {
        self.state.write().challenges.insert(challenge.id, challenge.clone());
        Ok(challenge)
    }

    async fn get_challenge(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<MfaChallenge>> {
        Ok(self
            .state
            .read()
            .challenges
            .get(&id)
            .filter(|c| c.tenant_id == tenant_id)
            .cloned())
    }

    async fn attempt_challenge(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        code_matched: bool,
        now: DateTime<Utc>,
    ) -> Result<ChallengeAttempt> {
        let mut state = self.state.write();
        let Some(challenge) = state
            .challenges
            .get_mut(&id)
            .filter(|c| c.tenant_id == tenant_id && !c.is_consumed() && !c.is_expired(now))
        else {
            return Ok(ChallengeAttempt::Unavailable);
        };

        if code_matched {
            challenge.consumed_at = Some(now);
            return Ok(ChallengeAttempt::Verified(challenge.clone()));
        }

        challenge.attempts_remaining -= 1;
        if challenge.attempts_remaining <= 0 {
            challenge.consumed_at = Some(now);
            Ok(ChallengeAttempt::Exhausted)
        } else {
            Ok(ChallengeAttempt::Rejected {
                attempts_remaining: challenge.attempts_remaining,
            })
        }
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append_audit_event(&self, event: NewAuditEvent) -> Result<AuditEvent> {
        let stored = AuditEvent {
            id: Uuid::new_v4(),
            tenant_id: event.tenant_id,
            event_type: event.event_type,
            category: event.category,
            outcome: event.outcome,
            actor_id: event.actor_id,
            target_type: event.target_type,
            target_id: event.target_id,
            reason: event.reason,
            detail: event.detail,
            metadata: event.metadata,
            created_at: Utc::now(),
        };
        self.state.write().audit_events.push(stored.clone());
        Ok(stored)
    }

    async fn list_audit_events(&self, tenant_id: Uuid, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let state = self.state.read();
        Ok(state
            .audit_events
            .iter()
            .rev()
            .filter(|e| e.tenant_id == Some(tenant_id) && query.matches(e))
            .skip(query.effective_offset() as usize)
            .take(query.effective_limit() as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authcore_models::{ChallengePurpose, MfaMethodKind, Permission, RoleSettings};
    use chrono::Duration;
    use std::sync::Arc;

    async fn tenant(store: &MemoryStore, org_id: &str) -> Tenant {
        store
            .create_tenant(NewTenantRecord {
                org_id: org_id.to_string(),
                name: org_id.to_string(),
                enabled_modules: vec!["authentication".into(), "rbac".into()],
                business_type_id: None,
                module_config: ModuleConfigs::default(),
                max_tenants: None,
            })
            .await
            .unwrap()
    }

    fn role_record(tenant_id: Uuid, name: &str) -> RoleRecord {
        RoleRecord {
            tenant_id,
            name: name.to_string(),
            description: None,
            permissions: vec![Permission::parse("patient.read").unwrap()],
            template_id: None,
            business_type_id: None,
            is_system_role: false,
            can_be_modified: true,
            is_default: false,
            priority: 10,
            settings: RoleSettings::default(),
        }
    }

    fn identity(tenant_id: Uuid, email: &str) -> NewIdentity {
        NewIdentity {
            tenant_id,
            email: email.to_string(),
            display_name: None,
            password_hash: None,
            external_provider: None,
            external_subject: None,
            role_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn org_id_is_unique() {
        let store = MemoryStore::new();
        tenant(&store, "acme").await;
        let err = store
            .create_tenant(NewTenantRecord {
                org_id: "acme".to_string(),
                name: "Other".to_string(),
                enabled_modules: Vec::new(),
                business_type_id: None,
                module_config: ModuleConfigs::default(),
                max_tenants: None,
            })
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn same_email_in_two_tenants_stays_separate() {
        let store = MemoryStore::new();
        let a = tenant(&store, "tenant-a").await;
        let b = tenant(&store, "tenant-b").await;
        let in_a = store.create_identity(identity(a.id, "user@x.com")).await.unwrap();
        let in_b = store.create_identity(identity(b.id, "user@x.com")).await.unwrap();

        let found = store.find_identity_by_email(a.id, "user@x.com").await.unwrap().unwrap();
        assert_eq!(found.id, in_a.id);
        assert!(store.get_identity(a.id, in_b.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn assigned_roles_cannot_be_deleted() {
        let store = MemoryStore::new();
        let t = tenant(&store, "acme").await;
        let role = store.create_role(role_record(t.id, "nurse")).await.unwrap();
        let user = store.create_identity(identity(t.id, "n@x.com")).await.unwrap();
        store.add_identity_role(t.id, user.id, role.id).await.unwrap();

        assert_eq!(
            store.delete_role_if_unassigned(t.id, role.id).await.unwrap(),
            RoleDeletion::StillAssigned
        );
        store.remove_identity_role(t.id, user.id, role.id).await.unwrap();
        assert_eq!(
            store.delete_role_if_unassigned(t.id, role.id).await.unwrap(),
            RoleDeletion::Deleted
        );
    }

    #[tokio::test]
    async fn cross_tenant_role_assignment_is_rejected() {
        let store = MemoryStore::new();
        let a = tenant(&store, "tenant-a").await;
        let b = tenant(&store, "tenant-b").await;
        let foreign_role = store.create_role(role_record(b.id, "admin")).await.unwrap();
        let user = store.create_identity(identity(a.id, "u@x.com")).await.unwrap();

        let err = store.add_identity_role(a.id, user.id, foreign_role.id).await.unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound(_)));
    }

    #[tokio::test]
    async fn concurrent_failures_are_all_counted() {
        let store = Arc::new(MemoryStore::new());
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .record_login_failure(tenant_id, "u@x.com", now - Duration::minutes(15), now)
                    .await
                    .unwrap()
            }));
        }
        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort();
        assert_eq!(counts, (1..=20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn stale_failure_window_restarts() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let start = Utc::now();
        for _ in 0..3 {
            store
                .record_login_failure(tenant_id, "u@x.com", start - Duration::minutes(15), start)
                .await
                .unwrap();
        }
        let later = start + Duration::minutes(30);
        let count = store
            .record_login_failure(tenant_id, "u@x.com", later - Duration::minutes(15), later)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn lockout_is_opened_once() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        let new = || NewLockout {
            tenant_id,
            email: "u@x.com".to_string(),
            reason: "too_many_failed_attempts".to_string(),
            expires_at: Some(now + Duration::minutes(15)),
        };

        let (first, created) = store.open_lockout(new(), now).await.unwrap();
        assert!(created);
        let (second, created_again) = store.open_lockout(new(), now).await.unwrap();
        assert!(!created_again);
        assert_eq!(first.id, second.id);

        let unlocked = store
            .unlock(tenant_id, "u@x.com", None, "verified by phone", now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unlocked.unlock_reason.as_deref(), Some("verified by phone"));
        assert!(store.active_lockout(tenant_id, "u@x.com", now).await.unwrap().is_none());
        assert_eq!(store.count_lockouts(tenant_id, "u@x.com").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn refresh_rotation_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let session = store
            .create_session(NewAuthSession {
                id: Uuid::new_v4(),
                tenant_id: Uuid::new_v4(),
                identity_id: Uuid::new_v4(),
                provider_kind: ProviderKind::Local,
                mfa_verified: false,
                access_token_id: Uuid::new_v4(),
                refresh_token_hash: "old".to_string(),
                refresh_expires_at: Utc::now() + Duration::days(1),
            })
            .await
            .unwrap();

        let mut handles = Vec::new();
        for n in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .rotate_refresh(
                        SessionRotation {
                            old_refresh_hash: "old".to_string(),
                            new_refresh_hash: format!("new-{n}"),
                            new_access_token_id: Uuid::new_v4(),
                        },
                        Utc::now(),
                    )
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if let Some(rotated) = handle.await.unwrap() {
                assert_eq!(rotated.id, session.id);
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn challenge_budget_is_spent_then_consumed() {
        let store = MemoryStore::new();
        let tenant_id = Uuid::new_v4();
        let now = Utc::now();
        let challenge = store
            .create_challenge(MfaChallenge {
                id: Uuid::new_v4(),
                tenant_id,
                identity_id: Uuid::new_v4(),
                method_id: Uuid::new_v4(),
                method: MfaMethodKind::Totp,
                code_hash: None,
                purpose: ChallengePurpose::Enrollment,
                attempts_remaining: 2,
                expires_at: now + Duration::minutes(5),
                consumed_at: None,
                created_at: now,
            })
            .await
            .unwrap();

        assert!(matches!(
            store.attempt_challenge(tenant_id, challenge.id, false, now).await.unwrap(),
            ChallengeAttempt::Rejected { attempts_remaining: 1 }
        ));
        assert!(matches!(
            store.attempt_challenge(tenant_id, challenge.id, false, now).await.unwrap(),
            ChallengeAttempt::Exhausted
        ));
        assert!(matches!(
            store.attempt_challenge(tenant_id, challenge.id, true, now).await.unwrap(),
            ChallengeAttempt::Unavailable
        ));
    }
}
