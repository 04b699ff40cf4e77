//! Tenant Registry: onboarding, module entitlements, lifecycle status and
//! API key resolution.
//!
//! Tenants are created `pending` and only become `active` once every
//! onboarding step (API keys, default roles, admin identity) has succeeded.
//! A tenant left `pending` by a failed onboarding keeps its org id reserved.

use crate::api_keys::{generate_api_key, hash_api_key, key_family};
use crate::context::TenantContext;
use crate::error::{Result, TenantError};
use crate::notifier::{kinds, Notification, NotificationDispatcher};
use authcore_authz::{key_families, validate_module_configs, validate_module_set, CatalogService};
use authcore_cache::{tenant_cache_key, Cache};
use authcore_database::{AuditEmitter, DatabaseError, NewApiKey, NewTenantRecord, Store};
use authcore_models::{
    events, is_valid_org_id, normalize_email, AuditCategory, AuditEventBuilder, CreateTenant,
    IdentityProfile, IssuedApiKey, ModuleDiff, ModuleId, NewIdentity, Permission, Role,
    RoleRecord, RoleSettings, Tenant, TenantApiKey, TenantStatus, UpdateModules,
};
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use validator::Validate;

/// Attempts per key before giving up on a run of hash collisions.
const MAX_KEY_ATTEMPTS: u32 = 5;

/// Upper bound on how stale a cached tenant snapshot may be.
pub const MAX_TENANT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Name of the system role every tenant gets; holds `*`.
pub const TENANT_ADMIN_ROLE: &str = "tenant-admin";

/// Default role created when the catalog has none for the tenant.
pub const MEMBER_ROLE: &str = "member";

/// Everything onboarding produced. API key plaintexts appear only here.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardedTenant {
    pub tenant: Tenant,
    pub api_keys: Vec<IssuedApiKey>,
    pub roles: Vec<Role>,
    pub admin: IdentityProfile,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleUpdate {
    pub tenant: Tenant,
    pub diff: ModuleDiff,
    /// Keys minted for module families the tenant did not hold before.
    pub new_api_keys: Vec<IssuedApiKey>,
}

#[derive(Clone)]
pub struct TenantRegistry {
    store: Arc<dyn Store>,
    cache: Cache,
    cache_ttl: Duration,
    audit: AuditEmitter,
    catalog: CatalogService,
    notifier: NotificationDispatcher,
}

impl TenantRegistry {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Cache,
        cache_ttl: Duration,
        audit: AuditEmitter,
        notifier: NotificationDispatcher,
    ) -> Self {
        Self {
            catalog: CatalogService::new(store.clone(), audit.clone()),
            store,
            cache,
            cache_ttl: cache_ttl.min(MAX_TENANT_CACHE_TTL),
            audit,
            notifier,
        }
    }

    /// Onboard a tenant. `admin_password_hash` is the already-hashed
    /// initial password of the admin identity, if one was given.
    pub async fn create_tenant(
        &self,
        request: CreateTenant,
        admin_password_hash: Option<String>,
    ) -> Result<OnboardedTenant> {
        request.validate()?;
        if !is_valid_org_id(&request.org_id) {
            return Err(TenantError::Validation(format!(
                "org id '{}' must be a lowercase slug of letters, digits and dashes",
                request.org_id
            )));
        }
        validate_module_set(&request.enabled_modules).map_err(authcore_authz::AuthzError::from)?;
        validate_module_configs(&request.enabled_modules, &request.module_config).map_err(TenantError::Validation)?;

        let business_type = match request.business_type_id {
            Some(business_type_id) => Some(
                self.store
                    .get_business_type(business_type_id)
                    .await?
                    .ok_or_else(|| TenantError::Validation(format!("unknown business type {business_type_id}")))?,
            ),
            None => None,
        };

        let tenant = self
            .store
            .create_tenant(NewTenantRecord {
                org_id: request.org_id.clone(),
                name: request.name.clone(),
                enabled_modules: request.enabled_modules.clone(),
                business_type_id: request.business_type_id,
                module_config: request.module_config.clone(),
                max_tenants: business_type.as_ref().and_then(|bt| bt.max_tenants),
            })
            .await
            .map_err(|e| match e {
                DatabaseError::DuplicateEntry(_) => {
                    TenantError::Conflict(format!("org id '{}' is already taken", request.org_id))
                }
                DatabaseError::ConstraintViolation(_) => match &business_type {
                    Some(bt) => TenantError::Conflict(format!(
                        "business type '{}' allows at most {} tenants",
                        bt.name,
                        bt.max_tenants.unwrap_or_default()
                    )),
                    None => TenantError::Conflict("tenant cap reached".to_string()),
                },
                other => other.into(),
            })?;

        let onboarded = match self.provision(&tenant, &request, admin_password_hash).await {
            Ok(onboarded) => onboarded,
            Err(e) => {
                tracing::error!(
                    tenant_id = %tenant.id,
                    org_id = %tenant.org_id,
                    error = %e,
                    "Tenant onboarding failed; tenant left pending"
                );
                return Err(e);
            }
        };

        tracing::info!(tenant_id = %tenant.id, org_id = %tenant.org_id, "Tenant onboarded");
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant.id), events::TENANT_CREATED, AuditCategory::TenantManagement)
                    .target("tenant", tenant.id)
                    .detail(tenant.org_id.clone())
                    .metadata(serde_json::json!({ "modules": onboarded.tenant.enabled_modules }))
                    .build(),
            )
            .await;
        self.notifier.dispatch(Notification::new(
            tenant.id,
            kinds::TENANT_CREATED,
            serde_json::json!({
                "orgId": tenant.org_id,
                "enabledModules": onboarded.tenant.enabled_modules,
            }),
        ));

        Ok(onboarded)
    }

    async fn provision(
        &self,
        tenant: &Tenant,
        request: &CreateTenant,
        admin_password_hash: Option<String>,
    ) -> Result<OnboardedTenant> {
        let mut api_keys = Vec::new();
        for family in key_families(&tenant.enabled_modules) {
            api_keys.push(self.mint_api_key(tenant.id, family).await?);
        }

        let mut roles = Vec::new();
        for blueprint in self.catalog.default_roles_for(tenant.business_type_id).await? {
            if blueprint.name == TENANT_ADMIN_ROLE {
                continue;
            }
            roles.push(self.store.create_role(blueprint.instantiate(tenant.id)).await?);
        }
        // SSO provisioning needs a default role to hand out.
        if !roles.iter().any(|r| r.is_default) {
            roles.push(self.store.create_role(member_role(tenant.id)).await?);
        }
        let admin_role = self.store.create_role(tenant_admin_role(tenant.id)).await?;
        roles.push(admin_role.clone());

        let admin = self
            .store
            .create_identity(NewIdentity {
                tenant_id: tenant.id,
                email: normalize_email(&request.admin_email),
                display_name: None,
                password_hash: admin_password_hash,
                external_provider: None,
                external_subject: None,
                role_ids: vec![admin_role.id],
            })
            .await?;

        let tenant = self
            .store
            .transition_tenant_status(tenant.id, TenantStatus::Pending, TenantStatus::Active)
            .await?
            .ok_or_else(|| TenantError::Onboarding("tenant changed status during onboarding".to_string()))?;

        Ok(OnboardedTenant {
            tenant,
            api_keys,
            roles,
            admin: IdentityProfile::from(&admin),
        })
    }

    /// Mint a key for `family`, retrying on hash collisions against the
    /// storage unique constraint.
    async fn mint_api_key(&self, tenant_id: Uuid, family: &str) -> Result<IssuedApiKey> {
        for attempt in 1..=MAX_KEY_ATTEMPTS {
            let generated = generate_api_key(family);
            let inserted = self
                .store
                .insert_api_key(NewApiKey {
                    tenant_id,
                    family: family.to_string(),
                    key_hash: generated.key_hash,
                    key_hint: generated.key_hint,
                })
                .await;

            match inserted {
                Ok(_) => {
                    return Ok(IssuedApiKey {
                        family: family.to_string(),
                        key: generated.key,
                    })
                }
                Err(DatabaseError::DuplicateEntry(_)) => {
                    tracing::warn!(tenant_id = %tenant_id, family, attempt, "API key collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TenantError::Conflict(format!(
            "could not mint a unique '{family}' API key after {MAX_KEY_ATTEMPTS} attempts"
        )))
    }

    /// Replace the tenant's module set. Disabling a module removes its
    /// config block but never deletes data.
    pub async fn update_modules(&self, tenant_id: Uuid, actor: Option<Uuid>, update: UpdateModules) -> Result<ModuleUpdate> {
        let current = self.store.get_tenant(tenant_id).await?.ok_or(TenantError::NotFound)?;

        validate_module_set(&update.enabled_modules).map_err(authcore_authz::AuthzError::from)?;
        let config = match update.module_config {
            Some(config) => config,
            None => {
                let mut kept = current.module_config.clone();
                kept.retain_enabled(&update.enabled_modules);
                kept
            }
        };
        validate_module_configs(&update.enabled_modules, &config).map_err(TenantError::Validation)?;

        let diff = module_diff(&current.enabled_modules, &update.enabled_modules);

        let held: BTreeSet<String> = self
            .store
            .list_api_keys(tenant_id)
            .await?
            .into_iter()
            .map(|k| k.family)
            .collect();
        let mut new_api_keys = Vec::new();
        for family in key_families(&update.enabled_modules) {
            if !held.contains(family) {
                new_api_keys.push(self.mint_api_key(tenant_id, family).await?);
            }
        }

        let tenant = self
            .store
            .update_tenant_modules(tenant_id, update.enabled_modules, config)
            .await?;
        self.invalidate(tenant_id).await;

        tracing::info!(
            tenant_id = %tenant_id,
            enabled = ?diff.enabled,
            disabled = ?diff.disabled,
            "Tenant modules updated"
        );
        let mut event = AuditEventBuilder::new(Some(tenant_id), events::TENANT_MODULES_UPDATED, AuditCategory::TenantManagement)
            .target("tenant", tenant_id)
            .metadata(serde_json::json!({ "enabled": diff.enabled, "disabled": diff.disabled }));
        if let Some(actor) = actor {
            event = event.actor(actor);
        }
        self.audit.emit(event.build()).await;

        if !diff.is_empty() {
            self.notifier.dispatch(Notification::new(
                tenant_id,
                kinds::MODULES_UPDATED,
                serde_json::json!({ "enabled": diff.enabled, "disabled": diff.disabled }),
            ));
        }

        Ok(ModuleUpdate {
            tenant,
            diff,
            new_api_keys,
        })
    }

    pub async fn set_status(&self, tenant_id: Uuid, actor: Option<Uuid>, status: TenantStatus) -> Result<Tenant> {
        let current = self.store.get_tenant(tenant_id).await?.ok_or(TenantError::NotFound)?;
        if !current.status.can_transition_to(status) {
            return Err(TenantError::InvalidTransition {
                from: current.status,
                to: status,
            });
        }

        let updated = match self
            .store
            .transition_tenant_status(tenant_id, current.status, status)
            .await?
        {
            Some(updated) => updated,
            None => {
                // Lost a race with another status change.
                let now = self.store.get_tenant(tenant_id).await?.ok_or(TenantError::NotFound)?;
                return Err(TenantError::InvalidTransition {
                    from: now.status,
                    to: status,
                });
            }
        };
        self.invalidate(tenant_id).await;

        tracing::info!(tenant_id = %tenant_id, from = %current.status, to = %status, "Tenant status changed");
        let mut event = AuditEventBuilder::new(Some(tenant_id), events::TENANT_STATUS_CHANGED, AuditCategory::TenantManagement)
            .target("tenant", tenant_id)
            .metadata(serde_json::json!({ "from": current.status, "to": status }));
        if let Some(actor) = actor {
            event = event.actor(actor);
        }
        self.audit.emit(event.build()).await;
        self.notifier.dispatch(Notification::new(
            tenant_id,
            kinds::STATUS_CHANGED,
            serde_json::json!({ "from": current.status, "to": status }),
        ));

        Ok(updated)
    }

    /// Tenant snapshot, served from cache for at most the configured TTL.
    /// Cache failures fall through to storage.
    pub async fn get_tenant(&self, tenant_id: Uuid) -> Result<Tenant> {
        let key = tenant_cache_key(&tenant_id.to_string());
        match self.cache.get::<Tenant>(&key).await {
            Ok(Some(tenant)) => return Ok(tenant),
            Ok(None) => {}
            Err(e) => tracing::warn!(tenant_id = %tenant_id, error = %e, "Tenant cache read failed"),
        }

        let tenant = self.store.get_tenant(tenant_id).await?.ok_or(TenantError::NotFound)?;
        if let Err(e) = self.cache.set(&key, &tenant, Some(self.cache_ttl)).await {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "Tenant cache write failed");
        }
        Ok(tenant)
    }

    pub async fn get_by_org_id(&self, org_id: &str) -> Result<Tenant> {
        self.store
            .get_tenant_by_org_id(org_id)
            .await?
            .ok_or(TenantError::NotFound)
    }

    pub async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<TenantApiKey>> {
        Ok(self.store.list_api_keys(tenant_id).await?)
    }

    /// Resolve a presented `X-API-Key` to its tenant.
    pub async fn resolve_api_key(&self, presented: &str) -> Result<TenantContext> {
        let family = key_family(presented).ok_or(TenantError::InvalidApiKey)?;
        let key = self
            .store
            .find_api_key_by_hash(&hash_api_key(presented))
            .await?
            .ok_or(TenantError::InvalidApiKey)?;
        if key.family != family {
            return Err(TenantError::InvalidApiKey);
        }

        let tenant = self.get_tenant(key.tenant_id).await?;
        let context = TenantContext::with_api_key(tenant, key.family);
        context.require_active()?;
        Ok(context)
    }

    async fn invalidate(&self, tenant_id: Uuid) {
        if let Err(e) = self.cache.delete(&tenant_cache_key(&tenant_id.to_string())).await {
            tracing::warn!(tenant_id = %tenant_id, error = %e, "Tenant cache invalidation failed");
        }
    }
}

fn tenant_admin_role(tenant_id: Uuid) -> RoleRecord {
    RoleRecord {
        tenant_id,
        name: TENANT_ADMIN_ROLE.to_string(),
        description: Some("Full access within the tenant".to_string()),
        permissions: vec![Permission::wildcard()],
        template_id: None,
        business_type_id: None,
        is_system_role: true,
        can_be_modified: false,
        is_default: false,
        priority: 0,
        settings: RoleSettings::default(),
    }
}

/// Fallback default role when no catalog blueprint applies. Grants nothing
/// until an admin edits it.
fn member_role(tenant_id: Uuid) -> RoleRecord {
    RoleRecord {
        tenant_id,
        name: MEMBER_ROLE.to_string(),
        description: Some("Baseline role for new members".to_string()),
        permissions: Vec::new(),
        template_id: None,
        business_type_id: None,
        is_system_role: false,
        can_be_modified: true,
        is_default: true,
        priority: 1000,
        settings: RoleSettings::default(),
    }
}

/// Modules newly enabled (in `next` order) and newly disabled (in `previous` order).
pub fn module_diff(previous: &[ModuleId], next: &[ModuleId]) -> ModuleDiff {
    ModuleDiff {
        enabled: next.iter().filter(|m| !previous.contains(m)).cloned().collect(),
        disabled: previous.iter().filter(|m| !next.contains(m)).cloned().collect(),
    }
}
