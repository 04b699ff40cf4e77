use crate::engine::PermissionEngine;
use crate::error::{AuthzError, Result};
use crate::permissions::{first_missing, EffectivePermissions};
use authcore_database::{AuditEmitter, DatabaseError, RoleDeletion, Store};
use authcore_models::{
    events, AuditCategory, AuditEventBuilder, ErrorKind, Identity, NewRole, Permission, Role,
    RoleRecord, UpdateRole,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Tenant-scoped role mutations. Role deletion is blocked while any identity
/// still holds the role; unassign first.
///
/// A role can only grant permissions its author already holds, counting
/// those inherited through its template and business type.
#[derive(Clone)]
pub struct RoleService {
    store: Arc<dyn Store>,
    audit: AuditEmitter,
    engine: PermissionEngine,
}

impl RoleService {
    pub fn new(store: Arc<dyn Store>, audit: AuditEmitter) -> Self {
        Self {
            engine: PermissionEngine::new(store.clone()),
            store,
            audit,
        }
    }

    pub async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>> {
        Ok(self.store.list_roles(tenant_id).await?)
    }

    pub async fn get_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<Role> {
        self.store
            .get_role(tenant_id, role_id)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("role {role_id}")))
    }

    pub async fn create_role(&self, tenant_id: Uuid, actor: Uuid, request: NewRole) -> Result<Role> {
        request.validate()?;
        let inherited = self
            .check_references(tenant_id, request.template_id, request.business_type_id)
            .await?;
        let mut granted = request.permissions.clone();
        granted.extend(inherited);
        self.ensure_grantable(tenant_id, actor, &granted).await?;

        let record = RoleRecord {
            tenant_id,
            name: request.name,
            description: request.description,
            permissions: request.permissions,
            template_id: request.template_id,
            business_type_id: request.business_type_id,
            is_system_role: false,
            can_be_modified: true,
            is_default: request.is_default,
            priority: request.priority,
            settings: request.settings,
        };

        let role = self.store.create_role(record).await.map_err(|e| match e {
            DatabaseError::DuplicateEntry(_) => AuthzError::Conflict("a role with this name already exists".to_string()),
            other => other.into(),
        })?;

        tracing::info!(tenant_id = %tenant_id, role_id = %role.id, "Role created");
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant_id), events::ROLE_CREATED, AuditCategory::RoleManagement)
                    .actor(actor)
                    .target("role", role.id)
                    .detail(role.name.clone())
                    .build(),
            )
            .await;

        Ok(role)
    }

    pub async fn update_role(&self, tenant_id: Uuid, actor: Uuid, role_id: Uuid, update: UpdateRole) -> Result<Role> {
        update.validate()?;
        let existing = self.get_role(tenant_id, role_id).await?;
        self.ensure_mutable(tenant_id, actor, &existing).await?;
        if let Some(permissions) = &update.permissions {
            self.ensure_grantable(tenant_id, actor, permissions).await?;
        }

        let role = self
            .store
            .update_role(tenant_id, role_id, update)
            .await
            .map_err(|e| match e {
                DatabaseError::DuplicateEntry(_) => {
                    AuthzError::Conflict("a role with this name already exists".to_string())
                }
                other => other.into(),
            })?;

        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant_id), events::ROLE_UPDATED, AuditCategory::RoleManagement)
                    .actor(actor)
                    .target("role", role.id)
                    .build(),
            )
            .await;

        Ok(role)
    }

    pub async fn delete_role(&self, tenant_id: Uuid, actor: Uuid, role_id: Uuid) -> Result<()> {
        let existing = self.get_role(tenant_id, role_id).await?;
        self.ensure_mutable(tenant_id, actor, &existing).await?;

        match self.store.delete_role_if_unassigned(tenant_id, role_id).await? {
            RoleDeletion::Deleted => {
                tracing::info!(tenant_id = %tenant_id, role_id = %role_id, "Role deleted");
                self.audit
                    .emit(
                        AuditEventBuilder::new(Some(tenant_id), events::ROLE_DELETED, AuditCategory::RoleManagement)
                            .actor(actor)
                            .target("role", role_id)
                            .detail(existing.name)
                            .build(),
                    )
                    .await;
                Ok(())
            }
            RoleDeletion::StillAssigned => {
                self.audit
                    .emit(
                        AuditEventBuilder::new(
                            Some(tenant_id),
                            events::ROLE_MUTATION_REJECTED,
                            AuditCategory::RoleManagement,
                        )
                        .actor(actor)
                        .target("role", role_id)
                        .detail("still assigned")
                        .failure(ErrorKind::Conflict)
                        .build(),
                    )
                    .await;
                Err(AuthzError::RoleInUse(existing.name))
            }
            RoleDeletion::NotFound => Err(AuthzError::NotFound(format!("role {role_id}"))),
        }
    }

    pub async fn assign_role(&self, tenant_id: Uuid, actor: Uuid, identity_id: Uuid, role_id: Uuid) -> Result<Identity> {
        let identity = self
            .store
            .add_identity_role(tenant_id, identity_id, role_id)
            .await
            .map_err(not_found_as_authz)?;

        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant_id), events::ROLE_ASSIGNED, AuditCategory::RoleManagement)
                    .actor(actor)
                    .target("identity", identity_id)
                    .detail(role_id.to_string())
                    .build(),
            )
            .await;

        Ok(identity)
    }

    pub async fn unassign_role(
        &self,
        tenant_id: Uuid,
        actor: Uuid,
        identity_id: Uuid,
        role_id: Uuid,
    ) -> Result<Identity> {
        let identity = self
            .store
            .remove_identity_role(tenant_id, identity_id, role_id)
            .await
            .map_err(not_found_as_authz)?;

        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant_id), events::ROLE_UNASSIGNED, AuditCategory::RoleManagement)
                    .actor(actor)
                    .target("identity", identity_id)
                    .detail(role_id.to_string())
                    .build(),
            )
            .await;

        Ok(identity)
    }

    async fn ensure_mutable(&self, tenant_id: Uuid, actor: Uuid, role: &Role) -> Result<()> {
        if role.is_mutable() {
            return Ok(());
        }
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant_id), events::ROLE_MUTATION_REJECTED, AuditCategory::RoleManagement)
                    .actor(actor)
                    .target("role", role.id)
                    .detail("immutable role")
                    .failure(ErrorKind::Forbidden)
                    .build(),
            )
            .await;
        Err(AuthzError::ImmutableRole(role.name.clone()))
    }

    /// Reject the mutation unless `actor` holds every permission in `granted`.
    async fn ensure_grantable(&self, tenant_id: Uuid, actor: Uuid, granted: &[Permission]) -> Result<()> {
        let held = match self.store.get_identity(tenant_id, actor).await? {
            Some(identity) => self.engine.effective_permissions(&identity).await?,
            None => EffectivePermissions::none(),
        };
        let Some(missing) = first_missing(&held, granted) else {
            return Ok(());
        };

        tracing::warn!(tenant_id = %tenant_id, actor = %actor, permission = %missing, "Role grant exceeds actor permissions");
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant_id), events::ROLE_MUTATION_REJECTED, AuditCategory::RoleManagement)
                    .actor(actor)
                    .detail(format!("grant of {missing} not held"))
                    .failure(ErrorKind::Forbidden)
                    .build(),
            )
            .await;
        Err(AuthzError::PermissionNotHeld(missing.to_string()))
    }

    /// Checks the role's template and business type exist and returns the
    /// permissions they contribute.
    async fn check_references(
        &self,
        tenant_id: Uuid,
        template_id: Option<Uuid>,
        business_type_id: Option<Uuid>,
    ) -> Result<Vec<Permission>> {
        let mut inherited = Vec::new();
        if let Some(template_id) = template_id {
            let template = self
                .store
                .get_templates(&[template_id])
                .await?
                .into_iter()
                .find(|t| t.visible_to(tenant_id))
                .ok_or_else(|| AuthzError::Validation(format!("unknown permission template {template_id}")))?;
            inherited.extend(template.permissions);
        }
        if let Some(business_type_id) = business_type_id {
            let business_type = self
                .store
                .get_business_type(business_type_id)
                .await?
                .ok_or_else(|| AuthzError::Validation(format!("unknown business type {business_type_id}")))?;
            inherited.extend(business_type.default_permissions);
        }
        Ok(inherited)
    }
}

fn not_found_as_authz(err: DatabaseError) -> AuthzError {
    match err {
        DatabaseError::NotFound(what) => AuthzError::NotFound(what),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PermissionEngine;
    use crate::permissions::has_permission;
    use authcore_database::{IdentityStore, MemoryStore, NewTenantRecord, RoleStore, TenantStore};
    use authcore_models::{ModuleConfigs, NewIdentity, Permission, RoleSettings};

    struct Fixture {
        store: Arc<dyn Store>,
        roles: RoleService,
        tenant_id: Uuid,
        actor: Uuid,
        admin_role: Role,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let tenant = store
            .create_tenant(NewTenantRecord {
                org_id: "acme".to_string(),
                name: "Acme".to_string(),
                enabled_modules: vec!["authentication".into(), "rbac".into()],
                business_type_id: None,
                module_config: ModuleConfigs::default(),
                max_tenants: None,
            })
            .await
            .unwrap();
        let admin_role = store
            .create_role(RoleRecord {
                tenant_id: tenant.id,
                name: "tenant-admin".to_string(),
                description: None,
                permissions: vec![Permission::wildcard()],
                template_id: None,
                business_type_id: None,
                is_system_role: true,
                can_be_modified: false,
                is_default: false,
                priority: 0,
                settings: RoleSettings::default(),
            })
            .await
            .unwrap();
        let admin = store
            .create_identity(NewIdentity {
                tenant_id: tenant.id,
                email: "admin@acme.test".to_string(),
                display_name: None,
                password_hash: None,
                external_provider: None,
                external_subject: None,
                role_ids: vec![admin_role.id],
            })
            .await
            .unwrap();
        Fixture {
            roles: RoleService::new(store.clone(), AuditEmitter::new(store.clone())),
            store,
            tenant_id: tenant.id,
            actor: admin.id,
            admin_role,
        }
    }

    fn new_role(name: &str, permissions: &[&str]) -> NewRole {
        NewRole {
            name: name.to_string(),
            description: None,
            permissions: permissions.iter().map(|p| Permission::parse(p).unwrap()).collect(),
            template_id: None,
            business_type_id: None,
            is_default: false,
            priority: 100,
            settings: RoleSettings::default(),
        }
    }

    async fn identity(f: &Fixture, email: &str) -> Identity {
        f.store
            .create_identity(NewIdentity {
                tenant_id: f.tenant_id,
                email: email.to_string(),
                display_name: None,
                password_hash: None,
                external_provider: None,
                external_subject: None,
                role_ids: Vec::new(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn duplicate_role_names_conflict() {
        let f = fixture().await;
        f.roles.create_role(f.tenant_id, f.actor, new_role("nurse", &[])).await.unwrap();
        let err = f
            .roles
            .create_role(f.tenant_id, f.actor, new_role("nurse", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn system_roles_are_immutable() {
        let f = fixture().await;
        let system = f.admin_role.clone();

        let update = UpdateRole {
            name: Some("renamed".to_string()),
            ..UpdateRole::default()
        };
        assert!(matches!(
            f.roles.update_role(f.tenant_id, f.actor, system.id, update).await,
            Err(AuthzError::ImmutableRole(_))
        ));
        assert!(matches!(
            f.roles.delete_role(f.tenant_id, f.actor, system.id).await,
            Err(AuthzError::ImmutableRole(_))
        ));
    }

    #[tokio::test]
    async fn deleting_an_assigned_role_is_blocked() {
        let f = fixture().await;
        let role = f.roles.create_role(f.tenant_id, f.actor, new_role("nurse", &[])).await.unwrap();
        let user = identity(&f, "nurse@x.com").await;
        f.roles.assign_role(f.tenant_id, f.actor, user.id, role.id).await.unwrap();

        let err = f.roles.delete_role(f.tenant_id, f.actor, role.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        f.roles.unassign_role(f.tenant_id, f.actor, user.id, role.id).await.unwrap();
        f.roles.delete_role(f.tenant_id, f.actor, role.id).await.unwrap();
    }

    #[tokio::test]
    async fn permission_changes_apply_to_the_next_resolution() {
        let f = fixture().await;
        let engine = PermissionEngine::new(f.store.clone());
        let role = f
            .roles
            .create_role(f.tenant_id, f.actor, new_role("clerk", &["patient.read"]))
            .await
            .unwrap();
        let user = identity(&f, "clerk@x.com").await;
        let user = f.roles.assign_role(f.tenant_id, f.actor, user.id, role.id).await.unwrap();

        let write = Permission::parse("patient.write").unwrap();
        assert!(!has_permission(&engine.effective_permissions(&user).await.unwrap(), &write));

        let update = UpdateRole {
            permissions: Some(vec![Permission::parse("patient.read").unwrap(), write.clone()]),
            ..UpdateRole::default()
        };
        f.roles.update_role(f.tenant_id, f.actor, role.id, update).await.unwrap();
        assert!(has_permission(&engine.effective_permissions(&user).await.unwrap(), &write));
    }

    #[tokio::test]
    async fn unknown_template_reference_is_rejected() {
        let f = fixture().await;
        let mut request = new_role("linked", &[]);
        request.template_id = Some(Uuid::new_v4());
        let err = f.roles.create_role(f.tenant_id, f.actor, request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn roles_cannot_grant_what_the_author_lacks() {
        let f = fixture().await;
        let manager_role = f
            .roles
            .create_role(f.tenant_id, f.actor, new_role("role-manager", &["roles.write", "roles.assign"]))
            .await
            .unwrap();
        let manager = identity(&f, "manager@x.com").await;
        f.roles.assign_role(f.tenant_id, f.actor, manager.id, manager_role.id).await.unwrap();

        let err = f
            .roles
            .create_role(f.tenant_id, manager.id, new_role("everything", &["*"]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = f
            .roles
            .create_role(f.tenant_id, manager.id, new_role("reader", &["roles.write", "patient.read"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthzError::PermissionNotHeld(ref p) if p == "patient.read"), "{err}");

        let subset = f
            .roles
            .create_role(f.tenant_id, manager.id, new_role("assigner", &["roles.assign"]))
            .await
            .unwrap();
        let escalate = UpdateRole {
            permissions: Some(vec![Permission::wildcard()]),
            ..UpdateRole::default()
        };
        let err = f
            .roles
            .update_role(f.tenant_id, manager.id, subset.id, escalate)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        assert!(f.store.list_roles(f.tenant_id).await.unwrap().iter().all(|r| r.name != "everything"));
    }
}
