use crate::error::{AuthError, Result};
use crate::password::{validate_password, PasswordHasher};
use crate::revocation::TokenRevocation;
use authcore_authz::{EffectivePermissions, PermissionEngine};
use authcore_database::{AuditEmitter, DatabaseError, Store};
use authcore_models::{
    events, normalize_email, AuditCategory, AuditEventBuilder, CreateIdentity, Identity,
    IdentityProfile, IdentityStatus, NewIdentity, Tenant,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Tenant-scoped identity administration.
#[derive(Clone)]
pub struct IdentityService {
    store: Arc<dyn Store>,
    hasher: PasswordHasher,
    engine: PermissionEngine,
    revocation: TokenRevocation,
    audit: AuditEmitter,
}

impl IdentityService {
    pub fn new(
        store: Arc<dyn Store>,
        hasher: PasswordHasher,
        engine: PermissionEngine,
        revocation: TokenRevocation,
        audit: AuditEmitter,
    ) -> Self {
        Self {
            store,
            hasher,
            engine,
            revocation,
            audit,
        }
    }

    pub async fn create_identity(&self, tenant: &Tenant, actor: Uuid, request: CreateIdentity) -> Result<Identity> {
        request.validate()?;

        let password_hash = match &request.password {
            Some(password) => {
                let min_length = tenant
                    .module_config
                    .authentication
                    .as_ref()
                    .map_or(8, |auth| auth.password_min_length);
                validate_password(password, min_length)?;
                Some(self.hasher.hash(password).await?)
            }
            None => None,
        };

        if !request.role_ids.is_empty() {
            let found = self.store.get_roles(tenant.id, &request.role_ids).await?;
            if let Some(missing) = request.role_ids.iter().find(|id| !found.iter().any(|r| r.id == **id)) {
                return Err(AuthError::Validation(format!("unknown role {missing}")));
            }
        }

        let identity = self
            .store
            .create_identity(NewIdentity {
                tenant_id: tenant.id,
                email: normalize_email(&request.email),
                display_name: request.display_name,
                password_hash,
                external_provider: None,
                external_subject: None,
                role_ids: request.role_ids,
            })
            .await
            .map_err(|e| match e {
                DatabaseError::DuplicateEntry(_) => {
                    AuthError::Conflict("an identity with this email already exists".to_string())
                }
                other => other.into(),
            })?;

        tracing::info!(tenant_id = %tenant.id, identity_id = %identity.id, "Identity created");
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant.id), events::IDENTITY_CREATED, AuditCategory::IdentityManagement)
                    .actor(actor)
                    .target("identity", identity.id)
                    .build(),
            )
            .await;
        Ok(identity)
    }

    pub async fn list_identities(&self, tenant_id: Uuid) -> Result<Vec<IdentityProfile>> {
        Ok(self
            .store
            .list_identities(tenant_id)
            .await?
            .iter()
            .map(IdentityProfile::from)
            .collect())
    }

    pub async fn get_identity(&self, tenant_id: Uuid, identity_id: Uuid) -> Result<Identity> {
        self.store
            .get_identity(tenant_id, identity_id)
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("identity {identity_id}")))
    }

    /// Locking or suspending an identity ends all of its sessions.
    pub async fn set_status(
        &self,
        tenant_id: Uuid,
        actor: Uuid,
        identity_id: Uuid,
        status: IdentityStatus,
    ) -> Result<Identity> {
        let previous = self.get_identity(tenant_id, identity_id).await?;
        let updated = self.store.set_identity_status(tenant_id, identity_id, status).await?;

        if status != IdentityStatus::Active {
            self.revocation
                .revoke_identity(tenant_id, identity_id, &format!("identity_{status}"))
                .await?;
        }

        tracing::info!(
            tenant_id = %tenant_id,
            identity_id = %identity_id,
            from = %previous.status,
            to = %status,
            "Identity status changed"
        );
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant_id), events::IDENTITY_STATUS_CHANGED, AuditCategory::IdentityManagement)
                    .actor(actor)
                    .target("identity", identity_id)
                    .metadata(serde_json::json!({ "from": previous.status, "to": status }))
                    .build(),
            )
            .await;
        Ok(updated)
    }

    pub async fn effective_permissions(&self, tenant_id: Uuid, identity_id: Uuid) -> Result<EffectivePermissions> {
        let identity = self.get_identity(tenant_id, identity_id).await?;
        Ok(self.engine.effective_permissions(&identity).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::test_hasher;
    use authcore_database::MemoryStore;
    use authcore_models::{
        ErrorKind, ModuleConfigs, ModuleId, NewAuthSession, Permission, ProviderKind, RoleRecord,
        RoleSettings, TenantStatus,
    };
    use chrono::{Duration, Utc};

    fn tenant() -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            org_id: "acme".to_string(),
            name: "Acme".to_string(),
            status: TenantStatus::Active,
            enabled_modules: vec![ModuleId::from("authentication"), ModuleId::from("rbac")],
            business_type_id: None,
            module_config: ModuleConfigs::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service(store: Arc<dyn Store>) -> IdentityService {
        IdentityService::new(
            store.clone(),
            test_hasher(),
            PermissionEngine::new(store.clone()),
            TokenRevocation::new(store.clone(), Duration::minutes(15)),
            AuditEmitter::new(store),
        )
    }

    fn request(email: &str, password: Option<&str>) -> CreateIdentity {
        CreateIdentity {
            email: email.to_string(),
            display_name: None,
            password: password.map(str::to_string),
            role_ids: Vec::new(),
        }
    }

    #[tokio::test]
    async fn create_rejects_weak_passwords_and_duplicates() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let identities = service(store);
        let tenant = tenant();
        let actor = Uuid::new_v4();

        let err = identities
            .create_identity(&tenant, actor, request("a@acme.test", Some("alllowercase1")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let created = identities
            .create_identity(&tenant, actor, request("A@acme.test", Some("Str0ngPassword")))
            .await
            .unwrap();
        assert_eq!(created.email, "a@acme.test");
        assert!(created.password_hash.is_some());

        let err = identities
            .create_identity(&tenant, actor, request("a@acme.test", None))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        // Same email in another tenant is a different identity.
        identities
            .create_identity(&self::tenant(), actor, request("a@acme.test", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn suspending_revokes_sessions() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let identities = service(store.clone());
        let tenant = tenant();
        let identity = identities
            .create_identity(&tenant, Uuid::new_v4(), request("a@acme.test", None))
            .await
            .unwrap();

        let session = store
            .create_session(NewAuthSession {
                id: Uuid::new_v4(),
                tenant_id: tenant.id,
                identity_id: identity.id,
                provider_kind: ProviderKind::Local,
                mfa_verified: false,
                access_token_id: Uuid::new_v4(),
                refresh_token_hash: "hash".to_string(),
                refresh_expires_at: Utc::now() + Duration::days(1),
            })
            .await
            .unwrap();

        let updated = identities
            .set_status(tenant.id, Uuid::new_v4(), identity.id, IdentityStatus::Suspended)
            .await
            .unwrap();
        assert_eq!(updated.status, IdentityStatus::Suspended);
        assert!(store.is_token_revoked(session.access_token_id).await.unwrap());
    }

    #[tokio::test]
    async fn effective_permissions_follow_roles() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let identities = service(store.clone());
        let tenant = tenant();
        let role = store
            .create_role(RoleRecord {
                tenant_id: tenant.id,
                name: "clerk".to_string(),
                description: None,
                permissions: vec![Permission::parse("billing.read").unwrap()],
                template_id: None,
                business_type_id: None,
                is_system_role: false,
                can_be_modified: true,
                is_default: false,
                priority: 100,
                settings: RoleSettings::default(),
            })
            .await
            .unwrap();

        let mut create = request("a@acme.test", None);
        create.role_ids = vec![role.id];
        let identity = identities.create_identity(&tenant, Uuid::new_v4(), create).await.unwrap();

        let effective = identities.effective_permissions(tenant.id, identity.id).await.unwrap();
        assert_eq!(effective.to_sorted_vec(), vec!["billing.read".to_string()]);

        let mut unknown = request("b@acme.test", None);
        unknown.role_ids = vec![Uuid::new_v4()];
        let err = identities.create_identity(&tenant, Uuid::new_v4(), unknown).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }
}
