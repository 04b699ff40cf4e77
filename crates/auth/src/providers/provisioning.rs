use crate::error::{AuthError, ProviderError, Result};
use authcore_database::{AuditEmitter, DatabaseError, Store};
use authcore_models::{
    events, normalize_email, AuditCategory, AuditEventBuilder, Identity, NewIdentity, ProviderKind,
    Role, Tenant,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Normalized profile returned by an external identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalProfile {
    pub external_id: String,
    pub email: String,
    pub display_name: Option<String>,
}

/// Links external logins to tenant identities, creating them on first sight.
#[derive(Clone)]
pub struct Provisioner {
    store: Arc<dyn Store>,
    audit: AuditEmitter,
}

impl Provisioner {
    pub fn new(store: Arc<dyn Store>, audit: AuditEmitter) -> Self {
        Self { store, audit }
    }

    /// Match by stored external subject first, then by email, else provision.
    pub async fn link_or_provision(
        &self,
        tenant: &Tenant,
        provider: ProviderKind,
        profile: &ExternalProfile,
    ) -> Result<Identity> {
        if let Some(identity) = self
            .store
            .find_identity_by_external(tenant.id, provider, &profile.external_id)
            .await?
        {
            return Ok(identity);
        }

        let email = normalize_email(&profile.email);
        if let Some(identity) = self.store.find_identity_by_email(tenant.id, &email).await? {
            if identity.external_provider == Some(provider) {
                // Same provider, different subject: not the same person.
                return Err(ProviderError::Profile(
                    "email is already linked to another external account".to_string(),
                )
                .into());
            }
            tracing::info!(
                tenant_id = %tenant.id,
                identity_id = %identity.id,
                provider = %provider,
                "Linking external identity by email"
            );
            return Ok(self
                .store
                .link_external_identity(tenant.id, identity.id, provider, &profile.external_id)
                .await?);
        }

        self.provision(tenant, provider, profile, email).await
    }

    async fn provision(
        &self,
        tenant: &Tenant,
        provider: ProviderKind,
        profile: &ExternalProfile,
        email: String,
    ) -> Result<Identity> {
        let role = self.default_role(tenant).await?;

        let created = self
            .store
            .create_identity(NewIdentity {
                tenant_id: tenant.id,
                email,
                display_name: profile.display_name.clone(),
                password_hash: None,
                external_provider: Some(provider),
                external_subject: Some(profile.external_id.clone()),
                role_ids: vec![role.id],
            })
            .await;

        let identity = match created {
            Ok(identity) => identity,
            // A concurrent callback for the same subject won the insert.
            Err(DatabaseError::DuplicateEntry(_)) => self
                .store
                .find_identity_by_external(tenant.id, provider, &profile.external_id)
                .await?
                .ok_or_else(|| AuthError::Conflict("identity already exists".to_string()))?,
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            tenant_id = %tenant.id,
            identity_id = %identity.id,
            provider = %provider,
            role = %role.name,
            "Provisioned identity from external provider"
        );
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant.id), events::SSO_PROVISIONED, AuditCategory::IdentityManagement)
                    .actor(identity.id)
                    .target("identity", identity.id)
                    .metadata(serde_json::json!({ "provider": provider, "roleId": role.id }))
                    .build(),
            )
            .await;
        Ok(identity)
    }

    /// The default role with the least precedence (highest priority number).
    async fn default_role(&self, tenant: &Tenant) -> Result<Role> {
        self.store
            .list_roles(tenant.id)
            .await?
            .into_iter()
            .filter(|r| r.is_default)
            .max_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)))
            .ok_or_else(|| {
                tracing::error!(tenant_id = %tenant.id, "Tenant has no default role for provisioning");
                AuthError::Internal("tenant has no default role".to_string())
            })
    }
}
