use crate::error::Result;
use crate::permissions::{effective_settings, resolve_effective_permissions, EffectivePermissions};
use authcore_database::Store;
use authcore_models::{Identity, RoleSettings};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Everything authorization needs to know about an identity's roles.
#[derive(Debug, Clone)]
pub struct ResolvedAccess {
    pub permissions: EffectivePermissions,
    pub settings: RoleSettings,
}

/// Loads an identity's roles with their templates and business types, then
/// resolves them. Nothing is cached, so role changes apply on the next call.
#[derive(Clone)]
pub struct PermissionEngine {
    store: Arc<dyn Store>,
}

impl PermissionEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn resolve(&self, identity: &Identity) -> Result<ResolvedAccess> {
        let roles = self.store.get_roles(identity.tenant_id, &identity.role_ids).await?;

        let template_ids: Vec<_> = roles
            .iter()
            .filter_map(|r| r.template_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let business_type_ids: Vec<_> = roles
            .iter()
            .filter_map(|r| r.business_type_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let templates = if template_ids.is_empty() {
            Vec::new()
        } else {
            self.store
                .get_templates(&template_ids)
                .await?
                .into_iter()
                .filter(|t| t.visible_to(identity.tenant_id))
                .collect()
        };
        let business_types = if business_type_ids.is_empty() {
            Vec::new()
        } else {
            self.store.get_business_types(&business_type_ids).await?
        };

        Ok(ResolvedAccess {
            permissions: resolve_effective_permissions(&roles, &templates, &business_types),
            settings: effective_settings(&roles),
        })
    }

    pub async fn effective_permissions(&self, identity: &Identity) -> Result<EffectivePermissions> {
        Ok(self.resolve(identity).await?.permissions)
    }
}
