use crate::error::{AuthzError, Result};
use authcore_database::{AuditEmitter, DatabaseError, Store};
use authcore_models::{
    events, AuditCategory, AuditEventBuilder, BusinessType, DefaultRole, NewBusinessType,
    NewDefaultRole, NewPermissionTemplate, PermissionTemplate,
};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Platform-level blueprints: business types, permission templates and
/// default roles. Tenants read these; only platform administrators write them.
#[derive(Clone)]
pub struct CatalogService {
    store: Arc<dyn Store>,
    audit: AuditEmitter,
}

impl CatalogService {
    pub fn new(store: Arc<dyn Store>, audit: AuditEmitter) -> Self {
        Self { store, audit }
    }

    pub async fn create_business_type(&self, request: NewBusinessType) -> Result<BusinessType> {
        request.validate()?;
        let created = self.store.create_business_type(request).await.map_err(|e| match e {
            DatabaseError::DuplicateEntry(_) => {
                AuthzError::Conflict("a business type with this name already exists".to_string())
            }
            other => other.into(),
        })?;

        self.audit
            .emit(
                AuditEventBuilder::new(None, events::BUSINESS_TYPE_CREATED, AuditCategory::Catalog)
                    .target("business_type", created.id)
                    .detail(created.name.clone())
                    .build(),
            )
            .await;
        Ok(created)
    }

    pub async fn list_business_types(&self) -> Result<Vec<BusinessType>> {
        Ok(self.store.list_business_types().await?)
    }

    pub async fn get_business_type(&self, id: Uuid) -> Result<BusinessType> {
        self.store
            .get_business_type(id)
            .await?
            .ok_or_else(|| AuthzError::NotFound(format!("business type {id}")))
    }

    pub async fn create_template(&self, request: NewPermissionTemplate) -> Result<PermissionTemplate> {
        request.validate()?;
        for business_type_id in &request.business_type_ids {
            self.get_business_type(*business_type_id)
                .await
                .map_err(|_| AuthzError::Validation(format!("unknown business type {business_type_id}")))?;
        }

        let created = self.store.create_template(request).await?;
        self.audit
            .emit(
                AuditEventBuilder::new(created.tenant_id, events::TEMPLATE_CREATED, AuditCategory::Catalog)
                    .target("permission_template", created.id)
                    .detail(created.name.clone())
                    .build(),
            )
            .await;
        Ok(created)
    }

    pub async fn list_templates(&self, tenant_id: Option<Uuid>) -> Result<Vec<PermissionTemplate>> {
        Ok(self.store.list_templates(tenant_id).await?)
    }

    /// Default templates are never deleted.
    pub async fn delete_template(&self, id: Uuid) -> Result<()> {
        let template = self
            .store
            .get_templates(&[id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AuthzError::NotFound(format!("permission template {id}")))?;

        if template.is_default || !self.store.delete_template(id).await? {
            return Err(AuthzError::Validation(format!(
                "permission template '{}' is a default template and cannot be deleted",
                template.name
            )));
        }

        self.audit
            .emit(
                AuditEventBuilder::new(template.tenant_id, events::TEMPLATE_DELETED, AuditCategory::Catalog)
                    .target("permission_template", id)
                    .build(),
            )
            .await;
        Ok(())
    }

    pub async fn create_default_role(&self, request: NewDefaultRole) -> Result<DefaultRole> {
        request.validate()?;
        if let Some(business_type_id) = request.business_type_id {
            self.get_business_type(business_type_id)
                .await
                .map_err(|_| AuthzError::Validation(format!("unknown business type {business_type_id}")))?;
        }
        if let Some(template_id) = request.template_id {
            let global = self
                .store
                .get_templates(&[template_id])
                .await?
                .iter()
                .any(|t| t.tenant_id.is_none());
            if !global {
                return Err(AuthzError::Validation(format!(
                    "default roles may only reference global templates ({template_id})"
                )));
            }
        }

        let created = self.store.create_default_role(request).await?;
        self.audit
            .emit(
                AuditEventBuilder::new(None, events::DEFAULT_ROLE_CREATED, AuditCategory::Catalog)
                    .target("default_role", created.id)
                    .detail(created.name.clone())
                    .build(),
            )
            .await;
        Ok(created)
    }

    pub async fn list_default_roles(&self) -> Result<Vec<DefaultRole>> {
        Ok(self.store.list_default_roles().await?)
    }

    /// Blueprints to instantiate for a new tenant of the given business type.
    pub async fn default_roles_for(&self, business_type_id: Option<Uuid>) -> Result<Vec<DefaultRole>> {
        Ok(self
            .store
            .list_default_roles()
            .await?
            .into_iter()
            .filter(|r| r.applies_to(business_type_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authcore_database::MemoryStore;
    use authcore_models::{ErrorKind, Permission, RiskLevel, RoleSettings};

    fn service() -> CatalogService {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        CatalogService::new(store.clone(), AuditEmitter::new(store))
    }

    fn healthcare() -> NewBusinessType {
        NewBusinessType {
            name: "healthcare".to_string(),
            description: None,
            risk_level: RiskLevel::High,
            compliance_frameworks: vec!["HIPAA".to_string()],
            default_permissions: vec![Permission::parse("patient.read").unwrap()],
            max_tenants: None,
        }
    }

    fn template(is_default: bool) -> NewPermissionTemplate {
        NewPermissionTemplate {
            tenant_id: None,
            name: "clinical".to_string(),
            description: None,
            permissions: vec![Permission::parse("patient.write").unwrap()],
            business_type_ids: Vec::new(),
            is_default,
        }
    }

    #[tokio::test]
    async fn default_templates_cannot_be_deleted() {
        let catalog = service();
        let protected = catalog.create_template(template(true)).await.unwrap();
        let removable = catalog.create_template(template(false)).await.unwrap();

        let err = catalog.delete_template(protected.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
        catalog.delete_template(removable.id).await.unwrap();
        assert_eq!(catalog.list_templates(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn default_roles_are_filtered_by_business_type() {
        let catalog = service();
        let bt = catalog.create_business_type(healthcare()).await.unwrap();
        let blueprint = |name: &str, business_type_id| NewDefaultRole {
            name: name.to_string(),
            description: None,
            business_type_id,
            template_id: None,
            permissions: Vec::new(),
            priority: 100,
            settings: RoleSettings::default(),
            is_system_role: false,
        };
        catalog.create_default_role(blueprint("member", None)).await.unwrap();
        catalog.create_default_role(blueprint("clinician", Some(bt.id))).await.unwrap();

        assert_eq!(catalog.default_roles_for(Some(bt.id)).await.unwrap().len(), 2);
        assert_eq!(catalog.default_roles_for(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn business_type_names_are_unique() {
        let catalog = service();
        catalog.create_business_type(healthcare()).await.unwrap();
        let err = catalog.create_business_type(healthcare()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
}
