// Tenant context for request handling

use crate::error::{Result, TenantError};
use authcore_models::Tenant;
use uuid::Uuid;

/// The tenant a request runs against, plus the key family it presented an
/// API key for, if any.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant: Tenant,
    pub api_key_family: Option<String>,
}

impl TenantContext {
    pub fn new(tenant: Tenant) -> Self {
        Self {
            tenant,
            api_key_family: None,
        }
    }

    pub fn with_api_key(tenant: Tenant, family: String) -> Self {
        Self {
            tenant,
            api_key_family: Some(family),
        }
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant.id
    }

    pub fn require_active(&self) -> Result<()> {
        if self.tenant.is_active() {
            Ok(())
        } else {
            Err(TenantError::NotActive(self.tenant.status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use authcore_models::{ModuleConfigs, ModuleId, TenantStatus};
    use chrono::Utc;

    fn tenant(status: TenantStatus) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            org_id: "acme".to_string(),
            name: "Acme".to_string(),
            status,
            enabled_modules: vec![ModuleId::from("authentication"), ModuleId::from("rbac")],
            business_type_id: None,
            module_config: ModuleConfigs::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn api_key_family_is_carried() {
        let ctx = TenantContext::with_api_key(tenant(TenantStatus::Active), "rbac".to_string());
        assert!(ctx.require_active().is_ok());
        assert_eq!(ctx.api_key_family.as_deref(), Some("rbac"));
        assert!(TenantContext::new(tenant(TenantStatus::Active)).api_key_family.is_none());
    }

    #[test]
    fn suspended_tenants_are_not_active() {
        let ctx = TenantContext::new(tenant(TenantStatus::Suspended));
        assert_eq!(ctx.require_active().unwrap_err().kind(), authcore_models::ErrorKind::TenantNotActive);
    }
}
