use crate::permission::Permission;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A named permission bundle inside one tenant.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,

    #[sqlx(json)]
    pub permissions: Vec<Permission>,

    /// Template whose permissions are inherited at resolution time.
    pub template_id: Option<Uuid>,
    /// Business type whose default permissions are inherited at resolution time.
    pub business_type_id: Option<Uuid>,

    pub is_system_role: bool,
    pub can_be_modified: bool,
    /// Candidate for auto-provisioned identities.
    pub is_default: bool,
    /// Lower number wins when role settings conflict.
    pub priority: i32,

    #[sqlx(json)]
    pub settings: RoleSettings,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Role {
    /// System roles and roles flagged immutable reject updates and deletes.
    pub fn is_mutable(&self) -> bool {
        !self.is_system_role && self.can_be_modified
    }
}

/// Per-role behavioural settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_timeout_minutes: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewRole {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    #[validate(length(max = 1024))]
    pub description: Option<String>,

    #[serde(default)]
    pub permissions: Vec<Permission>,

    pub template_id: Option<Uuid>,
    pub business_type_id: Option<Uuid>,

    #[serde(default)]
    pub is_default: bool,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub settings: RoleSettings,
}

fn default_priority() -> i32 {
    100
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRole {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,

    #[validate(length(max = 1024))]
    pub description: Option<String>,

    pub permissions: Option<Vec<Permission>>,
    pub is_default: Option<bool>,
    pub priority: Option<i32>,
    pub settings: Option<RoleSettings>,
}

/// Fully-specified role ready for insertion; produced by services from
/// `NewRole` or from a catalog default role.
#[derive(Debug, Clone)]
pub struct RoleRecord {
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub template_id: Option<Uuid>,
    pub business_type_id: Option<Uuid>,
    pub is_system_role: bool,
    pub can_be_modified: bool,
    pub is_default: bool,
    pub priority: i32,
    pub settings: RoleSettings,
}

/// Reusable permission bundle. Global when `tenant_id` is `None`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PermissionTemplate {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,

    #[sqlx(json)]
    pub permissions: Vec<Permission>,

    pub business_type_ids: Vec<Uuid>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
}

impl PermissionTemplate {
    /// A template is usable by a tenant when it is global or owned by that tenant.
    pub fn visible_to(&self, tenant_id: Uuid) -> bool {
        self.tenant_id.map_or(true, |owner| owner == tenant_id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewPermissionTemplate {
    pub tenant_id: Option<Uuid>,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    pub description: Option<String>,
    pub permissions: Vec<Permission>,

    #[serde(default)]
    pub business_type_ids: Vec<Uuid>,

    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Industry classification carrying default permissions and compliance metadata.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BusinessType {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub risk_level: RiskLevel,

    #[sqlx(json)]
    pub compliance_frameworks: Vec<String>,

    #[sqlx(json)]
    pub default_permissions: Vec<Permission>,

    /// Cap on tenants that may be created with this business type.
    pub max_tenants: Option<i32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewBusinessType {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    pub description: Option<String>,
    pub risk_level: RiskLevel,

    #[serde(default)]
    pub compliance_frameworks: Vec<String>,

    #[serde(default)]
    pub default_permissions: Vec<Permission>,

    #[validate(range(min = 1))]
    pub max_tenants: Option<i32>,
}

/// Catalog role blueprint, instantiated into each new tenant of its business type.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DefaultRole {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub business_type_id: Option<Uuid>,
    pub template_id: Option<Uuid>,

    #[sqlx(json)]
    pub permissions: Vec<Permission>,

    pub priority: i32,

    #[sqlx(json)]
    pub settings: RoleSettings,

    pub is_system_role: bool,
    pub created_at: DateTime<Utc>,
}

impl DefaultRole {
    /// Does this blueprint apply to a tenant with the given business type?
    /// Blueprints without a business type apply to every tenant.
    pub fn applies_to(&self, business_type_id: Option<Uuid>) -> bool {
        match self.business_type_id {
            None => true,
            Some(bt) => Some(bt) == business_type_id,
        }
    }

    pub fn instantiate(&self, tenant_id: Uuid) -> RoleRecord {
        RoleRecord {
            tenant_id,
            name: self.name.clone(),
            description: self.description.clone(),
            permissions: self.permissions.clone(),
            template_id: self.template_id,
            business_type_id: self.business_type_id,
            is_system_role: self.is_system_role,
            can_be_modified: !self.is_system_role,
            is_default: true,
            priority: self.priority,
            settings: self.settings.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewDefaultRole {
    #[validate(length(min = 1, max = 255))]
    pub name: String,

    pub description: Option<String>,
    pub business_type_id: Option<Uuid>,
    pub template_id: Option<Uuid>,

    #[serde(default)]
    pub permissions: Vec<Permission>,

    #[serde(default = "default_priority")]
    pub priority: i32,

    #[serde(default)]
    pub settings: RoleSettings,

    #[serde(default)]
    pub is_system_role: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRole {
    pub role_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blueprint(business_type_id: Option<Uuid>) -> DefaultRole {
        DefaultRole {
            id: Uuid::new_v4(),
            name: "clinician".to_string(),
            description: None,
            business_type_id,
            template_id: None,
            permissions: vec![Permission::parse("patient.read").unwrap()],
            priority: 50,
            settings: RoleSettings::default(),
            is_system_role: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn default_role_scope() {
        let healthcare = Uuid::new_v4();
        assert!(blueprint(None).applies_to(Some(healthcare)));
        assert!(blueprint(None).applies_to(None));
        assert!(blueprint(Some(healthcare)).applies_to(Some(healthcare)));
        assert!(!blueprint(Some(healthcare)).applies_to(Some(Uuid::new_v4())));
        assert!(!blueprint(Some(healthcare)).applies_to(None));
    }

    #[test]
    fn instantiated_roles_are_default_and_modifiable() {
        let tenant = Uuid::new_v4();
        let record = blueprint(None).instantiate(tenant);
        assert_eq!(record.tenant_id, tenant);
        assert!(record.is_default);
        assert!(record.can_be_modified);
        assert!(!record.is_system_role);
    }
}
