//! PostgreSQL store. Atomicity comes from unique constraints and single-statement
//! conditional updates; the few multi-statement operations run in a transaction.

use crate::connection::Database;
use crate::error::{DatabaseError, Result};
use crate::store::*;
use async_trait::async_trait;
use authcore_models::{
    AccountLockout, AuditEvent, AuditQuery, AuthSession, BusinessType, ChallengeAttempt,
    DefaultRole, Identity, IdentityStatus, MfaChallenge, MfaMethod, ModuleConfigs, ModuleId,
    NewAuditEvent, NewAuthSession, NewBusinessType, NewDefaultRole, NewIdentity, NewLockout,
    NewPermissionTemplate, PermissionTemplate, ProviderKind, RevokedToken, Role, RoleRecord,
    SessionRotation, Tenant, TenantApiKey, TenantStatus, UpdateRole,
};
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}

#[async_trait]
impl TenantStore for PgStore {
    async fn create_tenant(&self, tenant: NewTenantRecord) -> Result<Tenant> {
        let mut tx = self.pool.begin().await?;

        if let (Some(business_type_id), Some(cap)) = (tenant.business_type_id, tenant.max_tenants) {
            // Serializes onboardings of the same business type until commit.
            sqlx::query("SELECT id FROM business_types WHERE id = $1 FOR UPDATE")
                .bind(business_type_id)
                .execute(&mut *tx)
                .await?;
            let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenants WHERE business_type_id = $1")
                .bind(business_type_id)
                .fetch_one(&mut *tx)
                .await?;
            if existing >= i64::from(cap) {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "business type {business_type_id} is at its tenant cap"
                )));
            }
        }

        let created = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (id, org_id, name, status, enabled_modules, business_type_id, module_config)
            VALUES ($1, $2, $3, 'pending', $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&tenant.org_id)
        .bind(&tenant.name)
        .bind(Json(&tenant.enabled_modules))
        .bind(tenant.business_type_id)
        .bind(Json(&tenant.module_config))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_tenant(&self, id: Uuid) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn get_tenant_by_org_id(&self, org_id: &str) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE org_id = $1")
            .bind(org_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn update_tenant_modules(
        &self,
        id: Uuid,
        modules: Vec<ModuleId>,
        config: ModuleConfigs,
    ) -> Result<Tenant> {
        sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants
            SET enabled_modules = $2, module_config = $3, updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Json(&modules))
        .bind(Json(&config))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Tenant", &id.to_string()))
    }

    async fn transition_tenant_status(
        &self,
        id: Uuid,
        from: TenantStatus,
        to: TenantStatus,
    ) -> Result<Option<Tenant>> {
        let updated = sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(from)
        .bind(to)
        .fetch_optional(&self.pool)
        .await?;

        if updated.is_none() && self.get_tenant(id).await?.is_none() {
            return Err(DatabaseError::not_found("Tenant", &id.to_string()));
        }
        Ok(updated)
    }
}

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn insert_api_key(&self, key: NewApiKey) -> Result<TenantApiKey> {
        let stored = sqlx::query_as::<_, TenantApiKey>(
            r#"
            INSERT INTO tenant_api_keys (id, tenant_id, family, key_hash, key_hint)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(key.tenant_id)
        .bind(&key.family)
        .bind(&key.key_hash)
        .bind(&key.key_hint)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn find_api_key_by_hash(&self, key_hash: &str) -> Result<Option<TenantApiKey>> {
        let key = sqlx::query_as::<_, TenantApiKey>("SELECT * FROM tenant_api_keys WHERE key_hash = $1")
            .bind(key_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(key)
    }

    async fn list_api_keys(&self, tenant_id: Uuid) -> Result<Vec<TenantApiKey>> {
        let keys = sqlx::query_as::<_, TenantApiKey>(
            "SELECT * FROM tenant_api_keys WHERE tenant_id = $1 ORDER BY family",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(keys)
    }
}

#[async_trait]
impl IdentityStore for PgStore {
    async fn create_identity(&self, identity: NewIdentity) -> Result<Identity> {
        let created = sqlx::query_as::<_, Identity>(
            r#"
            INSERT INTO identities
                (id, tenant_id, email, display_name, password_hash, external_provider, external_subject, role_ids)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(identity.tenant_id)
        .bind(&identity.email)
        .bind(&identity.display_name)
        .bind(&identity.password_hash)
        .bind(identity.external_provider)
        .bind(&identity.external_subject)
        .bind(&identity.role_ids)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_identity(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn find_identity_by_email(&self, tenant_id: Uuid, email: &str) -> Result<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE tenant_id = $1 AND email = $2",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn find_identity_by_external(
        &self,
        tenant_id: Uuid,
        provider: ProviderKind,
        subject: &str,
    ) -> Result<Option<Identity>> {
        let identity = sqlx::query_as::<_, Identity>(
            r#"
            SELECT * FROM identities
            WHERE tenant_id = $1 AND external_provider = $2 AND external_subject = $3
            "#,
        )
        .bind(tenant_id)
        .bind(provider)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;
        Ok(identity)
    }

    async fn list_identities(&self, tenant_id: Uuid) -> Result<Vec<Identity>> {
        let identities = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE tenant_id = $1 ORDER BY email",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(identities)
    }

    async fn link_external_identity(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        provider: ProviderKind,
        subject: &str,
    ) -> Result<Identity> {
        sqlx::query_as::<_, Identity>(
            r#"
            UPDATE identities
            SET external_provider = $3, external_subject = $4, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(provider)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Identity", &id.to_string()))
    }

    async fn set_identity_status(&self, tenant_id: Uuid, id: Uuid, status: IdentityStatus) -> Result<Identity> {
        sqlx::query_as::<_, Identity>(
            r#"
            UPDATE identities SET status = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(status)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Identity", &id.to_string()))
    }

    async fn add_identity_role(&self, tenant_id: Uuid, id: Uuid, role_id: Uuid) -> Result<Identity> {
        // The role must belong to the same tenant; the subquery makes that part of the write.
        let updated = sqlx::query_as::<_, Identity>(
            r#"
            UPDATE identities
            SET role_ids = CASE WHEN $3 = ANY(role_ids) THEN role_ids ELSE array_append(role_ids, $3) END,
                updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
              AND EXISTS (SELECT 1 FROM roles WHERE tenant_id = $1 AND id = $3)
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(identity) => Ok(identity),
            None if self.get_identity(tenant_id, id).await?.is_none() => {
                Err(DatabaseError::not_found("Identity", &id.to_string()))
            }
            None => Err(DatabaseError::not_found("Role", &role_id.to_string())),
        }
    }

    async fn remove_identity_role(&self, tenant_id: Uuid, id: Uuid, role_id: Uuid) -> Result<Identity> {
        sqlx::query_as::<_, Identity>(
            r#"
            UPDATE identities SET role_ids = array_remove(role_ids, $3), updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Identity", &id.to_string()))
    }

    async fn save_mfa_method(&self, tenant_id: Uuid, id: Uuid, method: MfaMethod) -> Result<Identity> {
        let mut tx = self.pool.begin().await?;

        let mut identity = sqlx::query_as::<_, Identity>(
            "SELECT * FROM identities WHERE tenant_id = $1 AND id = $2 FOR UPDATE",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DatabaseError::not_found("Identity", &id.to_string()))?;

        match identity.mfa_methods.iter_mut().find(|m| m.id == method.id) {
            Some(existing) => *existing = method,
            None => identity.mfa_methods.push(method),
        }

        let updated = sqlx::query_as::<_, Identity>(
            r#"
            UPDATE identities SET mfa_methods = $3, updated_at = NOW()
            WHERE tenant_id = $1 AND id = $2
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(Json(&identity.mfa_methods))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    async fn record_login(&self, tenant_id: Uuid, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE identities SET last_login_at = $3 WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RoleStore for PgStore {
    async fn create_role(&self, role: RoleRecord) -> Result<Role> {
        let created = sqlx::query_as::<_, Role>(
            r#"
            INSERT INTO roles
                (id, tenant_id, name, description, permissions, template_id, business_type_id,
                 is_system_role, can_be_modified, is_default, priority, settings)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(role.tenant_id)
        .bind(&role.name)
        .bind(&role.description)
        .bind(Json(&role.permissions))
        .bind(role.template_id)
        .bind(role.business_type_id)
        .bind(role.is_system_role)
        .bind(role.can_be_modified)
        .bind(role.is_default)
        .bind(role.priority)
        .bind(Json(&role.settings))
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_role(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT * FROM roles WHERE tenant_id = $1 AND id = $2")
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(role)
    }

    async fn get_roles(&self, tenant_id: Uuid, ids: &[Uuid]) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE tenant_id = $1 AND id = ANY($2)",
        )
        .bind(tenant_id)
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn list_roles(&self, tenant_id: Uuid) -> Result<Vec<Role>> {
        let roles = sqlx::query_as::<_, Role>(
            "SELECT * FROM roles WHERE tenant_id = $1 ORDER BY priority, name",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(roles)
    }

    async fn update_role(&self, tenant_id: Uuid, id: Uuid, update: UpdateRole) -> Result<Role> {
        let mut query_builder = sqlx::QueryBuilder::new("UPDATE roles SET updated_at = NOW()");

        if let Some(name) = update.name {
            query_builder.push(", name = ");
            query_builder.push_bind(name);
        }
        if let Some(description) = update.description {
            query_builder.push(", description = ");
            query_builder.push_bind(description);
        }
        if let Some(permissions) = update.permissions {
            query_builder.push(", permissions = ");
            query_builder.push_bind(Json(permissions));
        }
        if let Some(is_default) = update.is_default {
            query_builder.push(", is_default = ");
            query_builder.push_bind(is_default);
        }
        if let Some(priority) = update.priority {
            query_builder.push(", priority = ");
            query_builder.push_bind(priority);
        }
        if let Some(settings) = update.settings {
            query_builder.push(", settings = ");
            query_builder.push_bind(Json(settings));
        }

        query_builder.push(" WHERE tenant_id = ");
        query_builder.push_bind(tenant_id);
        query_builder.push(" AND id = ");
        query_builder.push_bind(id);
        query_builder.push(" RETURNING *");

        query_builder
            .build_query_as::<Role>()
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| DatabaseError::not_found("Role", &id.to_string()))
    }

    async fn delete_role_if_unassigned(&self, tenant_id: Uuid, id: Uuid) -> Result<RoleDeletion> {
        let result = sqlx::query(
            r#"
            DELETE FROM roles
            WHERE tenant_id = $1 AND id = $2
              AND NOT EXISTS (SELECT 1 FROM identities WHERE tenant_id = $1 AND $2 = ANY(role_ids))
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(RoleDeletion::Deleted);
        }
        match self.get_role(tenant_id, id).await? {
            Some(_) => Ok(RoleDeletion::StillAssigned),
            None => Ok(RoleDeletion::NotFound),
        }
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn create_business_type(&self, business_type: NewBusinessType) -> Result<BusinessType> {
        let created = sqlx::query_as::<_, BusinessType>(
            r#"
            INSERT INTO business_types
                (id, name, description, risk_level, compliance_frameworks, default_permissions, max_tenants)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&business_type.name)
        .bind(&business_type.description)
        .bind(business_type.risk_level)
        .bind(Json(&business_type.compliance_frameworks))
        .bind(Json(&business_type.default_permissions))
        .bind(business_type.max_tenants)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_business_type(&self, id: Uuid) -> Result<Option<BusinessType>> {
        let found = sqlx::query_as::<_, BusinessType>("SELECT * FROM business_types WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found)
    }

    async fn get_business_types(&self, ids: &[Uuid]) -> Result<Vec<BusinessType>> {
        let found = sqlx::query_as::<_, BusinessType>("SELECT * FROM business_types WHERE id = ANY($1)")
            .bind(ids)
            .fetch_all(&self.pool)
            .await?;
        Ok(found)
    }

    async fn list_business_types(&self) -> Result<Vec<BusinessType>> {
        let found = sqlx::query_as::<_, BusinessType>("SELECT * FROM business_types ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(found)
    }

    async fn create_template(&self, template: NewPermissionTemplate) -> Result<PermissionTemplate> {
        let created = sqlx::query_as::<_, PermissionTemplate>(
            r#"
            INSERT INTO permission_templates
                (id, tenant_id, name, description, permissions, business_type_ids, is_default)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(template.tenant_id)
        .bind(&template.name)
        .bind(&template.description)
        .bind(Json(&template.permissions))
        .bind(&template.business_type_ids)
        .bind(template.is_default)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_templates(&self, ids: &[Uuid]) -> Result<Vec<PermissionTemplate>> {
        let found = sqlx::query_as::<_, PermissionTemplate>(
            "SELECT * FROM permission_templates WHERE id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(found)
    }

    async fn list_templates(&self, tenant_id: Option<Uuid>) -> Result<Vec<PermissionTemplate>> {
        let found = sqlx::query_as::<_, PermissionTemplate>(
            r#"
            SELECT * FROM permission_templates
            WHERE tenant_id IS NULL OR tenant_id = $1
            ORDER BY name
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(found)
    }

    async fn delete_template(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM permission_templates WHERE id = $1 AND is_default = FALSE")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn create_default_role(&self, role: NewDefaultRole) -> Result<DefaultRole> {
        let created = sqlx::query_as::<_, DefaultRole>(
            r#"
            INSERT INTO default_roles
                (id, name, description, business_type_id, template_id, permissions, priority, settings, is_system_role)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.business_type_id)
        .bind(role.template_id)
        .bind(Json(&role.permissions))
        .bind(role.priority)
        .bind(Json(&role.settings))
        .bind(role.is_system_role)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn list_default_roles(&self) -> Result<Vec<DefaultRole>> {
        let found = sqlx::query_as::<_, DefaultRole>("SELECT * FROM default_roles ORDER BY priority, name")
            .fetch_all(&self.pool)
            .await?;
        Ok(found)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn create_session(&self, session: NewAuthSession) -> Result<AuthSession> {
        let created = sqlx::query_as::<_, AuthSession>(
            r#"
            INSERT INTO auth_sessions
                (id, tenant_id, identity_id, provider_kind, mfa_verified, access_token_id,
                 refresh_token_hash, refresh_expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(session.id)
        .bind(session.tenant_id)
        .bind(session.identity_id)
        .bind(session.provider_kind)
        .bind(session.mfa_verified)
        .bind(session.access_token_id)
        .bind(&session.refresh_token_hash)
        .bind(session.refresh_expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_session(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<AuthSession>> {
        let session = sqlx::query_as::<_, AuthSession>(
            "SELECT * FROM auth_sessions WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn rotate_refresh(&self, rotation: SessionRotation, now: DateTime<Utc>) -> Result<Option<AuthSession>> {
        let rotated = sqlx::query_as::<_, AuthSession>(
            r#"
            UPDATE auth_sessions
            SET refresh_token_hash = $2, access_token_id = $3, last_refreshed_at = $4
            WHERE refresh_token_hash = $1 AND revoked_at IS NULL AND refresh_expires_at > $4
            RETURNING *
            "#,
        )
        .bind(&rotation.old_refresh_hash)
        .bind(&rotation.new_refresh_hash)
        .bind(rotation.new_access_token_id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(rotated)
    }

    async fn upgrade_session(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        access_token_id: Uuid,
        mfa_verified: bool,
    ) -> Result<Option<AuthSession>> {
        let upgraded = sqlx::query_as::<_, AuthSession>(
            r#"
            UPDATE auth_sessions SET access_token_id = $3, mfa_verified = $4
            WHERE tenant_id = $1 AND id = $2 AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(access_token_id)
        .bind(mfa_verified)
        .fetch_optional(&self.pool)
        .await?;
        Ok(upgraded)
    }

    async fn revoke_session(&self, tenant_id: Uuid, id: Uuid, now: DateTime<Utc>) -> Result<Option<AuthSession>> {
        let revoked = sqlx::query_as::<_, AuthSession>(
            r#"
            UPDATE auth_sessions SET revoked_at = $3
            WHERE tenant_id = $1 AND id = $2 AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(revoked)
    }

    async fn revoke_identity_sessions(
        &self,
        tenant_id: Uuid,
        identity_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<AuthSession>> {
        let revoked = sqlx::query_as::<_, AuthSession>(
            r#"
            UPDATE auth_sessions SET revoked_at = $3
            WHERE tenant_id = $1 AND identity_id = $2 AND revoked_at IS NULL
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(identity_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(revoked)
    }

    async fn revoke_token(&self, token: RevokedToken) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO revoked_tokens (token_id, tenant_id, reason, expires_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (token_id) DO NOTHING
            "#,
        )
        .bind(token.token_id)
        .bind(token.tenant_id)
        .bind(&token.reason)
        .bind(token.expires_at)
        .bind(token.revoked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn is_token_revoked(&self, token_id: Uuid) -> Result<bool> {
        let revoked: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM revoked_tokens WHERE token_id = $1)")
            .bind(token_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(revoked)
    }
}

#[async_trait]
impl LockoutStore for PgStore {
    async fn record_login_failure(
        &self,
        tenant_id: Uuid,
        email: &str,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<i32> {
        // Single upsert: the row lock taken by ON CONFLICT serializes concurrent increments.
        let failures: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO login_failures (tenant_id, email, failures, window_started_at)
            VALUES ($1, $2, 1, $4)
            ON CONFLICT (tenant_id, email) DO UPDATE SET
                failures = CASE WHEN login_failures.window_started_at < $3
                                THEN 1 ELSE login_failures.failures + 1 END,
                window_started_at = CASE WHEN login_failures.window_started_at < $3
                                         THEN $4 ELSE login_failures.window_started_at END
            RETURNING failures
            "#,
        )
        .bind(tenant_id)
        .bind(email)
        .bind(window_start)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(failures)
    }

    async fn reset_login_failures(&self, tenant_id: Uuid, email: &str) -> Result<()> {
        sqlx::query("DELETE FROM login_failures WHERE tenant_id = $1 AND email = $2")
            .bind(tenant_id)
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn active_lockout(&self, tenant_id: Uuid, email: &str, now: DateTime<Utc>) -> Result<Option<AccountLockout>> {
        let lockout = sqlx::query_as::<_, AccountLockout>(
            r#"
            SELECT * FROM account_lockouts
            WHERE tenant_id = $1 AND email = $2 AND unlocked_at IS NULL
              AND (expires_at IS NULL OR expires_at > $3)
            "#,
        )
        .bind(tenant_id)
        .bind(email)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(lockout)
    }

    async fn open_lockout(&self, lockout: NewLockout, now: DateTime<Utc>) -> Result<(AccountLockout, bool)> {
        let mut tx = self.pool.begin().await?;

        // Close out an expired lockout so the open-lockout unique index admits a new one.
        sqlx::query(
            r#"
            UPDATE account_lockouts SET unlocked_at = expires_at, unlock_reason = 'expired'
            WHERE tenant_id = $1 AND email = $2 AND unlocked_at IS NULL AND expires_at <= $3
            "#,
        )
        .bind(lockout.tenant_id)
        .bind(&lockout.email)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let inserted = sqlx::query_as::<_, AccountLockout>(
            r#"
            INSERT INTO account_lockouts (id, tenant_id, email, reason, locked_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (tenant_id, email) WHERE unlocked_at IS NULL DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(lockout.tenant_id)
        .bind(&lockout.email)
        .bind(&lockout.reason)
        .bind(now)
        .bind(lockout.expires_at)
        .fetch_optional(&mut *tx)
        .await?;

        let result = match inserted {
            Some(created) => (created, true),
            None => {
                let open = sqlx::query_as::<_, AccountLockout>(
                    "SELECT * FROM account_lockouts WHERE tenant_id = $1 AND email = $2 AND unlocked_at IS NULL",
                )
                .bind(lockout.tenant_id)
                .bind(&lockout.email)
                .fetch_one(&mut *tx)
                .await?;
                (open, false)
            }
        };

        tx.commit().await?;
        Ok(result)
    }

    async fn count_lockouts(&self, tenant_id: Uuid, email: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM account_lockouts WHERE tenant_id = $1 AND email = $2",
        )
        .bind(tenant_id)
        .bind(email)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn unlock(
        &self,
        tenant_id: Uuid,
        email: &str,
        unlocked_by: Option<Uuid>,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<AccountLockout>> {
        let unlocked = sqlx::query_as::<_, AccountLockout>(
            r#"
            UPDATE account_lockouts
            SET unlocked_at = $5, unlocked_by = $3, unlock_reason = $4
            WHERE tenant_id = $1 AND email = $2 AND unlocked_at IS NULL
              AND (expires_at IS NULL OR expires_at > $5)
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(email)
        .bind(unlocked_by)
        .bind(reason)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        Ok(unlocked)
    }
}

#[async_trait]
impl MfaChallengeStore for PgStore {
    async fn create_challenge(&self, challenge: MfaChallenge) -> Result<MfaChallenge> {
        let created = sqlx::query_as::<_, MfaChallenge>(
            r#"
            INSERT INTO mfa_challenges
                (id, tenant_id, identity_id, method_id, method, code_hash, purpose,
                 attempts_remaining, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING *
            "#,
        )
        .bind(challenge.id)
        .bind(challenge.tenant_id)
        .bind(challenge.identity_id)
        .bind(challenge.method_id)
        .bind(challenge.method)
        .bind(&challenge.code_hash)
        .bind(Json(&challenge.purpose))
        .bind(challenge.attempts_remaining)
        .bind(challenge.expires_at)
        .bind(challenge.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_challenge(&self, tenant_id: Uuid, id: Uuid) -> Result<Option<MfaChallenge>> {
        let challenge = sqlx::query_as::<_, MfaChallenge>(
            "SELECT * FROM mfa_challenges WHERE tenant_id = $1 AND id = $2",
        )
        .bind(tenant_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(challenge)
    }

    async fn attempt_challenge(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        code_matched: bool,
        now: DateTime<Utc>,
    ) -> Result<ChallengeAttempt> {
        // Right-hand sides see the pre-update row.
        let updated = sqlx::query_as::<_, MfaChallenge>(
            r#"
            UPDATE mfa_challenges
            SET attempts_remaining = CASE WHEN $3 THEN attempts_remaining ELSE attempts_remaining - 1 END,
                consumed_at = CASE WHEN $3 OR attempts_remaining <= 1 THEN $4 ELSE NULL END
            WHERE tenant_id = $1 AND id = $2 AND consumed_at IS NULL AND expires_at > $4
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(id)
        .bind(code_matched)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match updated {
            None => ChallengeAttempt::Unavailable,
            Some(challenge) if code_matched => ChallengeAttempt::Verified(challenge),
            Some(challenge) if challenge.is_consumed() => ChallengeAttempt::Exhausted,
            Some(challenge) => ChallengeAttempt::Rejected {
                attempts_remaining: challenge.attempts_remaining,
            },
        })
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append_audit_event(&self, event: NewAuditEvent) -> Result<AuditEvent> {
        let stored = sqlx::query_as::<_, AuditEvent>(
            r#"
            INSERT INTO audit_events
                (id, tenant_id, event_type, category, outcome, actor_id, target_type, target_id,
                 reason, detail, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(event.tenant_id)
        .bind(&event.event_type)
        .bind(event.category)
        .bind(event.outcome)
        .bind(&event.actor_id)
        .bind(&event.target_type)
        .bind(&event.target_id)
        .bind(event.reason)
        .bind(&event.detail)
        .bind(&event.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn list_audit_events(&self, tenant_id: Uuid, query: &AuditQuery) -> Result<Vec<AuditEvent>> {
        let mut query_builder = sqlx::QueryBuilder::new("SELECT * FROM audit_events WHERE tenant_id = ");
        query_builder.push_bind(tenant_id);

        if let Some(event_type) = &query.event_type {
            query_builder.push(" AND event_type = ");
            query_builder.push_bind(event_type.clone());
        }
        if let Some(outcome) = query.outcome {
            query_builder.push(" AND outcome = ");
            query_builder.push_bind(outcome);
        }
        if let Some(actor_id) = &query.actor_id {
            query_builder.push(" AND actor_id = ");
            query_builder.push_bind(actor_id.clone());
        }
        if let Some(from) = query.from {
            query_builder.push(" AND created_at >= ");
            query_builder.push_bind(from);
        }
        if let Some(to) = query.to {
            query_builder.push(" AND created_at <= ");
            query_builder.push_bind(to);
        }

        query_builder.push(" ORDER BY created_at DESC LIMIT ");
        query_builder.push_bind(query.effective_limit());
        query_builder.push(" OFFSET ");
        query_builder.push_bind(query.effective_offset());

        let events = query_builder
            .build_query_as::<AuditEvent>()
            .fetch_all(&self.pool)
            .await?;
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::DatabaseConfig;
    use chrono::Duration;

    async fn store() -> PgStore {
        let db = Database::new(DatabaseConfig::from_env())
            .await
            .expect("Failed to connect to database");
        db.migrate().await.expect("Failed to apply schema");
        PgStore::from_database(&db)
    }

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn failure_counter_upsert_counts_every_attempt() {
        let store = store().await;
        let tenant_id = Uuid::new_v4();
        let email = format!("{}@x.com", Uuid::new_v4());
        let now = Utc::now();

        let mut last = 0;
        for _ in 0..5 {
            last = store
                .record_login_failure(tenant_id, &email, now - Duration::minutes(15), now)
                .await
                .unwrap();
        }
        assert_eq!(last, 5);
    }

    #[tokio::test]
    #[ignore] // Only run with database available
    async fn api_key_hash_is_unique() {
        let store = store().await;
        let tenant = store
            .create_tenant(NewTenantRecord {
                org_id: format!("t-{}", &Uuid::new_v4().simple().to_string()[..12]),
                name: "Test".to_string(),
                enabled_modules: vec!["authentication".into()],
                business_type_id: None,
                module_config: ModuleConfigs::default(),
                max_tenants: None,
            })
            .await
            .unwrap();
        let hash = format!("{:0>64}", Uuid::new_v4().simple());
        let key = |family: &str| NewApiKey {
            tenant_id: tenant.id,
            family: family.to_string(),
            key_hash: hash.clone(),
            key_hint: "auth_abcd".to_string(),
        };

        store.insert_api_key(key("auth")).await.unwrap();
        let err = store.insert_api_key(key("rbac")).await.unwrap_err();
        assert!(err.is_duplicate());
    }
}
