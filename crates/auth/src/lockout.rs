use crate::error::{AuthError, Result};
use crate::revocation::TokenRevocation;
use authcore_database::{AuditEmitter, Store};
use authcore_models::lockout::reasons;
use authcore_models::{
    events, normalize_email, AccountLockout, AuditCategory, AuditEventBuilder, LockoutPolicy,
    NewLockout, Tenant, UnlockRequest,
};
use authcore_tenant::{notification_kinds, Notification, NotificationDispatcher};
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Per-(tenant, email) failure counting and lockouts. Counter increments and
/// lockout creation are single atomic store operations, so concurrent
/// failures never under-count and open at most one lockout.
#[derive(Clone)]
pub struct LockoutService {
    store: Arc<dyn Store>,
    audit: AuditEmitter,
    revocation: TokenRevocation,
    notifier: NotificationDispatcher,
    default_policy: LockoutPolicy,
}

impl LockoutService {
    pub fn new(
        store: Arc<dyn Store>,
        audit: AuditEmitter,
        revocation: TokenRevocation,
        notifier: NotificationDispatcher,
        default_policy: LockoutPolicy,
    ) -> Self {
        Self {
            store,
            audit,
            revocation,
            notifier,
            default_policy,
        }
    }

    /// The tenant's override when it has one, else the platform default.
    pub fn policy_for(&self, tenant: &Tenant) -> LockoutPolicy {
        tenant
            .module_config
            .authentication
            .as_ref()
            .and_then(|auth| auth.lockout.clone())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    pub async fn ensure_not_locked(&self, tenant_id: Uuid, email: &str) -> Result<()> {
        match self.store.active_lockout(tenant_id, &normalize_email(email), Utc::now()).await? {
            Some(lockout) => Err(locked(&lockout)),
            None => Ok(()),
        }
    }

    /// Count one failed login. Returns the lockout when the failure reached
    /// the policy threshold.
    pub async fn record_failure(&self, tenant: &Tenant, email: &str) -> Result<Option<AccountLockout>> {
        let policy = self.policy_for(tenant);
        let email = normalize_email(email);
        let now = Utc::now();

        let failures = self
            .store
            .record_login_failure(tenant.id, &email, now - Duration::minutes(policy.window_minutes), now)
            .await?;
        if failures < policy.max_attempts as i32 {
            return Ok(None);
        }

        let previous = self.store.count_lockouts(tenant.id, &email).await?;
        let cooldown = policy.cooldown_minutes(u32::try_from(previous).unwrap_or(u32::MAX));
        let (lockout, created) = self
            .store
            .open_lockout(
                NewLockout {
                    tenant_id: tenant.id,
                    email: email.clone(),
                    reason: reasons::TOO_MANY_FAILED_ATTEMPTS.to_string(),
                    expires_at: Some(now + Duration::minutes(cooldown)),
                },
                now,
            )
            .await?;

        if created {
            self.store.reset_login_failures(tenant.id, &email).await?;
            self.on_locked(tenant.id, &lockout, failures).await?;
        }
        Ok(Some(lockout))
    }

    async fn on_locked(&self, tenant_id: Uuid, lockout: &AccountLockout, failures: i32) -> Result<()> {
        tracing::warn!(
            tenant_id = %tenant_id,
            lockout_id = %lockout.id,
            expires_at = ?lockout.expires_at,
            failures,
            "Account locked"
        );

        let identity = self.store.find_identity_by_email(tenant_id, &lockout.email).await?;
        if let Some(identity) = &identity {
            self.revocation
                .revoke_identity(tenant_id, identity.id, reasons::TOO_MANY_FAILED_ATTEMPTS)
                .await?;
        }

        let mut event = AuditEventBuilder::new(Some(tenant_id), events::ACCOUNT_LOCKED, AuditCategory::Security)
            .target("lockout", lockout.id)
            .detail(lockout.reason.clone())
            .metadata(serde_json::json!({ "expiresAt": lockout.expires_at }));
        if let Some(identity) = &identity {
            event = event.actor(identity.id);
        }
        self.audit.emit(event.build()).await;

        self.notifier.dispatch(Notification::new(
            tenant_id,
            notification_kinds::ACCOUNT_LOCKED,
            serde_json::json!({
                "email": lockout.email,
                "reason": lockout.reason,
                "expiresAt": lockout.expires_at,
            }),
        ));
        Ok(())
    }

    pub async fn reset(&self, tenant_id: Uuid, email: &str) -> Result<()> {
        Ok(self.store.reset_login_failures(tenant_id, &normalize_email(email)).await?)
    }

    /// Administrative unlock. The lockout row stays as the audit trail.
    pub async fn unlock(&self, tenant_id: Uuid, actor: Uuid, request: UnlockRequest) -> Result<AccountLockout> {
        request.validate()?;
        let email = normalize_email(&request.email);
        let unlocked = self
            .store
            .unlock(tenant_id, &email, Some(actor), &request.reason, Utc::now())
            .await?
            .ok_or_else(|| AuthError::NotFound(format!("no active lockout for {email}")))?;
        self.store.reset_login_failures(tenant_id, &email).await?;

        tracing::info!(tenant_id = %tenant_id, lockout_id = %unlocked.id, actor = %actor, "Account unlocked");
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant_id), events::ACCOUNT_UNLOCKED, AuditCategory::Security)
                    .actor(actor)
                    .target("lockout", unlocked.id)
                    .detail(request.reason)
                    .build(),
            )
            .await;
        Ok(unlocked)
    }
}

/// Lockout error carrying only reason and expiry.
pub fn locked(lockout: &AccountLockout) -> AuthError {
    AuthError::AccountLocked {
        reason: lockout.reason.clone(),
        expires_at: lockout.expires_at,
    }
}
