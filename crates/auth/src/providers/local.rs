use crate::error::{AuthError, Result};
use crate::lockout::{locked, LockoutService};
use crate::password::PasswordHasher;
use authcore_database::Store;
use authcore_models::{normalize_email, Identity, Tenant};
use std::sync::Arc;

/// Email and password against the tenant's own identities.
#[derive(Clone)]
pub struct LocalProvider {
    store: Arc<dyn Store>,
    hasher: PasswordHasher,
    lockout: LockoutService,
}

impl LocalProvider {
    pub fn new(store: Arc<dyn Store>, hasher: PasswordHasher, lockout: LockoutService) -> Self {
        Self {
            store,
            hasher,
            lockout,
        }
    }

    /// Lockout is checked before the password so a locked account fails fast
    /// even with the right password. Unknown emails and wrong passwords are
    /// indistinguishable to the caller. Identity status is checked by the
    /// caller.
    pub async fn authenticate(&self, tenant: &Tenant, email: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email);
        self.lockout.ensure_not_locked(tenant.id, &email).await?;

        let identity = self.store.find_identity_by_email(tenant.id, &email).await?;
        let hash = identity.as_ref().and_then(|i| i.password_hash.as_deref());
        let valid = self.hasher.verify(password, hash).await?;

        let Some(identity) = identity.filter(|_| valid) else {
            return Err(self.record_failure(tenant, &email).await);
        };

        self.lockout.reset(tenant.id, &email).await?;
        Ok(identity)
    }

    /// Counts the failure on a spawned task so it lands even if the request
    /// is dropped mid-flight.
    async fn record_failure(&self, tenant: &Tenant, email: &str) -> AuthError {
        let lockout = self.lockout.clone();
        let tenant = tenant.clone();
        let email = email.to_string();
        let recorded = tokio::spawn(async move { lockout.record_failure(&tenant, &email).await }).await;

        match recorded {
            Ok(Ok(Some(opened))) => locked(&opened),
            Ok(Ok(None)) => AuthError::InvalidCredentials,
            Ok(Err(e)) => e,
            Err(e) => e.into(),
        }
    }
}
