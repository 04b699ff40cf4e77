use crate::error::Result;
use authcore_database::Store;
use authcore_models::{AuthSession, RevokedToken};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

/// Session and access-token revocation. Revoking a session also puts its
/// current access token on the revocation list, so live tokens stop
/// working immediately.
#[derive(Clone)]
pub struct TokenRevocation {
    store: Arc<dyn Store>,
    access_token_ttl: Duration,
}

impl TokenRevocation {
    pub fn new(store: Arc<dyn Store>, access_token_ttl: Duration) -> Self {
        Self {
            store,
            access_token_ttl,
        }
    }

    pub async fn is_revoked(&self, token_id: Uuid) -> Result<bool> {
        Ok(self.store.is_token_revoked(token_id).await?)
    }

    pub async fn revoke_access_token(
        &self,
        tenant_id: Uuid,
        token_id: Uuid,
        expires_at: DateTime<Utc>,
        reason: &str,
    ) -> Result<()> {
        self.store
            .revoke_token(RevokedToken {
                token_id,
                tenant_id,
                reason: reason.to_string(),
                expires_at,
                revoked_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    pub async fn revoke_session(&self, tenant_id: Uuid, session_id: Uuid, reason: &str) -> Result<Option<AuthSession>> {
        let now = Utc::now();
        let Some(session) = self.store.revoke_session(tenant_id, session_id, now).await? else {
            return Ok(None);
        };
        self.revoke_current_token(&session, now, reason).await?;
        Ok(Some(session))
    }

    /// Revoke every open session of an identity. Returns how many were open.
    pub async fn revoke_identity(&self, tenant_id: Uuid, identity_id: Uuid, reason: &str) -> Result<usize> {
        let now = Utc::now();
        let sessions = self.store.revoke_identity_sessions(tenant_id, identity_id, now).await?;
        for session in &sessions {
            self.revoke_current_token(session, now, reason).await?;
        }
        if !sessions.is_empty() {
            tracing::info!(
                tenant_id = %tenant_id,
                identity_id = %identity_id,
                sessions = sessions.len(),
                reason,
                "Identity sessions revoked"
            );
        }
        Ok(sessions.len())
    }

    async fn revoke_current_token(&self, session: &AuthSession, now: DateTime<Utc>, reason: &str) -> Result<()> {
        // Access tokens never outlive the default lifetime or the session's
        // refresh window, whichever is later.
        let expires_at = (now + self.access_token_ttl).max(session.refresh_expires_at);
        self.revoke_access_token(session.tenant_id, session.access_token_id, expires_at, reason)
            .await
    }
}
