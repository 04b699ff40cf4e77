use super::{codes, totp};
use crate::error::{AuthError, Result};
use crate::settings::AuthSettings;
use authcore_database::{AuditEmitter, Store};
use authcore_models::module::ids;
use authcore_models::{
    events, AuditCategory, AuditEventBuilder, ChallengeAttempt, ChallengePurpose, ErrorKind,
    Identity, MfaChallenge, MfaMethod, MfaMethodKind, Tenant,
};
use authcore_tenant::{notification_kinds, Notification, NotificationDispatcher};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedChallenge {
    pub challenge_id: Uuid,
    pub method: MfaMethodKind,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum ChallengeOutcome {
    Verified(MfaChallenge),
    /// Wrong code. Zero attempts left means the challenge is gone.
    Rejected { attempts_remaining: i32 },
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnrollMfa {
    pub method: MfaMethodKind,

    /// Phone number for SMS, address for email.
    #[validate(length(min = 3, max = 255))]
    pub destination: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaEnrollment {
    pub method_id: Uuid,
    pub method: MfaMethodKind,
    pub challenge: IssuedChallenge,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otpauth_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_code: Option<String>,
}

/// Challenge issue and verification. Challenge creation and attempt
/// accounting run on spawned tasks so they complete even if the caller
/// goes away.
#[derive(Clone)]
pub struct MfaService {
    store: Arc<dyn Store>,
    notifier: NotificationDispatcher,
    audit: AuditEmitter,
    settings: Arc<AuthSettings>,
}

impl MfaService {
    pub fn new(
        store: Arc<dyn Store>,
        notifier: NotificationDispatcher,
        audit: AuditEmitter,
        settings: Arc<AuthSettings>,
    ) -> Self {
        Self {
            store,
            notifier,
            audit,
            settings,
        }
    }

    /// Whether `tenant` lets identities use `kind` at all.
    pub fn ensure_allowed(&self, tenant: &Tenant, kind: MfaMethodKind) -> Result<()> {
        if !tenant.has_module(ids::MFA) {
            return Err(AuthError::ModuleDisabled(ids::MFA.to_string()));
        }
        match &tenant.module_config.mfa {
            Some(config) if !config.allowed_methods.contains(&kind) => Err(AuthError::Forbidden(format!(
                "MFA method '{kind}' is not allowed for this tenant"
            ))),
            _ => Ok(()),
        }
    }

    /// Pick a verified method the tenant still allows, preferring `kind`
    /// when given. An explicit `kind` the tenant disallows is `Forbidden`.
    pub fn select_method<'a>(
        &self,
        tenant: &Tenant,
        identity: &'a Identity,
        kind: Option<MfaMethodKind>,
    ) -> Result<&'a MfaMethod> {
        match kind {
            Some(kind) => {
                self.ensure_allowed(tenant, kind)?;
                identity
                    .verified_mfa_methods()
                    .find(|m| m.kind == kind)
                    .ok_or_else(|| AuthError::Validation(format!("no verified {kind} method is enrolled")))
            }
            None => {
                if !tenant.has_module(ids::MFA) {
                    return Err(AuthError::ModuleDisabled(ids::MFA.to_string()));
                }
                identity
                    .verified_mfa_methods()
                    .find(|m| self.ensure_allowed(tenant, m.kind).is_ok())
                    .ok_or_else(|| AuthError::Validation("no verified MFA method allowed here is enrolled".to_string()))
            }
        }
    }

    pub async fn issue(
        &self,
        identity: &Identity,
        method: &MfaMethod,
        purpose: ChallengePurpose,
    ) -> Result<IssuedChallenge> {
        let now = Utc::now();
        let code = match method.kind {
            MfaMethodKind::Totp => None,
            MfaMethodKind::Sms | MfaMethodKind::Email => Some(codes::generate_code()),
        };

        let challenge = MfaChallenge {
            id: Uuid::new_v4(),
            tenant_id: identity.tenant_id,
            identity_id: identity.id,
            method_id: method.id,
            method: method.kind,
            code_hash: code.as_deref().map(codes::hash_code),
            purpose,
            attempts_remaining: self.settings.mfa_max_attempts,
            expires_at: now + self.settings.mfa_challenge_ttl(),
            consumed_at: None,
            created_at: now,
        };

        let store = self.store.clone();
        let challenge = tokio::spawn(async move { store.create_challenge(challenge).await }).await??;

        if let (Some(code), Some(destination)) = (code, method.destination.as_ref()) {
            self.notifier.dispatch(Notification::new(
                identity.tenant_id,
                notification_kinds::MFA_CODE_ISSUED,
                serde_json::json!({
                    "identityId": identity.id,
                    "method": method.kind,
                    "destination": destination,
                    "code": code,
                    "expiresAt": challenge.expires_at,
                }),
            ));
        }

        tracing::info!(
            tenant_id = %identity.tenant_id,
            identity_id = %identity.id,
            challenge_id = %challenge.id,
            method = %method.kind,
            "MFA challenge issued"
        );
        self.audit.emit_detached(
            AuditEventBuilder::new(Some(identity.tenant_id), events::MFA_CHALLENGE_ISSUED, AuditCategory::Authentication)
                .actor(identity.id)
                .target("mfa_challenge", challenge.id)
                .detail(method.kind.to_string())
                .build(),
        );

        Ok(IssuedChallenge {
            challenge_id: challenge.id,
            method: challenge.method,
            expires_at: challenge.expires_at,
        })
    }

    /// Check `code` against a challenge owned by `identity_id`. Expired,
    /// consumed, exhausted or foreign challenges are all `InvalidToken`.
    pub async fn verify(
        &self,
        tenant_id: Uuid,
        identity_id: Uuid,
        challenge_id: Uuid,
        code: &str,
    ) -> Result<ChallengeOutcome> {
        let unavailable = || AuthError::InvalidToken("MFA challenge is invalid or has expired".to_string());
        let now = Utc::now();

        let challenge = self
            .store
            .get_challenge(tenant_id, challenge_id)
            .await?
            .filter(|c| c.identity_id == identity_id)
            .ok_or_else(unavailable)?;
        if challenge.is_consumed() || challenge.is_expired(now) {
            return Err(unavailable());
        }

        let identity = self
            .store
            .get_identity(tenant_id, identity_id)
            .await?
            .ok_or_else(unavailable)?;
        let method = identity
            .mfa_methods
            .iter()
            .find(|m| m.id == challenge.method_id)
            .cloned()
            .ok_or_else(unavailable)?;

        let matched = match (&challenge.code_hash, &method.secret) {
            (Some(hash), _) => codes::verify_code(code, hash),
            (None, Some(secret)) => totp::verify_totp(secret, code.trim())?,
            (None, None) => false,
        };

        let store = self.store.clone();
        let attempt = tokio::spawn(async move {
            store.attempt_challenge(tenant_id, challenge_id, matched, now).await
        })
        .await??;

        match attempt {
            ChallengeAttempt::Verified(consumed) => {
                let confirmed = MfaMethod {
                    verified: true,
                    last_used_at: Some(now),
                    ..method
                };
                self.store.save_mfa_method(tenant_id, identity_id, confirmed).await?;

                let event_type = if consumed.purpose == ChallengePurpose::Enrollment {
                    events::MFA_ENROLLED
                } else {
                    events::MFA_VERIFIED
                };
                self.audit
                    .emit(
                        AuditEventBuilder::new(Some(tenant_id), event_type, AuditCategory::Authentication)
                            .actor(identity_id)
                            .target("mfa_challenge", challenge_id)
                            .detail(consumed.method.to_string())
                            .build(),
                    )
                    .await;
                Ok(ChallengeOutcome::Verified(consumed))
            }
            ChallengeAttempt::Rejected { attempts_remaining } => {
                self.record_failure(tenant_id, identity_id, challenge_id, attempts_remaining).await;
                Ok(ChallengeOutcome::Rejected { attempts_remaining })
            }
            ChallengeAttempt::Exhausted => {
                self.record_failure(tenant_id, identity_id, challenge_id, 0).await;
                Ok(ChallengeOutcome::Rejected { attempts_remaining: 0 })
            }
            ChallengeAttempt::Unavailable => Err(unavailable()),
        }
    }

    async fn record_failure(&self, tenant_id: Uuid, identity_id: Uuid, challenge_id: Uuid, attempts_remaining: i32) {
        tracing::warn!(
            tenant_id = %tenant_id,
            identity_id = %identity_id,
            challenge_id = %challenge_id,
            attempts_remaining,
            "MFA verification failed"
        );
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant_id), events::MFA_VERIFICATION_FAILED, AuditCategory::Authentication)
                    .actor(identity_id)
                    .target("mfa_challenge", challenge_id)
                    .failure(ErrorKind::InvalidCredentials)
                    .build(),
            )
            .await;
    }

    /// Add an unverified method and issue the challenge that confirms it.
    pub async fn enroll(&self, tenant: &Tenant, identity: &Identity, request: EnrollMfa) -> Result<MfaEnrollment> {
        request.validate()?;
        self.ensure_allowed(tenant, request.method)?;

        let (secret, destination) = match request.method {
            MfaMethodKind::Totp => (Some(totp::generate_secret()), None),
            MfaMethodKind::Sms | MfaMethodKind::Email => {
                let destination = request.destination.ok_or_else(|| {
                    AuthError::Validation(format!("{} enrollment needs a destination", request.method))
                })?;
                (None, Some(destination))
            }
        };

        let method = MfaMethod {
            id: Uuid::new_v4(),
            kind: request.method,
            secret: secret.clone(),
            destination,
            verified: false,
            created_at: Utc::now(),
            last_used_at: None,
        };
        let identity = self
            .store
            .save_mfa_method(identity.tenant_id, identity.id, method.clone())
            .await?;
        let challenge = self.issue(&identity, &method, ChallengePurpose::Enrollment).await?;

        let (otpauth_uri, qr_code) = match &secret {
            Some(secret) => {
                let uri = totp::generate_totp_uri(secret, &identity.email, &self.settings.totp_issuer);
                let qr = totp::generate_qr_code(&uri)?;
                (Some(uri), Some(qr))
            }
            None => (None, None),
        };

        Ok(MfaEnrollment {
            method_id: method.id,
            method: method.kind,
            challenge,
            secret,
            otpauth_uri,
            qr_code,
        })
    }
}
