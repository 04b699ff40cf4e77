//! Session & credential service.
//!
//! A login moves through provider verification, an optional second factor,
//! and ends with a session: a short-lived access JWT bound to a server-side
//! session row, plus an opaque refresh handle that rotates on every use.

use crate::error::{AuthError, Result};
use crate::jwt::{generate_refresh_token, hash_token, Claims, IssuedToken, JwtService, TokenSubject, TokenType};
use crate::mfa::{ChallengeOutcome, IssuedChallenge, MfaService};
use crate::providers::{ensure_usable, AuthenticatedIdentity, Credentials, Providers};
use crate::revocation::TokenRevocation;
use crate::settings::AuthSettings;
use authcore_authz::PermissionEngine;
use authcore_database::{AuditEmitter, Store};
use authcore_models::{
    events, AuditCategory, AuditEventBuilder, AuthSession, ChallengePurpose, Identity,
    IdentityProfile, MfaMethodKind, NewAuthSession, ProviderKind, SessionRotation, Tenant,
};
use authcore_tenant::{TenantError, TenantRegistry};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[validate(length(min = 1, max = 63))]
    pub org_id: String,

    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1, max = 128))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: IdentityProfile,
}

/// Handed out instead of a session when a second factor is still owed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaPending {
    pub mfa_required: bool,
    pub mfa_token: String,
    pub methods: Vec<MfaMethodKind>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum LoginOutcome {
    Session(SessionTokens),
    MfaRequired(MfaPending),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshedTokens {
    pub token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MfaVerification {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<IdentityProfile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts_remaining: Option<i32>,
}

/// A fully checked access token together with what it resolved to.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub claims: Claims,
    pub session: AuthSession,
    pub tenant: Tenant,
    pub identity: Identity,
}

enum Bearer {
    Pending {
        claims: Claims,
        tenant: Tenant,
        identity: Identity,
    },
    Session(VerifiedToken),
}

impl Bearer {
    fn tenant(&self) -> &Tenant {
        match self {
            Bearer::Pending { tenant, .. } => tenant,
            Bearer::Session(verified) => &verified.tenant,
        }
    }

    fn identity(&self) -> &Identity {
        match self {
            Bearer::Pending { identity, .. } => identity,
            Bearer::Session(verified) => &verified.identity,
        }
    }
}

#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn Store>,
    registry: TenantRegistry,
    engine: PermissionEngine,
    providers: Providers,
    mfa: MfaService,
    revocation: TokenRevocation,
    jwt: JwtService,
    audit: AuditEmitter,
    settings: Arc<AuthSettings>,
}

impl SessionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        registry: TenantRegistry,
        engine: PermissionEngine,
        providers: Providers,
        mfa: MfaService,
        revocation: TokenRevocation,
        jwt: JwtService,
        audit: AuditEmitter,
        settings: Arc<AuthSettings>,
    ) -> Self {
        Self {
            store,
            registry,
            engine,
            providers,
            mfa,
            revocation,
            jwt,
            audit,
            settings,
        }
    }

    /// Local login. Unknown organizations look exactly like bad passwords.
    pub async fn login(&self, request: LoginRequest) -> Result<LoginOutcome> {
        request.validate()?;
        let tenant = match self.registry.get_by_org_id(&request.org_id).await {
            Ok(tenant) => tenant,
            Err(TenantError::NotFound) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };
        require_active(&tenant)?;

        let provider = self.providers.for_tenant(&tenant, ProviderKind::Local)?;
        let result = provider
            .complete(
                &tenant,
                Credentials::Password {
                    email: request.email,
                    password: request.password,
                },
            )
            .await;
        let authenticated = self.audit_failure(&tenant, ProviderKind::Local, result).await?;
        self.finish_login(&tenant, authenticated).await
    }

    /// Redirect URL that starts an SSO or SAML login for the organization.
    pub async fn begin_external(&self, kind: ProviderKind, org_id: &str, scopes: &[String]) -> Result<String> {
        if kind == ProviderKind::Local {
            return Err(AuthError::Validation(
                "local login has no redirect step; use POST /auth/login".to_string(),
            ));
        }
        let tenant = self.registry.get_by_org_id(org_id).await?;
        require_active(&tenant)?;

        self.providers
            .for_tenant(&tenant, kind)?
            .begin(&tenant, scopes)?
            .ok_or_else(|| AuthError::Internal(format!("{kind} provider produced no redirect")))
    }

    /// Finish a redirect-based login. The tenant comes from the sealed state.
    pub async fn complete_external(&self, kind: ProviderKind, credentials: Credentials) -> Result<LoginOutcome> {
        let tenant_id = self.providers.callback_tenant(kind, &credentials).map_err(|e| {
            tracing::warn!(provider = %kind, kind = %e.kind(), "Rejected provider callback");
            e
        })?;
        let tenant = self.registry.get_tenant(tenant_id).await?;
        require_active(&tenant)?;

        let provider = self.providers.for_tenant(&tenant, kind)?;
        let result = provider.complete(&tenant, credentials).await;
        let authenticated = self.audit_failure(&tenant, kind, result).await?;
        self.finish_login(&tenant, authenticated).await
    }

    /// Check an access token. Revoked, superseded or foreign tokens are all
    /// `InvalidToken`; there is no implicit refresh.
    pub async fn verify(&self, token: &str) -> Result<VerifiedToken> {
        let claims = self.jwt.validate_access_token(token)?;
        self.verify_claims(claims).await
    }

    async fn verify_claims(&self, claims: Claims) -> Result<VerifiedToken> {
        let session_id = match (claims.token_type, claims.sid) {
            (TokenType::Access, Some(sid)) => sid,
            _ => return Err(AuthError::InvalidToken("Token is not an access token".to_string())),
        };
        if self.revocation.is_revoked(claims.jti).await? {
            return Err(AuthError::InvalidToken("Token has been revoked".to_string()));
        }

        let tenant = self.token_tenant(&claims).await?;
        require_active(&tenant)?;

        let session = self
            .store
            .get_session(tenant.id, session_id)
            .await?
            .filter(|s| s.is_usable(Utc::now()) && s.access_token_id == claims.jti && s.identity_id == claims.sub)
            .ok_or_else(|| AuthError::InvalidToken("Session is no longer valid".to_string()))?;

        let identity = self.token_identity(&tenant, &claims).await?;
        ensure_usable(&identity)?;

        Ok(VerifiedToken {
            claims,
            session,
            tenant,
            identity,
        })
    }

    /// Swap a refresh handle for a new access token and a new handle. Only
    /// one of several concurrent uses of the same handle succeeds.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let now = Utc::now();
        let next_refresh = generate_refresh_token();
        let jti = Uuid::new_v4();

        let session = self
            .store
            .rotate_refresh(
                SessionRotation {
                    old_refresh_hash: hash_token(refresh_token),
                    new_refresh_hash: hash_token(&next_refresh),
                    new_access_token_id: jti,
                },
                now,
            )
            .await?
            .ok_or_else(|| {
                tracing::warn!("Refresh token rejected");
                AuthError::InvalidToken("Refresh token is invalid or has already been used".to_string())
            })?;

        let identity = match self.refreshable(&session).await {
            Ok(identity) => identity,
            Err(e) => {
                self.revocation
                    .revoke_session(session.tenant_id, session.id, "refresh_rejected")
                    .await?;
                self.audit.emit_detached(
                    AuditEventBuilder::new(Some(session.tenant_id), events::REFRESH_REJECTED, AuditCategory::Authentication)
                        .actor(session.identity_id)
                        .target("session", session.id)
                        .failure(e.kind())
                        .build(),
                );
                return Err(e);
            }
        };

        let ttl = self.access_ttl(&identity).await?;
        let access = self.jwt.issue_access_token(
            TokenSubject {
                identity_id: identity.id,
                tenant_id: session.tenant_id,
                provider_kind: session.provider_kind,
                mfa_verified: session.mfa_verified,
            },
            session.id,
            jti,
            ttl,
        )?;

        self.audit.emit_detached(
            AuditEventBuilder::new(Some(session.tenant_id), events::SESSION_REFRESHED, AuditCategory::Authentication)
                .actor(identity.id)
                .target("session", session.id)
                .build(),
        );

        Ok(RefreshedTokens {
            token: access.token,
            refresh_token: next_refresh,
            expires_at: access.expires_at,
        })
    }

    async fn refreshable(&self, session: &AuthSession) -> Result<Identity> {
        let tenant = self.registry.get_tenant(session.tenant_id).await?;
        require_active(&tenant)?;
        let identity = self
            .store
            .get_identity(session.tenant_id, session.identity_id)
            .await?
            .ok_or_else(|| AuthError::InvalidToken("Identity no longer exists".to_string()))?;
        ensure_usable(&identity)?;
        Ok(identity)
    }

    /// Revoke the presented token and its session, refresh handle included.
    pub async fn logout(&self, token: &str) -> Result<()> {
        let claims = self.jwt.validate_access_token(token)?;
        let session_id = claims
            .sid
            .ok_or_else(|| AuthError::InvalidToken("Token is not an access token".to_string()))?;

        self.revocation
            .revoke_access_token(claims.tenant_id, claims.jti, claims.expires_at(), "logout")
            .await?;
        self.revocation.revoke_session(claims.tenant_id, session_id, "logout").await?;

        tracing::info!(tenant_id = %claims.tenant_id, identity_id = %claims.sub, session_id = %session_id, "Logged out");
        self.audit
            .emit(
                AuditEventBuilder::new(Some(claims.tenant_id), events::LOGOUT, AuditCategory::Authentication)
                    .actor(claims.sub)
                    .target("session", session_id)
                    .build(),
            )
            .await;
        Ok(())
    }

    /// Issue a challenge for the bearer. An MFA token means the second step
    /// of a login; an access token means step-up for its session.
    pub async fn initiate_mfa(&self, token: &str, method: Option<MfaMethodKind>) -> Result<IssuedChallenge> {
        let bearer = self.authenticate_bearer(token).await?;
        let purpose = match &bearer {
            Bearer::Pending { claims, .. } => ChallengePurpose::Login {
                provider_kind: claims.provider_kind,
            },
            Bearer::Session(verified) => ChallengePurpose::StepUp {
                session_id: verified.session.id,
            },
        };

        let identity = bearer.identity();
        let method = self.mfa.select_method(bearer.tenant(), identity, method)?;
        self.mfa.issue(identity, method, purpose).await
    }

    /// Verify a challenge code. What success yields depends on the
    /// challenge's purpose: a new session, an upgraded token, or a confirmed
    /// enrollment.
    pub async fn verify_mfa(&self, token: &str, challenge_id: Uuid, code: &str) -> Result<MfaVerification> {
        let bearer = self.authenticate_bearer(token).await?;
        let outcome = self
            .mfa
            .verify(bearer.tenant().id, bearer.identity().id, challenge_id, code)
            .await?;

        let challenge = match outcome {
            ChallengeOutcome::Verified(challenge) => challenge,
            ChallengeOutcome::Rejected { attempts_remaining } => {
                return Ok(MfaVerification {
                    verified: false,
                    attempts_remaining: Some(attempts_remaining),
                    ..MfaVerification::default()
                })
            }
        };

        match (challenge.purpose, bearer) {
            (ChallengePurpose::Login { provider_kind }, Bearer::Pending { claims, tenant, identity }) => {
                // The MFA token is single-use.
                self.revocation
                    .revoke_access_token(tenant.id, claims.jti, claims.expires_at(), "mfa_completed")
                    .await?;
                let tokens = self.issue_session(&tenant, &identity, provider_kind, true).await?;
                Ok(MfaVerification {
                    verified: true,
                    token: Some(tokens.token),
                    refresh_token: Some(tokens.refresh_token),
                    expires_at: Some(tokens.expires_at),
                    user: Some(tokens.user),
                    attempts_remaining: None,
                })
            }
            (ChallengePurpose::StepUp { session_id }, Bearer::Session(verified)) if verified.session.id == session_id => {
                let access = self.step_up(&verified).await?;
                Ok(MfaVerification {
                    verified: true,
                    token: Some(access.token),
                    expires_at: Some(access.expires_at),
                    user: Some(IdentityProfile::from(&verified.identity)),
                    ..MfaVerification::default()
                })
            }
            (ChallengePurpose::Enrollment, bearer) => Ok(MfaVerification {
                verified: true,
                user: Some(IdentityProfile::from(bearer.identity())),
                ..MfaVerification::default()
            }),
            _ => Err(AuthError::InvalidToken(
                "MFA challenge was issued for a different token".to_string(),
            )),
        }
    }

    /// Replace the session's access token with one carrying `mfa_verified`.
    async fn step_up(&self, verified: &VerifiedToken) -> Result<IssuedToken> {
        let jti = Uuid::new_v4();
        let session = self
            .store
            .upgrade_session(verified.tenant.id, verified.session.id, jti, true)
            .await?
            .ok_or_else(|| AuthError::InvalidToken("Session is no longer valid".to_string()))?;
        self.revocation
            .revoke_access_token(verified.tenant.id, verified.claims.jti, verified.claims.expires_at(), "mfa_step_up")
            .await?;

        let ttl = self.access_ttl(&verified.identity).await?;
        let access = self.jwt.issue_access_token(
            TokenSubject {
                identity_id: verified.identity.id,
                tenant_id: verified.tenant.id,
                provider_kind: session.provider_kind,
                mfa_verified: true,
            },
            session.id,
            jti,
            ttl,
        )?;
        tracing::info!(
            tenant_id = %verified.tenant.id,
            identity_id = %verified.identity.id,
            session_id = %session.id,
            "Session stepped up with MFA"
        );
        Ok(access)
    }

    async fn authenticate_bearer(&self, token: &str) -> Result<Bearer> {
        let claims = self.jwt.validate_token(token)?;
        match claims.token_type {
            TokenType::Access => Ok(Bearer::Session(self.verify_claims(claims).await?)),
            TokenType::MfaPending => {
                if self.revocation.is_revoked(claims.jti).await? {
                    return Err(AuthError::InvalidToken("Token has been revoked".to_string()));
                }
                let tenant = self.token_tenant(&claims).await?;
                require_active(&tenant)?;
                let identity = self.token_identity(&tenant, &claims).await?;
                ensure_usable(&identity)?;
                Ok(Bearer::Pending {
                    claims,
                    tenant,
                    identity,
                })
            }
        }
    }

    async fn finish_login(&self, tenant: &Tenant, authenticated: AuthenticatedIdentity) -> Result<LoginOutcome> {
        let AuthenticatedIdentity {
            identity,
            provider_kind,
            mfa_required,
        } = authenticated;

        // Methods the tenant no longer allows cannot be used, so they do not
        // count towards requiring MFA.
        let methods: Vec<MfaMethodKind> = identity
            .verified_mfa_methods()
            .map(|m| m.kind)
            .filter(|kind| self.mfa.ensure_allowed(tenant, *kind).is_ok())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if !mfa_required || methods.is_empty() {
            let tokens = self.issue_session(tenant, &identity, provider_kind, false).await?;
            return Ok(LoginOutcome::Session(tokens));
        }

        let mfa_token = self.jwt.issue_mfa_token(
            TokenSubject {
                identity_id: identity.id,
                tenant_id: tenant.id,
                provider_kind,
                mfa_verified: false,
            },
            self.settings.mfa_token_ttl(),
        )?;

        tracing::info!(tenant_id = %tenant.id, identity_id = %identity.id, provider = %provider_kind, "Login requires MFA");
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant.id), events::LOGIN_MFA_REQUIRED, AuditCategory::Authentication)
                    .actor(identity.id)
                    .metadata(serde_json::json!({ "provider": provider_kind, "methods": methods }))
                    .build(),
            )
            .await;

        Ok(LoginOutcome::MfaRequired(MfaPending {
            mfa_required: true,
            mfa_token: mfa_token.token,
            methods,
        }))
    }

    async fn issue_session(
        &self,
        tenant: &Tenant,
        identity: &Identity,
        provider_kind: ProviderKind,
        mfa_verified: bool,
    ) -> Result<SessionTokens> {
        let now = Utc::now();
        let ttl = self.access_ttl(identity).await?;
        let refresh_token = generate_refresh_token();

        let session = self
            .store
            .create_session(NewAuthSession {
                id: Uuid::new_v4(),
                tenant_id: tenant.id,
                identity_id: identity.id,
                provider_kind,
                mfa_verified,
                access_token_id: Uuid::new_v4(),
                refresh_token_hash: hash_token(&refresh_token),
                refresh_expires_at: now + self.settings.refresh_token_ttl(),
            })
            .await?;

        let access = self.jwt.issue_access_token(
            TokenSubject {
                identity_id: identity.id,
                tenant_id: tenant.id,
                provider_kind,
                mfa_verified,
            },
            session.id,
            session.access_token_id,
            ttl,
        )?;
        self.store.record_login(tenant.id, identity.id, now).await?;

        tracing::info!(
            tenant_id = %tenant.id,
            identity_id = %identity.id,
            session_id = %session.id,
            provider = %provider_kind,
            "Session issued"
        );
        self.audit
            .emit(
                AuditEventBuilder::new(Some(tenant.id), events::LOGIN_SUCCEEDED, AuditCategory::Authentication)
                    .actor(identity.id)
                    .target("session", session.id)
                    .metadata(serde_json::json!({ "provider": provider_kind, "mfaVerified": mfa_verified }))
                    .build(),
            )
            .await;

        Ok(SessionTokens {
            token: access.token,
            refresh_token,
            expires_at: access.expires_at,
            user: IdentityProfile::from(identity),
        })
    }

    async fn audit_failure(
        &self,
        tenant: &Tenant,
        provider_kind: ProviderKind,
        result: Result<AuthenticatedIdentity>,
    ) -> Result<AuthenticatedIdentity> {
        if let Err(e) = &result {
            tracing::warn!(tenant_id = %tenant.id, provider = %provider_kind, kind = %e.kind(), "Login failed");
            self.audit
                .emit(
                    AuditEventBuilder::new(Some(tenant.id), events::LOGIN_FAILED, AuditCategory::Authentication)
                        .metadata(serde_json::json!({ "provider": provider_kind }))
                        .failure(e.kind())
                        .build(),
                )
                .await;
        }
        result
    }

    /// Access token lifetime: the highest-precedence role's session timeout,
    /// else the platform default.
    async fn access_ttl(&self, identity: &Identity) -> Result<Duration> {
        let settings = self.engine.resolve(identity).await?.settings;
        Ok(settings
            .session_timeout_minutes
            .filter(|minutes| *minutes > 0)
            .map(Duration::minutes)
            .unwrap_or_else(|| self.settings.access_token_ttl()))
    }

    async fn token_tenant(&self, claims: &Claims) -> Result<Tenant> {
        match self.registry.get_tenant(claims.tenant_id).await {
            Ok(tenant) => Ok(tenant),
            Err(TenantError::NotFound) => Err(AuthError::InvalidToken("Unknown tenant".to_string())),
            Err(e) => Err(e.into()),
        }
    }

    async fn token_identity(&self, tenant: &Tenant, claims: &Claims) -> Result<Identity> {
        self.store
            .get_identity(tenant.id, claims.sub)
            .await?
            .ok_or_else(|| AuthError::InvalidToken("Unknown identity".to_string()))
    }
}

fn require_active(tenant: &Tenant) -> Result<()> {
    if tenant.is_active() {
        Ok(())
    } else {
        Err(AuthError::TenantNotActive)
    }
}
