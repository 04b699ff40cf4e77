//! Identity provider adapters.
//!
//! Every provider ends in an [`AuthenticatedIdentity`]. Provider failures
//! are carried as [`ProviderError`] and surface as `AuthenticationFailed`.

pub mod local;
pub mod oauth;
pub mod provisioning;
pub mod saml;
pub mod state;

pub use local::LocalProvider;
pub use oauth::{HttpOAuthExchange, OAuthExchange};
pub use provisioning::{ExternalProfile, Provisioner};
pub use saml::{AssertionVerifier, RejectingVerifier, SamlAssertion};
pub use state::{SealedState, StateSealer};

use crate::error::{AuthError, ProviderError, Result};
use authcore_cache::{sso_state_key, Cache};
use authcore_models::module::ids;
use authcore_models::{EnterpriseSsoConfig, Identity, ProviderKind, SamlConfig, Tenant};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Result of a completed provider handshake.
#[derive(Debug, Clone)]
pub struct AuthenticatedIdentity {
    pub identity: Identity,
    pub provider_kind: ProviderKind,
    pub mfa_required: bool,
}

/// What the caller presents to finish authentication.
#[derive(Debug, Clone)]
pub enum Credentials {
    Password { email: String, password: String },
    AuthorizationCode { code: String, state: String },
    SamlResponse { saml_response: String, relay_state: String },
}

impl Credentials {
    /// The sealed state of a redirect flow, if any.
    pub fn state(&self) -> Option<&str> {
        match self {
            Credentials::Password { .. } => None,
            Credentials::AuthorizationCode { state, .. } => Some(state),
            Credentials::SamlResponse { relay_state, .. } => Some(relay_state),
        }
    }
}

/// A provider bound to one tenant's configuration.
pub enum IdentityProvider<'a> {
    Local(&'a LocalProvider),
    EnterpriseSso {
        config: &'a EnterpriseSsoConfig,
        providers: &'a Providers,
    },
    Saml {
        config: &'a SamlConfig,
        providers: &'a Providers,
    },
}

/// Shared collaborators for all providers.
#[derive(Clone)]
pub struct Providers {
    local: LocalProvider,
    oauth: Arc<dyn OAuthExchange>,
    verifier: Arc<dyn AssertionVerifier>,
    sealer: StateSealer,
    cache: Cache,
    provisioner: Provisioner,
}

impl Providers {
    pub fn new(
        local: LocalProvider,
        oauth: Arc<dyn OAuthExchange>,
        verifier: Arc<dyn AssertionVerifier>,
        sealer: StateSealer,
        cache: Cache,
        provisioner: Provisioner,
    ) -> Self {
        Self {
            local,
            oauth,
            verifier,
            sealer,
            cache,
            provisioner,
        }
    }

    /// Bind `kind` to the tenant, requiring its module and its config block.
    pub fn for_tenant<'a>(&'a self, tenant: &'a Tenant, kind: ProviderKind) -> Result<IdentityProvider<'a>> {
        let module = match kind {
            ProviderKind::Local => ids::AUTHENTICATION,
            ProviderKind::EnterpriseSso => ids::ENTERPRISE_SSO,
            ProviderKind::Saml => ids::SAML,
        };
        if !tenant.has_module(module) {
            return Err(AuthError::ModuleDisabled(module.to_string()));
        }

        match kind {
            ProviderKind::Local => Ok(IdentityProvider::Local(&self.local)),
            ProviderKind::EnterpriseSso => {
                let config = tenant
                    .module_config
                    .enterprise_sso
                    .as_ref()
                    .ok_or(ProviderError::NotConfigured)?;
                Ok(IdentityProvider::EnterpriseSso { config, providers: self })
            }
            ProviderKind::Saml => {
                let config = tenant.module_config.saml.as_ref().ok_or(ProviderError::NotConfigured)?;
                Ok(IdentityProvider::Saml { config, providers: self })
            }
        }
    }

    /// Tenant named by a callback's sealed state. Callbacks carry no tenant
    /// in the URL, so this is the only trusted source.
    pub fn callback_tenant(&self, kind: ProviderKind, credentials: &Credentials) -> Result<Uuid> {
        let sealed = credentials
            .state()
            .ok_or_else(|| AuthError::Validation("callback requires a state parameter".to_string()))?;
        let state = self.sealer.open(sealed)?;
        if state.provider_kind != kind {
            return Err(ProviderError::State("state was issued for another provider".to_string()).into());
        }
        Ok(state.tenant_id)
    }

    /// Open the state, bind it to `tenant`, and burn its nonce.
    async fn consume_state(&self, tenant: &Tenant, kind: ProviderKind, sealed: &str) -> Result<SealedState> {
        let state = self.sealer.open(sealed)?;
        if state.tenant_id != tenant.id || state.provider_kind != kind {
            return Err(ProviderError::State("state does not match this tenant".to_string()).into());
        }

        let ttl = self
            .sealer
            .ttl()
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(600));
        if !self.cache.set_once(&sso_state_key(&state.nonce), &tenant.id, ttl).await? {
            return Err(ProviderError::State("state has already been used".to_string()).into());
        }
        Ok(state)
    }
}

impl IdentityProvider<'_> {
    pub fn kind(&self) -> ProviderKind {
        match self {
            IdentityProvider::Local(_) => ProviderKind::Local,
            IdentityProvider::EnterpriseSso { .. } => ProviderKind::EnterpriseSso,
            IdentityProvider::Saml { .. } => ProviderKind::Saml,
        }
    }

    /// Redirect URL for redirect-based providers; `None` for local login.
    pub fn begin(&self, tenant: &Tenant, scopes: &[String]) -> Result<Option<String>> {
        match self {
            IdentityProvider::Local(_) => Ok(None),
            IdentityProvider::EnterpriseSso { config, providers } => {
                let (url, state) = oauth::authorization_request(config, tenant.id, scopes);
                let sealed = providers.sealer.seal(&state)?;
                Ok(Some(format!("{url}&state={}", urlencoding::encode(&sealed))))
            }
            IdentityProvider::Saml { config, providers } => {
                let sealed = providers.sealer.seal(&SealedState::new(tenant.id, ProviderKind::Saml, None))?;
                Ok(Some(saml::redirect_url(config, &sealed)))
            }
        }
    }

    pub async fn complete(&self, tenant: &Tenant, credentials: Credentials) -> Result<AuthenticatedIdentity> {
        let identity = match (self, credentials) {
            (IdentityProvider::Local(local), Credentials::Password { email, password }) => {
                local.authenticate(tenant, &email, &password).await?
            }
            (IdentityProvider::EnterpriseSso { config, providers }, Credentials::AuthorizationCode { code, state }) => {
                let state = providers.consume_state(tenant, ProviderKind::EnterpriseSso, &state).await?;
                let verifier = state
                    .code_verifier
                    .ok_or_else(|| ProviderError::State("state carries no PKCE verifier".to_string()))?;
                let access_token = providers.oauth.exchange_code(config, &code, &verifier).await?;
                let profile = providers.oauth.fetch_profile(config, &access_token).await?;
                providers
                    .provisioner
                    .link_or_provision(tenant, ProviderKind::EnterpriseSso, &profile)
                    .await?
            }
            (IdentityProvider::Saml { config, providers }, Credentials::SamlResponse { saml_response, relay_state }) => {
                providers.consume_state(tenant, ProviderKind::Saml, &relay_state).await?;
                let assertion = providers.verifier.verify(config, &saml_response).await?;
                let profile = saml::check_assertion(config, assertion, Utc::now())?;
                providers
                    .provisioner
                    .link_or_provision(tenant, ProviderKind::Saml, &profile)
                    .await?
            }
            _ => {
                return Err(AuthError::Validation(format!(
                    "credentials do not match the {} provider",
                    self.kind()
                )))
            }
        };

        ensure_usable(&identity)?;

        Ok(AuthenticatedIdentity {
            mfa_required: tenant.has_module(ids::MFA) && identity.has_mfa(),
            provider_kind: self.kind(),
            identity,
        })
    }
}

/// Locked identities fail as `AccountLocked`, suspended ones as `Forbidden`.
pub fn ensure_usable(identity: &Identity) -> Result<()> {
    use authcore_models::IdentityStatus;
    match identity.status {
        IdentityStatus::Active => Ok(()),
        IdentityStatus::Locked => Err(AuthError::AccountLocked {
            reason: "identity_locked".to_string(),
            expires_at: None,
        }),
        IdentityStatus::Suspended => Err(AuthError::Forbidden("identity is suspended".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lockout::LockoutService;
    use crate::password::test_hasher;
    use crate::revocation::TokenRevocation;
    use async_trait::async_trait;
    use authcore_database::{AuditEmitter, MemoryStore, Store};
    use authcore_authz::{has_permission, PermissionEngine};
    use authcore_models::{
        CreateTenant, ErrorKind, LockoutPolicy, ModuleConfigs, ModuleId, NewIdentity, Permission,
        RoleRecord, RoleSettings, TenantStatus,
    };
    use authcore_tenant::{NotificationDispatcher, TenantRegistry, MEMBER_ROLE};
    use chrono::Duration;

    struct StubExchange;

    #[async_trait]
    impl OAuthExchange for StubExchange {
        async fn exchange_code(
            &self,
            _config: &EnterpriseSsoConfig,
            code: &str,
            _code_verifier: &str,
        ) -> std::result::Result<String, ProviderError> {
            match code {
                "good-code" => Ok("provider-access-token".to_string()),
                _ => Err(ProviderError::Exchange("invalid_grant".to_string())),
            }
        }

        async fn fetch_profile(
            &self,
            _config: &EnterpriseSsoConfig,
            _access_token: &str,
        ) -> std::result::Result<ExternalProfile, ProviderError> {
            Ok(ExternalProfile {
                external_id: "ext-123".to_string(),
                email: "Dev@Corp.test".to_string(),
                display_name: Some("Dev".to_string()),
            })
        }
    }

    struct Fixture {
        store: Arc<dyn Store>,
        providers: Providers,
        tenant: Tenant,
    }

    async fn fixture() -> Fixture {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let audit = AuditEmitter::new(store.clone());
        let lockout = LockoutService::new(
            store.clone(),
            audit.clone(),
            TokenRevocation::new(store.clone(), Duration::minutes(15)),
            NotificationDispatcher::logging(),
            LockoutPolicy::default(),
        );
        let providers = Providers::new(
            LocalProvider::new(store.clone(), test_hasher(), lockout),
            Arc::new(StubExchange),
            Arc::new(RejectingVerifier),
            StateSealer::new("test-state-secret", Duration::minutes(10)).unwrap(),
            Cache::local(100),
            Provisioner::new(store.clone(), audit),
        );

        let tenant = Tenant {
            id: Uuid::new_v4(),
            org_id: "corp".to_string(),
            name: "Corp".to_string(),
            status: TenantStatus::Active,
            enabled_modules: vec![
                ModuleId::from(ids::AUTHENTICATION),
                ModuleId::from(ids::RBAC),
                ModuleId::from(ids::ENTERPRISE_SSO),
            ],
            business_type_id: None,
            module_config: ModuleConfigs {
                enterprise_sso: Some(EnterpriseSsoConfig {
                    authorize_url: "https://idp.example.com/authorize".to_string(),
                    token_url: "https://idp.example.com/token".to_string(),
                    userinfo_url: "https://idp.example.com/userinfo".to_string(),
                    client_id: "client".to_string(),
                    client_secret: "secret".to_string(),
                    redirect_uri: "https://app.example.com/auth/sso/callback".to_string(),
                    default_scopes: vec!["openid".to_string()],
                }),
                ..ModuleConfigs::default()
            },
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        for (name, priority, permissions) in [("member", 100, vec![]), ("viewer", 200, vec!["records.read"])] {
            store
                .create_role(RoleRecord {
                    tenant_id: tenant.id,
                    name: name.to_string(),
                    description: None,
                    permissions: permissions.into_iter().map(|p| Permission::parse(p).unwrap()).collect(),
                    template_id: None,
                    business_type_id: None,
                    is_system_role: false,
                    can_be_modified: true,
                    is_default: true,
                    priority,
                    settings: RoleSettings::default(),
                })
                .await
                .unwrap();
        }

        Fixture {
            store,
            providers,
            tenant,
        }
    }

    fn state_of(url: &str) -> String {
        let encoded = url.split("&state=").nth(1).unwrap();
        urlencoding::decode(encoded).unwrap().into_owned()
    }

    #[tokio::test]
    async fn sso_callback_provisions_with_lowest_precedence_default_role() {
        let f = fixture().await;
        let provider = f.providers.for_tenant(&f.tenant, ProviderKind::EnterpriseSso).unwrap();
        let url = provider.begin(&f.tenant, &[]).unwrap().unwrap();
        let credentials = Credentials::AuthorizationCode {
            code: "good-code".to_string(),
            state: state_of(&url),
        };

        assert_eq!(
            f.providers.callback_tenant(ProviderKind::EnterpriseSso, &credentials).unwrap(),
            f.tenant.id
        );
        let authenticated = provider.complete(&f.tenant, credentials.clone()).await.unwrap();
        assert_eq!(authenticated.provider_kind, ProviderKind::EnterpriseSso);
        assert!(!authenticated.mfa_required);
        assert_eq!(authenticated.identity.email, "dev@corp.test");

        let roles = f.store.get_roles(f.tenant.id, &authenticated.identity.role_ids).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, "viewer");

        let access = PermissionEngine::new(f.store.clone())
            .resolve(&authenticated.identity)
            .await
            .unwrap();
        assert!(has_permission(&access.permissions, &Permission::parse("records.read").unwrap()));
        assert!(!has_permission(&access.permissions, &Permission::parse("records.write").unwrap()));

        // The same state cannot be replayed.
        let err = provider.complete(&f.tenant, credentials).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[tokio::test]
    async fn sso_links_existing_identity_by_email() {
        let f = fixture().await;
        let existing = f
            .store
            .create_identity(NewIdentity {
                tenant_id: f.tenant.id,
                email: "dev@corp.test".to_string(),
                display_name: None,
                password_hash: None,
                external_provider: None,
                external_subject: None,
                role_ids: Vec::new(),
            })
            .await
            .unwrap();

        let provider = f.providers.for_tenant(&f.tenant, ProviderKind::EnterpriseSso).unwrap();
        let url = provider.begin(&f.tenant, &["openid".to_string()]).unwrap().unwrap();
        let authenticated = provider
            .complete(
                &f.tenant,
                Credentials::AuthorizationCode {
                    code: "good-code".to_string(),
                    state: state_of(&url),
                },
            )
            .await
            .unwrap();
        assert_eq!(authenticated.identity.id, existing.id);
        assert!(authenticated.identity.is_linked_to(ProviderKind::EnterpriseSso, "ext-123"));
    }

    #[tokio::test]
    async fn state_from_another_tenant_is_rejected() {
        let f = fixture().await;
        let mut other = f.tenant.clone();
        other.id = Uuid::new_v4();

        let url = f
            .providers
            .for_tenant(&other, ProviderKind::EnterpriseSso)
            .unwrap()
            .begin(&other, &[])
            .unwrap()
            .unwrap();
        let err = f
            .providers
            .for_tenant(&f.tenant, ProviderKind::EnterpriseSso)
            .unwrap()
            .complete(
                &f.tenant,
                Credentials::AuthorizationCode {
                    code: "good-code".to_string(),
                    state: state_of(&url),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[tokio::test]
    async fn failed_exchange_is_authentication_failed() {
        let f = fixture().await;
        let provider = f.providers.for_tenant(&f.tenant, ProviderKind::EnterpriseSso).unwrap();
        let url = provider.begin(&f.tenant, &[]).unwrap().unwrap();
        let err = provider
            .complete(
                &f.tenant,
                Credentials::AuthorizationCode {
                    code: "bad-code".to_string(),
                    state: state_of(&url),
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[tokio::test]
    async fn disabled_module_and_missing_config() {
        let f = fixture().await;
        let err = f.providers.for_tenant(&f.tenant, ProviderKind::Saml).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::ModuleDisabled);

        let mut tenant = f.tenant.clone();
        tenant.module_config.enterprise_sso = None;
        let err = f.providers.for_tenant(&tenant, ProviderKind::EnterpriseSso).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::AuthenticationFailed);
    }

    #[tokio::test]
    async fn sso_provisions_into_a_freshly_onboarded_tenant() {
        let f = fixture().await;
        let registry = TenantRegistry::new(
            f.store.clone(),
            Cache::local(100),
            std::time::Duration::from_secs(30),
            AuditEmitter::new(f.store.clone()),
            NotificationDispatcher::logging(),
        );
        let onboarded = registry
            .create_tenant(
                CreateTenant {
                    name: "Initech".to_string(),
                    org_id: "initech".to_string(),
                    admin_email: "admin@initech.test".to_string(),
                    admin_password: None,
                    enabled_modules: f.tenant.enabled_modules.clone(),
                    business_type_id: None,
                    module_config: f.tenant.module_config.clone(),
                },
                None,
            )
            .await
            .unwrap();
        let tenant = onboarded.tenant;

        let provider = f.providers.for_tenant(&tenant, ProviderKind::EnterpriseSso).unwrap();
        let url = provider.begin(&tenant, &[]).unwrap().unwrap();
        let authenticated = provider
            .complete(
                &tenant,
                Credentials::AuthorizationCode {
                    code: "good-code".to_string(),
                    state: state_of(&url),
                },
            )
            .await
            .unwrap();

        assert_eq!(authenticated.identity.tenant_id, tenant.id);
        let roles = f.store.get_roles(tenant.id, &authenticated.identity.role_ids).await.unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].name, MEMBER_ROLE);
        assert!(roles[0].is_default);
    }
}
