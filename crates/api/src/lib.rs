// AuthCore HTTP API
// Router, authorization middleware and handlers over the authcore services

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;

pub use config::Config;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use middleware::{AuthContext, RouteRequirements};
pub use routes::create_router;

use authcore_auth::{
    AssertionVerifier, AuthError, IdentityService, JwtService, LocalProvider, LockoutService, MfaService,
    OAuthExchange, PasswordHasher, Providers, Provisioner, SessionService, StateSealer, TokenRevocation,
};
use authcore_authz::{CatalogService, PermissionEngine, RoleService};
use authcore_cache::Cache;
use authcore_database::{AuditEmitter, Database, Store};
use authcore_tenant::{NotificationDispatcher, TenantRegistry};
use std::sync::Arc;

/// Infrastructure the services are built on. Tests swap in the memory
/// store, the local cache and stub identity-provider clients.
pub struct Backends {
    pub store: Arc<dyn Store>,
    pub cache: Cache,
    /// Present when running on Postgres; used by the health check.
    pub database: Option<Database>,
    pub notifier: NotificationDispatcher,
    pub oauth: Arc<dyn OAuthExchange>,
    pub assertions: Arc<dyn AssertionVerifier>,
}

pub struct AppState {
    pub store: Arc<dyn Store>,
    pub cache: Cache,
    pub database: Option<Database>,
    pub audit: AuditEmitter,
    pub registry: TenantRegistry,
    pub catalog: CatalogService,
    pub engine: PermissionEngine,
    pub roles: RoleService,
    pub sessions: SessionService,
    pub identities: IdentityService,
    pub mfa: MfaService,
    pub lockout: LockoutService,
    pub hasher: PasswordHasher,
    pub platform_key: Option<String>,
}

impl AppState {
    pub fn new(config: &Config, backends: Backends) -> Result<Self, AuthError> {
        let Backends {
            store,
            cache,
            database,
            notifier,
            oauth,
            assertions,
        } = backends;

        let settings = Arc::new(config.auth.clone());
        let audit = AuditEmitter::new(store.clone());
        let hasher = PasswordHasher::with_cost(
            settings.password_hash_concurrency,
            config.password.memory_kib,
            config.password.iterations,
        )?;

        let registry = TenantRegistry::new(
            store.clone(),
            cache.clone(),
            config.cache.tenant_ttl(),
            audit.clone(),
            notifier.clone(),
        );
        let engine = PermissionEngine::new(store.clone());
        let revocation = TokenRevocation::new(store.clone(), settings.access_token_ttl());
        let lockout = LockoutService::new(
            store.clone(),
            audit.clone(),
            revocation.clone(),
            notifier.clone(),
            settings.lockout.clone(),
        );
        let mfa = MfaService::new(store.clone(), notifier, audit.clone(), settings.clone());
        let providers = Providers::new(
            LocalProvider::new(store.clone(), hasher.clone(), lockout.clone()),
            oauth,
            assertions,
            StateSealer::new(&config.sso.state_secret, settings.sso_state_ttl())?,
            cache.clone(),
            Provisioner::new(store.clone(), audit.clone()),
        );
        let sessions = SessionService::new(
            store.clone(),
            registry.clone(),
            engine.clone(),
            providers,
            mfa.clone(),
            revocation.clone(),
            JwtService::new(&config.jwt.secret, &settings.issuer),
            audit.clone(),
            settings,
        );
        let identities = IdentityService::new(
            store.clone(),
            hasher.clone(),
            engine.clone(),
            revocation,
            audit.clone(),
        );

        Ok(Self {
            catalog: CatalogService::new(store.clone(), audit.clone()),
            roles: RoleService::new(store.clone(), audit.clone()),
            store,
            cache,
            database,
            audit,
            registry,
            engine,
            sessions,
            identities,
            mfa,
            lockout,
            hasher,
            platform_key: config.platform.admin_key.clone(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support;
