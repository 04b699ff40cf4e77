//! The single authorization enforcement point.
//!
//! Every protected route is wrapped in [`authorize`] with its own
//! [`RouteRequirements`]. The middleware fails closed: a request reaches its
//! handler only after every requirement passed, carrying an [`AuthContext`]
//! built once here. Exactly one audit event is written per request, allowed
//! or denied.

use crate::error::ApiError;
use crate::AppState;
use authcore_auth::VerifiedToken;
use authcore_authz::{first_missing, module_definition, EffectivePermissions};
use authcore_models::{
    events, AuditCategory, AuditEventBuilder, ErrorKind, Identity, Permission, ProviderKind, RoleSettings, Tenant,
};
use axum::{
    extract::{Path, Request, State},
    http::{request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
    RequestPartsExt,
};
use std::collections::HashMap;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use uuid::Uuid;

pub const API_KEY_HEADER: &str = "x-api-key";
pub const PLATFORM_KEY_HEADER: &str = "x-platform-key";

/// What the request was authorized as. Handlers receive it read-only.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub tenant: Tenant,
    pub identity: Identity,
    pub session_id: Uuid,
    pub provider_kind: ProviderKind,
    pub mfa_verified: bool,
    pub permissions: EffectivePermissions,
    pub settings: RoleSettings,
    /// Family of the `X-API-Key` presented alongside the bearer, if any.
    pub api_key_family: Option<String>,
}

impl AuthContext {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant.id
    }

    pub fn identity_id(&self) -> Uuid {
        self.identity.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Tenant,
    Platform,
}

/// Per-route requirements, checked in a fixed order: token, tenant and
/// identity state, API key, modules, then permissions, provider kinds
/// and MFA.
#[derive(Debug, Clone)]
pub struct RouteRequirements {
    access: Access,
    modules: Vec<&'static str>,
    /// Path parameter naming an additional required module.
    module_param: Option<&'static str>,
    permissions: Vec<&'static str>,
    providers: Vec<ProviderKind>,
    mfa: bool,
    /// Reachable without MFA even when the tenant requires it for everyone.
    mfa_exempt: bool,
    api_key: bool,
    event: &'static str,
}

impl RouteRequirements {
    /// Any valid session of an active tenant.
    pub fn authenticated() -> Self {
        Self {
            access: Access::Tenant,
            modules: Vec::new(),
            module_param: None,
            permissions: Vec::new(),
            providers: Vec::new(),
            mfa: false,
            mfa_exempt: false,
            api_key: false,
            event: events::ACCESS_DECISION,
        }
    }

    /// Platform administration, authenticated by the `X-Platform-Key` header.
    pub fn platform() -> Self {
        Self {
            access: Access::Platform,
            ..Self::authenticated()
        }
    }

    pub fn module(mut self, module: &'static str) -> Self {
        self.modules.push(module);
        self
    }

    pub fn module_from_path(mut self, param: &'static str) -> Self {
        self.module_param = Some(param);
        self
    }

    pub fn permission(mut self, permission: &'static str) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn provider(mut self, kind: ProviderKind) -> Self {
        self.providers.push(kind);
        self
    }

    pub fn require_mfa(mut self) -> Self {
        self.mfa = true;
        self
    }

    pub fn mfa_exempt(mut self) -> Self {
        self.mfa_exempt = true;
        self
    }

    pub fn api_key(mut self) -> Self {
        self.api_key = true;
        self
    }

    pub fn audit_as(mut self, event: &'static str) -> Self {
        self.event = event;
        self
    }
}

/// Middleware state: the app plus this route's requirements.
#[derive(Clone)]
pub struct Guard {
    state: Arc<AppState>,
    requirements: Arc<RouteRequirements>,
}

impl Guard {
    pub fn new(state: Arc<AppState>, requirements: RouteRequirements) -> Self {
        Self {
            state,
            requirements: Arc::new(requirements),
        }
    }
}

/// Who the request turned out to be, as far as the checks got.
#[derive(Default)]
struct Subject {
    tenant_id: Option<Uuid>,
    actor: Option<String>,
    module: Option<String>,
}

enum Decision {
    Tenant(AuthContext),
    Platform,
}

pub async fn authorize(State(guard): State<Guard>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let mut subject = Subject::default();

    let decision = match guard.requirements.access {
        Access::Platform => check_platform(&guard.state, &parts.headers, &mut subject).map(|()| Decision::Platform),
        Access::Tenant => check_tenant(&guard, &mut parts, &mut subject)
            .await
            .map(Decision::Tenant),
    };

    let event = AuditEventBuilder::new(subject.tenant_id, guard.requirements.event, AuditCategory::Authorization)
        .metadata(serde_json::json!({
            "method": parts.method.as_str(),
            "path": parts.uri.path(),
            "module": subject.module,
        }));
    let event = match &subject.actor {
        Some(actor) => event.actor(actor),
        None => event,
    };

    match decision {
        Ok(decision) => {
            tracing::debug!(method = %parts.method, path = %parts.uri.path(), "Access allowed");
            guard.state.audit.emit_detached(event.allow().build());
            if let Decision::Tenant(context) = decision {
                parts.extensions.insert(context);
            }
            next.run(Request::from_parts(parts, body)).await
        }
        Err(err) => {
            tracing::info!(
                method = %parts.method,
                path = %parts.uri.path(),
                tenant_id = ?subject.tenant_id,
                kind = %err.kind,
                "Access denied"
            );
            guard.state.audit.emit_detached(event.deny(err.kind).build());
            err.into_response()
        }
    }
}

/// The token from an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(ApiError::auth_required)
}

fn check_platform(state: &AppState, headers: &HeaderMap, subject: &mut Subject) -> Result<(), ApiError> {
    subject.actor = Some("platform".to_string());
    let expected = state
        .platform_key
        .as_deref()
        .ok_or_else(|| ApiError::forbidden("platform administration is disabled"))?;
    let presented = headers
        .get(PLATFORM_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::new(ErrorKind::AuthRequired, "X-Platform-Key header is required"))?;

    if bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::forbidden("valid platform key"))
    }
}

async fn check_tenant(guard: &Guard, parts: &mut Parts, subject: &mut Subject) -> Result<AuthContext, ApiError> {
    let state = &guard.state;
    let requirements = &guard.requirements;

    let token = bearer_token(&parts.headers)?;
    let VerifiedToken {
        claims,
        session,
        tenant,
        identity,
    } = state.sessions.verify(token).await?;
    subject.tenant_id = Some(tenant.id);
    subject.actor = Some(identity.id.to_string());

    let mut modules: Vec<String> = requirements.modules.iter().map(|m| m.to_string()).collect();
    let path_module = match requirements.module_param {
        Some(param) => {
            let Path(params) = parts
                .extract::<Path<HashMap<String, String>>>()
                .await
                .map_err(|e| ApiError::validation(e.to_string()))?;
            let module = params
                .get(param)
                .cloned()
                .ok_or_else(|| ApiError::validation(format!("missing path parameter '{param}'")))?;
            subject.module = Some(module.clone());
            modules.push(module.clone());
            Some(module)
        }
        None => None,
    };

    let api_key_family = if requirements.api_key {
        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::forbidden("X-API-Key header"))?;
        let key_context = state.registry.resolve_api_key(presented).await?;
        if key_context.tenant_id() != tenant.id {
            return Err(ApiError::forbidden("API key of the token's tenant"));
        }
        key_context.api_key_family
    } else {
        None
    };

    if let Some(missing) = modules.iter().find(|m| !tenant.has_module(m)) {
        return Err(ApiError::module_disabled(missing.as_str()));
    }

    if let (Some(module), Some(family)) = (&path_module, &api_key_family) {
        let covers = module_definition(module).is_some_and(|definition| definition.family == family.as_str());
        if !covers {
            return Err(ApiError::forbidden(format!("API key for module '{module}'")));
        }
    }

    let mfa_for_all = tenant.module_config.mfa.as_ref().is_some_and(|mfa| mfa.required_for_all);
    if mfa_for_all && !claims.mfa_verified && !requirements.mfa_exempt {
        return Err(ApiError::forbidden("mfa"));
    }

    let access = state.engine.resolve(&identity).await?;
    let required = requirements
        .permissions
        .iter()
        .map(|p| Permission::parse(p).map_err(ApiError::internal))
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(missing) = first_missing(&access.permissions, &required) {
        return Err(ApiError::forbidden(format!("permission '{missing}'")));
    }

    if !requirements.providers.is_empty() && !requirements.providers.contains(&claims.provider_kind) {
        return Err(ApiError::forbidden(format!(
            "login through {}",
            requirements
                .providers
                .iter()
                .map(ProviderKind::as_str)
                .collect::<Vec<_>>()
                .join(" or ")
        )));
    }

    if requirements.mfa && !claims.mfa_verified {
        return Err(ApiError::forbidden("mfa"));
    }

    Ok(AuthContext {
        session_id: session.id,
        provider_kind: claims.provider_kind,
        mfa_verified: claims.mfa_verified,
        permissions: access.permissions,
        settings: access.settings,
        api_key_family,
        tenant,
        identity,
    })
}
