use crate::handlers;
use crate::middleware::{authorize, Guard, RouteRequirements};
use crate::AppState;
use authcore_models::events;
use axum::{
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post, put, MethodRouter},
    Router,
};
use std::sync::Arc;

type AppRoute = MethodRouter<Arc<AppState>>;

/// Wrap one method route in the authorization middleware.
fn guarded(route: AppRoute, state: &Arc<AppState>, requirements: RouteRequirements) -> AppRoute {
    route.route_layer(from_fn_with_state(Guard::new(state.clone(), requirements), authorize))
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let tenant = RouteRequirements::authenticated;
    let platform = RouteRequirements::platform;

    Router::new()
        // Health check
        .route("/health", get(handlers::health::health_check))
        // Login and token lifecycle: the token itself is the credential
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route(
            "/auth/verify",
            guarded(get(handlers::auth::verify), &state, tenant().mfa_exempt()),
        )
        // MFA
        .route("/auth/mfa/initiate", post(handlers::mfa::initiate))
        .route("/auth/mfa/verify", post(handlers::mfa::verify))
        .route(
            "/auth/mfa/enroll",
            guarded(post(handlers::mfa::enroll), &state, tenant().module("mfa").mfa_exempt()),
        )
        // External identity providers
        .route("/auth/:provider/:org_id/login", get(handlers::providers::begin_login))
        .route(
            "/auth/:provider/callback",
            post(handlers::providers::callback).get(handlers::providers::callback_redirect),
        )
        // Module entitlement check for downstream services
        .route(
            "/module-access/:module",
            guarded(
                get(handlers::module_access::check),
                &state,
                tenant()
                    .api_key()
                    .module_from_path("module")
                    .audit_as(events::MODULE_ACCESS),
            ),
        )
        // Tenant-scoped API
        .route("/api/tenant", guarded(get(handlers::tenant::current_tenant), &state, tenant()))
        .route(
            "/api/roles",
            guarded(
                get(handlers::roles::list_roles),
                &state,
                tenant().module("rbac").permission("roles.read"),
            ),
        )
        .route(
            "/api/roles",
            guarded(
                post(handlers::roles::create_role),
                &state,
                tenant().module("rbac").permission("roles.write"),
            ),
        )
        .route(
            "/api/roles/:role_id",
            guarded(
                get(handlers::roles::get_role),
                &state,
                tenant().module("rbac").permission("roles.read"),
            ),
        )
        .route(
            "/api/roles/:role_id",
            guarded(
                patch(handlers::roles::update_role).delete(handlers::roles::delete_role),
                &state,
                tenant().module("rbac").permission("roles.write"),
            ),
        )
        .route(
            "/api/identities",
            guarded(
                get(handlers::identities::list_identities),
                &state,
                tenant().permission("identities.read"),
            ),
        )
        .route(
            "/api/identities",
            guarded(
                post(handlers::identities::create_identity),
                &state,
                tenant().permission("identities.write"),
            ),
        )
        .route(
            "/api/identities/:identity_id",
            guarded(
                get(handlers::identities::get_identity),
                &state,
                tenant().permission("identities.read"),
            ),
        )
        .route(
            "/api/identities/:identity_id/status",
            guarded(
                put(handlers::identities::set_status),
                &state,
                tenant().permission("identities.write"),
            ),
        )
        .route(
            "/api/identities/:identity_id/permissions",
            guarded(
                get(handlers::identities::effective_permissions),
                &state,
                tenant().permission("identities.read"),
            ),
        )
        .route(
            "/api/identities/:identity_id/roles",
            guarded(
                post(handlers::roles::assign_role),
                &state,
                tenant().module("rbac").permission("roles.assign"),
            ),
        )
        .route(
            "/api/identities/:identity_id/roles/:role_id",
            guarded(
                delete(handlers::roles::unassign_role),
                &state,
                tenant().module("rbac").permission("roles.assign"),
            ),
        )
        .route(
            "/api/lockouts/unlock",
            guarded(
                post(handlers::identities::unlock),
                &state,
                tenant().permission("lockouts.manage"),
            ),
        )
        .route(
            "/api/audit/events",
            guarded(
                get(handlers::audit::query_events),
                &state,
                tenant().module("audit").permission("audit.read"),
            ),
        )
        // Platform administration
        .route(
            "/platform/tenants",
            guarded(post(handlers::tenant::create_tenant), &state, platform()),
        )
        .route(
            "/platform/tenants/:tenant_id",
            guarded(get(handlers::tenant::get_tenant), &state, platform()),
        )
        .route(
            "/platform/tenants/:tenant_id/modules",
            guarded(put(handlers::tenant::update_modules), &state, platform()),
        )
        .route(
            "/platform/tenants/:tenant_id/status",
            guarded(put(handlers::tenant::set_status), &state, platform()),
        )
        .route(
            "/platform/tenants/:tenant_id/api-keys",
            guarded(get(handlers::tenant::list_api_keys), &state, platform()),
        )
        .route(
            "/platform/business-types",
            guarded(
                get(handlers::catalog::list_business_types).post(handlers::catalog::create_business_type),
                &state,
                platform(),
            ),
        )
        .route(
            "/platform/business-types/:id",
            guarded(get(handlers::catalog::get_business_type), &state, platform()),
        )
        .route(
            "/platform/templates",
            guarded(
                get(handlers::catalog::list_templates).post(handlers::catalog::create_template),
                &state,
                platform(),
            ),
        )
        .route(
            "/platform/templates/:id",
            guarded(delete(handlers::catalog::delete_template), &state, platform()),
        )
        .route(
            "/platform/default-roles",
            guarded(
                get(handlers::catalog::list_default_roles).post(handlers::catalog::create_default_role),
                &state,
                platform(),
            ),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use crate::middleware::API_KEY_HEADER;
    use crate::test_support::{api_key, test_app, TestApp, ADMIN_PASSWORD};
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::json;

    const STAFF_EMAIL: &str = "nurse@acme.test";
    const STAFF_PASSWORD: &str = "Ward-Rounds-9";

    async fn staff_token(app: &TestApp, admin: &str) -> String {
        let (status, body) = app
            .json(
                Method::POST,
                "/api/identities",
                Some(admin),
                json!({ "email": STAFF_EMAIL, "password": STAFF_PASSWORD }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        let (status, body) = app.login("acme", STAFF_EMAIL, STAFF_PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn module_access(app: &TestApp, module: &str, token: &str, key: &str) -> (StatusCode, serde_json::Value) {
        app.send(
            Request::get(format!("/module-access/{module}"))
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .header(API_KEY_HEADER, key)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    #[tokio::test]
    async fn health_reports_cache_backend() {
        let app = test_app();
        let (status, body) = app.send(Request::get("/health").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["cache"], "local:up");
        assert!(body["database"].is_null());
    }

    #[tokio::test]
    async fn login_verify_refresh_logout() {
        let app = test_app();
        let onboarded = app.onboard("acme", &["authentication", "rbac"]).await;

        let (status, login) = app.login("acme", "Admin@Acme.test", ADMIN_PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "{login}");
        let token = login["token"].as_str().unwrap().to_string();
        let refresh_token = login["refreshToken"].as_str().unwrap().to_string();

        let (status, verified) = app.get("/auth/verify", &token).await;
        assert_eq!(status, StatusCode::OK, "{verified}");
        assert_eq!(verified["tenantId"], onboarded.tenant.id.to_string());
        assert_eq!(verified["orgId"], "acme");
        assert_eq!(verified["permissions"], json!(["*"]));

        let (status, refreshed) = app
            .json(Method::POST, "/auth/refresh", None, json!({ "refreshToken": refresh_token }))
            .await;
        assert_eq!(status, StatusCode::OK, "{refreshed}");
        let new_token = refreshed["token"].as_str().unwrap().to_string();

        let (status, body) = app.get("/auth/verify", &token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "invalid_token");

        let response = app
            .send(
                Request::post("/auth/logout")
                    .header(header::AUTHORIZATION, format!("Bearer {new_token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.0, StatusCode::NO_CONTENT);

        let (status, _) = app.get("/auth/verify", &new_token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bad_password_and_unknown_org_look_the_same() {
        let app = test_app();
        app.onboard("acme", &["authentication", "rbac"]).await;

        let (status, wrong_password) = app.login("acme", "admin@acme.test", "not the password").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, unknown_org) = app.login("nope", "admin@acme.test", ADMIN_PASSWORD).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(wrong_password, unknown_org);
        assert_eq!(unknown_org["error"], "invalid_credentials");
    }

    #[tokio::test]
    async fn protected_route_without_bearer_is_rejected() {
        let app = test_app();
        let (status, body) = app.send(Request::get("/api/roles").body(Body::empty()).unwrap()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "auth_required");

        let (status, _) = app.get("/api/roles", "not-a-jwt").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn module_access_follows_entitlements() {
        let app = test_app();
        let onboarded = app.onboard("acme", &["authentication", "rbac", "audit"]).await;
        let token = app.admin_token("acme").await;
        let audit_key = api_key(&onboarded, "audit");

        let (status, body) = module_access(&app, "audit", &token, &audit_key).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["granted"], true);
        assert_eq!(body["apiKeyFamily"], "audit");

        // A key of another family does not open the module.
        let (status, _) = module_access(&app, "audit", &token, &api_key(&onboarded, "rbac")).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = module_access(&app, "audit", &token, "audit_bogus").await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{body}");

        let (status, body) = app
            .platform(
                Method::PUT,
                &format!("/platform/tenants/{}/modules", onboarded.tenant.id),
                Some(json!({ "enabledModules": ["authentication", "rbac"] })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["diff"]["disabled"], json!(["audit"]));

        let (status, body) = module_access(&app, "audit", &token, &audit_key).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "module_disabled");
        assert_eq!(body["module"], "audit");
        assert!(body["hint"].is_string());
    }

    #[tokio::test]
    async fn suspended_tenant_is_locked_out() {
        let app = test_app();
        let onboarded = app.onboard("acme", &["authentication", "rbac"]).await;
        let token = app.admin_token("acme").await;

        let (status, body) = app
            .platform(
                Method::PUT,
                &format!("/platform/tenants/{}/status", onboarded.tenant.id),
                Some(json!({ "status": "suspended" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "suspended");

        let (status, body) = app.get("/api/tenant", &token).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "tenant_not_active");

        let (status, body) = app.login("acme", "admin@acme.test", ADMIN_PASSWORD).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "tenant_not_active");

        // pending is not reachable from suspended
        let (status, body) = app
            .platform(
                Method::PUT,
                &format!("/platform/tenants/{}/status", onboarded.tenant.id),
                Some(json!({ "status": "pending" })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "invalid_state_transition");
    }

    #[tokio::test]
    async fn permissions_gate_tenant_routes() {
        let app = test_app();
        app.onboard("acme", &["authentication", "rbac"]).await;
        let admin = app.admin_token("acme").await;
        let staff = staff_token(&app, &admin).await;

        let (status, body) = app.get("/api/roles", &staff).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
        assert_eq!(body["reason"], "permission 'roles.read'");

        let (status, role) = app
            .json(
                Method::POST,
                "/api/roles",
                Some(&admin),
                json!({ "name": "ward-reader", "permissions": ["roles.read"] }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{role}");
        let role_id = role["id"].as_str().unwrap().to_string();

        let (status, staff_profile) = app.get("/api/identities", &admin).await;
        assert_eq!(status, StatusCode::OK);
        let staff_id = staff_profile
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["email"] == STAFF_EMAIL)
            .map(|p| p["id"].as_str().unwrap().to_string())
            .unwrap();

        let (status, body) = app
            .json(
                Method::POST,
                &format!("/api/identities/{staff_id}/roles"),
                Some(&admin),
                json!({ "roleId": role_id }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        // Permissions resolve per request, so the same token now passes.
        let (status, _) = app.get("/api/roles", &staff).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = app
            .json(Method::POST, "/api/roles", Some(&staff), json!({ "name": "sneaky" }))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app
            .send(
                Request::delete(format!("/api/roles/{role_id}"))
                    .header(header::AUTHORIZATION, format!("Bearer {admin}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "{body}");
    }

    #[tokio::test]
    async fn audit_routes_need_the_module() {
        let app = test_app();
        app.onboard("acme", &["authentication", "rbac", "audit"]).await;
        let admin = app.admin_token("acme").await;

        let (status, body) = app.get("/api/audit/events?limit=10", &admin).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(!body["events"].as_array().unwrap().is_empty());
        assert_eq!(body["limit"], 10);

        let other = test_app();
        other.onboard("beta", &["authentication", "rbac"]).await;
        let token = other.admin_token("beta").await;
        let (status, body) = other.get("/api/audit/events", &token).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["module"], "audit");
    }

    #[tokio::test]
    async fn platform_routes_need_the_platform_key() {
        let app = test_app();

        let (status, body) = app
            .send(Request::get("/platform/business-types").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");

        let (status, _) = app
            .send(
                Request::get("/platform/business-types")
                    .header(crate::middleware::PLATFORM_KEY_HEADER, "wrong-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = app.platform(Method::GET, "/platform/business-types", None).await;
        assert_eq!(status, StatusCode::OK, "{body}");

        // Tenant tokens carry no platform rights.
        app.onboard("acme", &["authentication", "rbac"]).await;
        let admin = app.admin_token("acme").await;
        let (status, _) = app.get("/platform/business-types", &admin).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn onboarding_over_http_returns_keys_once() {
        let app = test_app();
        let (status, body) = app
            .platform(
                Method::POST,
                "/platform/tenants",
                Some(json!({
                    "name": "Acme Clinic",
                    "orgId": "acme",
                    "adminEmail": "admin@acme.test",
                    "adminPassword": ADMIN_PASSWORD,
                    "enabledModules": ["authentication", "rbac", "audit"],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        assert_eq!(body["tenant"]["status"], "active");
        assert_eq!(body["apiKeys"].as_array().unwrap().len(), 3);
        let tenant_id = body["tenant"]["id"].as_str().unwrap().to_string();

        let (status, keys) = app
            .platform(Method::GET, &format!("/platform/tenants/{tenant_id}/api-keys"), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert!(!keys.to_string().contains(body["apiKeys"][0]["key"].as_str().unwrap()));

        let (status, body) = app
            .platform(
                Method::POST,
                "/platform/tenants",
                Some(json!({
                    "name": "Acme Again",
                    "orgId": "acme",
                    "adminEmail": "admin@acme.test",
                    "enabledModules": ["authentication", "rbac"],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "{body}");

        let token = app.admin_token("acme").await;
        let (status, tenant) = app.get("/api/tenant", &token).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(tenant["orgId"], "acme");
    }

    #[tokio::test]
    async fn repeated_failures_lock_the_account_until_unlocked() {
        let app = test_app();
        app.onboard("acme", &["authentication", "rbac"]).await;
        let admin = app.admin_token("acme").await;
        staff_token(&app, &admin).await;

        for _ in 0..5 {
            app.login("acme", STAFF_EMAIL, "definitely wrong").await;
        }
        let (status, body) = app.login("acme", STAFF_EMAIL, STAFF_PASSWORD).await;
        assert_eq!(status, StatusCode::LOCKED, "{body}");
        assert_eq!(body["error"], "account_locked");
        assert!(body["expiresAt"].is_string());

        let (status, body) = app
            .json(
                Method::POST,
                "/api/lockouts/unlock",
                Some(&admin),
                json!({ "email": STAFF_EMAIL, "reason": "verified by phone" }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");

        let (status, _) = app.login("acme", STAFF_EMAIL, STAFF_PASSWORD).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_provider_segment_is_not_found() {
        let app = test_app();
        app.onboard("acme", &["authentication", "rbac"]).await;
        let (status, _) = app
            .send(Request::get("/auth/kerberos/acme/login").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = app
            .send(Request::get("/auth/sso/acme/login").body(Body::empty()).unwrap())
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{body}");
        assert_eq!(body["module"], "enterprise_sso");
    }
}
