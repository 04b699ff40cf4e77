use crate::{create_router, AppState, Backends, Config};
use authcore_auth::{HttpOAuthExchange, RejectingVerifier};
use authcore_cache::Cache;
use authcore_database::{MemoryStore, Store};
use authcore_models::{CreateTenant, ModuleConfigs, ModuleId};
use authcore_tenant::{NotificationDispatcher, OnboardedTenant};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const PLATFORM_KEY: &str = "platform-key-for-tests-0123456789abcdef";
pub const ADMIN_PASSWORD: &str = "Correct-Horse-9";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.jwt.secret = "jwt-secret-for-tests-0123456789abcdef".to_string();
    config.sso.state_secret = "state-secret-for-tests-0123456789abcdef".to_string();
    config.platform.admin_key = Some(PLATFORM_KEY.to_string());
    config.password.memory_kib = 1024;
    config.password.iterations = 1;
    config
}

pub fn test_app() -> TestApp {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let backends = Backends {
        store,
        cache: Cache::local(1_000),
        database: None,
        notifier: NotificationDispatcher::logging(),
        oauth: Arc::new(HttpOAuthExchange::new().unwrap()),
        assertions: Arc::new(RejectingVerifier),
    };
    let state = Arc::new(AppState::new(&test_config(), backends).unwrap());
    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

impl TestApp {
    /// Onboard `org_id` with the given modules and an admin holding `*`.
    pub async fn onboard(&self, org_id: &str, modules: &[&str]) -> OnboardedTenant {
        let hash = self.state.hasher.hash(ADMIN_PASSWORD).await.unwrap();
        self.state
            .registry
            .create_tenant(
                CreateTenant {
                    name: format!("{org_id} clinic"),
                    org_id: org_id.to_string(),
                    admin_email: format!("admin@{org_id}.test"),
                    admin_password: None,
                    enabled_modules: modules.iter().map(|m| ModuleId::from(*m)).collect(),
                    business_type_id: None,
                    module_config: ModuleConfigs::default(),
                },
                Some(hash),
            )
            .await
            .unwrap()
    }

    /// Log in through the API and return the response body.
    pub async fn login(&self, org_id: &str, email: &str, password: &str) -> (StatusCode, Value) {
        self.send(
            Request::post("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    serde_json::json!({ "orgId": org_id, "email": email, "password": password }).to_string(),
                ))
                .unwrap(),
        )
        .await
    }

    /// Access token of the tenant admin.
    pub async fn admin_token(&self, org_id: &str) -> String {
        let (status, body) = self.login(org_id, &format!("admin@{org_id}.test"), ADMIN_PASSWORD).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body["token"].as_str().unwrap().to_string()
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }

    pub async fn json(&self, method: Method, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(request.body(Body::from(body.to_string())).unwrap()).await
    }

    pub async fn platform(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(crate::middleware::PLATFORM_KEY_HEADER, PLATFORM_KEY)
            .header(header::CONTENT_TYPE, "application/json");
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        self.send(request.body(body).unwrap()).await
    }
}

/// The plaintext API key of `family` handed out at onboarding.
pub fn api_key(onboarded: &OnboardedTenant, family: &str) -> String {
    onboarded
        .api_keys
        .iter()
        .find(|k| k.family == family)
        .map(|k| k.key.clone())
        .unwrap()
}
