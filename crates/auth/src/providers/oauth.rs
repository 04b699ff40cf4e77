use super::provisioning::ExternalProfile;
use super::state::{pkce_pair, SealedState};
use crate::error::ProviderError;
use async_trait::async_trait;
use authcore_models::{EnterpriseSsoConfig, ProviderKind};
use serde::Deserialize;
use std::time::Duration;
use uuid::Uuid;

/// Token endpoint and userinfo calls of an OAuth-style provider.
#[async_trait]
pub trait OAuthExchange: Send + Sync {
    /// Trade an authorization code for the provider's access token.
    async fn exchange_code(
        &self,
        config: &EnterpriseSsoConfig,
        code: &str,
        code_verifier: &str,
    ) -> Result<String, ProviderError>;

    async fn fetch_profile(&self, config: &EnterpriseSsoConfig, access_token: &str) -> Result<ExternalProfile, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Userinfo shapes seen across providers: `sub` (OIDC) or `id` (GitHub-style).
#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: Option<String>,
    id: Option<serde_json::Value>,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
    preferred_username: Option<String>,
}

impl UserInfo {
    fn into_profile(self) -> Result<ExternalProfile, ProviderError> {
        let external_id = self
            .sub
            .or_else(|| {
                self.id.map(|id| match id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
            })
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::Profile("profile has no subject".to_string()))?;

        if self.email_verified == Some(false) {
            return Err(ProviderError::Profile("email is not verified".to_string()));
        }
        let email = self
            .email
            .filter(|e| e.contains('@'))
            .ok_or_else(|| ProviderError::Profile("profile has no email".to_string()))?;

        Ok(ExternalProfile {
            external_id,
            email,
            display_name: self.name.or(self.preferred_username),
        })
    }
}

pub struct HttpOAuthExchange {
    client: reqwest::Client,
}

impl HttpOAuthExchange {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl OAuthExchange for HttpOAuthExchange {
    async fn exchange_code(
        &self,
        config: &EnterpriseSsoConfig,
        code: &str,
        code_verifier: &str,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(&config.token_url)
            .header("Accept", "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", config.redirect_uri.as_str()),
                ("client_id", config.client_id.as_str()),
                ("client_secret", config.client_secret.as_str()),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Exchange(format!("token endpoint returned {}", response.status())));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Exchange(e.to_string()))?;
        Ok(token.access_token)
    }

    async fn fetch_profile(&self, config: &EnterpriseSsoConfig, access_token: &str) -> Result<ExternalProfile, ProviderError> {
        let response = self
            .client
            .get(&config.userinfo_url)
            .bearer_auth(access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| ProviderError::Profile(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::Profile(format!("userinfo returned {}", response.status())));
        }
        let info: UserInfo = response
            .json()
            .await
            .map_err(|e| ProviderError::Profile(e.to_string()))?;
        info.into_profile()
    }
}

/// Authorization redirect plus the state that must come back with the code.
pub fn authorization_request(
    config: &EnterpriseSsoConfig,
    tenant_id: Uuid,
    scopes: &[String],
) -> (String, SealedState) {
    let (verifier, challenge) = pkce_pair();
    let state = SealedState::new(tenant_id, ProviderKind::EnterpriseSso, Some(verifier));
    let scopes = if scopes.is_empty() { &config.default_scopes } else { scopes };
    (authorize_url(config, scopes, &challenge), state)
}

/// Builds the URL without the `state` parameter; the caller appends it once sealed.
fn authorize_url(config: &EnterpriseSsoConfig, scopes: &[String], code_challenge: &str) -> String {
    let separator = if config.authorize_url.contains('?') { '&' } else { '?' };
    format!(
        "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge={}&code_challenge_method=S256",
        config.authorize_url,
        separator,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(&scopes.join(" ")),
        code_challenge,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EnterpriseSsoConfig {
        EnterpriseSsoConfig {
            authorize_url: "https://idp.example.com/authorize".to_string(),
            token_url: "https://idp.example.com/token".to_string(),
            userinfo_url: "https://idp.example.com/userinfo".to_string(),
            client_id: "client-1".to_string(),
            client_secret: "s3cret".to_string(),
            redirect_uri: "https://app.example.com/auth/sso/callback".to_string(),
            default_scopes: vec!["openid".to_string(), "email".to_string()],
        }
    }

    #[test]
    fn authorize_url_carries_pkce_and_default_scopes() {
        let tenant_id = Uuid::new_v4();
        let (url, state) = authorization_request(&config(), tenant_id, &[]);

        assert!(url.starts_with("https://idp.example.com/authorize?response_type=code"));
        assert!(url.contains("client_id=client-1"));
        assert!(url.contains("scope=openid%20email"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(!url.contains("s3cret"));
        assert_eq!(state.tenant_id, tenant_id);
        assert!(state.code_verifier.is_some());
    }

    #[test]
    fn userinfo_normalization() {
        let info: UserInfo = serde_json::from_value(serde_json::json!({
            "id": 42, "email": "dev@corp.test", "preferred_username": "dev"
        }))
        .unwrap();
        let profile = info.into_profile().unwrap();
        assert_eq!(profile.external_id, "42");
        assert_eq!(profile.display_name.as_deref(), Some("dev"));

        let unverified: UserInfo = serde_json::from_value(serde_json::json!({
            "sub": "abc", "email": "dev@corp.test", "email_verified": false
        }))
        .unwrap();
        assert!(unverified.into_profile().is_err());
    }
}
