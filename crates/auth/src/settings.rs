use authcore_models::LockoutPolicy;
use chrono::Duration;
use serde::Deserialize;

/// Tunables for token lifetimes, MFA challenges and SSO state. Secrets are
/// passed to the services separately.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    pub issuer: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    /// Lifetime of the token handed out between password and second factor.
    pub mfa_token_ttl_minutes: i64,
    pub mfa_challenge_ttl_minutes: i64,
    pub mfa_max_attempts: i32,
    pub totp_issuer: String,
    pub sso_state_ttl_minutes: i64,
    pub password_hash_concurrency: usize,
    /// Platform default; tenants may override it in their authentication config.
    pub lockout: LockoutPolicy,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            issuer: "authcore".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 30,
            mfa_token_ttl_minutes: 5,
            mfa_challenge_ttl_minutes: 5,
            mfa_max_attempts: 5,
            totp_issuer: "AuthCore".to_string(),
            sso_state_ttl_minutes: 10,
            password_hash_concurrency: 4,
            lockout: LockoutPolicy::default(),
        }
    }
}

impl AuthSettings {
    pub fn access_token_ttl(&self) -> Duration {
        Duration::minutes(self.access_token_ttl_minutes)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::days(self.refresh_token_ttl_days)
    }

    pub fn mfa_token_ttl(&self) -> Duration {
        Duration::minutes(self.mfa_token_ttl_minutes)
    }

    pub fn mfa_challenge_ttl(&self) -> Duration {
        Duration::minutes(self.mfa_challenge_ttl_minutes)
    }

    pub fn sso_state_ttl(&self) -> Duration {
        Duration::minutes(self.sso_state_ttl_minutes)
    }
}
