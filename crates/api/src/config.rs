use authcore_auth::AuthSettings;
use authcore_cache::{CacheBackend, CacheConfig};
use authcore_database::DatabaseConfig;
use config::{ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Server configuration.
///
/// Sources, later ones winning: built-in defaults, an optional
/// `authcore.toml` in the working directory, then `AUTHCORE__*` environment
/// variables (`AUTHCORE__JWT__SECRET`, `AUTHCORE__STORAGE__BACKEND`, ...).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub cache: CacheSettings,
    pub jwt: JwtConfig,
    pub auth: AuthSettings,
    pub password: PasswordConfig,
    pub sso: SsoConfig,
    pub platform: PlatformConfig,
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let defaults = DatabaseConfig::default();
        Self {
            backend: StorageBackend::Memory,
            url: defaults.url,
            max_connections: defaults.max_connections,
            min_connections: defaults.min_connections,
            connect_timeout_seconds: defaults.connect_timeout.as_secs(),
        }
    }
}

impl StorageConfig {
    pub fn database(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.url.clone(),
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            connect_timeout: Duration::from_secs(self.connect_timeout_seconds),
            ..DatabaseConfig::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Uses Redis when set, the in-process cache otherwise.
    pub redis_url: Option<String>,
    pub local_capacity: u64,
    /// Clamped to 30 seconds by the tenant registry.
    pub tenant_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            local_capacity: 10_000,
            tenant_ttl_seconds: 30,
        }
    }
}

impl CacheSettings {
    pub fn cache(&self) -> CacheConfig {
        let backend = match self.redis_url.as_deref() {
            Some(url) if !url.is_empty() => CacheBackend::Redis { url: url.to_string() },
            _ => CacheBackend::Local {
                max_capacity: self.local_capacity,
            },
        };
        CacheConfig { backend }
    }

    pub fn tenant_ttl(&self) -> Duration {
        Duration::from_secs(self.tenant_ttl_seconds)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
}

/// Argon2id cost. The defaults follow the argon2 crate's recommended
/// parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PasswordConfig {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SsoConfig {
    /// Key material for sealing the OAuth/SAML `state` parameter.
    pub state_secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Shared secret for the `/platform` routes. Those routes are closed
    /// when unset.
    pub admin_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    pub secret: String,
}

const MIN_SECRET_LEN: usize = 32;

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config: Config = config::Config::builder()
            .add_source(File::with_name("authcore").required(false))
            .add_source(Environment::with_prefix("AUTHCORE").prefix_separator("__").separator("__"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt.secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Message(format!(
                "jwt.secret must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        if self.sso.state_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Message(format!(
                "sso.state_secret must be at least {MIN_SECRET_LEN} characters"
            )));
        }
        if let Some(key) = &self.platform.admin_key {
            if key.len() < MIN_SECRET_LEN {
                return Err(ConfigError::Message(format!(
                    "platform.admin_key must be at least {MIN_SECRET_LEN} characters"
                )));
            }
        }
        self.auth.lockout.validate_policy().map_err(ConfigError::Message)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            jwt: JwtConfig {
                secret: "j".repeat(32),
            },
            sso: SsoConfig {
                state_secret: "s".repeat(32),
            },
            ..Config::default()
        }
    }

    #[test]
    fn defaults_use_memory_storage_and_local_cache() {
        let config = valid();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(matches!(config.cache.cache().backend, CacheBackend::Local { .. }));
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn short_secrets_are_rejected() {
        let mut config = valid();
        config.jwt.secret = "short".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.platform.admin_key = Some("short".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn redis_url_selects_redis() {
        let settings = CacheSettings {
            redis_url: Some("redis://localhost:6379".to_string()),
            ..CacheSettings::default()
        };
        assert_eq!(
            settings.cache().backend,
            CacheBackend::Redis {
                url: "redis://localhost:6379".to_string()
            }
        );
    }
}
