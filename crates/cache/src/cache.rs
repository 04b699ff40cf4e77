use crate::error::Result;
use moka::Expiry;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{de::DeserializeOwned, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// In-process, per-node cache.
    Local { max_capacity: u64 },
    Redis { url: String },
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Local { max_capacity: 10_000 },
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        match std::env::var("REDIS_URL") {
            Ok(url) if !url.is_empty() => Self {
                backend: CacheBackend::Redis { url },
            },
            _ => Self::default(),
        }
    }
}

/// Local entry: serialized value plus its own time-to-live.
#[derive(Clone)]
struct LocalEntry {
    value: String,
    ttl: Option<Duration>,
}

struct PerEntryExpiry;

impl Expiry<String, LocalEntry> for PerEntryExpiry {
    fn expire_after_create(&self, _key: &String, entry: &LocalEntry, _created_at: Instant) -> Option<Duration> {
        entry.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        entry: &LocalEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        entry.ttl
    }
}

#[derive(Clone)]
enum Backend {
    Local(moka::future::Cache<String, LocalEntry>),
    Redis(ConnectionManager),
}

/// JSON value cache over Redis or an in-process store.
#[derive(Clone)]
pub struct Cache {
    backend: Backend,
}

impl Cache {
    pub async fn new(config: CacheConfig) -> Result<Self> {
        match config.backend {
            CacheBackend::Local { max_capacity } => Ok(Self::local(max_capacity)),
            CacheBackend::Redis { url } => {
                let client = Client::open(url)?;
                let manager = ConnectionManager::new(client).await?;
                tracing::info!("Connected to Redis");
                Ok(Self {
                    backend: Backend::Redis(manager),
                })
            }
        }
    }

    pub fn local(max_capacity: u64) -> Self {
        tracing::debug!(max_capacity, "Using in-process cache");
        let cache = moka::future::Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryExpiry)
            .build();
        Self {
            backend: Backend::Local(cache),
        }
    }

    /// Set a value with optional TTL.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        let serialized = serde_json::to_string(value)?;
        match &self.backend {
            Backend::Local(cache) => {
                cache
                    .insert(key.to_string(), LocalEntry { value: serialized, ttl })
                    .await;
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                match ttl {
                    Some(ttl) => conn.set_ex::<_, _, ()>(key, serialized, ttl.as_secs().max(1)).await?,
                    None => conn.set::<_, _, ()>(key, serialized).await?,
                }
            }
        }
        Ok(())
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw = match &self.backend {
            Backend::Local(cache) => cache.get(key).await.map(|entry| entry.value),
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.get::<_, Option<String>>(key).await?
            }
        };

        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        match &self.backend {
            Backend::Local(cache) => cache.invalidate(key).await,
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                conn.del::<_, ()>(key).await?;
            }
        }
        Ok(())
    }

    /// Store `value` only if `key` is absent. Returns true when this call stored it.
    pub async fn set_once<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<bool> {
        let serialized = serde_json::to_string(value)?;
        match &self.backend {
            Backend::Local(cache) => {
                let entry = cache
                    .entry(key.to_string())
                    .or_insert_with(async move {
                        LocalEntry {
                            value: serialized,
                            ttl: Some(ttl),
                        }
                    })
                    .await;
                Ok(entry.is_fresh())
            }
            Backend::Redis(manager) => {
                let mut conn = manager.clone();
                let stored: Option<String> = redis::cmd("SET")
                    .arg(key)
                    .arg(serialized)
                    .arg("NX")
                    .arg("EX")
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn)
                    .await?;
                Ok(stored.is_some())
            }
        }
    }

    pub async fn ping(&self) -> Result<()> {
        if let Backend::Redis(manager) = &self.backend {
            let mut conn = manager.clone();
            redis::cmd("PING").query_async::<()>(&mut conn).await?;
        }
        Ok(())
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Local(_) => "local",
            Backend::Redis(_) => "redis",
        }
    }
}

pub fn tenant_cache_key(tenant_id: &str) -> String {
    format!("tenant:{}", tenant_id)
}

pub fn sso_state_key(nonce: &str) -> String {
    format!("sso_state:{}", nonce)
}
