pub mod cache;
pub mod error;

pub use cache::{sso_state_key, tenant_cache_key, Cache, CacheBackend, CacheConfig};
pub use error::{CacheError, Result};
