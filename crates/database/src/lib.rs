pub mod audit;
pub mod connection;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use audit::AuditEmitter;
pub use connection::{Database, DatabaseConfig};
pub use error::{DatabaseError, Result};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{
    ApiKeyStore, AuditStore, CatalogStore, IdentityStore, LockoutStore, MfaChallengeStore,
    NewApiKey, NewTenantRecord, RoleDeletion, RoleStore, SessionStore, Store, TenantStore,
};
