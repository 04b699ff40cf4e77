// Tenant registry, API keys and tenant notifications

pub mod api_keys;
pub mod context;
pub mod error;
pub mod notifier;
pub mod registry;

pub use api_keys::{generate_api_key, hash_api_key, key_family, GeneratedKey};
pub use context::TenantContext;
pub use error::{Result, TenantError};
pub use notifier::{
    kinds as notification_kinds, sign_payload, LogNotifier, MemoryNotifier, Notification,
    NotificationDispatcher, Notifier, NotifyError, WebhookNotifier,
};
pub use registry::{
    module_diff, ModuleUpdate, OnboardedTenant, TenantRegistry, MAX_TENANT_CACHE_TTL, MEMBER_ROLE,
    TENANT_ADMIN_ROLE,
};
