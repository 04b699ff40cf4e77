pub mod catalog;
pub mod engine;
pub mod error;
pub mod modules;
pub mod permissions;
pub mod roles;

pub use catalog::CatalogService;
pub use engine::{PermissionEngine, ResolvedAccess};
pub use error::{AuthzError, ModuleSetError, Result};
pub use modules::{
    key_families, module_definition, validate_module_configs, validate_module_set,
    ModuleDefinition, MODULES,
};
pub use permissions::{
    effective_settings, first_missing, has_permission, resolve_effective_permissions,
    EffectivePermissions,
};
pub use roles::RoleService;
