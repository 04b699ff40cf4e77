//! Static product module catalog and its dependency graph.

use crate::error::ModuleSetError;
use authcore_models::module::ids;
use authcore_models::{ModuleConfigs, ModuleId};
use std::collections::{BTreeSet, HashSet};
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleDefinition {
    pub id: &'static str,
    /// API key family; modules sharing a family share one key.
    pub family: &'static str,
    pub dependencies: &'static [&'static str],
    /// Every tenant must enable it.
    pub required: bool,
    /// Enabling the module without a config block is rejected.
    pub requires_config: bool,
}

pub const MODULES: &[ModuleDefinition] = &[
    ModuleDefinition {
        id: ids::AUTHENTICATION,
        family: "auth",
        dependencies: &[],
        required: true,
        requires_config: false,
    },
    ModuleDefinition {
        id: ids::RBAC,
        family: "rbac",
        dependencies: &[ids::AUTHENTICATION],
        required: true,
        requires_config: false,
    },
    ModuleDefinition {
        id: ids::MFA,
        family: "mfa",
        dependencies: &[ids::AUTHENTICATION],
        required: false,
        requires_config: false,
    },
    ModuleDefinition {
        id: ids::ENTERPRISE_SSO,
        family: "sso",
        dependencies: &[ids::AUTHENTICATION],
        required: false,
        requires_config: true,
    },
    ModuleDefinition {
        id: ids::SAML,
        family: "sso",
        dependencies: &[ids::AUTHENTICATION],
        required: false,
        requires_config: true,
    },
    ModuleDefinition {
        id: ids::AUDIT,
        family: "audit",
        dependencies: &[ids::AUTHENTICATION],
        required: false,
        requires_config: false,
    },
    ModuleDefinition {
        id: ids::COMPLIANCE,
        family: "audit",
        dependencies: &[ids::AUDIT, ids::RBAC],
        required: false,
        requires_config: false,
    },
    ModuleDefinition {
        id: ids::PATIENT_RECORDS,
        family: "patient",
        dependencies: &[ids::RBAC, ids::AUDIT],
        required: false,
        requires_config: false,
    },
    ModuleDefinition {
        id: ids::SCHEDULING,
        family: "sched",
        dependencies: &[ids::PATIENT_RECORDS],
        required: false,
        requires_config: false,
    },
    ModuleDefinition {
        id: ids::BILLING,
        family: "billing",
        dependencies: &[ids::RBAC],
        required: false,
        requires_config: false,
    },
];

pub fn module_definition(id: &str) -> Option<&'static ModuleDefinition> {
    MODULES.iter().find(|m| m.id == id)
}

/// Check a candidate module set against the catalog.
///
/// Unknown ids are reported first, then duplicates, then missing required
/// modules, then unmet dependencies, each in catalog order so the same input
/// always names the same module.
pub fn validate_module_set(candidate: &[ModuleId]) -> Result<(), ModuleSetError> {
    let mut seen = HashSet::new();
    for module in candidate {
        if module_definition(module.as_str()).is_none() {
            return Err(ModuleSetError::UnknownModule(module.to_string()));
        }
    }
    for module in candidate {
        if !seen.insert(module.as_str()) {
            return Err(ModuleSetError::Duplicate(module.to_string()));
        }
    }

    if let Some(required) = MODULES.iter().find(|m| m.required && !seen.contains(m.id)) {
        return Err(ModuleSetError::MissingRequired(required.id.to_string()));
    }

    for definition in MODULES.iter().filter(|m| seen.contains(m.id)) {
        if let Some(dependency) = definition.dependencies.iter().find(|d| !seen.contains(*d)) {
            return Err(ModuleSetError::MissingDependency {
                module: definition.id.to_string(),
                dependency: dependency.to_string(),
            });
        }
    }

    Ok(())
}

/// Distinct API key families for a (validated) module set.
pub fn key_families(modules: &[ModuleId]) -> BTreeSet<&'static str> {
    modules
        .iter()
        .filter_map(|m| module_definition(m.as_str()))
        .map(|m| m.family)
        .collect()
}

/// Check the per-module configuration against the enabled set: every block
/// must belong to an enabled module, every enabled module that needs config
/// must have it, and each block must pass its own field validation.
pub fn validate_module_configs(modules: &[ModuleId], configs: &ModuleConfigs) -> Result<(), String> {
    let enabled: HashSet<&str> = modules.iter().map(ModuleId::as_str).collect();

    for configured in configs.configured_modules() {
        if !enabled.contains(configured) {
            return Err(format!("configuration given for module '{configured}', which is not enabled"));
        }
    }

    for definition in MODULES.iter().filter(|m| m.requires_config && enabled.contains(m.id)) {
        if !configs.configured_modules().contains(&definition.id) {
            return Err(format!("module '{}' requires configuration", definition.id));
        }
    }

    if let Some(auth) = &configs.authentication {
        auth.validate().map_err(|e| format!("authentication: {e}"))?;
        if let Some(policy) = &auth.lockout {
            policy.validate_policy()?;
        }
    }
    if let Some(mfa) = &configs.mfa {
        mfa.validate().map_err(|e| format!("mfa: {e}"))?;
    }
    if let Some(sso) = &configs.enterprise_sso {
        sso.validate().map_err(|e| format!("enterprise_sso: {e}"))?;
    }
    if let Some(saml) = &configs.saml {
        saml.validate().map_err(|e| format!("saml: {e}"))?;
    }
    if let Some(audit) = &configs.audit {
        audit.validate().map_err(|e| format!("audit: {e}"))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use authcore_models::{AuditModuleConfig, SamlConfig};

    fn set(ids: &[&str]) -> Vec<ModuleId> {
        ids.iter().map(|id| ModuleId::from(*id)).collect()
    }

    #[test]
    fn rbac_alone_names_missing_authentication() {
        let err = validate_module_set(&set(&["rbac"])).unwrap_err();
        assert_eq!(err, ModuleSetError::MissingRequired("authentication".to_string()));
        assert_eq!(err.offending_module(), "authentication");
    }

    #[test]
    fn accepts_sets_with_closed_dependencies() {
        assert!(validate_module_set(&set(&["authentication", "rbac"])).is_ok());
        assert!(validate_module_set(&set(&[
            "authentication",
            "rbac",
            "audit",
            "patient_records",
            "scheduling"
        ]))
        .is_ok());
    }

    #[test]
    fn names_the_missing_dependency() {
        let err = validate_module_set(&set(&["authentication", "rbac", "scheduling"])).unwrap_err();
        assert_eq!(
            err,
            ModuleSetError::MissingDependency {
                module: "scheduling".to_string(),
                dependency: "patient_records".to_string(),
            }
        );
        assert_eq!(err.offending_module(), "patient_records");
    }

    #[test]
    fn rejects_unknown_and_duplicate_modules() {
        assert_eq!(
            validate_module_set(&set(&["authentication", "rbac", "telepathy"])).unwrap_err(),
            ModuleSetError::UnknownModule("telepathy".to_string())
        );
        assert_eq!(
            validate_module_set(&set(&["authentication", "rbac", "rbac"])).unwrap_err(),
            ModuleSetError::Duplicate("rbac".to_string())
        );
    }

    #[test]
    fn every_declared_dependency_exists_in_the_catalog() {
        for module in MODULES {
            for dependency in module.dependencies {
                assert!(module_definition(dependency).is_some(), "{} -> {}", module.id, dependency);
            }
        }
    }

    /// Exhaustive check over every subset of the catalog: a set is accepted
    /// exactly when it has all required modules and is dependency-closed.
    #[test]
    fn validation_matches_closure_property_for_all_subsets() {
        for mask in 0u32..(1 << MODULES.len()) {
            let chosen: Vec<&ModuleDefinition> = MODULES
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, m)| m)
                .collect();
            let ids: HashSet<&str> = chosen.iter().map(|m| m.id).collect();
            let expected = MODULES.iter().filter(|m| m.required).all(|m| ids.contains(m.id))
                && chosen.iter().all(|m| m.dependencies.iter().all(|d| ids.contains(d)));

            let candidate: Vec<ModuleId> = chosen.iter().map(|m| ModuleId::from(m.id)).collect();
            assert_eq!(validate_module_set(&candidate).is_ok(), expected, "{ids:?}");
        }
    }

    #[test]
    fn sso_modules_share_a_key_family() {
        let families = key_families(&set(&["authentication", "rbac", "enterprise_sso", "saml"]));
        assert_eq!(families.into_iter().collect::<Vec<_>>(), vec!["auth", "rbac", "sso"]);
    }

    #[test]
    fn config_must_match_enabled_modules() {
        let modules = set(&["authentication", "rbac"]);
        let configs = ModuleConfigs {
            audit: Some(AuditModuleConfig { retention_days: 30 }),
            ..ModuleConfigs::default()
        };
        assert!(validate_module_configs(&modules, &configs).is_err());

        let with_saml = set(&["authentication", "rbac", "saml"]);
        assert!(validate_module_configs(&with_saml, &ModuleConfigs::default()).is_err());

        let configs = ModuleConfigs {
            saml: Some(SamlConfig {
                entry_point: "https://idp.example.com/sso".to_string(),
                idp_issuer: "https://idp.example.com".to_string(),
                idp_certificate: "MIIC...".to_string(),
                sp_entity_id: "authcore".to_string(),
                acs_url: "https://auth.example.com/auth/saml/callback".to_string(),
            }),
            ..ModuleConfigs::default()
        };
        assert!(validate_module_configs(&with_saml, &configs).is_ok());
    }
}
