//! Effective permission resolution.
//!
//! Everything here is pure: callers load roles, templates and business types,
//! and these functions combine them. Permission checks are exact set
//! membership; the only special token is the wildcard.

use authcore_models::{BusinessType, Permission, PermissionTemplate, Role, RoleSettings};
use serde::{Serialize, Serializer};
use std::collections::{BTreeSet, HashMap, HashSet};
use uuid::Uuid;

/// The resolved permission set of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EffectivePermissions {
    /// The wildcard was reachable; every check passes.
    All,
    Set(HashSet<Permission>),
}

impl EffectivePermissions {
    pub fn none() -> Self {
        EffectivePermissions::Set(HashSet::new())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, EffectivePermissions::All)
    }

    pub fn len(&self) -> Option<usize> {
        match self {
            EffectivePermissions::All => None,
            EffectivePermissions::Set(set) => Some(set.len()),
        }
    }

    /// Sorted tokens, with `*` standing for the wildcard.
    pub fn to_sorted_vec(&self) -> Vec<String> {
        match self {
            EffectivePermissions::All => vec![authcore_models::WILDCARD.to_string()],
            EffectivePermissions::Set(set) => set
                .iter()
                .map(|p| p.as_str().to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }
}

impl Serialize for EffectivePermissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_sorted_vec().serialize(serializer)
    }
}

/// Union of every permission reachable from `roles`: the role's own list,
/// its template's list, and its business type's defaults.
///
/// Templates and business types are looked up by id in the given slices;
/// ids with no match contribute nothing.
pub fn resolve_effective_permissions(
    roles: &[Role],
    templates: &[PermissionTemplate],
    business_types: &[BusinessType],
) -> EffectivePermissions {
    let templates: HashMap<Uuid, &PermissionTemplate> = templates.iter().map(|t| (t.id, t)).collect();
    let business_types: HashMap<Uuid, &BusinessType> = business_types.iter().map(|b| (b.id, b)).collect();

    let mut granted = HashSet::new();
    for role in roles {
        let inherited_from_template = role
            .template_id
            .and_then(|id| templates.get(&id))
            .map(|t| t.permissions.as_slice())
            .unwrap_or_default();
        let inherited_from_business_type = role
            .business_type_id
            .and_then(|id| business_types.get(&id))
            .map(|b| b.default_permissions.as_slice())
            .unwrap_or_default();

        for permission in role
            .permissions
            .iter()
            .chain(inherited_from_template)
            .chain(inherited_from_business_type)
        {
            if permission.is_wildcard() {
                return EffectivePermissions::All;
            }
            granted.insert(permission.clone());
        }
    }

    EffectivePermissions::Set(granted)
}

/// Exact-match membership; the wildcard satisfies every check.
pub fn has_permission(effective: &EffectivePermissions, permission: &Permission) -> bool {
    match effective {
        EffectivePermissions::All => true,
        EffectivePermissions::Set(set) => set.contains(permission),
    }
}

/// The first permission in `required` that is not granted, if any.
pub fn first_missing<'a>(effective: &EffectivePermissions, required: &'a [Permission]) -> Option<&'a Permission> {
    required.iter().find(|p| !has_permission(effective, p))
}

/// Merge role settings. For each setting, the role with the lowest priority
/// number that defines it wins; equal priorities fall back to role id order
/// so the result never depends on input order.
pub fn effective_settings(roles: &[Role]) -> RoleSettings {
    let mut ordered: Vec<&Role> = roles.iter().collect();
    ordered.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));

    RoleSettings {
        session_timeout_minutes: ordered.iter().find_map(|r| r.settings.session_timeout_minutes),
    }
}
