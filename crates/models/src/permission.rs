use serde::{Deserialize, Serialize};
use std::fmt;

/// The wildcard token. Holding it grants every permission.
pub const WILDCARD: &str = "*";

/// An opaque permission token: `resource.action` or the wildcard `*`.
///
/// Permissions are compared by exact string equality only. A token such as
/// `patient.*` is rejected at construction so that no caller can smuggle
/// pattern semantics into a role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Permission(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPermission(pub String);

impl fmt::Display for InvalidPermission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid permission '{}': expected 'resource.action' or '*'",
            self.0
        )
    }
}

impl std::error::Error for InvalidPermission {}

impl Permission {
    pub fn parse(raw: &str) -> Result<Self, InvalidPermission> {
        if raw == WILDCARD {
            return Ok(Self(raw.to_string()));
        }

        let segments: Vec<&str> = raw.split('.').collect();
        let well_formed = segments.len() >= 2
            && segments.iter().all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
            });

        if well_formed {
            Ok(Self(raw.to_string()))
        } else {
            Err(InvalidPermission(raw.to_string()))
        }
    }

    pub fn wildcard() -> Self {
        Self(WILDCARD.to_string())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0 == WILDCARD
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Permission {
    type Error = InvalidPermission;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Permission::parse(&value)
    }
}

impl From<Permission> for String {
    fn from(permission: Permission) -> Self {
        permission.0
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Permission {
    type Err = InvalidPermission;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::parse(s)
    }
}

/// Parse a list of raw permission strings, failing on the first malformed one.
pub fn parse_permissions<I, S>(raw: I) -> Result<Vec<Permission>, InvalidPermission>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter().map(|p| Permission::parse(p.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_resource_action_and_wildcard() {
        assert!(Permission::parse("patient.read").is_ok());
        assert!(Permission::parse("billing.invoice.write").is_ok());
        assert!(Permission::parse("*").unwrap().is_wildcard());
    }

    #[test]
    fn rejects_patterns_and_malformed_tokens() {
        for raw in ["patient.*", "patient", ".read", "patient.", "Patient.Read", "patient read", "", "**"] {
            assert!(Permission::parse(raw).is_err(), "{raw} should be rejected");
        }
    }

    #[test]
    fn deserialization_validates() {
        let ok: Permission = serde_json::from_str("\"role.read\"").unwrap();
        assert_eq!(ok.as_str(), "role.read");
        assert!(serde_json::from_str::<Permission>("\"role.*\"").is_err());
    }
}
