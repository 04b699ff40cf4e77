use serde::{Deserialize, Serialize};
use std::fmt;

/// Which identity-verification mechanism authenticated a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    Local,
    EnterpriseSso,
    Saml,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Local => "local",
            ProviderKind::EnterpriseSso => "enterprise-sso",
            ProviderKind::Saml => "saml",
        }
    }

    /// Parse the path segment used by the provider routes (`sso`, `saml`).
    pub fn from_route_segment(segment: &str) -> Option<Self> {
        match segment {
            "local" => Some(ProviderKind::Local),
            "sso" | "enterprise-sso" | "oauth" => Some(ProviderKind::EnterpriseSso),
            "saml" => Some(ProviderKind::Saml),
            _ => None,
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
