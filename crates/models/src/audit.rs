use crate::error_kind::ErrorKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    Authentication,
    Authorization,
    RoleManagement,
    IdentityManagement,
    TenantManagement,
    Catalog,
    Security,
}

/// Decision or result recorded by an audit event.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Allow,
    Deny,
    Success,
    Failure,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Allow => write!(f, "allow"),
            AuditOutcome::Deny => write!(f, "deny"),
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
        }
    }
}

/// Append-only audit record. Rows are never updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub id: Uuid,
    /// `None` for platform-level events (catalog changes, unknown-tenant logins).
    pub tenant_id: Option<Uuid>,

    pub event_type: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,

    pub actor_id: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,

    /// Classified failure kind; raw error text is never recorded.
    pub reason: Option<ErrorKind>,
    /// Non-secret detail such as the missing module or permission.
    pub detail: Option<String>,
    pub metadata: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAuditEvent {
    pub tenant_id: Option<Uuid>,
    pub event_type: String,
    pub category: AuditCategory,
    pub outcome: AuditOutcome,
    pub actor_id: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub reason: Option<ErrorKind>,
    pub detail: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditQuery {
    pub event_type: Option<String>,
    pub outcome: Option<AuditOutcome>,
    pub actor_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            event_type: None,
            outcome: None,
            actor_id: None,
            from: None,
            to: None,
            limit: Some(100),
            offset: Some(0),
        }
    }
}

impl AuditQuery {
    pub const MAX_LIMIT: i64 = 500;

    pub fn effective_limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, Self::MAX_LIMIT)
    }

    pub fn effective_offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.event_type.as_deref().map_or(true, |t| event.event_type == t)
            && self.outcome.map_or(true, |o| event.outcome == o)
            && self
                .actor_id
                .as_deref()
                .map_or(true, |a| event.actor_id.as_deref() == Some(a))
            && self.from.map_or(true, |from| event.created_at >= from)
            && self.to.map_or(true, |to| event.created_at <= to)
    }
}

pub struct AuditEventBuilder {
    event: NewAuditEvent,
}

impl AuditEventBuilder {
    pub fn new(tenant_id: Option<Uuid>, event_type: impl Into<String>, category: AuditCategory) -> Self {
        Self {
            event: NewAuditEvent {
                tenant_id,
                event_type: event_type.into(),
                category,
                outcome: AuditOutcome::Success,
                actor_id: None,
                target_type: None,
                target_id: None,
                reason: None,
                detail: None,
                metadata: None,
            },
        }
    }

    pub fn actor(mut self, actor_id: impl ToString) -> Self {
        self.event.actor_id = Some(actor_id.to_string());
        self
    }

    pub fn target(mut self, target_type: impl Into<String>, target_id: impl ToString) -> Self {
        self.event.target_type = Some(target_type.into());
        self.event.target_id = Some(target_id.to_string());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.event.detail = Some(detail.into());
        self
    }

    pub fn metadata(mut self, data: serde_json::Value) -> Self {
        self.event.metadata = Some(data);
        self
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.event.outcome = outcome;
        self
    }

    pub fn allow(self) -> Self {
        self.outcome(AuditOutcome::Allow)
    }

    pub fn deny(mut self, reason: ErrorKind) -> Self {
        self.event.outcome = AuditOutcome::Deny;
        self.event.reason = Some(reason);
        self
    }

    pub fn failure(mut self, reason: ErrorKind) -> Self {
        self.event.outcome = AuditOutcome::Failure;
        self.event.reason = Some(reason);
        self
    }

    pub fn build(self) -> NewAuditEvent {
        self.event
    }
}

pub mod events {
    // Authentication
    pub const LOGIN_SUCCEEDED: &str = "login.succeeded";
    pub const LOGIN_FAILED: &str = "login.failed";
    pub const LOGIN_MFA_REQUIRED: &str = "login.mfa_required";
    pub const LOGOUT: &str = "session.logout";
    pub const SESSION_REFRESHED: &str = "session.refreshed";
    pub const REFRESH_REJECTED: &str = "session.refresh_rejected";
    pub const SSO_PROVISIONED: &str = "identity.sso_provisioned";

    // MFA
    pub const MFA_CHALLENGE_ISSUED: &str = "mfa.challenge_issued";
    pub const MFA_VERIFIED: &str = "mfa.verified";
    pub const MFA_VERIFICATION_FAILED: &str = "mfa.verification_failed";
    pub const MFA_ENROLLED: &str = "mfa.enrolled";

    // Authorization
    pub const ACCESS_DECISION: &str = "access.decision";
    pub const MODULE_ACCESS: &str = "module.access";

    // Roles
    pub const ROLE_CREATED: &str = "role.created";
    pub const ROLE_UPDATED: &str = "role.updated";
    pub const ROLE_DELETED: &str = "role.deleted";
    pub const ROLE_MUTATION_REJECTED: &str = "role.mutation_rejected";
    pub const ROLE_ASSIGNED: &str = "role.assigned";
    pub const ROLE_UNASSIGNED: &str = "role.unassigned";

    // Identities
    pub const IDENTITY_CREATED: &str = "identity.created";
    pub const IDENTITY_STATUS_CHANGED: &str = "identity.status_changed";

    // Tenants
    pub const TENANT_CREATED: &str = "tenant.created";
    pub const TENANT_MODULES_UPDATED: &str = "tenant.modules_updated";
    pub const TENANT_STATUS_CHANGED: &str = "tenant.status_changed";

    // Catalog
    pub const BUSINESS_TYPE_CREATED: &str = "catalog.business_type_created";
    pub const TEMPLATE_CREATED: &str = "catalog.template_created";
    pub const TEMPLATE_DELETED: &str = "catalog.template_deleted";
    pub const DEFAULT_ROLE_CREATED: &str = "catalog.default_role_created";

    // Security
    pub const ACCOUNT_LOCKED: &str = "account.locked";
    pub const ACCOUNT_UNLOCKED: &str = "account.unlocked";
}
