use crate::provider::ProviderKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

/// An enrolled second factor, stored alongside its identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaMethod {
    pub id: Uuid,
    pub kind: MfaMethodKind,
    /// Base32 TOTP secret. Persisted with the identity; API views omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    /// Phone number or email address for code delivery.
    pub destination: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MfaMethodKind {
    Totp,
    Sms,
    Email,
}

impl fmt::Display for MfaMethodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MfaMethodKind::Totp => write!(f, "totp"),
            MfaMethodKind::Sms => write!(f, "sms"),
            MfaMethodKind::Email => write!(f, "email"),
        }
    }
}

/// Why a challenge was issued; decides what a successful verification unlocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChallengePurpose {
    /// Second step of a login; success issues a session.
    Login { provider_kind: ProviderKind },
    /// Step-up for an existing session.
    StepUp { session_id: Uuid },
    /// Confirms a freshly enrolled method.
    Enrollment,
}

/// A short-lived, single-use second-factor verification request.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MfaChallenge {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub identity_id: Uuid,
    pub method_id: Uuid,
    pub method: MfaMethodKind,
    /// Hash of the delivered code for SMS/email; TOTP codes are checked against the secret.
    #[serde(skip_serializing, default)]
    pub code_hash: Option<String>,
    #[sqlx(json)]
    pub purpose: ChallengePurpose,
    pub attempts_remaining: i32,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl MfaChallenge {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_at.is_some()
    }
}

/// Result of recording one verification attempt against a challenge.
#[derive(Debug, Clone)]
pub enum ChallengeAttempt {
    /// Correct code; the challenge is now consumed.
    Verified(MfaChallenge),
    /// Wrong code; attempts remain.
    Rejected { attempts_remaining: i32 },
    /// Wrong code and the budget is spent; the challenge is now consumed.
    Exhausted,
    /// Challenge was already consumed or expired before this attempt.
    Unavailable,
}
