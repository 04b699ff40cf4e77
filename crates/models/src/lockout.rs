use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;
use validator::Validate;

/// A lock on an email within one tenant. Unlocking never deletes the row;
/// the unlock fields form the audit trail.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AccountLockout {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub reason: String,
    pub locked_at: DateTime<Utc>,
    /// `None` means locked until an administrator unlocks.
    pub expires_at: Option<DateTime<Utc>>,

    pub unlocked_at: Option<DateTime<Utc>>,
    pub unlocked_by: Option<Uuid>,
    pub unlock_reason: Option<String>,
}

impl AccountLockout {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.unlocked_at.is_none() && self.expires_at.map_or(true, |expires| now < expires)
    }
}

#[derive(Debug, Clone)]
pub struct NewLockout {
    pub tenant_id: Uuid,
    pub email: String,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Failed-login counter for one (tenant, email) inside the current window.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FailureCounter {
    pub tenant_id: Uuid,
    pub email: String,
    pub failures: i32,
    pub window_started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    #[validate(email)]
    pub email: String,

    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

pub mod reasons {
    pub const TOO_MANY_FAILED_ATTEMPTS: &str = "too_many_failed_attempts";
    pub const ADMINISTRATIVE: &str = "administrative";
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn lockout(expires_at: Option<DateTime<Utc>>) -> AccountLockout {
        AccountLockout {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            email: "user@x.com".to_string(),
            reason: reasons::TOO_MANY_FAILED_ATTEMPTS.to_string(),
            locked_at: Utc::now(),
            expires_at,
            unlocked_at: None,
            unlocked_by: None,
            unlock_reason: None,
        }
    }

    #[test]
    fn expiry_and_unlock_end_a_lockout() {
        let now = Utc::now();
        assert!(lockout(Some(now + Duration::minutes(5))).is_active(now));
        assert!(!lockout(Some(now - Duration::minutes(5))).is_active(now));
        assert!(lockout(None).is_active(now));

        let mut unlocked = lockout(None);
        unlocked.unlocked_at = Some(now);
        assert!(!unlocked.is_active(now));
    }
}
