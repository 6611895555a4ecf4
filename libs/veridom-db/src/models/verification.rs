use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One verification campaign for a domain, spanning up to `max_attempts`
/// checks. The attempt counter only moves forward, and a terminal status is
/// never reopened; a user retry creates a fresh row instead.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct VerificationAttempt {
    pub id: i64,
    pub domain_id: i64,
    pub attempt: i32,
    pub max_attempts: i32,
    pub next_retry_at: DateTime<Utc>,
    pub status: String, // 'pending', 'verified', 'failed', 'timeout'
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptStatus {
    Pending,
    Verified,
    Failed,
    Timeout,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Verified => "verified",
            AttemptStatus::Failed => "failed",
            AttemptStatus::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AttemptStatus::Pending)
    }
}

impl From<String> for AttemptStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "verified" => AttemptStatus::Verified,
            "failed" => AttemptStatus::Failed,
            "timeout" => AttemptStatus::Timeout,
            _ => AttemptStatus::Pending,
        }
    }
}

impl VerificationAttempt {
    pub fn status(&self) -> AttemptStatus {
        self.status.clone().into()
    }

    /// Sweep guard: a check may only run once the retry deadline has passed.
    /// `next_retry_at` carries no meaning for terminal attempts.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status() == AttemptStatus::Pending && self.next_retry_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn attempt(status: &str, next_retry_in: i64) -> VerificationAttempt {
        let now = Utc::now();
        VerificationAttempt {
            id: 1,
            domain_id: 1,
            attempt: 1,
            max_attempts: 10,
            next_retry_at: now + Duration::seconds(next_retry_in),
            status: status.to_string(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn pending_attempt_is_due_only_after_deadline() {
        let now = Utc::now();
        assert!(!attempt("pending", 60).is_due(now));
        assert!(attempt("pending", -1).is_due(now));
    }

    #[test]
    fn terminal_attempts_are_never_due() {
        let now = Utc::now();
        for status in ["verified", "failed", "timeout"] {
            assert!(!attempt(status, -3600).is_due(now));
            assert!(AttemptStatus::from(status.to_string()).is_terminal());
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            AttemptStatus::Pending,
            AttemptStatus::Verified,
            AttemptStatus::Failed,
            AttemptStatus::Timeout,
        ] {
            assert_eq!(AttemptStatus::from(status.as_str().to_string()), status);
        }
    }
}
