use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// Immutable fact about something that happened during verification. Only
/// the resolution fields may change after insert, and only once.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TelemetryEvent {
    pub id: i64,
    pub domain_id: i64,
    pub event_type: String,
    pub severity: String,
    pub message: String,
    pub details: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    VerificationStarted,
    VerificationSuccess,
    VerificationFailed,
    VerificationTimeout,
    DnsError,
    AuthorityError,
    EnvironmentError,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::VerificationStarted => "verification_started",
            EventType::VerificationSuccess => "verification_success",
            EventType::VerificationFailed => "verification_failed",
            EventType::VerificationTimeout => "verification_timeout",
            EventType::DnsError => "dns_error",
            EventType::AuthorityError => "authority_error",
            EventType::EnvironmentError => "environment_error",
        }
    }

    pub fn parse(value: &str) -> Option<EventType> {
        match value {
            "verification_started" => Some(EventType::VerificationStarted),
            "verification_success" => Some(EventType::VerificationSuccess),
            "verification_failed" => Some(EventType::VerificationFailed),
            "verification_timeout" => Some(EventType::VerificationTimeout),
            "dns_error" => Some(EventType::DnsError),
            "authority_error" => Some(EventType::AuthorityError),
            "environment_error" => Some(EventType::EnvironmentError),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        !matches!(
            self,
            EventType::VerificationStarted | EventType::VerificationSuccess
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl From<String> for Severity {
    fn from(s: String) -> Self {
        match s.as_str() {
            "warning" => Severity::Warning,
            "error" => Severity::Error,
            "critical" => Severity::Critical,
            _ => Severity::Info,
        }
    }
}

/// Structured detail payload attached to a telemetry event. Known shapes are
/// tagged; genuinely heterogeneous diagnostic context goes through `Context`,
/// which keeps arbitrary keys intact across a JSONB round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetails {
    Attempt {
        attempt: i32,
        max_attempts: i32,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_retry_at: Option<DateTime<Utc>>,
    },
    Failure {
        reason: String,
    },
    Context {
        #[serde(flatten)]
        fields: serde_json::Map<String, Value>,
    },
}

impl EventDetails {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn from_value(value: &Value) -> Option<EventDetails> {
        serde_json::from_value(value.clone()).ok()
    }
}
