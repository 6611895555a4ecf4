use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A tenant-supplied hostname. Status and verified_at are owned by the
/// verification scheduler; nothing else writes them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Domain {
    pub id: i64,
    pub hostname: String,
    pub site_id: i64,
    pub status: String, // 'pending', 'active', 'error'
    pub verified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DomainStatus {
    Pending,
    Active,
    Error,
}

impl DomainStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomainStatus::Pending => "pending",
            DomainStatus::Active => "active",
            DomainStatus::Error => "error",
        }
    }
}

impl From<String> for DomainStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => DomainStatus::Active,
            "error" => DomainStatus::Error,
            _ => DomainStatus::Pending,
        }
    }
}

impl Domain {
    pub fn status(&self) -> DomainStatus {
        self.status.clone().into()
    }
}
