use crate::models::telemetry::TelemetryEvent;
use anyhow::{Context, Result};
use serde_json::Value;
use sqlx::PgPool;

#[derive(Debug, Clone)]
pub struct TelemetryRepository {
    pool: PgPool,
}

impl TelemetryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        domain_id: i64,
        event_type: &str,
        severity: &str,
        message: &str,
        details: Option<Value>,
    ) -> Result<TelemetryEvent> {
        sqlx::query_as::<_, TelemetryEvent>(
            "INSERT INTO telemetry_events (domain_id, event_type, severity, message, details)
             VALUES ($1, $2, $3, $4, $5) RETURNING *",
        )
        .bind(domain_id)
        .bind(event_type)
        .bind(severity)
        .bind(message)
        .bind(details)
        .fetch_one(&self.pool)
        .await
        .context("Failed to append telemetry event")
    }

    pub async fn events_for_domain(&self, domain_id: i64) -> Result<Vec<TelemetryEvent>> {
        sqlx::query_as::<_, TelemetryEvent>(
            "SELECT * FROM telemetry_events WHERE domain_id = $1 ORDER BY created_at DESC, id DESC",
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch domain events")
    }

    pub async fn unresolved_failures_for_domain(
        &self,
        domain_id: i64,
    ) -> Result<Vec<TelemetryEvent>> {
        sqlx::query_as::<_, TelemetryEvent>(
            "SELECT * FROM telemetry_events
             WHERE domain_id = $1 AND resolved = FALSE
               AND event_type NOT IN ('verification_started', 'verification_success')
             ORDER BY created_at DESC, id DESC",
        )
        .bind(domain_id)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch unresolved failures for domain")
    }

    pub async fn recent_unresolved_failures(&self, limit: i64) -> Result<Vec<TelemetryEvent>> {
        sqlx::query_as::<_, TelemetryEvent>(
            "SELECT * FROM telemetry_events
             WHERE resolved = FALSE
               AND event_type NOT IN ('verification_started', 'verification_success')
             ORDER BY created_at DESC, id DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch recent unresolved failures")
    }

    pub async fn total_events(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM telemetry_events")
            .fetch_one(&self.pool)
            .await
            .context("Failed to count telemetry events")
    }

    pub async fn failure_counts_by_type(&self) -> Result<Vec<(String, i64)>> {
        sqlx::query_as(
            "SELECT event_type, COUNT(*) FROM telemetry_events
             WHERE event_type NOT IN ('verification_started', 'verification_success')
             GROUP BY event_type",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count failures by type")
    }

    pub async fn failure_counts_by_severity(&self) -> Result<Vec<(String, i64)>> {
        sqlx::query_as(
            "SELECT severity, COUNT(*) FROM telemetry_events
             WHERE event_type NOT IN ('verification_started', 'verification_success')
             GROUP BY severity",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to count failures by severity")
    }

    /// Mean seconds between creation and resolution over resolved events.
    /// None until at least one event has been resolved.
    pub async fn mean_resolution_seconds(&self) -> Result<Option<f64>> {
        sqlx::query_scalar(
            "SELECT AVG(EXTRACT(EPOCH FROM (resolved_at - created_at)))::float8
             FROM telemetry_events WHERE resolved = TRUE",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to compute mean resolution latency")
    }

    /// Idempotent: the WHERE guard makes a second resolution a no-op that
    /// leaves resolved_at/resolved_by from the first call untouched.
    pub async fn resolve(&self, event_id: i64, actor: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE telemetry_events
             SET resolved = TRUE, resolved_at = NOW(), resolved_by = $2
             WHERE id = $1 AND resolved = FALSE",
        )
        .bind(event_id)
        .bind(actor)
        .execute(&self.pool)
        .await
        .context("Failed to resolve telemetry event")?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn resolve_all_for_domain(&self, domain_id: i64, actor: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE telemetry_events
             SET resolved = TRUE, resolved_at = NOW(), resolved_by = $2
             WHERE domain_id = $1 AND resolved = FALSE",
        )
        .bind(domain_id)
        .bind(actor)
        .execute(&self.pool)
        .await
        .context("Failed to resolve domain telemetry events")?;

        Ok(result.rows_affected())
    }
}
