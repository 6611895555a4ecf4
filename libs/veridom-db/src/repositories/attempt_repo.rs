use crate::models::verification::{AttemptStatus, VerificationAttempt};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

/// Store-side half of the attempt state machine. Every transition away from
/// 'pending' is a compare-and-swap keyed on (id, status, attempt); a caller
/// that lost a concurrent race sees `false` and must treat it as a no-op.
#[derive(Debug, Clone)]
pub struct AttemptRepository {
    pool: PgPool,
}

impl AttemptRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        domain_id: i64,
        max_attempts: i32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<VerificationAttempt> {
        sqlx::query_as::<_, VerificationAttempt>(
            "INSERT INTO verification_attempts (domain_id, max_attempts, next_retry_at)
             VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(domain_id)
        .bind(max_attempts)
        .bind(next_retry_at)
        .fetch_one(&self.pool)
        .await
        .context("Failed to create verification attempt")
    }

    pub async fn get(&self, id: i64) -> Result<Option<VerificationAttempt>> {
        sqlx::query_as::<_, VerificationAttempt>("SELECT * FROM verification_attempts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch verification attempt")
    }

    pub async fn latest_for_domain(&self, domain_id: i64) -> Result<Option<VerificationAttempt>> {
        sqlx::query_as::<_, VerificationAttempt>(
            "SELECT * FROM verification_attempts WHERE domain_id = $1
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch latest attempt for domain")
    }

    pub async fn pending_for_domain(&self, domain_id: i64) -> Result<Option<VerificationAttempt>> {
        sqlx::query_as::<_, VerificationAttempt>(
            "SELECT * FROM verification_attempts WHERE domain_id = $1 AND status = 'pending'",
        )
        .bind(domain_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch pending attempt for domain")
    }

    pub async fn due(&self, now: DateTime<Utc>) -> Result<Vec<VerificationAttempt>> {
        sqlx::query_as::<_, VerificationAttempt>(
            "SELECT * FROM verification_attempts
             WHERE status = 'pending' AND next_retry_at <= $1
             ORDER BY next_retry_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch due attempts")
    }

    /// Bump the counter and reschedule. Returns false if the attempt was
    /// advanced or finished by someone else in the meantime.
    pub async fn schedule_retry(
        &self,
        id: i64,
        expected_attempt: i32,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE verification_attempts
             SET attempt = attempt + 1, next_retry_at = $3, last_error = $4, updated_at = NOW()
             WHERE id = $1 AND status = 'pending' AND attempt = $2",
        )
        .bind(id)
        .bind(expected_attempt)
        .bind(next_retry_at)
        .bind(last_error)
        .execute(&self.pool)
        .await
        .context("Failed to reschedule attempt")?;

        Ok(result.rows_affected() > 0)
    }

    /// Move a pending attempt to 'failed' or 'timeout'. Terminal failure also
    /// flips the domain to 'error' in the same transaction so the pair is
    /// never observed half-applied.
    pub async fn finish(
        &self,
        id: i64,
        expected_attempt: i32,
        domain_id: i64,
        status: AttemptStatus,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        let result = sqlx::query(
            "UPDATE verification_attempts
             SET status = $3, last_error = $4, updated_at = NOW()
             WHERE id = $1 AND status = 'pending' AND attempt = $2",
        )
        .bind(id)
        .bind(expected_attempt)
        .bind(status.as_str())
        .bind(last_error)
        .execute(&mut *tx)
        .await
        .context("Failed to finish attempt")?;

        if result.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Ok(false);
        }

        sqlx::query("UPDATE domains SET status = 'error' WHERE id = $1 AND status != 'active'")
            .bind(domain_id)
            .execute(&mut *tx)
            .await
            .context("Failed to mark domain errored")?;

        tx.commit().await.context("Failed to commit terminal transition")?;
        Ok(true)
    }

    /// Success path: attempt -> 'verified' and domain -> 'active' with
    /// verified_at set, applied atomically.
    pub async fn complete_verified(
        &self,
        id: i64,
        expected_attempt: i32,
        domain_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.context("Failed to open transaction")?;

        let result = sqlx::query(
            "UPDATE verification_attempts
             SET status = 'verified', last_error = NULL, updated_at = NOW()
             WHERE id = $1 AND status = 'pending' AND attempt = $2",
        )
        .bind(id)
        .bind(expected_attempt)
        .execute(&mut *tx)
        .await
        .context("Failed to mark attempt verified")?;

        if result.rows_affected() == 0 {
            tx.rollback().await.ok();
            return Ok(false);
        }

        sqlx::query("UPDATE domains SET status = 'active', verified_at = $2 WHERE id = $1")
            .bind(domain_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .context("Failed to activate domain")?;

        tx.commit().await.context("Failed to commit verified transition")?;
        Ok(true)
    }

    /// Operator cancellation. Returns the cancelled attempt id, if any
    /// campaign was still live.
    pub async fn cancel_pending(&self, domain_id: i64, reason: &str) -> Result<Option<i64>> {
        sqlx::query_scalar(
            "UPDATE verification_attempts
             SET status = 'failed', last_error = $2, updated_at = NOW()
             WHERE domain_id = $1 AND status = 'pending'
             RETURNING id",
        )
        .bind(domain_id)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to cancel pending attempt")
    }

    pub async fn count_domains_with_terminal_failures(&self) -> Result<i64> {
        sqlx::query_scalar(
            "SELECT COUNT(DISTINCT domain_id) FROM verification_attempts
             WHERE status IN ('failed', 'timeout')",
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to count domains with terminal failures")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed_domain(pool: &PgPool) -> i64 {
        sqlx::query_scalar("INSERT INTO domains (hostname, site_id) VALUES ($1, 1) RETURNING id")
            .bind("shop.example.com")
            .fetch_one(pool)
            .await
            .expect("seed domain")
    }

    #[sqlx::test]
    async fn stale_writers_lose_the_compare_and_swap(pool: PgPool) {
        let repo = AttemptRepository::new(pool.clone());
        let domain_id = seed_domain(&pool).await;
        let attempt = repo.insert(domain_id, 10, Utc::now()).await.unwrap();

        let advanced = repo
            .schedule_retry(attempt.id, attempt.attempt, Utc::now(), "waiting on DNS")
            .await
            .unwrap();
        assert!(advanced);

        // A concurrent sweep still holding counter 1 must see a no-op from
        // every transition path.
        assert!(!repo
            .schedule_retry(attempt.id, attempt.attempt, Utc::now(), "stale")
            .await
            .unwrap());
        assert!(!repo
            .finish(
                attempt.id,
                attempt.attempt,
                domain_id,
                AttemptStatus::Failed,
                Some("stale"),
            )
            .await
            .unwrap());
        assert!(!repo
            .complete_verified(attempt.id, attempt.attempt, domain_id, Utc::now())
            .await
            .unwrap());

        let current = repo.get(attempt.id).await.unwrap().unwrap();
        assert_eq!(current.attempt, 2);
        assert_eq!(current.status(), AttemptStatus::Pending);
        assert_eq!(current.last_error.as_deref(), Some("waiting on DNS"));
    }

    #[sqlx::test]
    async fn terminal_attempts_refuse_every_further_transition(pool: PgPool) {
        let repo = AttemptRepository::new(pool.clone());
        let domain_id = seed_domain(&pool).await;
        let attempt = repo.insert(domain_id, 10, Utc::now()).await.unwrap();

        assert!(repo
            .finish(
                attempt.id,
                1,
                domain_id,
                AttemptStatus::Failed,
                Some("authority returned HTTP 503"),
            )
            .await
            .unwrap());

        assert!(!repo
            .schedule_retry(attempt.id, 1, Utc::now(), "late result")
            .await
            .unwrap());
        assert!(!repo
            .complete_verified(attempt.id, 1, domain_id, Utc::now())
            .await
            .unwrap());
        assert!(!repo
            .finish(attempt.id, 1, domain_id, AttemptStatus::Timeout, None)
            .await
            .unwrap());
        assert_eq!(repo.cancel_pending(domain_id, "cancelled by user").await.unwrap(), None);

        let current = repo.get(attempt.id).await.unwrap().unwrap();
        assert_eq!(current.status(), AttemptStatus::Failed);
        assert_eq!(current.attempt, 1);
        assert_eq!(
            current.last_error.as_deref(),
            Some("authority returned HTTP 503")
        );
    }

    #[sqlx::test]
    async fn verified_pair_is_applied_together_and_only_once(pool: PgPool) {
        let repo = AttemptRepository::new(pool.clone());
        let domain_id = seed_domain(&pool).await;
        let attempt = repo.insert(domain_id, 10, Utc::now()).await.unwrap();

        assert!(repo
            .complete_verified(attempt.id, 1, domain_id, Utc::now())
            .await
            .unwrap());

        let (status, verified_at): (String, Option<DateTime<Utc>>) =
            sqlx::query_as("SELECT status, verified_at FROM domains WHERE id = $1")
                .bind(domain_id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(status, "active");
        assert!(verified_at.is_some());

        // The success path is single-shot through the same guard.
        assert!(!repo
            .complete_verified(attempt.id, 1, domain_id, Utc::now())
            .await
            .unwrap());
    }
}
