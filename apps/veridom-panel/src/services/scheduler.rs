use crate::services::backoff::BackoffPolicy;
use crate::services::checker::{CheckOutcome, VerificationChecker};
use crate::services::ledger::TelemetryLedger;
use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use veridom_db::models::telemetry::{EventDetails, EventType, Severity};
use veridom_db::models::verification::{AttemptStatus, VerificationAttempt};
use veridom_db::repositories::attempt_repo::AttemptRepository;
use veridom_db::repositories::domain_repo::DomainRepository;

#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("verification already in progress for domain {0}")]
    AlreadyInProgress(i64),
    #[error("domain {0} not found")]
    DomainNotFound(i64),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// What `plan_transition` decided for one due check.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Verified,
    Retry,
    Failed { error: String },
    TimedOut { error: String },
}

/// Result of `process_due`. `Superseded` means the compare-and-swap lost to
/// a concurrent sweep or a cancellation that landed while the authority call
/// was in flight; the caller treats it as a no-op.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    AlreadyTerminal(AttemptStatus),
    NotDueYet { next_retry_at: DateTime<Utc> },
    Superseded,
    Transitioned(Transition),
}

#[derive(Debug, Default, Clone, Serialize, PartialEq)]
pub struct SweepStats {
    pub processed: u64,
    pub verified: u64,
    pub failed: u64,
    pub retried: u64,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VerificationStatus {
    NotStarted,
    Pending {
        attempt: i32,
        max_attempts: i32,
        next_retry_at: DateTime<Utc>,
    },
    Verified,
    Failed {
        last_error: Option<String>,
    },
    Timeout {
        attempts_used: i32,
    },
}

/// Decide where a pending attempt goes given the check outcome. Pure; the
/// scheduler applies the decision with a guarded store write.
pub fn plan_transition(attempt: i32, max_attempts: i32, outcome: &CheckOutcome) -> Transition {
    match outcome {
        CheckOutcome::Verified => Transition::Verified,
        // Retrying cannot fix a broken environment, so the budget is ignored.
        CheckOutcome::EnvironmentUnavailable(reason) => Transition::Failed {
            error: reason.clone(),
        },
        CheckOutcome::NotYetVerified if attempt < max_attempts => Transition::Retry,
        CheckOutcome::AuthorityUnavailable(_) if attempt < max_attempts => Transition::Retry,
        CheckOutcome::NotYetVerified => Transition::TimedOut {
            error: "verification window exhausted before DNS proof was observed".to_string(),
        },
        CheckOutcome::AuthorityUnavailable(reason) => Transition::Failed {
            error: reason.clone(),
        },
    }
}

/// Owns the verification-attempt state machine: creates campaigns, advances
/// due attempts through the checker, persists transitions and feeds the
/// telemetry ledger.
pub struct AttemptScheduler {
    domains: DomainRepository,
    attempts: AttemptRepository,
    ledger: Arc<TelemetryLedger>,
    checker: VerificationChecker,
    policy: BackoffPolicy,
}

impl AttemptScheduler {
    pub fn new(
        domains: DomainRepository,
        attempts: AttemptRepository,
        ledger: Arc<TelemetryLedger>,
        checker: VerificationChecker,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            domains,
            attempts,
            ledger,
            checker,
            policy,
        }
    }

    pub async fn start_attempt(&self, domain_id: i64) -> Result<VerificationAttempt, StartError> {
        let domain = self
            .domains
            .get(domain_id)
            .await?
            .ok_or(StartError::DomainNotFound(domain_id))?;

        if self.attempts.pending_for_domain(domain_id).await?.is_some() {
            return Err(StartError::AlreadyInProgress(domain_id));
        }

        let next_retry_at = Utc::now() + to_chrono(self.policy.next_delay(1));
        let attempt = match self
            .attempts
            .insert(domain_id, self.policy.max_attempts, next_retry_at)
            .await
        {
            Ok(attempt) => attempt,
            // A concurrent start can slip past the pending check; the
            // partial unique index on pending attempts catches it.
            Err(e) if is_unique_violation(&e) => {
                return Err(StartError::AlreadyInProgress(domain_id));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self
            .ledger
            .record(
                domain_id,
                EventType::VerificationStarted,
                Severity::Info,
                format!("verification started for {}", domain.hostname),
                Some(EventDetails::Attempt {
                    attempt: attempt.attempt,
                    max_attempts: attempt.max_attempts,
                    next_retry_at: Some(attempt.next_retry_at),
                }),
            )
            .await
        {
            error!(
                "Failed to record start event for domain {}: {:#}",
                domain_id, e
            );
        }

        info!(
            "Started verification attempt {} for domain {} ({})",
            attempt.id, domain_id, domain.hostname
        );
        Ok(attempt)
    }

    pub async fn process_due(&self, attempt_id: i64) -> Result<ProcessOutcome> {
        let attempt = self
            .attempts
            .get(attempt_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("verification attempt {} not found", attempt_id))?;

        let status = attempt.status();
        if status.is_terminal() {
            return Ok(ProcessOutcome::AlreadyTerminal(status));
        }

        let now = Utc::now();
        if !attempt.is_due(now) {
            return Ok(ProcessOutcome::NotDueYet {
                next_retry_at: attempt.next_retry_at,
            });
        }

        let domain = self
            .domains
            .get(attempt.domain_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("domain {} not found", attempt.domain_id))?;

        let outcome = self.checker.check(&domain.hostname).await;
        let transition = plan_transition(attempt.attempt, attempt.max_attempts, &outcome);
        self.apply(&attempt, &domain.hostname, &outcome, transition)
            .await
    }

    async fn apply(
        &self,
        attempt: &VerificationAttempt,
        hostname: &str,
        outcome: &CheckOutcome,
        transition: Transition,
    ) -> Result<ProcessOutcome> {
        let now = Utc::now();

        let advanced = match &transition {
            Transition::Verified => {
                self.attempts
                    .complete_verified(attempt.id, attempt.attempt, attempt.domain_id, now)
                    .await?
            }
            Transition::Retry => {
                let next_attempt = attempt.attempt + 1;
                let next_retry_at = now + to_chrono(self.policy.next_delay(next_attempt));
                let error = retry_error(outcome);
                self.attempts
                    .schedule_retry(attempt.id, attempt.attempt, next_retry_at, &error)
                    .await?
            }
            Transition::Failed { error } => {
                self.attempts
                    .finish(
                        attempt.id,
                        attempt.attempt,
                        attempt.domain_id,
                        AttemptStatus::Failed,
                        Some(error.as_str()),
                    )
                    .await?
            }
            Transition::TimedOut { error } => {
                self.attempts
                    .finish(
                        attempt.id,
                        attempt.attempt,
                        attempt.domain_id,
                        AttemptStatus::Timeout,
                        Some(error.as_str()),
                    )
                    .await?
            }
        };

        if !advanced {
            // Lost the optimistic check: another sweep or a cancellation got
            // there first. The stale result is discarded, not recorded.
            return Ok(ProcessOutcome::Superseded);
        }

        // The transition is committed at this point. A failed ledger append
        // is logged and dropped so the caller never mistakes an applied
        // transition for a failure and retries it.
        if let Err(e) = self
            .record_transition(attempt, hostname, outcome, &transition)
            .await
        {
            error!(
                "Failed to record telemetry for attempt {}: {:#}",
                attempt.id, e
            );
        }
        Ok(ProcessOutcome::Transitioned(transition))
    }

    async fn record_transition(
        &self,
        attempt: &VerificationAttempt,
        hostname: &str,
        outcome: &CheckOutcome,
        transition: &Transition,
    ) -> Result<()> {
        let (event_type, severity, message) = match (transition, outcome) {
            (Transition::Verified, _) => (
                EventType::VerificationSuccess,
                Severity::Info,
                format!("domain {} verified", hostname),
            ),
            (Transition::Retry, CheckOutcome::AuthorityUnavailable(reason)) => (
                EventType::AuthorityError,
                Severity::Error,
                format!("check for {} failed: {}", hostname, reason),
            ),
            (Transition::Retry, _) => (
                EventType::DnsError,
                Severity::Warning,
                format!(
                    "DNS proof for {} not observed yet (check {}/{})",
                    hostname, attempt.attempt, attempt.max_attempts
                ),
            ),
            (Transition::Failed { error }, CheckOutcome::EnvironmentUnavailable(_)) => (
                EventType::EnvironmentError,
                Severity::Critical,
                format!("verification of {} halted: {}", hostname, error),
            ),
            (Transition::Failed { error }, _) => (
                EventType::VerificationFailed,
                Severity::Error,
                format!(
                    "verification of {} failed after {} checks: {}",
                    hostname, attempt.attempt, error
                ),
            ),
            (Transition::TimedOut { error }, _) => (
                EventType::VerificationTimeout,
                Severity::Error,
                format!(
                    "verification of {} timed out after {} checks: {}",
                    hostname, attempt.attempt, error
                ),
            ),
        };

        self.ledger
            .record(
                attempt.domain_id,
                event_type,
                severity,
                message,
                Some(EventDetails::Attempt {
                    attempt: attempt.attempt,
                    max_attempts: attempt.max_attempts,
                    next_retry_at: None,
                }),
            )
            .await?;
        Ok(())
    }

    /// Sweep entry point. Attempts are processed independently; one bad
    /// apple is logged and skipped so the rest of the batch still runs.
    pub async fn process_all_due(&self) -> Result<SweepStats> {
        let due = self.attempts.due(Utc::now()).await?;
        let mut stats = SweepStats::default();

        for attempt in due {
            match self.process_due(attempt.id).await {
                Ok(outcome) => {
                    stats.processed += 1;
                    match outcome {
                        ProcessOutcome::Transitioned(Transition::Verified) => stats.verified += 1,
                        ProcessOutcome::Transitioned(Transition::Retry) => stats.retried += 1,
                        ProcessOutcome::Transitioned(
                            Transition::Failed { .. } | Transition::TimedOut { .. },
                        ) => stats.failed += 1,
                        _ => {}
                    }
                }
                Err(e) => {
                    warn!(
                        "Sweep: attempt {} left for the next pass: {:#}",
                        attempt.id, e
                    );
                }
            }
        }

        Ok(stats)
    }

    /// Operator cancellation; an action, not a fault, so telemetry stays at
    /// info severity.
    pub async fn cancel(&self, domain_id: i64) -> Result<bool> {
        let cancelled = self
            .attempts
            .cancel_pending(domain_id, "cancelled by user")
            .await?;

        match cancelled {
            Some(attempt_id) => {
                if let Err(e) = self
                    .ledger
                    .record(
                        domain_id,
                        EventType::VerificationFailed,
                        Severity::Info,
                        "verification cancelled by user".to_string(),
                        None,
                    )
                    .await
                {
                    error!(
                        "Failed to record cancellation for domain {}: {:#}",
                        domain_id, e
                    );
                }
                info!("Cancelled verification attempt {} for domain {}", attempt_id, domain_id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn get_status(&self, domain_id: i64) -> Result<VerificationStatus> {
        let Some(latest) = self.attempts.latest_for_domain(domain_id).await? else {
            return Ok(VerificationStatus::NotStarted);
        };

        Ok(match latest.status() {
            AttemptStatus::Pending => VerificationStatus::Pending {
                attempt: latest.attempt,
                max_attempts: latest.max_attempts,
                next_retry_at: latest.next_retry_at,
            },
            AttemptStatus::Verified => VerificationStatus::Verified,
            AttemptStatus::Failed => VerificationStatus::Failed {
                last_error: latest.last_error,
            },
            AttemptStatus::Timeout => VerificationStatus::Timeout {
                attempts_used: latest.attempt,
            },
        })
    }
}

fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.downcast_ref::<veridom_db::sqlx::Error>()
        .and_then(|e| e.as_database_error())
        .is_some_and(|db| db.is_unique_violation())
}

fn retry_error(outcome: &CheckOutcome) -> String {
    match outcome {
        CheckOutcome::AuthorityUnavailable(reason) => reason.clone(),
        _ => "DNS proof not observed yet".to_string(),
    }
}

fn to_chrono(delay: std::time::Duration) -> ChronoDuration {
    ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(300))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unavailable() -> CheckOutcome {
        CheckOutcome::AuthorityUnavailable("authority returned HTTP 503".to_string())
    }

    #[test]
    fn verified_wins_regardless_of_budget() {
        assert_eq!(
            plan_transition(10, 10, &CheckOutcome::Verified),
            Transition::Verified
        );
        assert_eq!(
            plan_transition(1, 1, &CheckOutcome::Verified),
            Transition::Verified
        );
    }

    #[test]
    fn environment_failure_is_terminal_on_the_spot() {
        // Attempt 1 of 10: the budget is irrelevant for a broken environment.
        let transition = plan_transition(
            1,
            10,
            &CheckOutcome::EnvironmentUnavailable("AUTHORITY_API_TOKEN is not set".to_string()),
        );
        assert_eq!(
            transition,
            Transition::Failed {
                error: "AUTHORITY_API_TOKEN is not set".to_string()
            }
        );
    }

    #[test]
    fn budget_is_respected_exactly() {
        // Always NotYetVerified with max_attempts = 3: retries on checks 1
        // and 2, times out on exactly the 3rd.
        assert_eq!(
            plan_transition(1, 3, &CheckOutcome::NotYetVerified),
            Transition::Retry
        );
        assert_eq!(
            plan_transition(2, 3, &CheckOutcome::NotYetVerified),
            Transition::Retry
        );
        assert!(matches!(
            plan_transition(3, 3, &CheckOutcome::NotYetVerified),
            Transition::TimedOut { .. }
        ));
    }

    #[test]
    fn single_attempt_budget_fails_on_first_authority_outage() {
        let transition = plan_transition(1, 1, &unavailable());
        assert_eq!(
            transition,
            Transition::Failed {
                error: "authority returned HTTP 503".to_string()
            }
        );
    }

    #[test]
    fn transient_outage_retries_while_budget_remains() {
        assert_eq!(plan_transition(4, 10, &unavailable()), Transition::Retry);
    }

    #[test]
    fn exhaustion_outcome_depends_on_what_was_observed() {
        // Still waiting on DNS -> timeout; authority down -> failed.
        assert!(matches!(
            plan_transition(10, 10, &CheckOutcome::NotYetVerified),
            Transition::TimedOut { .. }
        ));
        assert!(matches!(
            plan_transition(10, 10, &unavailable()),
            Transition::Failed { .. }
        ));
    }

    mod store {
        use super::*;
        use crate::authority::{AuthorityError, AuthorityStatus};
        use async_trait::async_trait;
        use sqlx::PgPool;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::time::Duration;
        use veridom_db::repositories::telemetry_repo::TelemetryRepository;

        struct CountingAuthority {
            verified: bool,
            calls: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl crate::authority::AuthorityClient for CountingAuthority {
            async fn check_status(&self, _: &str) -> Result<AuthorityStatus, AuthorityError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(AuthorityStatus {
                    verified: self.verified,
                })
            }
        }

        fn scheduler_with(
            pool: &PgPool,
            verified: bool,
            calls: Arc<AtomicUsize>,
        ) -> (AttemptScheduler, AttemptRepository, DomainRepository) {
            let domains = DomainRepository::new(pool.clone());
            let attempts = AttemptRepository::new(pool.clone());
            let ledger = Arc::new(TelemetryLedger::new(
                TelemetryRepository::new(pool.clone()),
                attempts.clone(),
            ));
            let checker =
                VerificationChecker::new(Arc::new(CountingAuthority { verified, calls }));
            let policy = BackoffPolicy {
                initial_delay: Duration::ZERO,
                jitter: Duration::ZERO,
                ..BackoffPolicy::DEFAULT
            };
            let scheduler = AttemptScheduler::new(
                domains.clone(),
                attempts.clone(),
                ledger,
                checker,
                policy,
            );
            (scheduler, attempts, domains)
        }

        #[sqlx::test(migrations = "../../libs/veridom-db/migrations")]
        async fn terminal_attempts_stay_terminal_and_skip_the_authority(pool: PgPool) {
            let calls = Arc::new(AtomicUsize::new(0));
            let (scheduler, attempts, domains) = scheduler_with(&pool, true, calls.clone());
            let domain = domains.register("shop.example.com", 1).await.unwrap();
            let attempt = attempts
                .insert(domain.id, 10, Utc::now() - ChronoDuration::seconds(1))
                .await
                .unwrap();

            let outcome = scheduler.process_due(attempt.id).await.unwrap();
            assert_eq!(outcome, ProcessOutcome::Transitioned(Transition::Verified));
            assert_eq!(calls.load(Ordering::SeqCst), 1);

            // Re-processing a verified attempt is a read-only no-op.
            let outcome = scheduler.process_due(attempt.id).await.unwrap();
            assert_eq!(
                outcome,
                ProcessOutcome::AlreadyTerminal(AttemptStatus::Verified)
            );
            assert_eq!(calls.load(Ordering::SeqCst), 1);

            let current = attempts.get(attempt.id).await.unwrap().unwrap();
            assert_eq!(current.status(), AttemptStatus::Verified);
            assert_eq!(current.attempt, 1);
        }

        #[sqlx::test(migrations = "../../libs/veridom-db/migrations")]
        async fn attempts_not_yet_due_never_reach_the_authority(pool: PgPool) {
            let calls = Arc::new(AtomicUsize::new(0));
            let (scheduler, attempts, domains) = scheduler_with(&pool, true, calls.clone());
            let domain = domains.register("shop.example.com", 1).await.unwrap();
            let deadline = Utc::now() + ChronoDuration::minutes(5);
            let attempt = attempts.insert(domain.id, 10, deadline).await.unwrap();

            match scheduler.process_due(attempt.id).await.unwrap() {
                ProcessOutcome::NotDueYet { next_retry_at } => {
                    assert!(next_retry_at > Utc::now());
                }
                other => panic!("expected NotDueYet, got {:?}", other),
            }
            assert_eq!(calls.load(Ordering::SeqCst), 0);
        }

        #[sqlx::test(migrations = "../../libs/veridom-db/migrations")]
        async fn committed_transition_survives_a_ledger_outage(pool: PgPool) {
            let calls = Arc::new(AtomicUsize::new(0));
            let (scheduler, attempts, domains) = scheduler_with(&pool, true, calls);
            let domain = domains.register("shop.example.com", 1).await.unwrap();
            let attempt = attempts
                .insert(domain.id, 10, Utc::now() - ChronoDuration::seconds(1))
                .await
                .unwrap();

            sqlx::query("DROP TABLE telemetry_events")
                .execute(&pool)
                .await
                .unwrap();

            let outcome = scheduler.process_due(attempt.id).await.unwrap();
            assert_eq!(outcome, ProcessOutcome::Transitioned(Transition::Verified));

            let current = attempts.get(attempt.id).await.unwrap().unwrap();
            assert_eq!(current.status(), AttemptStatus::Verified);
            let domain = domains.get(domain.id).await.unwrap().unwrap();
            assert_eq!(domain.status, "active");
            assert!(domain.verified_at.is_some());
        }

        #[sqlx::test(migrations = "../../libs/veridom-db/migrations")]
        async fn racing_start_is_reported_as_already_in_progress(pool: PgPool) {
            let (scheduler, attempts, domains) =
                scheduler_with(&pool, false, Arc::new(AtomicUsize::new(0)));
            let domain = domains.register("shop.example.com", 1).await.unwrap();
            // A racing starter that slipped past the pending check has
            // already inserted its campaign row.
            attempts.insert(domain.id, 10, Utc::now()).await.unwrap();

            let err = attempts
                .insert(domain.id, 10, Utc::now())
                .await
                .unwrap_err();
            assert!(is_unique_violation(&err));

            match scheduler.start_attempt(domain.id).await {
                Err(StartError::AlreadyInProgress(id)) => assert_eq!(id, domain.id),
                other => panic!("expected AlreadyInProgress, got {:?}", other),
            }
        }
    }
}
