use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{error, info, warn};
use veridom_db::models::telemetry::{EventDetails, EventType, Severity, TelemetryEvent};
use veridom_db::models::verification::{AttemptStatus, VerificationAttempt};
use veridom_db::repositories::attempt_repo::AttemptRepository;
use veridom_db::repositories::telemetry_repo::TelemetryRepository;

/// Static remediation guidance per failure type. Pure lookup, shown to
/// operators instead of raw errors.
pub struct ActionGuidance {
    pub title: &'static str,
    pub actions: &'static [&'static str],
    pub retryable: bool,
}

pub fn guidance_for(event_type: EventType) -> Option<&'static ActionGuidance> {
    match event_type {
        EventType::EnvironmentError => Some(&ActionGuidance {
            title: "Verification environment is misconfigured",
            actions: &[
                "Check that the authority API credentials are present and valid",
                "Restore the authority configuration, then start a fresh attempt",
            ],
            retryable: false,
        }),
        EventType::AuthorityError => Some(&ActionGuidance {
            title: "External verification authority is unreachable",
            actions: &[
                "Check the authority's status page for an ongoing incident",
                "Retry after a short delay",
            ],
            retryable: true,
        }),
        EventType::DnsError => Some(&ActionGuidance {
            title: "DNS proof not observed",
            actions: &[
                "Verify the DNS record name and content match the instructions",
                "Allow propagation time; changes can take up to 48 hours",
            ],
            retryable: true,
        }),
        EventType::VerificationTimeout => Some(&ActionGuidance {
            title: "Verification window exhausted",
            actions: &[
                "Check the DNS records manually with dig or nslookup",
                "Start a fresh verification attempt once the records resolve",
            ],
            retryable: true,
        }),
        EventType::VerificationFailed => Some(&ActionGuidance {
            title: "Verification failed",
            actions: &[
                "Review the domain configuration for typos",
                "Confirm the domain registration is valid and not expired",
                "Retry after a short delay",
            ],
            retryable: true,
        }),
        EventType::VerificationStarted | EventType::VerificationSuccess => None,
    }
}

/// On-demand diagnosis for one domain, derived from unresolved failures plus
/// the latest attempt. Never persisted.
#[derive(Debug, Serialize, PartialEq)]
pub struct FailureSummary {
    pub domain_id: i64,
    pub total_failures: u64,
    pub failure_types: BTreeMap<String, u64>,
    pub actionable_errors: Vec<&'static str>,
    pub suggested_actions: Vec<&'static str>,
    pub can_retry: bool,
}

pub fn build_failure_summary(
    domain_id: i64,
    events: &[TelemetryEvent],
    latest_attempt: Option<&VerificationAttempt>,
) -> FailureSummary {
    let mut failure_types: BTreeMap<String, u64> = BTreeMap::new();
    let mut actionable_errors: Vec<&'static str> = Vec::new();
    let mut suggested_actions: Vec<&'static str> = Vec::new();

    for event in events {
        let Some(event_type) = EventType::parse(&event.event_type) else {
            continue;
        };
        if !event_type.is_failure() {
            continue;
        }

        *failure_types.entry(event.event_type.clone()).or_insert(0) += 1;

        if let Some(guidance) = guidance_for(event_type) {
            if !actionable_errors.contains(&guidance.title) {
                actionable_errors.push(guidance.title);
            }
            for action in guidance.actions {
                if !suggested_actions.contains(action) {
                    suggested_actions.push(action);
                }
            }
        }
    }

    let can_retry = latest_attempt
        .map(|a| matches!(a.status(), AttemptStatus::Pending | AttemptStatus::Failed))
        .unwrap_or(false);

    FailureSummary {
        domain_id,
        total_failures: failure_types.values().sum(),
        failure_types,
        actionable_errors,
        suggested_actions,
        can_retry,
    }
}

#[derive(Debug, Serialize)]
pub struct LedgerStats {
    pub total_events: i64,
    pub failures_by_type: BTreeMap<String, i64>,
    pub failures_by_severity: BTreeMap<String, i64>,
    pub recent_unresolved: Vec<TelemetryEvent>,
    pub domains_with_failures: i64,
    pub mean_resolution_seconds: Option<f64>,
}

/// Append-only event log plus the aggregate/diagnosis read side.
pub struct TelemetryLedger {
    events: TelemetryRepository,
    attempts: AttemptRepository,
}

impl TelemetryLedger {
    pub fn new(events: TelemetryRepository, attempts: AttemptRepository) -> Self {
        Self { events, attempts }
    }

    pub async fn record(
        &self,
        domain_id: i64,
        event_type: EventType,
        severity: Severity,
        message: String,
        details: Option<EventDetails>,
    ) -> Result<TelemetryEvent> {
        match severity {
            Severity::Critical | Severity::Error => {
                error!("[domain {}] {}: {}", domain_id, event_type.as_str(), message)
            }
            Severity::Warning => {
                warn!("[domain {}] {}: {}", domain_id, event_type.as_str(), message)
            }
            Severity::Info => {
                info!("[domain {}] {}: {}", domain_id, event_type.as_str(), message)
            }
        }

        self.events
            .insert(
                domain_id,
                event_type.as_str(),
                severity.as_str(),
                &message,
                details.map(|d| d.to_value()),
            )
            .await
    }

    pub async fn summarize_failures(&self, domain_id: i64) -> Result<FailureSummary> {
        let events = self.events.unresolved_failures_for_domain(domain_id).await?;
        let latest = self.attempts.latest_for_domain(domain_id).await?;
        Ok(build_failure_summary(domain_id, &events, latest.as_ref()))
    }

    pub async fn stats(&self) -> Result<LedgerStats> {
        let total_events = self.events.total_events().await?;
        let failures_by_type = self.events.failure_counts_by_type().await?.into_iter().collect();
        let failures_by_severity = self
            .events
            .failure_counts_by_severity()
            .await?
            .into_iter()
            .collect();
        let recent_unresolved = self.events.recent_unresolved_failures(10).await?;
        let domains_with_failures = self.attempts.count_domains_with_terminal_failures().await?;
        let mean_resolution_seconds = self.events.mean_resolution_seconds().await?;

        Ok(LedgerStats {
            total_events,
            failures_by_type,
            failures_by_severity,
            recent_unresolved,
            domains_with_failures,
            mean_resolution_seconds,
        })
    }

    pub async fn domain_events(&self, domain_id: i64) -> Result<Vec<TelemetryEvent>> {
        self.events.events_for_domain(domain_id).await
    }

    /// Resolving twice is a no-op, not an error.
    pub async fn resolve(&self, event_id: i64, actor: &str) -> Result<()> {
        let changed = self.events.resolve(event_id, actor).await?;
        if changed {
            info!("Telemetry event {} resolved by {}", event_id, actor);
        }
        Ok(())
    }

    pub async fn resolve_all(&self, domain_id: i64, actor: &str) -> Result<u64> {
        let resolved = self.events.resolve_all_for_domain(domain_id, actor).await?;
        if resolved > 0 {
            info!(
                "Resolved {} telemetry events for domain {} (by {})",
                resolved, domain_id, actor
            );
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(event_type: &str, severity: &str) -> TelemetryEvent {
        TelemetryEvent {
            id: 1,
            domain_id: 7,
            event_type: event_type.to_string(),
            severity: severity.to_string(),
            message: String::new(),
            details: None,
            created_at: Utc::now(),
            resolved: false,
            resolved_at: None,
            resolved_by: None,
        }
    }

    fn attempt(status: &str) -> VerificationAttempt {
        let now = Utc::now();
        VerificationAttempt {
            id: 1,
            domain_id: 7,
            attempt: 2,
            max_attempts: 10,
            next_retry_at: now,
            status: status.to_string(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn every_failure_type_has_guidance() {
        for event_type in [
            EventType::VerificationFailed,
            EventType::VerificationTimeout,
            EventType::DnsError,
            EventType::AuthorityError,
            EventType::EnvironmentError,
        ] {
            let guidance = guidance_for(event_type).expect("missing guidance");
            assert!(!guidance.title.is_empty());
            assert!(!guidance.actions.is_empty());
        }
        assert!(guidance_for(EventType::VerificationStarted).is_none());
        assert!(guidance_for(EventType::VerificationSuccess).is_none());
    }

    #[test]
    fn environment_guidance_is_the_only_non_retryable_entry() {
        assert!(!guidance_for(EventType::EnvironmentError).unwrap().retryable);
        assert!(guidance_for(EventType::DnsError).unwrap().retryable);
        assert!(guidance_for(EventType::AuthorityError).unwrap().retryable);
    }

    #[test]
    fn summary_counts_and_deduplicates_guidance() {
        let events = vec![
            event("dns_error", "warning"),
            event("authority_error", "error"),
        ];
        let latest = attempt("pending");
        let summary = build_failure_summary(7, &events, Some(&latest));

        assert_eq!(summary.total_failures, 2);
        assert_eq!(summary.failure_types.get("dns_error"), Some(&1));
        assert_eq!(summary.failure_types.get("authority_error"), Some(&1));
        assert!(!summary.actionable_errors.is_empty());
        assert!(!summary.suggested_actions.is_empty());
        assert!(summary.can_retry);

        // Both types suggest retrying after a delay; the overlap must not
        // produce duplicate entries.
        let mut deduped = summary.suggested_actions.clone();
        deduped.dedup();
        assert_eq!(deduped.len(), summary.suggested_actions.len());
        let mut titles = summary.actionable_errors.clone();
        titles.dedup();
        assert_eq!(titles.len(), summary.actionable_errors.len());
    }

    #[test]
    fn repeated_failures_of_one_type_count_but_do_not_repeat_guidance() {
        let events = vec![
            event("dns_error", "warning"),
            event("dns_error", "warning"),
            event("dns_error", "warning"),
        ];
        let summary = build_failure_summary(7, &events, Some(&attempt("failed")));

        assert_eq!(summary.total_failures, 3);
        assert_eq!(summary.failure_types.get("dns_error"), Some(&3));
        assert_eq!(summary.actionable_errors.len(), 1);
        assert!(summary.can_retry);
    }

    #[test]
    fn lifecycle_events_never_count_as_failures() {
        let events = vec![
            event("verification_started", "info"),
            event("verification_success", "info"),
        ];
        let summary = build_failure_summary(7, &events, Some(&attempt("verified")));

        assert_eq!(summary.total_failures, 0);
        assert!(summary.failure_types.is_empty());
        assert!(summary.actionable_errors.is_empty());
        assert!(!summary.can_retry);
    }

    #[test]
    fn can_retry_follows_latest_attempt_state() {
        let events = vec![event("verification_timeout", "error")];
        assert!(!build_failure_summary(7, &events, None).can_retry);
        assert!(!build_failure_summary(7, &events, Some(&attempt("timeout"))).can_retry);
        assert!(!build_failure_summary(7, &events, Some(&attempt("verified"))).can_retry);
        assert!(build_failure_summary(7, &events, Some(&attempt("failed"))).can_retry);
        assert!(build_failure_summary(7, &events, Some(&attempt("pending"))).can_retry);
    }
}
