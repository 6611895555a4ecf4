use crate::services::scheduler::AttemptScheduler;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Periodic trigger for the scheduler. Purely a convenience loop; operators
/// can equally drive sweeps from cron via `veridom-panel sweep` or the
/// manual sweep endpoint.
pub struct VerificationSweeper {
    scheduler: Arc<AttemptScheduler>,
    interval: Duration,
}

impl VerificationSweeper {
    pub fn new(scheduler: Arc<AttemptScheduler>, interval: Duration) -> Self {
        Self {
            scheduler,
            interval,
        }
    }

    pub async fn start(&self) {
        info!(
            "Starting verification sweeper (every {}s)...",
            self.interval.as_secs()
        );
        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;
            match self.scheduler.process_all_due().await {
                Ok(stats) if stats.processed > 0 => {
                    info!(
                        "Sweep: {} processed, {} verified, {} failed, {} retried",
                        stats.processed, stats.verified, stats.failed, stats.retried
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Sweep error: {:#}", e),
            }
        }
    }
}
