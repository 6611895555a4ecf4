use crate::authority::{AuthorityClient, AuthorityError};
use std::sync::Arc;

/// Classified result of one status check. "Not yet verified" is the expected
/// condition while DNS propagates, so it is an ordinary value here rather
/// than an error path.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Verified,
    NotYetVerified,
    AuthorityUnavailable(String),
    EnvironmentUnavailable(String),
}

/// Performs one check against the external authority and classifies the
/// result. Authority failures never escape this boundary as errors.
#[derive(Clone)]
pub struct VerificationChecker {
    authority: Arc<dyn AuthorityClient>,
}

impl VerificationChecker {
    pub fn new(authority: Arc<dyn AuthorityClient>) -> Self {
        Self { authority }
    }

    pub async fn check(&self, hostname: &str) -> CheckOutcome {
        match self.authority.check_status(hostname).await {
            Ok(status) if status.verified => CheckOutcome::Verified,
            Ok(_) => CheckOutcome::NotYetVerified,
            Err(AuthorityError::Configuration(reason)) => {
                CheckOutcome::EnvironmentUnavailable(reason)
            }
            Err(AuthorityError::Unavailable(reason)) => CheckOutcome::AuthorityUnavailable(reason),
        }
    }
}
