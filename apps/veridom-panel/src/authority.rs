use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AuthorityStatus {
    pub verified: bool,
}

/// The two ways a status check can fail, kept apart because they demand
/// opposite handling: a broken configuration never heals on retry, while an
/// unavailable authority usually does.
#[derive(Debug, thiserror::Error)]
pub enum AuthorityError {
    #[error("authority configuration error: {0}")]
    Configuration(String),
    #[error("authority unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AuthorityClient: Send + Sync {
    async fn check_status(&self, hostname: &str) -> Result<AuthorityStatus, AuthorityError>;
}

/// HTTP adapter for the external verification authority. Credentials are
/// read once at construction; a missing value is reported per-check as a
/// Configuration error so it lands in telemetry instead of aborting startup.
pub struct HttpAuthorityClient {
    client: Client,
    base_url: Option<String>,
    token: Option<String>,
}

impl HttpAuthorityClient {
    pub fn from_env() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: env::var("AUTHORITY_API_URL").ok().filter(|v| !v.trim().is_empty()),
            token: env::var("AUTHORITY_API_TOKEN").ok().filter(|v| !v.trim().is_empty()),
        }
    }
}

#[derive(Deserialize)]
struct StatusBody {
    verified: bool,
}

#[async_trait]
impl AuthorityClient for HttpAuthorityClient {
    async fn check_status(&self, hostname: &str) -> Result<AuthorityStatus, AuthorityError> {
        let base_url = self.base_url.as_deref().ok_or_else(|| {
            AuthorityError::Configuration("AUTHORITY_API_URL is not set".to_string())
        })?;
        let token = self.token.as_deref().ok_or_else(|| {
            AuthorityError::Configuration("AUTHORITY_API_TOKEN is not set".to_string())
        })?;

        let url = format!(
            "{}/v1/domains/{}/status",
            base_url.trim_end_matches('/'),
            hostname
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthorityError::Unavailable(format!("authority request timed out: {}", e))
                } else {
                    AuthorityError::Unavailable(format!("authority request failed: {}", e))
                }
            })?;

        let status = response.status();
        if matches!(status.as_u16(), 401 | 403) {
            return Err(AuthorityError::Configuration(format!(
                "authority rejected credentials (HTTP {})",
                status.as_u16()
            )));
        }
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(AuthorityError::Unavailable(format!(
                "authority returned HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(AuthorityError::Unavailable(format!(
                "unexpected HTTP {} from authority",
                status.as_u16()
            )));
        }

        let body: StatusBody = response.json().await.map_err(|e| {
            AuthorityError::Unavailable(format!("malformed authority response: {}", e))
        })?;

        Ok(AuthorityStatus {
            verified: body.verified,
        })
    }
}
