//! # Smoke Checks
//!
//! Post-deploy probes against the gateway: `GET /health` until it answers
//! 200 (bounded retries), then one `POST /auth/token` that must return an
//! `access_token`.

use crate::config::SmokeConfig;
use crate::error::{DeployError, Result};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmokeReport {
    pub gateway_url: String,
    /// Health probes made before the gateway answered
    pub health_attempts: u32,
    pub token_issued: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

pub struct SmokeChecker {
    client: reqwest::Client,
    base_url: String,
    username: String,
    retries: u32,
    retry_delay: Duration,
}

impl SmokeChecker {
    pub fn new(config: &SmokeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds.max(1)))
            .build()
            .map_err(|e| DeployError::smoke("client", e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            retries: config.retries.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
        })
    }

    /// Poll `/health` until it returns 200; the attempt count on success
    pub async fn check_health(&self) -> Result<u32> {
        let url = format!("{}/health", self.base_url);
        let mut last_error = String::new();

        for attempt in 1..=self.retries {
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    info!(attempts = attempt, "✅ Gateway healthy");
                    return Ok(attempt);
                }
                Ok(response) => last_error = format!("status {}", response.status()),
                Err(e) => last_error = e.to_string(),
            }
            debug!(attempt = attempt, error = %last_error, "Gateway not healthy yet");
            if attempt < self.retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Err(DeployError::smoke(
            "health",
            format!("{url} not healthy after {} attempt(s): {last_error}", self.retries),
        ))
    }

    /// Request a bearer token for the configured user
    pub async fn check_token(&self) -> Result<()> {
        let url = format!("{}/auth/token", self.base_url);
        let response = self
            .client
            .post(&url)
            .form(&[("username", self.username.as_str())])
            .send()
            .await
            .map_err(|e| DeployError::smoke("token", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeployError::smoke("token", format!("{url} returned {status}")));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DeployError::smoke("token", format!("unexpected response body: {e}")))?;
        if token.access_token.is_empty() {
            return Err(DeployError::smoke("token", "empty access_token"));
        }
        info!("🔑 Token endpoint issued a token");
        Ok(())
    }

    pub async fn run(&self) -> Result<SmokeReport> {
        let started = Instant::now();
        let health_attempts = self.check_health().await?;
        self.check_token().await?;
        Ok(SmokeReport {
            gateway_url: self.base_url.clone(),
            health_attempts,
            token_issued: true,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}
