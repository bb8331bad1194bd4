//! Remote artifact fetching
//!
//! Every remote read goes through a [`Fetcher`]. The HTTP implementation
//! retries transient failures under a [`RetryPolicy`]: at most six attempts,
//! each capped at fifteen seconds, so no fetch can hang the install. Both
//! attempts and backoff sleeps stop early once the run is cancelled.

pub mod mock;

use async_trait::async_trait;
use reqwest::Client;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::InstallError;
use crate::retry::RetryPolicy;

/// Fetches remote install artifacts
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Check that a URL answers at all
    async fn probe(&self, url: &str) -> Result<(), InstallError>;

    /// Download a URL, requiring a success status
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, InstallError>;

    /// Download a URL as UTF-8 text
    async fn fetch_text(&self, url: &str) -> Result<String, InstallError> {
        let bytes = self.fetch(url).await?;
        String::from_utf8(bytes).map_err(|e| InstallError::Fetch {
            url: url.to_string(),
            attempts: 1,
            message: format!("body is not UTF-8: {}", e),
        })
    }
}

/// HTTP(S) fetcher with bounded retries
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    policy: RetryPolicy,
    cancel: CancellationToken,
}

impl HttpFetcher {
    pub fn new(policy: RetryPolicy) -> Result<Self, InstallError> {
        let client = Client::builder()
            .timeout(policy.attempt_timeout)
            .connect_timeout(policy.attempt_timeout)
            .user_agent(concat!("blueos-install/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            policy,
            cancel: CancellationToken::new(),
        })
    }

    /// Abandon in-flight attempts and backoff when `cancel` fires
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `attempt` until it succeeds or the policy is exhausted
    async fn with_retries<T, F, Fut>(&self, url: &str, mut attempt: F) -> Result<T, InstallError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let max = self.policy.max_attempts;
        let mut last_error = String::new();

        for n in 1..=max {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(Self::cancelled(url)),
                result = attempt() => result,
            };

            match result {
                Ok(value) => {
                    if n > 1 {
                        debug!("Fetched {} on attempt {}/{}", url, n, max);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    last_error = e;
                    if n < max {
                        let delay = self.policy.delay_for(n);
                        warn!(
                            "Attempt {}/{} for {} failed: {} (retrying in {:?})",
                            n, max, url, last_error, delay
                        );
                        tokio::select! {
                            _ = self.cancel.cancelled() => return Err(Self::cancelled(url)),
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        Err(InstallError::Fetch {
            url: url.to_string(),
            attempts: max,
            message: last_error,
        })
    }

    fn cancelled(url: &str) -> InstallError {
        InstallError::Cancelled(format!("fetching {}", url))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn probe(&self, url: &str) -> Result<(), InstallError> {
        debug!("Probing {}", url);
        let client = &self.client;
        self.with_retries(url, move || async move {
            let response = client.get(url).send().await.map_err(|e| e.to_string())?;
            // Any answer short of a server error means the host is reachable
            if response.status().is_server_error() {
                Err(format!("HTTP {}", response.status()))
            } else {
                Ok(())
            }
        })
        .await
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, InstallError> {
        debug!("Fetching {}", url);
        let client = &self.client;
        self.with_retries(url, move || async move {
            let response = client.get(url).send().await.map_err(|e| e.to_string())?;
            if !response.status().is_success() {
                return Err(format!("HTTP {}", response.status()));
            }
            let body = response.bytes().await.map_err(|e| e.to_string())?;
            Ok(body.to_vec())
        })
        .await
    }
}
