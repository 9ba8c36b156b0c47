//! HTTP plumbing for the catalog API: bearer auth, retries, concurrency cap.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};

use crate::CatalogError;

pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";

/// Issues one authenticated GET against the catalog and returns the JSON body.
#[async_trait]
pub trait CatalogTransport: Send + Sync {
    async fn get_json(
        &self,
        token: &str,
        path: &str,
        query: &[(String, String)],
    ) -> Result<JsonValue, CatalogError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }

    /// Honors a `Retry-After` hint from a 429, clamped to `max_delay`.
    fn delay_for_response(&self, attempt_index: usize, retry_after: Option<Duration>) -> Duration {
        retry_after
            .map(|hint| hint.min(self.max_delay))
            .unwrap_or_else(|| self.delay_for_attempt(attempt_index))
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug)]
pub struct HttpCatalogTransport {
    client: reqwest::Client,
    base_url: String,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpCatalogTransport {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub fn url_for(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send_with_retries(
        &self,
        token: &str,
        path: &str,
        query: &[(String, String)],
    ) -> Result<JsonValue, CatalogError> {
        let url = self.url_for(path);

        let mut attempt = 0;
        loop {
            let resp_result = self
                .client
                .get(&url)
                .bearer_auth(token)
                .query(query)
                .send()
                .await;

            match resp_result {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        return resp.json::<JsonValue>().await.map_err(|source| {
                            CatalogError::Request {
                                resource: path.to_string(),
                                source,
                            }
                        });
                    }

                    let disposition = classify_status(status);
                    if disposition == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        let retry_after = resp
                            .headers()
                            .get(reqwest::header::RETRY_AFTER)
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.trim().parse::<u64>().ok())
                            .map(Duration::from_secs);
                        let delay = self.backoff.delay_for_response(attempt, retry_after);
                        debug!(status = status.as_u16(), ?delay, "retrying catalog request");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    let body = resp.text().await.unwrap_or_default();
                    return Err(CatalogError::HttpStatus {
                        resource: path.to_string(),
                        status: status.as_u16(),
                        body,
                    });
                }
                Err(err) => {
                    let disposition = classify_reqwest_error(&err);
                    if disposition == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(CatalogError::Request {
                        resource: path.to_string(),
                        source: err,
                    });
                }
            }
        }
    }
}

#[async_trait]
impl CatalogTransport for HttpCatalogTransport {
    async fn get_json(
        &self,
        token: &str,
        path: &str,
        query: &[(String, String)],
    ) -> Result<JsonValue, CatalogError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");

        let span = info_span!("catalog_get", path);
        self.send_with_retries(token, path, query)
            .instrument(span)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_backoff_doubles_until_the_five_second_ceiling() {
        let policy = BackoffPolicy::default();
        let delays: Vec<_> = (0..6).map(|i| policy.delay_for_attempt(i)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
            ]
        );
        // Shift overflow saturates instead of wrapping back to a short delay.
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn retry_after_hint_is_clamped() {
        let policy = BackoffPolicy::default();
        assert_eq!(
            policy.delay_for_response(0, Some(Duration::from_secs(60))),
            policy.max_delay
        );
        assert_eq!(
            policy.delay_for_response(1, None),
            policy.delay_for_attempt(1)
        );
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn url_joins_base_and_path() {
        let transport = HttpCatalogTransport::new(HttpClientConfig {
            base_url: "http://localhost:9999/v1/".into(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            transport.url_for("/me/top/tracks"),
            "http://localhost:9999/v1/me/top/tracks"
        );
    }
}
