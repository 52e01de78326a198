use crate::config::ApiConfig;
use anyhow::{Context, Result};
use serde_json::Value;
use std::time::Duration;
use tokio_retry::RetryIf;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};
use url::Url;

pub struct HttpClient {
    inner: reqwest::Client,
    max_retries: usize,
}

impl HttpClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            inner,
            max_retries: config.max_retries as usize,
        })
    }

    /// GET a URL and decode the body as JSON.
    ///
    /// Transient failures (timeouts, connection errors, 5xx, 429) are retried
    /// with exponential backoff and jitter; other errors surface immediately.
    pub async fn get_json(&self, url: Url) -> Result<Value> {
        // 500ms, 1s, 2s, ... between attempts
        let backoff = ExponentialBackoff::from_millis(2)
            .factor(250)
            .map(jitter)
            .take(self.max_retries);

        let attempt = || {
            let url = url.clone();
            async move {
                debug!("GET {}", url.path());
                let resp = self.inner.get(url).send().await?;
                resp.error_for_status()?.json::<Value>().await
            }
        };

        RetryIf::spawn(backoff, attempt, |err: &reqwest::Error| {
            let retry = is_transient(err);
            if retry {
                warn!("Transient request failure, will retry: {}", err);
            }
            retry
        })
        .await
        .context("All request attempts failed")
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    if err.is_timeout() || err.is_connect() {
        return true;
    }
    match err.status() {
        Some(status) => status.is_server_error() || status.as_u16() == 429,
        // No status and not a body-decode problem: request never completed.
        None => !err.is_decode(),
    }
}
