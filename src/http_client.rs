//! Authenticated HTTP transport for Graph API operations.
//!
//! Attaches the bearer credential, transparently refreshes it once on
//! a 401, and absorbs rate limiting (429/503) with Retry-After or
//! jittered exponential backoff up to the configured retry ceiling.
//! Every other status is returned to the caller for context-aware
//! translation.

use crate::auth::TokenManager;
use crate::config::DriveConfig;
use crate::error::{FsError, Result};
use log::{debug, warn};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, RETRY_AFTER};
use reqwest::{Client, Method, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use url::Url;

/// Request body shapes the adapter sends. Kept clonable so a retried
/// attempt can rebuild the request from scratch.
#[derive(Debug, Clone)]
pub enum Body {
    Empty,
    Json(serde_json::Value),
    Bytes(Vec<u8>),
}

pub struct HttpClient {
    client: Client,
    tokens: Arc<TokenManager>,
    config: DriveConfig,
}

impl HttpClient {
    pub fn new(tokens: Arc<TokenManager>, config: DriveConfig) -> Self {
        Self {
            client: Client::new(),
            tokens,
            config,
        }
    }

    /// Get full URL by prepending the API base if needed.
    pub fn full_url(&self, url: &str) -> Result<Url> {
        let absolute = if url.starts_with("http") {
            url.to_string()
        } else {
            format!("{}{}", self.config.base_url, url)
        };
        Url::parse(&absolute)
            .map_err(|e| FsError::InvalidArgument(format!("bad url {:?}: {}", absolute, e)))
    }

    /// Issue an authenticated request against an API endpoint.
    pub async fn send(
        &self,
        method: Method,
        endpoint: &str,
        headers: HeaderMap,
        body: Body,
    ) -> Result<Response> {
        let url = self.full_url(endpoint)?;
        self.execute(method, url, headers, body, true).await
    }

    /// Issue a request against a pre-authenticated URL (download and
    /// upload-session URLs carry their own credentials).
    pub async fn send_unauthenticated(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
        body: Body,
    ) -> Result<Response> {
        let url = Url::parse(url)
            .map_err(|e| FsError::Integrity(format!("service returned bad url: {}", e)))?;
        self.execute(method, url, headers, body, false).await
    }

    async fn execute(
        &self,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Body,
        authenticate: bool,
    ) -> Result<Response> {
        let mut attempt: u32 = 0;
        let mut refreshed = false;
        loop {
            let mut request = self
                .client
                .request(method.clone(), url.clone())
                .headers(headers.clone())
                .timeout(self.config.request_timeout);

            // Track which token generation this attempt carries so a
            // 401 refreshes exactly the credential that was rejected.
            let mut generation = None;
            if authenticate {
                let (token, seen) = self.tokens.bearer().await?;
                let value = HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|_| FsError::InvalidArgument("token is not header-safe".into()))?;
                request = request.header(AUTHORIZATION, value);
                generation = Some(seen);
            }

            let response = self.dispatch(request, &body).await?;

            if response.status() == StatusCode::UNAUTHORIZED && !refreshed {
                if let Some(seen) = generation {
                    debug!("401 from {}, refreshing token and retrying once", url);
                    self.tokens.refresh_after(seen).await?;
                    refreshed = true;
                    continue;
                }
            }
            if let Some(delay) = self.throttle_delay(&response, attempt) {
                attempt += 1;
                warn!(
                    "Throttled by {} (attempt {}), sleeping {:?}",
                    url, attempt, delay
                );
                sleep(delay).await;
                continue;
            }
            return Ok(response);
        }
    }

    async fn dispatch(&self, request: reqwest::RequestBuilder, body: &Body) -> Result<Response> {
        let request = match body {
            Body::Empty => request,
            Body::Json(value) => request.json(value),
            Body::Bytes(data) => request
                .header("Content-Type", "application/octet-stream")
                .body(data.clone()),
        };
        Ok(request.send().await?)
    }

    /// Delay before retrying a throttled request, or `None` when the
    /// response is not retryable / the ceiling is reached.
    fn throttle_delay(&self, response: &Response, attempt: u32) -> Option<Duration> {
        let status = response.status();
        let throttled = status == StatusCode::TOO_MANY_REQUESTS
            || status == StatusCode::SERVICE_UNAVAILABLE;
        if !throttled || attempt >= self.config.max_retries {
            return None;
        }
        let hinted = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        Some(hinted.unwrap_or_else(|| backoff_delay(self.config.retry_base_delay_ms, attempt)))
    }
}

/// Exponential backoff with jitter, used when the service supplies no
/// Retry-After hint and for chunk-level upload retries.
pub(crate) fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(10));
    let jitter = rand::rng().random_range(0..=base_ms / 2 + 1);
    Duration::from_millis(exp + jitter)
}
