//! An HTTP client that talks to the Statsig API.
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use rand::{thread_rng, Rng};
use reqwest::{header, StatusCode, Url};

use crate::{Error, Result, StatsigMetadata};

/// Retry and timeout settings for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    /// Additional attempts after the first one. Only retryable failures are retried.
    pub retries: u32,
    /// Wait before the first retry. Doubles after every attempt.
    pub backoff: Duration,
    /// Timeout of a single attempt.
    pub timeout: Duration,
}

impl RequestOptions {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
    pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

    pub fn new() -> RequestOptions {
        RequestOptions::default()
    }

    pub fn with_retries(mut self, retries: u32) -> RequestOptions {
        self.retries = retries;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> RequestOptions {
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> RequestOptions {
        self.timeout = timeout;
        self
    }
}

impl Default for RequestOptions {
    fn default() -> RequestOptions {
        RequestOptions {
            retries: 0,
            backoff: RequestOptions::DEFAULT_BACKOFF,
            timeout: RequestOptions::DEFAULT_TIMEOUT,
        }
    }
}

/// Transport used by the spec store and the event logger.
///
/// Endpoints are relative to the API URL (`download_config_specs`, `get_id_lists`, `log_event`,
/// `check_gate`, `get_config`). ID lists are fetched from absolute URLs returned by
/// `get_id_lists`.
#[async_trait]
pub trait Network: Send + Sync {
    /// POST `body` to `endpoint` and return the parsed JSON response (`Null` for an empty body).
    async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<serde_json::Value>;

    /// Fetch an ID-list file starting at byte `offset`.
    async fn fetch_id_list(&self, url: &str, offset: u64) -> Result<String>;
}

pub struct HttpNetworkConfig {
    pub api_url: String,
    pub secret_key: String,
    pub metadata: StatsigMetadata,
}

pub const DEFAULT_API_URL: &str = "https://statsigapi.net/v1";

const RETRYABLE_STATUS_CODES: [u16; 8] = [408, 500, 502, 503, 504, 522, 524, 599];

/// Longest wait between two attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Default [`Network`] implementation backed by `reqwest`.
pub struct HttpNetwork {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    api_url: Url,
    config: HttpNetworkConfig,
    /// If we receive a 401/403 during a request, the secret key is not valid. We cache this so
    /// we don't issue additional requests to the server.
    unauthorized: AtomicBool,
}

impl HttpNetwork {
    pub fn new(config: HttpNetworkConfig) -> Result<HttpNetwork> {
        let api_url = format!("{}/", config.api_url.trim_end_matches('/'));
        let api_url = Url::parse(&api_url).map_err(Error::InvalidBaseUrl)?;
        Ok(HttpNetwork {
            client: reqwest::Client::new(),
            api_url,
            config,
            unauthorized: AtomicBool::new(false),
        })
    }

    async fn post_once(
        &self,
        url: &Url,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value> {
        let response = self
            .client
            .post(url.clone())
            .timeout(timeout)
            .header("STATSIG-API-KEY", &self.config.secret_key)
            .header("STATSIG-SDK-TYPE", &self.config.metadata.sdk_type)
            .header("STATSIG-SDK-VERSION", &self.config.metadata.sdk_version)
            .header(
                "STATSIG-CLIENT-TIME",
                chrono::Utc::now().timestamp_millis().to_string(),
            )
            .json(body)
            .send()
            .await?;

        let response = self.check_status(response)?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            log::warn!(target: "statsig", "client is not authorized. Check your secret key");
            self.unauthorized.store(true, Ordering::Relaxed);
            return Err(Error::Unauthorized);
        }
        Err(Error::HttpStatus(status.as_u16()))
    }
}

#[async_trait]
impl Network for HttpNetwork {
    async fn post(
        &self,
        endpoint: &str,
        body: serde_json::Value,
        options: RequestOptions,
    ) -> Result<serde_json::Value> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }
        let url = self.api_url.join(endpoint).map_err(Error::InvalidBaseUrl)?;

        let mut backoff = options.backoff;
        let mut attempt = 0;
        loop {
            log::debug!(target: "statsig", endpoint, attempt; "sending request");
            let result = self.post_once(&url, &body, options.timeout).await;
            match result {
                Err(err) if attempt < options.retries && is_retryable(&err) => {
                    log::debug!(target: "statsig", endpoint, attempt; "request failed, retrying: {err}");
                    tokio::time::sleep(backoff_jitter(backoff)).await;
                    backoff = backoff.saturating_mul(2).min(MAX_BACKOFF);
                    attempt += 1;
                }
                Err(err) => {
                    log::warn!(target: "statsig", endpoint; "request failed: {err}");
                    return Err(err);
                }
                Ok(value) => return Ok(value),
            }
        }
    }

    async fn fetch_id_list(&self, url: &str, offset: u64) -> Result<String> {
        let url = Url::parse(url).map_err(Error::InvalidBaseUrl)?;
        log::debug!(target: "statsig", offset; "fetching id list");
        let response = self
            .client
            .get(url)
            .timeout(RequestOptions::DEFAULT_TIMEOUT * 3)
            .header(header::RANGE, format!("bytes={offset}-"))
            .send()
            .await?;
        let response = self.check_status(response)?;
        Ok(response.text().await?)
    }
}

fn is_retryable(err: &Error) -> bool {
    match err {
        Error::HttpStatus(status) => RETRYABLE_STATUS_CODES.contains(status),
        Error::Network(err) => err.is_timeout() || err.is_connect() || err.is_request(),
        _ => false,
    }
}

/// Randomize `backoff` by up to +50% so retrying instances don't synchronize.
fn backoff_jitter(backoff: Duration) -> Duration {
    let extra = thread_rng().gen_range(Duration::ZERO..=backoff / 2);
    backoff.saturating_add(extra)
}
