//! Resilient request executor. Every Graph call goes through here.

use bytes::Bytes;
use chrono::Utc;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use drivelink_common::{Error, Result, Secret};

use super::auth::TokenManager;
use super::models::error_detail;
use super::retry::{parse_retry_after, Outcome, RetryConfig, RetryMachine, RetryState};

/// Where a request is sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Path appended to the Graph base URL, starting with `/`.
    Endpoint(String),
    /// Absolute URL (upload sessions).
    Url(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Endpoint(path) => write!(f, "{}", path),
            // Session URLs embed a capability token in the query string.
            Self::Url(url) => write!(f, "{}", url.split('?').next().unwrap_or_default()),
        }
    }
}

/// Immutable description of one logical request.
///
/// Retries re-send the same descriptor; nothing in it changes between
/// attempts except the bearer token.
#[derive(Debug, Clone)]
pub struct GraphRequest {
    pub method: Method,
    pub target: Target,
    pub query: Vec<(String, String)>,
    pub json: Option<serde_json::Value>,
    pub body: Option<Bytes>,
    pub headers: Vec<(String, String)>,
    /// Per-attempt timeout; the executor default applies when unset.
    pub timeout: Option<Duration>,
    /// Retry budget; the executor default applies when unset.
    pub max_retries: Option<u32>,
    /// Back off and retry throttling, server and transport failures.
    pub backoff_retry: bool,
    /// Turn a final non-success response into [`Error::Http`].
    pub raise_on_error: bool,
    /// Attach the bearer token. Upload session URLs must not carry it.
    pub authenticated: bool,
}

impl GraphRequest {
    /// Request against a Graph endpoint path.
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self::with_target(method, Target::Endpoint(endpoint.into()))
    }

    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::GET, endpoint)
    }

    pub fn post(endpoint: impl Into<String>) -> Self {
        Self::new(Method::POST, endpoint)
    }

    pub fn put(endpoint: impl Into<String>) -> Self {
        Self::new(Method::PUT, endpoint)
    }

    /// Request against an absolute URL.
    pub fn url(method: Method, url: impl Into<String>) -> Self {
        Self::with_target(method, Target::Url(url.into()))
    }

    fn with_target(method: Method, target: Target) -> Self {
        Self {
            method,
            target,
            query: Vec::new(),
            json: None,
            body: None,
            headers: Vec::new(),
            timeout: None,
            max_retries: None,
            backoff_retry: true,
            raise_on_error: false,
            authenticated: true,
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.json = Some(body);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Only the one-time credential refresh after a 401 may repeat the request.
    pub fn no_backoff_retry(mut self) -> Self {
        self.backoff_retry = false;
        self
    }

    pub fn raise_on_error(mut self) -> Self {
        self.raise_on_error = true;
        self
    }

    pub fn unauthenticated(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// Fully buffered response.
#[derive(Debug, Clone)]
pub struct GraphResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GraphResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserialize the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::Serialization(format!("Failed to parse response ({}): {}", self.status, e))
        })
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Delay requested through the `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        self.headers
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()))
    }

    /// Convert into an HTTP error with the Graph error detail.
    pub fn into_error(self) -> Error {
        Error::http(self.status, error_detail(&self.body))
    }
}

/// Executes [`GraphRequest`]s with timeout, retry/backoff, Retry-After and a
/// single credential refresh on 401.
pub struct GraphExecutor {
    http: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    retry: RetryConfig,
    default_timeout: Duration,
}

impl GraphExecutor {
    /// Create a new executor.
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        tokens: Arc<TokenManager>,
        retry: RetryConfig,
        default_timeout: Duration,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            retry,
            default_timeout,
        }
    }

    /// Execute a request.
    ///
    /// # Postconditions
    /// - 2xx responses are returned as soon as they arrive
    /// - Non-retryable or exhausted responses are returned as-is, or turned
    ///   into [`Error::Http`] when `raise_on_error` is set
    ///
    /// # Errors
    /// - Credential acquisition failed
    /// - Transport failure on the last allowed attempt
    pub async fn execute(&self, req: &GraphRequest) -> Result<GraphResponse> {
        let max_retries = req.max_retries.unwrap_or(self.retry.max_retries);
        let mut machine = RetryMachine::new(&self.retry, max_retries);
        if !req.backoff_retry {
            machine = machine.without_backoff_retry();
        }

        let mut token = if req.authenticated {
            Some(self.tokens.get_token(false).await?)
        } else {
            None
        };

        loop {
            debug!(
                "{} {} (try {}/{})",
                req.method,
                req.target,
                machine.attempt() + 1,
                machine.max_attempts()
            );

            let result = self.send_once(req, token.as_ref()).await;
            if matches!(&result, Err(err) if !err.is_retryable()) {
                return result;
            }
            let (outcome, retry_after) = match &result {
                Ok(response) => {
                    debug!("{} {} -> {}", req.method, req.target, response.status);
                    (
                        Outcome::from_status(response.status, req.authenticated),
                        response.retry_after(),
                    )
                }
                Err(err) => {
                    warn!("{} {} failed: {}", req.method, req.target, err);
                    (Outcome::Transport, None)
                }
            };

            match machine.advance(outcome, retry_after).clone() {
                RetryState::Succeeded => return result,
                RetryState::Retrying {
                    attempt,
                    delay,
                    refresh_credential,
                } => {
                    if refresh_credential {
                        if let Some(rejected) = token.as_ref() {
                            token = Some(self.tokens.refresh_rejected(rejected).await?);
                        }
                    } else {
                        warn!(
                            "{} {} retrying in {:?} (attempt {}/{})",
                            req.method,
                            req.target,
                            delay,
                            attempt + 1,
                            machine.max_attempts()
                        );
                    }
                    if !delay.is_zero() {
                        sleep(delay).await;
                    }
                    machine.begin_attempt();
                }
                RetryState::Rejected | RetryState::Exhausted => {
                    return match result {
                        Ok(response) if req.raise_on_error => Err(response.into_error()),
                        other => other,
                    };
                }
                RetryState::Attempting { .. } => unreachable!("advance never stays in Attempting"),
            }
        }
    }

    /// Issue exactly one HTTP attempt.
    async fn send_once(&self, req: &GraphRequest, token: Option<&Secret>) -> Result<GraphResponse> {
        let url = match &req.target {
            Target::Endpoint(path) => format!("{}{}", self.base_url, path),
            Target::Url(url) => url.clone(),
        };

        let mut builder = self
            .http
            .request(req.method.clone(), &url)
            .timeout(req.timeout.unwrap_or(self.default_timeout))
            .headers(self.build_headers(req, token)?);

        if !req.query.is_empty() {
            builder = builder.query(&req.query);
        }
        if let Some(json) = &req.json {
            builder = builder.json(json);
        }
        if let Some(body) = &req.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("{} {}: {}", req.method, req.target, e)))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            Error::Transport(format!("Failed to read response body: {}", e))
        })?;

        Ok(GraphResponse {
            status,
            headers,
            body,
        })
    }

    fn build_headers(&self, req: &GraphRequest, token: Option<&Secret>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                .map_err(|_| Error::Authentication("Access token is not a valid header".to_string()))?;
            value.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, value);
        }

        for (name, value) in &req.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::InvalidInput(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::InvalidInput(format!("Invalid header value: {}", e)))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }
}
