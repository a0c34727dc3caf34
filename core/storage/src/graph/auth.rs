//! Client-credentials authentication and token caching for Microsoft Graph.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use drivelink_common::{Error, Result, Secret};

use crate::config::GraphConfig;
use crate::graph::models::error_detail;

/// Lifetime assumed when the token response omits `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3600;

/// Cached bearer credential.
#[derive(Debug, Clone)]
pub struct Credential {
    access_token: Secret,
    expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(access_token: Secret, expires_at: DateTime<Utc>) -> Self {
        Self {
            access_token,
            expires_at,
        }
    }

    /// Check whether the credential is still good for at least `skew`.
    pub fn is_usable(&self, skew: Duration) -> bool {
        let skew = chrono::Duration::from_std(skew).unwrap_or_else(|_| chrono::Duration::zero());
        Utc::now() < self.expires_at - skew
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Acquires and caches the application's bearer token.
///
/// The cached credential is the only state shared between concurrent
/// requests. It is replaced wholesale under the write lock, so concurrent
/// callers that find it stale wait for the first refresh and reuse it.
pub struct TokenManager {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: Secret,
    scope: String,
    timeout: Duration,
    skew: Duration,
    credential: RwLock<Option<Arc<Credential>>>,
}

impl TokenManager {
    /// Create a token manager; no network call happens until the first
    /// [`get_token`](Self::get_token).
    pub fn new(http: Client, config: &GraphConfig) -> Self {
        Self {
            http,
            token_url: config.token_url(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            scope: config.scope.clone(),
            timeout: config.request_timeout,
            skew: config.token_skew,
            credential: RwLock::new(None),
        }
    }

    /// Get a usable access token.
    ///
    /// With `force` unset, a cached credential with more than the skew left
    /// is returned without any network call. Otherwise a new credential is
    /// exchanged and replaces the cached one.
    ///
    /// # Errors
    /// - Token endpoint unreachable or returned a non-success status
    pub async fn get_token(&self, force: bool) -> Result<Secret> {
        if !force {
            let credential = self.credential.read().await;
            if let Some(cred) = credential.as_ref().filter(|c| c.is_usable(self.skew)) {
                return Ok(cred.access_token.clone());
            }
        }

        let mut credential = self.credential.write().await;

        // Double-check after acquiring write lock
        if !force {
            if let Some(cred) = credential.as_ref().filter(|c| c.is_usable(self.skew)) {
                return Ok(cred.access_token.clone());
            }
        }

        let fresh = Arc::new(self.exchange().await?);
        let token = fresh.access_token.clone();
        *credential = Some(fresh);
        Ok(token)
    }

    /// Force a refresh after `rejected` was answered with 401.
    ///
    /// If another caller already replaced the rejected token while this one
    /// waited for the lock, the newer token is reused.
    pub async fn refresh_rejected(&self, rejected: &Secret) -> Result<Secret> {
        let mut credential = self.credential.write().await;

        if let Some(cred) = credential
            .as_ref()
            .filter(|c| &c.access_token != rejected && c.is_usable(self.skew))
        {
            debug!("Rejected token already replaced; reusing current credential");
            return Ok(cred.access_token.clone());
        }

        info!("Access token rejected, forcing refresh");
        let fresh = Arc::new(self.exchange().await?);
        let token = fresh.access_token.clone();
        *credential = Some(fresh);
        Ok(token)
    }

    /// Drop the cached credential.
    pub async fn invalidate(&self) {
        *self.credential.write().await = None;
    }

    /// Expiry of the cached credential, if any.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.credential.read().await.as_ref().map(|c| c.expires_at())
    }

    async fn exchange(&self) -> Result<Credential> {
        info!("Requesting access token from {}", self.token_url);

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose()),
            ("scope", self.scope.as_str()),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Authentication(format!("Token request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Authentication(format!("Failed to read token response: {}", e)))?;

        if !status.is_success() {
            return Err(Error::Authentication(format!(
                "Token endpoint returned {}: {}",
                status.as_u16(),
                error_detail(&body)
            )));
        }

        let parsed: TokenResponse = serde_json::from_slice(&body)
            .map_err(|e| Error::Authentication(format!("Invalid token response: {}", e)))?;

        let expires_in = parsed.expires_in.unwrap_or(DEFAULT_EXPIRES_IN);
        let expires_at = Utc::now() + chrono::Duration::seconds(expires_in as i64);

        debug!("Access token acquired, expires at {}", expires_at);

        Ok(Credential::new(Secret::new(parsed.access_token), expires_at))
    }
}
