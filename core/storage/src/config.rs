//! Pipeline configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use drivelink_common::{Error, Result, Secret};

use crate::graph::retry::RetryConfig;

/// Default Graph API base URL.
pub const DEFAULT_GRAPH_BASE: &str = "https://graph.microsoft.com/v1.0";
/// Default identity authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
/// Default client-credentials scope.
pub const DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Payloads below this size go up in a single request.
pub const DEFAULT_SMALL_UPLOAD_THRESHOLD: u64 = 4 * 1024 * 1024;
/// Chunk size for resumable upload sessions.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Configuration for the drive upload pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Entra tenant ID.
    pub tenant_id: String,
    /// Application (client) ID.
    pub client_id: String,
    /// Application secret.
    pub client_secret: Secret,
    /// Scope requested in the token exchange.
    pub scope: String,
    /// Target drive (document library) ID.
    pub drive_id: String,
    /// Folder under the drive root that holds all customer folders.
    pub root_path: String,
    /// Graph API base URL.
    pub graph_base: String,
    /// Identity authority base URL.
    pub authority: String,
    /// Payloads strictly smaller than this use a single PUT.
    pub small_upload_threshold: u64,
    /// Bytes per upload session chunk.
    pub chunk_size: usize,
    /// Timeout for metadata calls and the token exchange.
    pub request_timeout: Duration,
    /// Timeout for content transfers (small PUTs and chunk PUTs).
    pub upload_timeout: Duration,
    /// Credentials expiring within this margin are refreshed.
    pub token_skew: Duration,
    /// Files uploaded concurrently within one batch.
    pub upload_concurrency: usize,
    /// Retry behavior for every outbound request.
    pub retry: RetryConfig,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: Secret::default(),
            scope: DEFAULT_SCOPE.to_string(),
            drive_id: String::new(),
            root_path: String::new(),
            graph_base: DEFAULT_GRAPH_BASE.to_string(),
            authority: DEFAULT_AUTHORITY.to_string(),
            small_upload_threshold: DEFAULT_SMALL_UPLOAD_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            request_timeout: Duration::from_millis(6000),
            upload_timeout: Duration::from_millis(60_000),
            token_skew: Duration::from_secs(60),
            upload_concurrency: 1,
            retry: RetryConfig::default(),
        }
    }
}

impl GraphConfig {
    /// Load configuration from process environment variables.
    ///
    /// # Errors
    /// - Any required variable is missing (all missing names are reported)
    /// - A numeric variable does not parse
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let required = [
            "ENTRA_TENANT_ID",
            "ENTRA_CLIENT_ID",
            "ENTRA_CLIENT_SECRET",
            "GRAPH_DRIVE_ID",
            "GRAPH_ROOT_PATH",
        ];
        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|key| {
                get(key)
                    .filter(|v| !v.trim_matches('/').is_empty())
                    .is_none()
            })
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "Missing required env vars: {}",
                missing.join(", ")
            )));
        }

        let mut config = Self {
            tenant_id: get("ENTRA_TENANT_ID").unwrap_or_default(),
            client_id: get("ENTRA_CLIENT_ID").unwrap_or_default(),
            client_secret: Secret::new(get("ENTRA_CLIENT_SECRET").unwrap_or_default()),
            drive_id: get("GRAPH_DRIVE_ID").unwrap_or_default(),
            root_path: get("GRAPH_ROOT_PATH")
                .unwrap_or_default()
                .trim_matches('/')
                .to_string(),
            ..Self::default()
        };

        if let Some(scope) = get("GRAPH_SCOPE") {
            config.scope = scope;
        }
        if let Some(base) = get("GRAPH_BASE") {
            config.graph_base = base.trim_end_matches('/').to_string();
        }
        if let Some(authority) = get("ENTRA_AUTHORITY") {
            config.authority = authority.trim_end_matches('/').to_string();
        }
        if let Some(v) = get("GRAPH_SMALL_UPLOAD_THRESHOLD") {
            config.small_upload_threshold = parse_number("GRAPH_SMALL_UPLOAD_THRESHOLD", &v)?;
        }
        if let Some(v) = get("GRAPH_CHUNK_SIZE") {
            config.chunk_size = parse_number("GRAPH_CHUNK_SIZE", &v)?;
        }
        if let Some(v) = get("GRAPH_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(parse_number("GRAPH_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("GRAPH_UPLOAD_TIMEOUT_MS") {
            config.upload_timeout =
                Duration::from_millis(parse_number("GRAPH_UPLOAD_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = get("GRAPH_MAX_RETRIES") {
            config.retry.max_retries = parse_number("GRAPH_MAX_RETRIES", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check the tunables for values the pipeline cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be non-zero".to_string()));
        }
        if self.small_upload_threshold == 0 {
            return Err(Error::Config(
                "small_upload_threshold must be non-zero".to_string(),
            ));
        }
        if self.upload_concurrency == 0 {
            return Err(Error::Config(
                "upload_concurrency must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Token endpoint for the configured tenant.
    pub fn token_url(&self) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::Config(format!("{} is not a valid number: {:?}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn base_env() -> HashMap<String, String> {
        env(&[
            ("ENTRA_TENANT_ID", "tenant"),
            ("ENTRA_CLIENT_ID", "client"),
            ("ENTRA_CLIENT_SECRET", "secret"),
            ("GRAPH_DRIVE_ID", "drive"),
            ("GRAPH_ROOT_PATH", "/QC/Photos/"),
        ])
    }

    #[test]
    fn test_from_lookup_defaults() {
        let vars = base_env();
        let config = GraphConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        assert_eq!(config.root_path, "QC/Photos");
        assert_eq!(config.scope, DEFAULT_SCOPE);
        assert_eq!(config.graph_base, DEFAULT_GRAPH_BASE);
        assert_eq!(config.small_upload_threshold, 4 * 1024 * 1024);
        assert_eq!(config.chunk_size, 8 * 1024 * 1024);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(
            config.token_url(),
            "https://login.microsoftonline.com/tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_from_lookup_reports_all_missing() {
        let vars = env(&[("ENTRA_TENANT_ID", "tenant"), ("GRAPH_ROOT_PATH", "///")]);
        let err = GraphConfig::from_lookup(|k| vars.get(k).cloned()).unwrap_err();
        let message = err.to_string();

        assert!(message.contains("ENTRA_CLIENT_ID"));
        assert!(message.contains("ENTRA_CLIENT_SECRET"));
        assert!(message.contains("GRAPH_DRIVE_ID"));
        assert!(message.contains("GRAPH_ROOT_PATH"));
        assert!(!message.contains("ENTRA_TENANT_ID"));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let mut vars = base_env();
        vars.insert("GRAPH_CHUNK_SIZE".to_string(), "327680".to_string());
        vars.insert("GRAPH_MAX_RETRIES".to_string(), "5".to_string());
        vars.insert("GRAPH_TIMEOUT_MS".to_string(), "2500".to_string());
        vars.insert("GRAPH_BASE".to_string(), "http://localhost:9000/".to_string());

        let config = GraphConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert_eq!(config.chunk_size, 327_680);
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.request_timeout, Duration::from_millis(2500));
        assert_eq!(config.graph_base, "http://localhost:9000");
    }

    #[test]
    fn test_from_lookup_rejects_bad_numbers() {
        let mut vars = base_env();
        vars.insert("GRAPH_CHUNK_SIZE".to_string(), "eight".to_string());
        assert!(matches!(
            GraphConfig::from_lookup(|k| vars.get(k).cloned()),
            Err(Error::Config(_))
        ));

        vars.insert("GRAPH_CHUNK_SIZE".to_string(), "0".to_string());
        assert!(matches!(
            GraphConfig::from_lookup(|k| vars.get(k).cloned()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_config_debug_hides_secret() {
        let vars = base_env();
        let config = GraphConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();
        assert!(!format!("{:?}", config).contains("\"secret\""));
    }
}
