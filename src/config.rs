//! Client configuration.
//!
//! Settings come from an optional `docflow.{yaml,toml,json}` file in the
//! working directory, overlaid with `DOCFLOW__*` environment variables
//! (double underscore separates nesting, e.g. `DOCFLOW__RETRY__MAX_RETRIES`).
//! Durations are milliseconds.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! base_url: "https://docs.example.com/api"
//! request_timeout: 30000
//!
//! retry:
//!   max_retries: 3
//!   base_delay: 500
//!   max_delay: 10000
//!   jitter: false
//!
//! poll:
//!   interval: 2000
//!   max_attempts: 150
//!
//! upload:
//!   max_batch_files: 20
//!   max_filename_len: 255
//!
//! routes:
//!   batch_status: "/documents/batch-status/{id}"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::batch::PollConfig;
use crate::resilience::RetryConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error("invalid base url '{url}': {reason}")]
    BaseUrl { url: String, reason: String },

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Root of the remote API; route paths are appended to it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bound for a single request attempt.
    #[serde(default = "default_request_timeout", with = "crate::serde_millis")]
    pub request_timeout: Duration,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub poll: PollConfig,

    #[serde(default)]
    pub upload: UploadConfig,

    #[serde(default)]
    pub routes: ApiRoutes,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// `tracing` filter directive used by the binary.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format.
    #[serde(default)]
    pub log_json: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
            upload: UploadConfig::default(),
            routes: ApiRoutes::default(),
            user_agent: default_user_agent(),
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl ClientConfig {
    /// Load `docflow.*` from the working directory (if present) plus
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::build(config::File::with_name("docflow").required(false))
    }

    /// Load a specific file plus environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        Self::build(config::File::from(path.as_ref()).required(true))
    }

    /// Parse a YAML document (no environment overlay).
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: ClientConfig = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn build<S>(file: S) -> Result<Self, ConfigLoadError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: ClientConfig = config::Config::builder()
            .add_source(file)
            .add_source(config::Environment::with_prefix("DOCFLOW").separator("__"))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        self.parsed_base_url()?;

        if self.request_timeout.is_zero() {
            return Err(ConfigLoadError::Validation(
                "request_timeout must be > 0".to_string(),
            ));
        }
        if self.poll.interval.is_zero() {
            return Err(ConfigLoadError::Validation(
                "poll.interval must be > 0".to_string(),
            ));
        }
        if self.poll.max_attempts == 0 {
            return Err(ConfigLoadError::Validation(
                "poll.max_attempts must be >= 1".to_string(),
            ));
        }
        self.upload.validate()?;
        self.routes.validate()?;

        Ok(())
    }

    /// The base URL, checked to be absolute http(s).
    pub fn parsed_base_url(&self) -> Result<Url, ConfigLoadError> {
        let url = Url::parse(&self.base_url).map_err(|e| ConfigLoadError::BaseUrl {
            url: self.base_url.clone(),
            reason: e.to_string(),
        })?;

        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(ConfigLoadError::BaseUrl {
                url: self.base_url.clone(),
                reason: format!("unsupported scheme '{other}'"),
            }),
        }
    }
}

/// Client-side limits on uploads and filename edits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Most files accepted in one batch.
    pub max_batch_files: usize,
    /// Longest editable filename, in characters.
    pub max_filename_len: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_batch_files: 20,
            max_filename_len: 255,
        }
    }
}

impl UploadConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.max_batch_files == 0 {
            return Err(ConfigLoadError::Validation(
                "upload.max_batch_files must be >= 1".to_string(),
            ));
        }
        if self.max_filename_len == 0 {
            return Err(ConfigLoadError::Validation(
                "upload.max_filename_len must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Paths of the remote endpoints, relative to `base_url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiRoutes {
    pub batch_analyze: String,
    /// Must contain `{id}`, replaced with the batch identifier.
    pub batch_status: String,
    pub confirm_upload: String,
    pub session: String,
    pub refresh: String,
    pub logout: String,
}

impl Default for ApiRoutes {
    fn default() -> Self {
        Self {
            batch_analyze: "/documents/batch-analyze".into(),
            batch_status: "/documents/batch-status/{id}".into(),
            confirm_upload: "/documents/confirm-upload".into(),
            session: "/auth/me".into(),
            refresh: "/auth/refresh".into(),
            logout: "/auth/logout".into(),
        }
    }
}

impl ApiRoutes {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if !self.batch_status.contains("{id}") {
            return Err(ConfigLoadError::Validation(
                "routes.batch_status must contain an {id} placeholder".to_string(),
            ));
        }
        Ok(())
    }

    /// Status route for one batch.
    pub fn batch_status_for(&self, batch_id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(batch_id.as_bytes()).collect();
        self.batch_status.replace("{id}", &encoded)
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_user_agent() -> String {
    concat!("docflow/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_log_level() -> String {
    "docflow=info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        config.validate().unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.poll.max_attempts, 150);
        assert_eq!(config.upload.max_batch_files, 20);
        assert!(config.user_agent.starts_with("docflow/"));
    }

    #[test]
    fn yaml_overrides_nested_fields_and_keeps_defaults() {
        let yaml = r#"
base_url: "https://docs.example.com/api"
request_timeout: 5000
retry:
  max_retries: 5
poll:
  interval: 500
upload:
  max_filename_len: 80
"#;
        let config = ClientConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.base_url, "https://docs.example.com/api");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.max_retries, 5);
        assert_eq!(config.retry.base_delay, RetryConfig::default().base_delay);
        assert_eq!(config.poll.interval, Duration::from_millis(500));
        assert_eq!(config.poll.max_attempts, 150);
        assert_eq!(config.upload.max_filename_len, 80);
        assert_eq!(config.upload.max_batch_files, 20);
        assert_eq!(config.routes, ApiRoutes::default());
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = ClientConfig::from_yaml("base_url: \"ftp://files.example.com\"").unwrap_err();
        assert!(matches!(err, ConfigLoadError::BaseUrl { .. }));

        let err = ClientConfig::from_yaml("base_url: \"not a url\"").unwrap_err();
        assert!(matches!(err, ConfigLoadError::BaseUrl { .. }));
    }

    #[test]
    fn rejects_zero_limits() {
        let err = ClientConfig::from_yaml("poll:\n  max_attempts: 0\n").unwrap_err();
        assert!(matches!(err, ConfigLoadError::Validation(_)));

        let err = ClientConfig::from_yaml("upload:\n  max_batch_files: 0\n").unwrap_err();
        assert!(matches!(err, ConfigLoadError::Validation(_)));

        let err = ClientConfig::from_yaml("request_timeout: 0\n").unwrap_err();
        assert!(matches!(err, ConfigLoadError::Validation(_)));
    }

    #[test]
    fn status_route_needs_placeholder() {
        let err = ClientConfig::from_yaml("routes:\n  batch_status: \"/status\"\n").unwrap_err();
        assert!(err.to_string().contains("{id}"));
    }

    #[test]
    fn batch_status_route_substitutes_id() {
        let routes = ApiRoutes::default();
        assert_eq!(
            routes.batch_status_for("6f1c-22"),
            "/documents/batch-status/6f1c-22"
        );
        assert_eq!(
            routes.batch_status_for("a/b"),
            "/documents/batch-status/a%2Fb"
        );
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "base_url: \"https://files.example.org\"").unwrap();
        writeln!(file, "log_json: true").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.base_url, "https://files.example.org");
        assert!(config.log_json);
    }

    #[test]
    fn config_serde_roundtrip() {
        let config = ClientConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ClientConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
