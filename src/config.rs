//! Configuration types for falcon-image-export

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// API client identifier and secret
///
/// How these are loaded is up to the caller; the library only hands them to the
/// token endpoint. The secret never appears in `Debug` output.
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientCredentials {
    /// OAuth2 client id
    pub client_id: String,
    /// OAuth2 client secret
    pub client_secret: String,
}

impl ClientCredentials {
    /// Create a credential pair
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Remote API connection settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the Falcon API (default: "https://api.crowdstrike.com")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout applied to every HTTP request (default: 60 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,

    /// User-Agent header sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout: default_request_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

/// Bearer credential lifetime handling
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Subtracted from the granted lifetime so tokens are renewed early (default: 60 seconds)
    #[serde(default = "default_safety_margin", with = "duration_serde")]
    pub safety_margin: Duration,

    /// Lifetime assumed when the token response omits `expires_in` (default: 1800 seconds)
    #[serde(default = "default_token_lifetime", with = "duration_serde")]
    pub default_lifetime: Duration,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            safety_margin: default_safety_margin(),
            default_lifetime: default_token_lifetime(),
        }
    }
}

/// Export query template
///
/// The partition key is the only substitution; everything else is fixed per run.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Export file format requested from the platform (default: "json")
    #[serde(default = "default_format")]
    pub format: String,

    /// Export resource name
    #[serde(default = "default_resource")]
    pub resource: String,

    /// Lower bound on `first_seen`; the default is effectively unconditional
    #[serde(default = "default_first_seen_since")]
    pub first_seen_since: String,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            resource: default_resource(),
            first_seen_since: default_first_seen_since(),
        }
    }
}

/// Poll/download loop bounds for a single export job
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Attempts before the download is given up (default: 20)
    #[serde(default = "default_poll_attempts")]
    pub max_attempts: u32,

    /// Wait after a status check that is not yet complete (default: 30 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Wait after a download that returned an unexpected status (default: 15 seconds)
    #[serde(default = "default_download_retry_interval", with = "duration_serde")]
    pub retry_interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_poll_attempts(),
            poll_interval: default_poll_interval(),
            retry_interval: default_download_retry_interval(),
        }
    }
}

/// Per-partition retry policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per partition, shared by quota retries and failed cycles (default: 3)
    #[serde(default = "default_partition_attempts")]
    pub max_attempts: u32,

    /// Wait between job creation and the first status check (default: 15 seconds)
    #[serde(default = "default_settle_delay", with = "duration_serde")]
    pub settle_delay: Duration,

    /// Wait before resubmitting after a failed cycle (default: 60 seconds)
    #[serde(default = "default_retry_delay", with = "duration_serde")]
    pub retry_delay: Duration,

    /// Wait before resubmitting after the in-progress quota was hit (default: 60 seconds)
    #[serde(default = "default_quota_backoff", with = "duration_serde")]
    pub quota_backoff: Duration,

    /// Pause between two partitions (default: 5 seconds)
    #[serde(default = "default_partition_pause", with = "duration_serde")]
    pub partition_pause: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_partition_attempts(),
            settle_delay: default_settle_delay(),
            retry_delay: default_retry_delay(),
            quota_backoff: default_quota_backoff(),
            partition_pause: default_partition_pause(),
        }
    }
}

/// Where the export sink writes its files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output directory (default: ".")
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Raw record array (default: "raw_export_data.json")
    #[serde(default = "default_raw_json")]
    pub raw_json: String,

    /// Report with metadata envelope (default: "combined_export_report.json")
    #[serde(default = "default_report_json")]
    pub report_json: String,

    /// Tabular report (default: "combined_export_report.csv")
    #[serde(default = "default_report_csv")]
    pub report_csv: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            raw_json: default_raw_json(),
            report_json: default_report_json(),
            report_csv: default_report_csv(),
        }
    }
}

/// Main configuration for [`Exporter`](crate::Exporter)
///
/// Every section has defaults matching the platform's observed limits, so
/// `Config::default()` works as-is against the production API.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Remote API connection
    #[serde(default)]
    pub api: ApiConfig,

    /// Credential lifetime handling
    #[serde(default)]
    pub auth: AuthConfig,

    /// Export query template
    #[serde(default)]
    pub query: QueryConfig,

    /// Poll/download loop bounds
    #[serde(default)]
    pub polling: PollingConfig,

    /// Per-partition retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Output files
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    /// Check the settings that would otherwise fail late
    pub fn validate(&self) -> Result<()> {
        self.base_url()?;

        if self.polling.max_attempts == 0 {
            return Err(Error::Config {
                message: "polling.max_attempts must be at least 1".to_string(),
                key: Some("polling.max_attempts".to_string()),
            });
        }

        if self.retry.max_attempts == 0 {
            return Err(Error::Config {
                message: "retry.max_attempts must be at least 1".to_string(),
                key: Some("retry.max_attempts".to_string()),
            });
        }

        Ok(())
    }

    /// Parsed API base URL
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api.base_url).map_err(|e| Error::Config {
            message: format!("invalid base URL '{}': {}", self.api.base_url, e),
            key: Some("api.base_url".to_string()),
        })
    }
}

fn default_base_url() -> String {
    "https://api.crowdstrike.com".to_string()
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_user_agent() -> String {
    concat!("falcon-image-export/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_safety_margin() -> Duration {
    Duration::from_secs(60)
}

fn default_token_lifetime() -> Duration {
    Duration::from_secs(1800)
}

fn default_format() -> String {
    "json".to_string()
}

fn default_resource() -> String {
    "images.images-assessment-vulnerabilities-expanded".to_string()
}

fn default_first_seen_since() -> String {
    "1970-01-01T00:00:05.000Z".to_string()
}

fn default_poll_attempts() -> u32 {
    20
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_download_retry_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_partition_attempts() -> u32 {
    3
}

fn default_settle_delay() -> Duration {
    Duration::from_secs(15)
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_quota_backoff() -> Duration {
    Duration::from_secs(60)
}

fn default_partition_pause() -> Duration {
    Duration::from_secs(5)
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_raw_json() -> String {
    "raw_export_data.json".to_string()
}

fn default_report_json() -> String {
    "combined_export_report.json".to_string()
}

fn default_report_csv() -> String {
    "combined_export_report.csv".to_string()
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
