//! Error types for falcon-image-export
//!
//! The taxonomy follows the stages of one export cycle:
//! - [`AuthError`] - token endpoint failures
//! - [`SubmissionError`] - export job creation failures (including the in-progress quota)
//! - [`PollError`] - job status lookups (never surfaced past the fetch loop)
//! - [`DownloadError`] - result download failures
//! - [`PartitionError`] - the union of the two that can end a partition attempt
//!
//! Only [`Error`] reaches the caller of [`Exporter::run`](crate::Exporter::run);
//! everything else is folded into per-partition reports.

use thiserror::Error;

/// Result type alias for falcon-image-export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Text the platform puts in the payload when an account already has an export in flight.
///
/// Observed message: `Quota of 1 job(s) in-progress reached`. Matched case-insensitively
/// so the quota size in the message does not matter.
pub const QUOTA_EXCEEDED_MARKER: &str = "job(s) in-progress reached";

/// Main error type for falcon-image-export
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "api.base_url")
        key: Option<String>,
    },

    /// Authentication failed (fatal when raised by the initial authentication)
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Partition key cannot be embedded in the export query
    #[error("invalid partition key: {0}")]
    InvalidPartition(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV writer error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Token endpoint failures
#[derive(Clone, Debug, Error)]
pub enum AuthError {
    /// The token endpoint answered with a non-success status
    #[error("token request rejected with HTTP {status}")]
    Rejected {
        /// HTTP status code returned by the token endpoint
        status: u16,
        /// Response body, kept for diagnostics
        body: String,
    },

    /// The token request never completed
    #[error("token request failed: {0}")]
    Transport(String),

    /// The token endpoint answered 2xx with a body we could not use
    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

/// Export job creation failures
#[derive(Clone, Debug, Error)]
pub enum SubmissionError {
    /// HTTP success but no job id (empty `resources` or a non-empty `errors` list)
    #[error("no job id received")]
    NoJobId {
        /// Raw response body
        payload: String,
    },

    /// Non-success HTTP status
    #[error("export job request failed with HTTP {status}")]
    RequestFailed {
        /// HTTP status code
        status: u16,
        /// Raw response body
        payload: String,
    },

    /// The request never completed
    #[error("export job request failed: {0}")]
    Transport(String),

    /// No valid credential could be obtained before sending
    #[error("export job request not sent: {0}")]
    Auth(AuthError),
}

impl SubmissionError {
    /// Whether the failure payload reports the in-progress export quota.
    ///
    /// This is the only submission failure the orchestrator retries on the same
    /// partition. Detection is a substring match on [`QUOTA_EXCEEDED_MARKER`]; other
    /// rate-limit wordings are not recognised.
    pub fn is_quota_exceeded(&self) -> bool {
        match self {
            SubmissionError::NoJobId { payload }
            | SubmissionError::RequestFailed { payload, .. } => payload
                .to_ascii_lowercase()
                .contains(QUOTA_EXCEEDED_MARKER),
            SubmissionError::Transport(_) | SubmissionError::Auth(_) => false,
        }
    }
}

/// Job status lookup failures
///
/// The fetch loop treats every variant as "not complete yet".
#[derive(Clone, Debug, Error)]
pub enum PollError {
    /// Non-success HTTP status
    #[error("status request failed with HTTP {status}")]
    RequestFailed {
        /// HTTP status code
        status: u16,
    },

    /// The request never completed
    #[error("status request failed: {0}")]
    Transport(String),

    /// No valid credential could be obtained before sending
    #[error("status request not sent: {0}")]
    Auth(AuthError),

    /// The status body could not be decoded
    #[error("invalid status response: {0}")]
    InvalidResponse(String),
}

/// Result download failures
#[derive(Clone, Debug, Error)]
pub enum DownloadError {
    /// The credential was rejected and could not be renewed
    #[error("credential expired during download: {0}")]
    AuthExpired(String),

    /// The download request never completed
    #[error("download request failed: {0}")]
    Transport(String),

    /// The download answered 200 with a body that is not JSON
    #[error("invalid export payload: {0}")]
    InvalidPayload(String),

    /// The poll/download loop ran out of attempts
    #[error("export not downloaded after {attempts} attempts")]
    AttemptsExhausted {
        /// Number of attempts consumed
        attempts: u32,
    },
}

/// Anything that ends one partition attempt
#[derive(Clone, Debug, Error)]
pub enum PartitionError {
    /// The export job could not be created
    #[error(transparent)]
    Submission(#[from] SubmissionError),

    /// The export job's result could not be retrieved
    #[error(transparent)]
    Download(#[from] DownloadError),
}

impl PartitionError {
    /// Whether the partition failed because of the in-progress quota
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, PartitionError::Submission(e) if e.is_quota_exceeded())
    }
}
