//! Core types for falcon-image-export

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::Error;

/// Characters that would let a key escape the `image_digest:*'<key>*'` filter
const FORBIDDEN_KEY_CHARS: &[char] = &['\'', '*', '+'];

/// One slice of the export, used as an image-digest prefix
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Create a partition key, rejecting values that cannot be embedded in the query
    pub fn new(key: impl Into<String>) -> Result<Self, Error> {
        let key = key.into();
        if key.is_empty() {
            return Err(Error::InvalidPartition("partition key is empty".to_string()));
        }
        if let Some(c) = key
            .chars()
            .find(|c| FORBIDDEN_KEY_CHARS.contains(c) || c.is_whitespace())
        {
            return Err(Error::InvalidPartition(format!(
                "partition key '{key}' contains forbidden character {c:?}"
            )));
        }
        Ok(Self(key))
    }

    /// The 16 lowercase hex digits, in order
    pub fn hex_digits() -> Vec<PartitionKey> {
        "0123456789abcdef"
            .chars()
            .map(|c| PartitionKey(c.to_string()))
            .collect()
    }

    /// Key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = Error;

    fn try_from(key: String) -> Result<Self, Self::Error> {
        Self::new(key)
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.0
    }
}

impl std::str::FromStr for PartitionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Identifier of a server-side export job
///
/// Opaque: only ever echoed back to the platform, never parsed.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Wrap an id returned by the platform
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Export job status as reported by the status endpoint
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Accepted, not started
    Pending,
    /// Materializing results
    Running,
    /// Results ready for download
    Done,
    /// Terminal failure on the platform side
    Failed,
    /// Missing or unrecognised status
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// One assessed-image vulnerability entry, kept as the platform sent it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportRecord(pub Value);

impl ExportRecord {
    /// Underlying JSON value
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Field map, when the record is a JSON object
    pub fn as_object(&self) -> Option<&serde_json::Map<String, Value>> {
        self.0.as_object()
    }
}

/// Split a downloaded export payload into records
///
/// - array: one record per element
/// - object with a `resources` array (the platform envelope): one record per element
/// - any other object or scalar: the whole value is one record
/// - `null`: no records
pub fn records_from_payload(payload: Value) -> Vec<ExportRecord> {
    match payload {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(ExportRecord).collect(),
        Value::Object(mut map) => match map.remove("resources") {
            Some(Value::Array(items)) => items.into_iter().map(ExportRecord).collect(),
            Some(other) => {
                map.insert("resources".to_string(), other);
                vec![ExportRecord(Value::Object(map))]
            }
            None => vec![ExportRecord(Value::Object(map))],
        },
        other => vec![ExportRecord(other)],
    }
}

/// Why a credential is being renewed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshReason {
    /// Held token reached its (margin-adjusted) expiry
    Expired,
    /// Platform answered 401 to a request carrying the token
    Rejected,
}

/// Event emitted during an export run
///
/// Every state transition of the run produces one, so a subscriber can render a
/// complete progress log without polling.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Token request sent
    Authenticating,

    /// Token granted
    Authenticated {
        /// Seconds until the recorded (margin-adjusted) expiry
        valid_for_secs: u64,
    },

    /// Token request failed
    AuthFailed {
        /// Error message
        error: String,
    },

    /// Token renewal started
    TokenRefreshing {
        /// What triggered the renewal
        reason: RefreshReason,
    },

    /// A partition is being processed
    PartitionStarted {
        /// Partition key
        partition: PartitionKey,
        /// 1-based position in the run
        index: usize,
        /// Number of partitions in the run
        total: usize,
    },

    /// Export job created
    JobSubmitted {
        /// Partition key
        partition: PartitionKey,
        /// Job id returned by the platform
        job_id: JobId,
    },

    /// Export job creation failed
    SubmissionFailed {
        /// Partition key
        partition: PartitionKey,
        /// Error message
        error: String,
    },

    /// The in-progress quota was hit; the same partition will be resubmitted
    QuotaExceeded {
        /// Partition key
        partition: PartitionKey,
        /// Wait before resubmitting, in milliseconds
        delay_ms: u64,
    },

    /// Job not complete yet
    WaitingForJob {
        /// Job id
        job_id: JobId,
        /// Last observed status, when the status check succeeded
        status: Option<JobStatus>,
        /// 1-based attempt number
        attempt: u32,
        /// Attempt budget
        max_attempts: u32,
    },

    /// Status check failed (counted as not complete)
    StatusCheckFailed {
        /// Job id
        job_id: JobId,
        /// Error message
        error: String,
    },

    /// Download request sent
    Downloading {
        /// Job id
        job_id: JobId,
        /// 1-based attempt number
        attempt: u32,
    },

    /// Download answered with an unexpected status; will retry
    DownloadRetry {
        /// Job id
        job_id: JobId,
        /// HTTP status code
        status: u16,
        /// 1-based attempt number
        attempt: u32,
        /// Attempt budget
        max_attempts: u32,
    },

    /// Download failed for good
    DownloadFailed {
        /// Job id
        job_id: JobId,
        /// Error message
        error: String,
    },

    /// Download finished
    DownloadComplete {
        /// Job id
        job_id: JobId,
        /// Records in the payload
        records: usize,
    },

    /// Partition attempt failed; the partition will be resubmitted
    PartitionRetrying {
        /// Partition key
        partition: PartitionKey,
        /// Error message
        error: String,
        /// Attempt that failed (1-based)
        attempt: u32,
        /// Attempt budget
        max_attempts: u32,
        /// Wait before resubmitting, in milliseconds
        delay_ms: u64,
    },

    /// Partition merged into the result
    PartitionCompleted {
        /// Partition key
        partition: PartitionKey,
        /// Records contributed by this partition
        records: usize,
        /// Records accumulated so far
        total_records: usize,
    },

    /// Partition given up; contributes nothing
    PartitionAbandoned {
        /// Partition key
        partition: PartitionKey,
        /// Error message
        error: String,
    },

    /// Pause before the next partition
    PartitionPause {
        /// Wait, in milliseconds
        delay_ms: u64,
    },

    /// All partitions processed
    RunComplete {
        /// Records in the result
        total_records: usize,
        /// Partitions that contributed nothing because they were abandoned
        failed_partitions: Vec<PartitionKey>,
    },
}

pub(crate) fn millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// How a partition ended
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PartitionOutcome {
    /// Downloaded and merged
    Completed {
        /// Job whose result was merged
        job_id: JobId,
        /// Records contributed
        records: usize,
    },
    /// Given up after a non-retryable failure or an exhausted budget
    Abandoned {
        /// Last error message
        reason: String,
    },
}

/// Per-partition summary of a run
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PartitionReport {
    /// Partition key
    pub partition: PartitionKey,
    /// How it ended
    #[serde(flatten)]
    pub outcome: PartitionOutcome,
}

/// Result of [`Exporter::run`](crate::Exporter::run)
///
/// `records` only grows when a partition completes, so its length is always the
/// sum of the completed partitions' contributions.
#[derive(Clone, Debug, Default)]
pub struct ExportRun {
    records: Vec<ExportRecord>,
    partitions: Vec<PartitionReport>,
}

impl ExportRun {
    /// Accumulated records, in partition order
    pub fn records(&self) -> &[ExportRecord] {
        &self.records
    }

    /// Consume the run, keeping only the records
    pub fn into_records(self) -> Vec<ExportRecord> {
        self.records
    }

    /// One report per processed partition, in order
    pub fn partitions(&self) -> &[PartitionReport] {
        &self.partitions
    }

    /// Number of accumulated records
    pub fn total_records(&self) -> usize {
        self.records.len()
    }

    /// Partitions that were abandoned
    pub fn failed_partitions(&self) -> Vec<PartitionKey> {
        self.partitions
            .iter()
            .filter(|p| matches!(p.outcome, PartitionOutcome::Abandoned { .. }))
            .map(|p| p.partition.clone())
            .collect()
    }

    /// Build the report envelope stamped with the current time
    pub fn report(&self) -> ExportReport<'_> {
        self.report_at(Utc::now())
    }

    /// Build the report envelope stamped with `generated_at`
    pub fn report_at(&self, generated_at: DateTime<Utc>) -> ExportReport<'_> {
        ExportReport {
            meta: ReportMeta {
                total_records: self.records.len(),
                generated_at: generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                partitions_processed: self
                    .partitions
                    .iter()
                    .map(|p| p.partition.clone())
                    .collect(),
                partitions_failed: self.failed_partitions(),
            },
            resources: &self.records,
        }
    }

    pub(crate) fn complete(
        &mut self,
        partition: PartitionKey,
        job_id: JobId,
        records: Vec<ExportRecord>,
    ) -> usize {
        let contributed = records.len();
        self.records.extend(records);
        self.partitions.push(PartitionReport {
            partition,
            outcome: PartitionOutcome::Completed {
                job_id,
                records: contributed,
            },
        });
        contributed
    }

    pub(crate) fn abandon(&mut self, partition: PartitionKey, reason: String) {
        self.partitions.push(PartitionReport {
            partition,
            outcome: PartitionOutcome::Abandoned { reason },
        });
    }
}

/// Metadata envelope written alongside the records
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportMeta {
    /// Number of records in `resources`
    pub total_records: usize,
    /// Generation time, `%Y-%m-%d %H:%M:%S UTC`
    pub generated_at: String,
    /// Every partition of the run, in order
    pub partitions_processed: Vec<PartitionKey>,
    /// Partitions that contributed nothing because they were abandoned
    pub partitions_failed: Vec<PartitionKey>,
}

/// Report handed to the export sink
#[derive(Clone, Debug, Serialize)]
pub struct ExportReport<'a> {
    /// Metadata envelope
    pub meta: ReportMeta,
    /// Accumulated records
    pub resources: &'a [ExportRecord],
}
