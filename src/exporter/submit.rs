//! Export job creation.

use super::Exporter;
use crate::config::QueryConfig;
use crate::error::SubmissionError;
use crate::types::{Event, JobId, PartitionKey};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Body of the export creation request
#[derive(Debug, Serialize)]
pub(crate) struct ExportRequest<'a> {
    pub(crate) format: &'a str,
    pub(crate) fql: String,
    pub(crate) resource: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct ExportResponse {
    #[serde(default)]
    resources: Option<Vec<String>>,
    #[serde(default)]
    errors: Option<Vec<Value>>,
}

/// Build the filter for one partition
///
/// `first_seen` is bounded below by a fixed instant near the epoch so the filter
/// is effectively just the digest prefix.
pub(crate) fn partition_filter(query: &QueryConfig, partition: &PartitionKey) -> String {
    format!(
        "first_seen:>'{}'+image_digest:*'{}*'",
        query.first_seen_since, partition
    )
}

/// Classify a 2xx creation response body
fn job_id_from_body(body: &str) -> Result<JobId, SubmissionError> {
    let parsed: ExportResponse = serde_json::from_str(body).unwrap_or_default();

    let has_errors = parsed.errors.as_ref().is_some_and(|e| !e.is_empty());
    match parsed.resources.and_then(|ids| ids.into_iter().next()) {
        Some(id) if !has_errors && !id.is_empty() => Ok(JobId::new(id)),
        _ => Err(SubmissionError::NoJobId {
            payload: body.to_string(),
        }),
    }
}

impl Exporter {
    /// Create an export job for one partition
    ///
    /// Returns the first job id of a successful response. A successful status
    /// without an id, or with an error list, is [`SubmissionError::NoJobId`]; use
    /// [`SubmissionError::is_quota_exceeded`] to tell the in-progress quota apart.
    pub async fn submit(&self, partition: &PartitionKey) -> Result<JobId, SubmissionError> {
        let result = self.create_export(partition).await;

        match &result {
            Ok(job_id) => {
                info!(partition = %partition, job_id = %job_id, "export job created");
                self.emit(Event::JobSubmitted {
                    partition: partition.clone(),
                    job_id: job_id.clone(),
                });
            }
            Err(e) => {
                warn!(partition = %partition, error = %e, "export job not created");
                self.emit(Event::SubmissionFailed {
                    partition: partition.clone(),
                    error: e.to_string(),
                });
            }
        }

        result
    }

    async fn create_export(&self, partition: &PartitionKey) -> Result<JobId, SubmissionError> {
        let query = &self.config.query;
        let body = ExportRequest {
            format: &query.format,
            fql: partition_filter(query, partition),
            resource: &query.resource,
        };
        debug!(partition = %partition, fql = %body.fql, "submitting export job");

        let request = self
            .authorize(self.http.post(self.endpoints.exports.clone()).json(&body))
            .await
            .map_err(SubmissionError::Auth)?;

        let response = request
            .send()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        let status = response.status();
        let payload = response
            .text()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;
        debug!(status = status.as_u16(), payload = %payload, "export job response");

        if !status.is_success() {
            return Err(SubmissionError::RequestFailed {
                status: status.as_u16(),
                payload,
            });
        }

        job_id_from_body(&payload)
    }
}
