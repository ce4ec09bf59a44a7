//! Job status lookups.

use super::Exporter;
use crate::error::PollError;
use crate::types::{JobId, JobStatus};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    resources: Option<Vec<StatusEntry>>,
}

#[derive(Debug, Deserialize)]
struct StatusEntry {
    #[serde(default)]
    status: Option<JobStatus>,
}

impl Exporter {
    /// Current status of an export job
    ///
    /// A response without a job record reads as [`JobStatus::Unknown`], the same as
    /// an unrecognised status value.
    pub async fn job_status(&self, job_id: &JobId) -> Result<JobStatus, PollError> {
        let request = self
            .authorize(
                self.http
                    .get(self.endpoints.exports.clone())
                    .query(&[("ids", job_id.as_str())]),
            )
            .await
            .map_err(PollError::Auth)?;

        let response = request
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::RequestFailed {
                status: status.as_u16(),
            });
        }

        let body: StatusResponse = response
            .json()
            .await
            .map_err(|e| PollError::InvalidResponse(e.to_string()))?;

        let job_status = body
            .resources
            .and_then(|entries| entries.into_iter().next())
            .and_then(|entry| entry.status)
            .unwrap_or(JobStatus::Unknown);

        debug!(job_id = %job_id, status = %job_status, "export job status");
        Ok(job_status)
    }

    /// Whether the job's result can be downloaded
    ///
    /// True only for [`JobStatus::Done`]; every other status, including a missing
    /// record, is `false`.
    pub async fn is_complete(&self, job_id: &JobId) -> Result<bool, PollError> {
        Ok(self.job_status(job_id).await? == JobStatus::Done)
    }
}
