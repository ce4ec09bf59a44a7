//! Bounded poll/download loop for a single export job.
//!
//! Each attempt first checks the job status. An incomplete job costs one attempt
//! and a `poll_interval` wait; a complete one is downloaded:
//!
//! | download answer          | effect                                                |
//! |--------------------------|-------------------------------------------------------|
//! | 200                      | records returned                                      |
//! | 401, first since refresh | credential renewed, same request reissued, no cost    |
//! | 401 right after renewal  | [`DownloadError::AuthExpired`]                        |
//! | any other status         | one attempt consumed, `retry_interval` wait           |
//! | transport failure        | [`DownloadError::Transport`]                          |

use super::{Exporter, pause};
use crate::error::DownloadError;
use crate::types::{Event, ExportRecord, JobId, JobStatus, records_from_payload};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

/// What one download request produced
#[derive(Debug)]
enum DownloadResponse {
    Complete(Vec<ExportRecord>),
    Unauthorized,
    Unexpected { status: u16, body: String },
}

impl Exporter {
    /// Wait for an export job to finish and download its result
    ///
    /// Meant to be called once the job has been submitted; the status is
    /// re-checked before every download attempt.
    pub async fn download(&self, job_id: &JobId) -> Result<Vec<ExportRecord>, DownloadError> {
        let result = self.download_loop(job_id).await;
        match &result {
            Ok(records) => {
                info!(job_id = %job_id, records = records.len(), "download complete");
                self.emit(Event::DownloadComplete {
                    job_id: job_id.clone(),
                    records: records.len(),
                });
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "download failed");
                self.emit(Event::DownloadFailed {
                    job_id: job_id.clone(),
                    error: e.to_string(),
                });
            }
        }
        result
    }

    async fn download_loop(&self, job_id: &JobId) -> Result<Vec<ExportRecord>, DownloadError> {
        let polling = &self.config.polling;
        let max_attempts = polling.max_attempts;
        let mut attempt = 0;

        while attempt < max_attempts {
            if !self.check_complete(job_id, attempt + 1).await {
                pause(polling.poll_interval).await;
                attempt += 1;
                continue;
            }

            // Set once a 401 has been answered with a renewal; a second 401 ends the loop
            let mut renewed = false;
            loop {
                self.emit(Event::Downloading {
                    job_id: job_id.clone(),
                    attempt: attempt + 1,
                });

                match self.request_download(job_id).await? {
                    DownloadResponse::Complete(records) => return Ok(records),
                    DownloadResponse::Unauthorized if renewed => {
                        return Err(DownloadError::AuthExpired(
                            "credential rejected again after renewal".to_string(),
                        ));
                    }
                    DownloadResponse::Unauthorized => {
                        self.credentials
                            .force_refresh()
                            .await
                            .map_err(|e| DownloadError::AuthExpired(e.to_string()))?;
                        renewed = true;
                    }
                    DownloadResponse::Unexpected { status, body } => {
                        warn!(
                            job_id = %job_id,
                            status,
                            attempt = attempt + 1,
                            max_attempts,
                            "unexpected download status, retrying"
                        );
                        debug!(body = %body, "download response body");
                        self.emit(Event::DownloadRetry {
                            job_id: job_id.clone(),
                            status,
                            attempt: attempt + 1,
                            max_attempts,
                        });
                        pause(polling.retry_interval).await;
                        attempt += 1;
                        break;
                    }
                }
            }
        }

        Err(DownloadError::AttemptsExhausted {
            attempts: max_attempts,
        })
    }

    /// Status check for the fetch loop; failures count as "not complete"
    async fn check_complete(&self, job_id: &JobId, attempt: u32) -> bool {
        let max_attempts = self.config.polling.max_attempts;
        match self.job_status(job_id).await {
            Ok(JobStatus::Done) => true,
            Ok(status) => {
                debug!(job_id = %job_id, status = %status, attempt, "export not ready");
                self.emit(Event::WaitingForJob {
                    job_id: job_id.clone(),
                    status: Some(status),
                    attempt,
                    max_attempts,
                });
                false
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "status check failed");
                self.emit(Event::StatusCheckFailed {
                    job_id: job_id.clone(),
                    error: e.to_string(),
                });
                self.emit(Event::WaitingForJob {
                    job_id: job_id.clone(),
                    status: None,
                    attempt,
                    max_attempts,
                });
                false
            }
        }
    }

    async fn request_download(&self, job_id: &JobId) -> Result<DownloadResponse, DownloadError> {
        let request = self
            .authorize(
                self.http
                    .get(self.endpoints.files.clone())
                    .query(&[("id", job_id.as_str())]),
            )
            .await
            .map_err(|e| DownloadError::AuthExpired(e.to_string()))?;

        let response = request
            .send()
            .await
            .map_err(|e| DownloadError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::OK => {
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| DownloadError::Transport(e.to_string()))?;
                let payload: serde_json::Value = serde_json::from_slice(&bytes)
                    .map_err(|e| DownloadError::InvalidPayload(e.to_string()))?;
                Ok(DownloadResponse::Complete(records_from_payload(payload)))
            }
            StatusCode::UNAUTHORIZED => Ok(DownloadResponse::Unauthorized),
            status => Ok(DownloadResponse::Unexpected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}
