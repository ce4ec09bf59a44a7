//! Terminal rendering of run events.

use falcon_image_export::{Event, RefreshReason};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::broadcast::Receiver;
use tokio::sync::broadcast::error::RecvError;

/// How an event is shown
#[derive(Debug, PartialEq, Eq)]
enum Line {
    /// Replaces the spinner message
    Status(String),
    /// Printed above the spinner
    Print(String),
}

/// Spinner plus status log on the terminal
#[derive(Clone)]
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(Duration::from_millis(100));
        Self { bar }
    }

    /// Render events until every sender is gone
    pub async fn follow(self, mut events: Receiver<Event>) {
        loop {
            match events.recv().await {
                Ok(event) => self.show(&event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress display fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn show(&self, event: &Event) {
        match render(event) {
            Some(Line::Status(message)) => self.bar.set_message(message),
            Some(Line::Print(message)) => self.bar.suspend(|| println!("{message}")),
            None => {}
        }
    }
}

fn render(event: &Event) -> Option<Line> {
    let line = match event {
        Event::Authenticating => Line::Status("Authenticating...".to_string()),
        Event::Authenticated { valid_for_secs } => {
            Line::Print(format!("✓ Authenticated (token valid for {valid_for_secs}s)"))
        }
        Event::AuthFailed { error } => Line::Print(format!("✗ Authentication failed: {error}")),
        Event::TokenRefreshing { reason } => {
            let why = match reason {
                RefreshReason::Expired => "expired",
                RefreshReason::Rejected => "rejected",
            };
            Line::Print(format!("⚠ Token {why}, refreshing"))
        }
        Event::PartitionStarted {
            partition,
            index,
            total,
        } => Line::Print(format!(
            "Processing partition {index}/{total}: image digests starting with '{partition}'"
        )),
        Event::JobSubmitted { job_id, .. } => Line::Print(format!("✓ Export job {job_id} created")),
        Event::SubmissionFailed { partition, error } => Line::Print(format!(
            "✗ Export job for '{partition}' not created: {error}"
        )),
        Event::QuotaExceeded {
            partition,
            delay_ms,
        } => Line::Print(format!(
            "⚠ Export quota reached, resubmitting '{partition}' in {}",
            seconds(*delay_ms)
        )),
        Event::WaitingForJob {
            job_id,
            status,
            attempt,
            max_attempts,
        } => {
            let status = status.map_or_else(|| "status unavailable".to_string(), |s| s.to_string());
            Line::Status(format!(
                "Waiting for job {job_id} ({status}), attempt {attempt}/{max_attempts}"
            ))
        }
        Event::StatusCheckFailed { .. } => return None,
        Event::Downloading { job_id, .. } => Line::Status(format!("Downloading {job_id}...")),
        Event::DownloadRetry {
            status,
            attempt,
            max_attempts,
            ..
        } => Line::Print(format!(
            "⚠ Download returned HTTP {status}, retrying ({attempt}/{max_attempts})"
        )),
        Event::DownloadFailed { job_id, error } => {
            Line::Print(format!("✗ Download of {job_id} failed: {error}"))
        }
        Event::DownloadComplete { records, .. } => {
            Line::Print(format!("✓ Downloaded {records} records"))
        }
        Event::PartitionRetrying {
            partition,
            attempt,
            max_attempts,
            delay_ms,
            ..
        } => Line::Print(format!(
            "⚠ Retrying '{partition}' ({}/{max_attempts}) in {}",
            attempt + 1,
            seconds(*delay_ms)
        )),
        Event::PartitionCompleted {
            partition,
            records,
            total_records,
        } => Line::Print(format!(
            "✓ Partition '{partition}': {records} records ({total_records} total)"
        )),
        Event::PartitionAbandoned { partition, error } => {
            Line::Print(format!("✗ Partition '{partition}' abandoned: {error}"))
        }
        Event::PartitionPause { delay_ms } => {
            Line::Status(format!("Next partition in {}", seconds(*delay_ms)))
        }
        Event::RunComplete {
            total_records,
            failed_partitions,
        } => {
            if failed_partitions.is_empty() {
                Line::Print(format!("✓ Export finished: {total_records} records"))
            } else {
                Line::Print(format!(
                    "⚠ Export finished: {total_records} records, {} partition(s) failed",
                    failed_partitions.len()
                ))
            }
        }
    };
    Some(line)
}

fn seconds(delay_ms: u64) -> String {
    if delay_ms % 1000 == 0 {
        format!("{}s", delay_ms / 1000)
    } else {
        format!("{:.1}s", delay_ms as f64 / 1000.0)
    }
}
