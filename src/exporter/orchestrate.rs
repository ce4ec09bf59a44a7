//! Partition loop: authenticate once, then submit/download each partition in turn.

use super::{Exporter, pause};
use crate::error::{PartitionError, Result};
use crate::retry::with_fixed_delay;
use crate::types::{Event, ExportRecord, ExportRun, JobId, PartitionKey, millis};
use std::collections::HashSet;
use tracing::{error, info, warn};

impl Exporter {
    /// Export every partition and merge the results
    ///
    /// The initial authentication is the only fatal step. After that each partition
    /// gets `retry.max_attempts` attempts; an in-progress quota failure waits
    /// `retry.quota_backoff` before resubmitting, a failed download waits
    /// `retry.retry_delay`, and any other submission failure abandons the partition.
    /// An abandoned partition contributes no records and the run moves on.
    ///
    /// At most one export job is in flight at any time. A key listed more than
    /// once is exported once, at its first position.
    pub async fn run(&self, partitions: &[PartitionKey]) -> Result<ExportRun> {
        let partitions = unique_partitions(partitions);
        self.credentials.authenticate().await?;

        let total = partitions.len();
        let mut run = ExportRun::default();
        info!(partitions = total, "starting export run");

        for (index, partition) in partitions.iter().enumerate() {
            self.emit(Event::PartitionStarted {
                partition: partition.clone(),
                index: index + 1,
                total,
            });
            info!(partition = %partition, index = index + 1, total, "processing partition");

            match self.process_partition(partition).await {
                Ok((job_id, records)) => {
                    let contributed = run.complete(partition.clone(), job_id, records);
                    info!(
                        partition = %partition,
                        records = contributed,
                        total_records = run.total_records(),
                        "partition completed"
                    );
                    self.emit(Event::PartitionCompleted {
                        partition: partition.clone(),
                        records: contributed,
                        total_records: run.total_records(),
                    });
                }
                Err(e) => {
                    error!(partition = %partition, error = %e, "partition abandoned");
                    run.abandon(partition.clone(), e.to_string());
                    self.emit(Event::PartitionAbandoned {
                        partition: partition.clone(),
                        error: e.to_string(),
                    });
                }
            }

            if index + 1 < total {
                let delay = self.config.retry.partition_pause;
                self.emit(Event::PartitionPause {
                    delay_ms: millis(delay),
                });
                pause(delay).await;
            }
        }

        let failed_partitions = run.failed_partitions();
        if !failed_partitions.is_empty() {
            warn!(failed = ?failed_partitions, "some partitions contributed no records");
        }
        info!(total_records = run.total_records(), "export run complete");
        self.emit(Event::RunComplete {
            total_records: run.total_records(),
            failed_partitions,
        });

        Ok(run)
    }

    /// Run one partition through the attempt budget
    async fn process_partition(
        &self,
        partition: &PartitionKey,
    ) -> std::result::Result<(JobId, Vec<ExportRecord>), PartitionError> {
        let this = self;
        let retry = &self.config.retry;

        with_fixed_delay(
            retry.max_attempts,
            move |_attempt| this.attempt_partition(partition),
            move |e: &PartitionError, attempt| {
                if e.is_quota_exceeded() {
                    this.emit(Event::QuotaExceeded {
                        partition: partition.clone(),
                        delay_ms: millis(retry.quota_backoff),
                    });
                    retry.quota_backoff
                } else {
                    this.emit(Event::PartitionRetrying {
                        partition: partition.clone(),
                        error: e.to_string(),
                        attempt,
                        max_attempts: retry.max_attempts,
                        delay_ms: millis(retry.retry_delay),
                    });
                    retry.retry_delay
                }
            },
        )
        .await
    }

    /// One submit + settle + download cycle
    async fn attempt_partition(
        &self,
        partition: &PartitionKey,
    ) -> std::result::Result<(JobId, Vec<ExportRecord>), PartitionError> {
        let job_id = self.submit(partition).await?;

        // Freshly created jobs are not visible to the status endpoint right away
        pause(self.config.retry.settle_delay).await;

        let records = self.download(&job_id).await?;
        Ok((job_id, records))
    }
}

/// `partitions` in order with repeated keys dropped
fn unique_partitions(partitions: &[PartitionKey]) -> Vec<PartitionKey> {
    let mut seen = HashSet::new();
    let mut unique = Vec::with_capacity(partitions.len());
    for partition in partitions {
        if seen.insert(partition) {
            unique.push(partition.clone());
        } else {
            warn!(partition = %partition, "duplicate partition ignored");
        }
    }
    unique
}
