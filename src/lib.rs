//! # falcon-image-export
//!
//! Client for the CrowdStrike Falcon container-security export API: pulls the
//! expanded image vulnerability assessment for every image and writes it to disk.
//!
//! ## How a run works
//!
//! The platform allows one export job in flight per account and times out large
//! jobs, so the image set is split into partitions by image-digest prefix (the 16
//! hex digits by default) and exported one partition at a time:
//!
//! 1. authenticate (OAuth2 client credentials)
//! 2. for each partition: create a job, wait for it, download its result
//! 3. merge everything into one [`ExportRun`] and hand it to an [`ExportSink`]
//!
//! Failures below the initial authentication never abort the run; a partition
//! that cannot be exported is recorded as abandoned and contributes nothing.
//!
//! ## Quick Start
//!
//! ```no_run
//! use falcon_image_export::{ClientCredentials, Config, ExportSink, Exporter, PartitionKey};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let credentials = ClientCredentials::new("client-id", "client-secret");
//!     let config = Config::default();
//!     let output = config.output.clone();
//!
//!     let exporter = Exporter::new(config, credentials)?;
//!
//!     // Subscribe to events
//!     let mut events = exporter.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let run = exporter.run(&PartitionKey::hex_digits()).await?;
//!     if run.total_records() > 0 {
//!         ExportSink::new(output).persist(&run)?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// OAuth2 bearer credential handling
pub mod auth;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Export job submission, polling, download and the partition loop
pub mod exporter;
/// Fixed-budget retry for partition attempts
pub mod retry;
/// Output files
pub mod sink;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use auth::{Credential, CredentialManager};
pub use config::{ClientCredentials, Config};
pub use error::{
    AuthError, DownloadError, Error, PartitionError, PollError, Result, SubmissionError,
};
pub use exporter::Exporter;
pub use sink::{CsvOutcome, ExportSink, PersistSummary};
pub use types::{
    Event, ExportRecord, ExportReport, ExportRun, JobId, JobStatus, PartitionKey,
    PartitionOutcome, PartitionReport, RefreshReason, ReportMeta,
};
