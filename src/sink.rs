//! Output files for a finished run
//!
//! Three files land in [`OutputConfig::dir`]:
//! - the raw record array,
//! - the report (record array plus metadata envelope),
//! - a CSV table, when the records are flat enough to form one.

use crate::config::OutputConfig;
use crate::error::Result;
use crate::types::{ExportRecord, ExportReport, ExportRun};
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What [`ExportSink::write_csv`] did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CsvOutcome {
    /// File written with this many data rows
    Written {
        /// Data rows (header excluded)
        rows: usize,
    },
    /// Records cannot be laid out as a table; no file was written and any
    /// CSV report left by an earlier run was removed
    Skipped {
        /// Human-readable explanation
        reason: String,
    },
}

/// Files produced by [`ExportSink::persist`]
#[derive(Clone, Debug)]
pub struct PersistSummary {
    /// Records written
    pub records: usize,
    /// Raw record array
    pub raw_json: PathBuf,
    /// Report with metadata envelope
    pub report_json: PathBuf,
    /// CSV report, `None` when `csv` is `Skipped`
    pub report_csv: Option<PathBuf>,
    /// CSV result
    pub csv: CsvOutcome,
}

/// Writes run results to the configured output directory
#[derive(Clone, Debug)]
pub struct ExportSink {
    config: OutputConfig,
}

impl ExportSink {
    /// Sink writing into `config.dir`
    pub fn new(config: OutputConfig) -> Self {
        Self { config }
    }

    /// Full path of an output file
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.config.dir.join(file_name)
    }

    /// Write the records as a pretty-printed JSON array
    pub fn write_raw(&self, records: &[ExportRecord]) -> Result<PathBuf> {
        let path = self.path(&self.config.raw_json);
        write_json(&path, &records)?;
        info!(path = %path.display(), records = records.len(), "raw export written");
        Ok(path)
    }

    /// Write the report envelope as pretty-printed JSON
    pub fn write_report(&self, report: &ExportReport<'_>) -> Result<PathBuf> {
        let path = self.path(&self.config.report_json);
        write_json(&path, report)?;
        info!(
            path = %path.display(),
            records = report.meta.total_records,
            "report written"
        );
        Ok(path)
    }

    /// Write the records as CSV
    ///
    /// The header is the first record's keys in order. Every record must be an
    /// object with exactly those keys; otherwise nothing is written, a CSV
    /// report from an earlier run is removed and the reason is returned as
    /// [`CsvOutcome::Skipped`].
    pub fn write_csv(&self, records: &[ExportRecord]) -> Result<CsvOutcome> {
        let path = self.path(&self.config.report_csv);
        let header = match csv_header(records) {
            Ok(header) => header,
            Err(reason) => {
                remove_stale(&path)?;
                warn!(reason = %reason, "CSV report skipped");
                return Ok(CsvOutcome::Skipped { reason });
            }
        };

        ensure_parent(&path)?;
        let mut writer = csv::Writer::from_path(&path)?;
        writer.write_record(&header)?;
        for record in records {
            // csv_header guarantees every record is an object with these keys
            let row = header
                .iter()
                .map(|key| record.value().get(key).map(cell).unwrap_or_default());
            writer.write_record(row)?;
        }
        writer.flush()?;

        info!(path = %path.display(), rows = records.len(), "CSV report written");
        Ok(CsvOutcome::Written {
            rows: records.len(),
        })
    }

    /// Write all three outputs for `run`
    pub fn persist(&self, run: &ExportRun) -> Result<PersistSummary> {
        std::fs::create_dir_all(&self.config.dir)?;
        debug!(dir = %self.config.dir.display(), "persisting export run");

        let raw_json = self.write_raw(run.records())?;
        let report_json = self.write_report(&run.report())?;
        let csv = self.write_csv(run.records())?;
        let report_csv = match csv {
            CsvOutcome::Written { .. } => Some(self.path(&self.config.report_csv)),
            CsvOutcome::Skipped { .. } => None,
        };

        Ok(PersistSummary {
            records: run.total_records(),
            raw_json,
            report_json,
            report_csv,
            csv,
        })
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn remove_stale(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed CSV report from an earlier run");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Column names for `records`, or why they do not form a table
fn csv_header(records: &[ExportRecord]) -> std::result::Result<Vec<String>, String> {
    let first = records
        .first()
        .ok_or_else(|| "no records".to_string())?
        .as_object()
        .ok_or_else(|| "records are not JSON objects".to_string())?;
    let header: Vec<String> = first.keys().cloned().collect();

    for (index, record) in records.iter().enumerate().skip(1) {
        let Some(fields) = record.as_object() else {
            return Err(format!("record {index} is not a JSON object"));
        };
        if fields.len() != header.len() || !header.iter().all(|key| fields.contains_key(key)) {
            return Err(format!(
                "record {index} has different fields than the first record"
            ));
        }
    }

    Ok(header)
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        // Numbers and booleans as JSON literals, nested values as compact JSON
        other => other.to_string(),
    }
}
