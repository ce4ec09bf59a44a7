//! Command-line front end: exports every partition and writes the reports.

mod progress;

use clap::Parser;
use falcon_image_export::{
    ClientCredentials, Config, CsvOutcome, Error, ExportSink, Exporter, PartitionKey, Result,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use progress::Progress;

/// Export CrowdStrike Falcon container image vulnerability assessments
#[derive(Parser, Debug)]
#[command(
    name = "falcon-image-export",
    version,
    about = "Export container image vulnerability assessments from the CrowdStrike Falcon API",
    long_about = "Exports the expanded image vulnerability assessment one image-digest \
                  partition at a time and writes raw JSON, a JSON report and a CSV report.\n\n\
                  Credentials are read from FALCON_CLIENT_ID / FALCON_CLIENT_SECRET \
                  (a .env file in the working directory is honoured)."
)]
struct Cli {
    /// API client id
    #[arg(long, env = "FALCON_CLIENT_ID", hide_env_values = true)]
    client_id: String,

    /// API client secret
    #[arg(long, env = "FALCON_CLIENT_SECRET", hide_env_values = true)]
    client_secret: String,

    /// Configuration file (JSON); missing keys use defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// API base URL, overriding the configuration file
    #[arg(long, env = "FALCON_BASE_URL", value_name = "URL")]
    base_url: Option<String>,

    /// Output directory, overriding the configuration file
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Comma-separated image-digest prefixes (default: 0-9, a-f)
    #[arg(long, value_delimiter = ',', value_name = "KEYS")]
    partitions: Vec<PartitionKey>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("✗ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Log filter used when `RUST_LOG` is unset. Without `--verbose` the crate's
/// own records stay off: run events already reach the terminal as status lines.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "falcon_image_export=debug,info"
    } else {
        "falcon_image_export=off,warn"
    }
}

fn init_tracing(verbose: bool) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(verbose).into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let partitions = if cli.partitions.is_empty() {
        PartitionKey::hex_digits()
    } else {
        cli.partitions
    };
    let sink = ExportSink::new(config.output.clone());

    let exporter = Exporter::new(
        config,
        ClientCredentials::new(cli.client_id, cli.client_secret),
    )?;

    let progress = Progress::new();
    let printer = tokio::spawn(progress.clone().follow(exporter.subscribe()));

    let result = exporter.run(&partitions).await;

    // Closing the last sender ends the printer once it has drained the channel
    drop(exporter);
    printer.await.ok();
    progress.finish();

    let run = result?;
    if run.total_records() == 0 {
        println!("No results found");
        return Ok(());
    }

    let summary = sink.persist(&run)?;
    println!(
        "✓ Saved {} records to {}",
        summary.records,
        summary.raw_json.display()
    );
    println!("✓ Saved report to {}", summary.report_json.display());
    match (&summary.csv, &summary.report_csv) {
        (CsvOutcome::Written { rows }, Some(path)) => {
            println!("✓ Saved {} rows to {}", rows, path.display());
        }
        (CsvOutcome::Skipped { reason }, _) => {
            println!("⚠ CSV report not written: {reason}");
        }
        (CsvOutcome::Written { .. }, None) => {}
    }

    let failed = run.failed_partitions();
    if !failed.is_empty() {
        let keys: Vec<&str> = failed.iter().map(PartitionKey::as_str).collect();
        println!("⚠ Partitions without results: {}", keys.join(", "));
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => Config::default(),
    };

    if let Some(base_url) = &cli.base_url {
        config.api.base_url = base_url.clone();
    }
    if let Some(dir) = &cli.output_dir {
        config.output.dir = dir.clone();
    }

    Ok(config)
}

fn read_config(path: &Path) -> Result<Config> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::Config {
        message: format!("cannot read {}: {}", path.display(), e),
        key: None,
    })?;
    serde_json::from_str(&text).map_err(|e| Error::Config {
        message: format!("cannot parse {}: {}", path.display(), e),
        key: None,
    })
}
