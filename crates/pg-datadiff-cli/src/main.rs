//! pg-datadiff CLI - compare the data of two PostgreSQL databases.

use clap::Parser;
use pg_datadiff::{Config, DiffError, DiffReport, DiffSession, Status, TargetKind, TargetReport};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, Level};

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

/// Exit code when at least one table or sequence differs.
const EXIT_MISMATCH: u8 = 1;

#[derive(Parser)]
#[command(name = "pg-datadiff")]
#[command(about = "Compare the data of two PostgreSQL databases")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Connection URL of the first (reference) database
    #[arg(long, value_name = "URL")]
    firstdb: Option<String>,

    /// Connection URL of the second database
    #[arg(long, value_name = "URL")]
    seconddb: Option<String>,

    /// Schema to compare [default: public]
    #[arg(long)]
    schema: Option<String>,

    /// Schema on the second database, if different
    #[arg(long)]
    second_schema: Option<String>,

    /// Rows hashed per window [default: 10000]
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Only compare table data
    #[arg(long, conflicts_with = "only_sequences")]
    only_data: bool,

    /// Only compare sequences
    #[arg(long)]
    only_sequences: bool,

    /// Only compare row counts
    #[arg(long)]
    count_only: bool,

    /// Compare row counts and the maximum of the sequence-backed key
    #[arg(long)]
    count_with_max: bool,

    /// Comma separated list of tables to compare
    #[arg(long, value_delimiter = ',')]
    include_tables: Vec<String>,

    /// Comma separated list of tables to skip
    #[arg(long, value_delimiter = ',')]
    exclude_tables: Vec<String>,

    /// Tables compared concurrently [default: 1]
    #[arg(long)]
    workers: Option<usize>,

    /// SSL mode for both databases: disable, require, verify-ca, verify-full
    #[arg(long)]
    ssl_mode: Option<String>,

    /// Stop after this many seconds, keeping the verdicts reached so far
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Output JSON report to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,
}

impl Cli {
    /// Load the config file (if any) and apply command-line overrides.
    fn config(&self) -> Result<Config, DiffError> {
        let mut config = match &self.config {
            Some(path) => {
                let config = Config::read(path)?;
                info!("Loaded configuration from {:?}", path);
                config
            }
            None => Config::default(),
        };

        if let Some(url) = &self.firstdb {
            config.first.url = url.clone();
        }
        if let Some(url) = &self.seconddb {
            config.second.url = url.clone();
        }
        if let Some(mode) = &self.ssl_mode {
            config.first.ssl_mode = mode.clone();
            config.second.ssl_mode = mode.clone();
        }

        let diff = &mut config.diff;
        if let Some(schema) = &self.schema {
            diff.schema = schema.clone();
        }
        if let Some(schema) = &self.second_schema {
            diff.second_schema = Some(schema.clone());
        }
        if let Some(size) = self.chunk_size {
            diff.chunk_size = size;
        }
        if let Some(w) = self.workers {
            diff.workers = w;
        }
        if !self.include_tables.is_empty() {
            diff.include_tables = self.include_tables.clone();
        }
        if !self.exclude_tables.is_empty() {
            diff.exclude_tables = self.exclude_tables.clone();
        }
        diff.only_data |= self.only_data;
        diff.only_sequences |= self.only_sequences;
        diff.count_only |= self.count_only;
        diff.count_with_max |= self.count_with_max;

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<u8, DiffError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let config = cli.config()?;
    let cancel_token = setup_signal_handler()?;
    if let Some(secs) = cli.timeout {
        spawn_timeout(Duration::from_secs(secs), cancel_token.clone());
    }

    let session = DiffSession::connect(&config).await?;

    // Verdicts are printed as they arrive unless the report goes to stdout
    // as JSON.
    let printer = if cli.output_json {
        None
    } else {
        let (tx, rx) = mpsc::channel(64);
        Some((tx, tokio::spawn(print_progress(rx))))
    };

    let session = match &printer {
        Some((tx, _)) => session.with_progress(tx.clone()),
        None => session,
    };
    let report = session.run(cancel_token).await;
    drop(session);

    if let Some((tx, handle)) = printer {
        drop(tx);
        let _ = handle.await;
    }
    let report = report?;

    if cli.output_json {
        println!("{}", report.to_json()?);
    } else {
        print_summary(&report);
    }

    // Partial results are printed above; the exit code comes from the error.
    if report.cancelled {
        return Err(DiffError::Cancelled);
    }
    Ok(if report.is_success() { 0 } else { EXIT_MISMATCH })
}

async fn print_progress(mut rx: mpsc::Receiver<TargetReport>) {
    let mut last_kind = None;
    while let Some(entry) = rx.recv().await {
        if last_kind != Some(entry.kind) {
            match entry.kind {
                TargetKind::Table => println!("Tables:"),
                TargetKind::Sequence => println!("Sequences:"),
            }
            last_kind = Some(entry.kind);
        }
        let symbol = match entry.verdict.status {
            Status::Match => "✓",
            Status::Inconclusive => "!",
            Status::Mismatch => "✗",
        };
        println!("  {} {} - {}", symbol, entry.name, entry.verdict.reason);
    }
}

fn print_summary(report: &DiffReport) {
    let status = if report.cancelled {
        "Diff cancelled!"
    } else if report.is_success() {
        "Diff completed: no differences found"
    } else {
        "Diff completed: differences found"
    };
    println!("\n{}", status);
    println!("  Run ID: {}", report.run_id);
    println!("  Duration: {:.2}s", report.duration_ms as f64 / 1000.0);
    println!("  Tables: {}", report.tables.len());
    println!("  Sequences: {}", report.sequences.len());
    println!("  Matched: {}", report.matches());
    println!("  Inconclusive: {}", report.inconclusive());
    println!("  Mismatched: {}", report.failures());

    let failed: Vec<&str> = report
        .entries()
        .filter(|e| e.verdict.is_mismatch())
        .map(|e| e.name.as_str())
        .collect();
    if !failed.is_empty() {
        println!("  Failed: {:?}", failed);
    }
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Logs go to stderr so stdout carries only the report.
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn spawn_timeout(timeout: Duration, token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                eprintln!("\nTimeout of {}s reached. Stopping...", timeout.as_secs());
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
fn setup_signal_handler() -> Result<CancellationToken, DiffError> {
    let cancel_token = CancellationToken::new();

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        let name = tokio::select! {
            _ = sigint.recv() => "SIGINT",
            _ = sigterm.recv() => "SIGTERM",
        };
        eprintln!("\nReceived {}. Stopping...", name);
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
fn setup_signal_handler() -> Result<CancellationToken, DiffError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Stopping...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
