//! Hubvault command-line tool.
//!
//! # Usage
//!
//! ```bash
//! # Ingest events until Ctrl+C
//! hubvault read --config ./prod.conf.json
//!
//! # Write every stored record to dump files
//! hubvault export2file --config ./prod.conf.json
//!
//! # Send the files waiting in the outbound folder
//! hubvault write
//! ```
//!
//! Without `--config`, `default.conf.json` next to the executable is used.
//!
//! # Graceful Shutdown
//!
//! SIGINT (Ctrl+C) and SIGTERM stop every operation:
//! 1. Abandons a pending hub connection
//! 2. Stops accepting deliveries, exporting records, or starting new sends
//! 3. Closes the store (flush, optional compaction)
//! 4. Exits cleanly; undelivered events are redelivered on the next run

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hubvault_core::metrics::{init_metrics, start_metrics_server};
use hubvault_ingest::app::{self, ReadEnd};
use hubvault_ingest::config::{self, Config, DEFAULT_CONFIG_FILE, Operation};
use hubvault_ingest::source::{self, ConnectionString, EventHub};
use hubvault_ingest::{Shutdown, Store};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;

/// Event hub ingestion, export, and resend tool.
#[derive(Parser, Debug)]
#[command(name = "hubvault")]
#[command(about = "Ingest, deduplicate, export, and resend event hub messages")]
#[command(version)]
struct Args {
    /// Configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Read events from the hub into the store until interrupted
    Read,
    /// Export stored records to dump files
    #[command(name = "export2file")]
    Export2File,
    /// Send files from the outbound folder to the hub
    Write,
}

impl Command {
    fn operation(self) -> Operation {
        match self {
            Self::Read => Operation::Read,
            Self::Export2File => Operation::Export,
            Self::Write => Operation::Write,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Usage problems are not failures
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
    };
    let op = args.command.operation();

    let loaded = load_config(args.config, op);
    let verbose = loaded.as_ref().is_ok_and(|c| c.store.verbose);
    init_tracing(verbose);

    println!("hubvault v{}", env!("CARGO_PKG_VERSION"));
    let started = Instant::now();

    let code = match loaded {
        Ok(config) => match run(config, op).await {
            Ok(code) => code,
            Err(e) => report_fatal(&e),
        },
        Err(e) => report_fatal(&e),
    };

    tracing::info!("All done! (elapsed time: {:?})", started.elapsed());
    code
}

fn init_tracing(verbose: bool) {
    let mut filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if verbose && let Ok(directive) = "hubvault_ingest=debug".parse::<Directive>() {
        filter = filter.add_directive(directive);
    }
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn report_fatal(e: &anyhow::Error) -> ExitCode {
    tracing::error!("[ERROR] {}. Details: {}", e, e.root_cause());
    ExitCode::FAILURE
}

fn load_config(path: Option<PathBuf>, op: Operation) -> Result<Config> {
    let app_dir = config::app_dir().context("Failed to locate the application directory")?;
    let path = path.unwrap_or_else(|| app_dir.join(DEFAULT_CONFIG_FILE));
    Config::load(&path, op, &app_dir).context("Config file validation failed")
}

async fn run(config: Config, op: Operation) -> Result<ExitCode> {
    tracing::info!("Running '{}' for {} ({})", op, config.entity_path, config.env);
    config
        .prepare_dirs(op)
        .context("Failed to prepare working directories")?;

    if config.metrics_port > 0 {
        let handle = init_metrics().context("Failed to install metrics recorder")?;
        start_metrics_server(config.metrics_port, handle)
            .await
            .context("Failed to start metrics server")?;
    }

    let shutdown = Shutdown::new();
    shutdown
        .install_ctrlc()
        .context("Failed to set Ctrl+C handler")?;

    match op {
        Operation::Read => {
            let Some(hub) = connect_hub(&config, &shutdown).await? else {
                return Ok(ExitCode::SUCCESS);
            };
            let store = Store::new(config.store.clone());
            let summary = app::run_read(&config, &store, hub, &shutdown)
                .await
                .context("Failed to read events")?;
            if summary.end == ReadEnd::StoreClosed {
                tracing::info!("Store closed. Read operation cancelled");
            }
            Ok(ExitCode::SUCCESS)
        }
        Operation::Export => {
            let store = Store::new(config.store.clone());
            let stats = app::run_export(&config, &store, &shutdown)
                .await
                .context("Failed to export records")?;
            if stats.interrupted {
                tracing::info!("Export interrupted");
            }
            tracing::info!(
                "Exported {} records ({} written, {} already on disk)",
                stats.visited,
                stats.written,
                stats.skipped
            );
            Ok(ExitCode::SUCCESS)
        }
        Operation::Write => {
            let Some(hub) = connect_hub(&config, &shutdown).await? else {
                return Ok(ExitCode::SUCCESS);
            };
            let report = app::run_write(&config, hub, &shutdown)
                .await
                .context("Failed to send outbound files")?;
            if report.is_success() {
                Ok(ExitCode::SUCCESS)
            } else {
                tracing::error!(
                    "[ERROR] {} of {} files failed to send",
                    report.failed.len(),
                    report.failed.len() + report.sent.len()
                );
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

/// Connect to the hub, or `None` if shutdown is requested first.
async fn connect_hub(config: &Config, shutdown: &Shutdown) -> Result<Option<Arc<dyn EventHub>>> {
    let conn = ConnectionString::parse(&config.connection_string, &config.entity_path)
        .context("Invalid connection string")?;
    tracing::debug!("Connecting with {:?}", conn);
    let hub = source::connect_until_shutdown(&conn, shutdown)
        .await
        .context("Failed to connect to the event hub")?;
    if hub.is_none() {
        tracing::info!("Shutdown requested while connecting. Nothing to do");
    }
    Ok(hub)
}
