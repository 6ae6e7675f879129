//! filestream CLI - copy one file through a chunk stream with atomic commit.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use filestream_transfer::{Transfer, TransferError, calculate_file_checksum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::CliConfig;

#[derive(Parser)]
#[command(name = "filestream")]
#[command(about = "Stream a file into a destination that appears atomically")]
#[command(version)]
struct Cli {
    /// File to read
    source: PathBuf,

    /// Path to create; must not exist yet
    destination: PathBuf,

    /// Path to TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Maximum bytes per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Directory for the staging file
    #[arg(long)]
    scratch_dir: Option<PathBuf>,

    /// Re-hash the destination after commit
    #[arg(long)]
    verify: bool,

    /// Log progress while transferring
    #[arg(long)]
    progress: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match CliConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with_target(false)
        .init();

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if matches!(e.downcast_ref::<TransferError>(), Some(TransferError::Cancelled)) {
                warn!("transfer cancelled");
                return ExitCode::from(130);
            }
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: CliConfig) -> anyhow::Result<()> {
    let chunk_size = cli.chunk_size.unwrap_or(config.chunk_size);
    let scratch_dir = cli.scratch_dir.or(config.scratch_dir);
    let verify = cli.verify || config.verify;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("received Ctrl-C, cancelling transfer");
            token.cancel();
        }
    });

    let mut transfer = Transfer::new(&cli.source, &cli.destination)
        .chunk_size(chunk_size)
        .cancel_token(cancel);
    if let Some(dir) = scratch_dir {
        transfer = transfer.scratch_dir(dir);
    }

    let reporter = if cli.progress {
        let (tx, mut rx) = mpsc::channel(16);
        transfer = transfer.progress(tx);
        Some(tokio::spawn(async move {
            while let Some(p) = rx.recv().await {
                info!(
                    bytes = p.bytes,
                    chunks = p.chunks,
                    bytes_per_second = p.bytes_per_second as u64,
                    "progress"
                );
            }
        }))
    } else {
        None
    };

    let result = transfer.run().await;
    if let Some(reporter) = reporter {
        let _ = reporter.await;
    }
    let report = result?;

    info!(
        destination = %report.destination.display(),
        bytes = report.bytes,
        chunks = report.chunks,
        sha256 = %report.sha256,
        "transfer complete"
    );

    if verify {
        let path = report.destination.clone();
        let actual = tokio::task::spawn_blocking(move || calculate_file_checksum(&path)).await??;
        if actual != report.sha256 {
            anyhow::bail!(
                "checksum mismatch for {}: expected {}, got {actual}",
                report.destination.display(),
                report.sha256
            );
        }
        info!("checksum verified");
    }

    Ok(())
}
