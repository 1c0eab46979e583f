//! fssync-send - serve a directory to a sync peer over stdin/stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fssync::config::SenderConfig;
use fssync::server::serve_stdio;

#[derive(Debug, Parser)]
#[command(name = "fssync-send", version, about = "Serve a directory snapshot to a sync peer on stdio")]
struct Cli {
    /// Directory to serve
    root: PathBuf,

    /// TOML file with sender settings
    #[arg(short, long, env = "FSSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Concurrent file transfers (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Bytes per DATA packet (overrides config)
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn sender_config(&self) -> Result<SenderConfig> {
        let mut config = match &self.config {
            Some(path) => SenderConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => SenderConfig::default(),
        };
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunk_size = chunk_size;
        }
        config.validate().context("Invalid sender settings")?;
        Ok(config)
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    // stdout carries the packet stream
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.sender_config()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling session");
            on_signal.cancel();
        }
    });

    let stats = serve_stdio(&cli.root, config, cancel)
        .await
        .context("Sync session failed")?;
    tracing::debug!(?stats, "done");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}
