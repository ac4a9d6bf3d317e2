//! tap-cost-explorer - Singer tap for AWS Cost Explorer cost and usage data.

use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cost_explorer::singer::{self, MessageWriter};
use cost_explorer::{Extractor, HttpCostExplorer, TapConfig, TapState};

/// Extract AWS Cost Explorer cost and usage records as Singer messages.
#[derive(Parser)]
#[command(name = "tap-cost-explorer")]
#[command(about = "Extract AWS Cost Explorer cost and usage records")]
#[command(version)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long, env = "TAP_COST_EXPLORER_CONFIG")]
    config: PathBuf,

    /// Path to a JSON state file from a previous run.
    #[arg(short, long, env = "TAP_COST_EXPLORER_STATE")]
    state: Option<PathBuf>,

    /// Print the catalog and exit.
    #[arg(long)]
    discover: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Log as JSON lines.
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("cost_explorer=debug,tap_cost_explorer=debug,info")
        } else {
            EnvFilter::new("info")
        }
    });

    // stdout carries Singer messages, so logs go to stderr.
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let config = TapConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))?;

    let stdout = std::io::stdout();
    let mut writer = MessageWriter::new(BufWriter::new(stdout.lock()));

    if cli.discover {
        writer.write_line(&singer::catalog())?;
        writer.into_inner()?.flush()?;
        return Ok(());
    }

    let mut state = match &cli.state {
        Some(path) => TapState::load(path)
            .with_context(|| format!("Failed to load state {}", path.display()))?,
        None => TapState::default(),
    };

    let client =
        HttpCostExplorer::from_config(&config.client).context("Failed to create Cost Explorer client")?;
    info!(endpoint = %client.endpoint(), "Connecting to Cost Explorer");

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current record");
            on_signal.cancel();
        }
    });

    let extractor = Extractor::new(Arc::new(client), config);
    singer::sync(&extractor, &mut state, &mut writer, cancel)
        .await
        .context("Cost and usage extraction failed")?;

    writer.into_inner()?.flush()?;
    Ok(())
}
