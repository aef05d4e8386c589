//! Command-line entry point: parse a sequence file and run it.

use anyhow::{Context, Result};
use clap::Parser;
use rust_scan::config::DEFAULT_SETTINGS_FILE;
use rust_scan::hardware::SimulatedBackend;
use rust_scan::{
    parse_file, ActionContext, ActionRegistry, ConnectionManager, OutputTarget, RunEngine,
    Settings,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "rust_scan",
    about = "Run a laboratory instrument sequence file",
    version
)]
struct Cli {
    /// Sequence file to run
    #[arg(default_value = "default.con")]
    confile: PathBuf,

    /// Settings file (TOML)
    #[arg(long, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    /// Directory for output files (overrides the settings file)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Parse the sequence and print the action tree without touching hardware
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading settings from {}", cli.config.display()))?;
    if let Some(dir) = cli.output_dir {
        settings.output_dir = dir;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let registry = ActionRegistry::with_builtins();
    let mut forest = parse_file(&cli.confile, &registry)
        .with_context(|| format!("parsing {}", cli.confile.display()))?;

    if cli.dry_run {
        print!("{forest}");
        return Ok(());
    }

    let connections = ConnectionManager::new(Arc::new(SimulatedBackend::new(settings.hardware)));
    let output = OutputTarget::for_confile(settings.output_dir, &cli.confile);
    let cancel = CancellationToken::new();
    let ctx = ActionContext::new(connections, output).with_cancel(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current action");
            cancel.cancel();
        }
    });

    let summary = RunEngine::new(ctx)
        .run_all(&mut forest)
        .await
        .with_context(|| format!("running {}", cli.confile.display()))?;
    info!(
        run_id = %summary.run_id,
        nodes = summary.nodes,
        elapsed = ?summary.elapsed,
        "Sequence finished"
    );
    Ok(())
}
