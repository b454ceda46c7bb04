//! Uplink recorder entry point.

mod app;
mod config;
mod provision;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "uplink-recorder")]
#[command(about = "Records the configured streams and uploads them in segments")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration (created with defaults if missing)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Session (interview) id the recording belongs to
    #[arg(short, long)]
    session_id: String,
}

fn main() -> anyhow::Result<()> {
    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        session_id = %cli.session_id,
        "starting uplink recorder"
    );

    let path = match cli.config {
        Some(path) => path,
        None => config::default_path()?,
    };
    let config = config::Config::load(&path)?;
    config.validate()?;
    tracing::info!(
        path = %path.display(),
        streams = config.streams.len(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config, cli.session_id))?;

    tracing::info!("recorder shut down cleanly");
    Ok(())
}
