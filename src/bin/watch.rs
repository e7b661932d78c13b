//! Watch the configured directory and ingest new files as they appear.

use anyhow::Result;
use chemkg::{Config, KnowledgeService};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "watch")]
#[command(about = "Watch the chemistry output directory and ingest new files automatically")]
struct Args {
    /// Debounce delay in milliseconds (overrides watch.debounce_ms)
    #[arg(long)]
    debounce_ms: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.chemkg.log_level.as_str()),
    )
    .init();

    if let Some(ms) = args.debounce_ms {
        config.watch.debounce_ms = ms;
    }

    log::info!("Starting chemkg watcher");
    log::info!("Watch dir: {}", config.watch_dir().display());
    log::info!("Debounce: {} ms", config.watch.debounce_ms);

    let mut service = KnowledgeService::from_config(&config)?;
    let report = service.start().await?;
    log::info!(
        "Backlog: {} committed, {} skipped, {} failed",
        report.committed,
        report.skipped,
        report.failed()
    );

    log::info!("Watching for changes (Ctrl+C to stop)");
    tokio::signal::ctrl_c().await?;
    service.stop().await;
    Ok(())
}
