//! One-shot ingestion: process every new file in the watch directory and exit.

use anyhow::Result;
use chemkg::{Config, IngestOutcome, KnowledgeService};
use clap::Parser;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest new chemistry output files from the watch directory into the knowledge store")]
struct Args {
    /// List the files that would be processed without calling the parser
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.chemkg.log_level.as_str()),
    )
    .init();

    log::info!("Watch dir: {}", config.watch_dir().display());
    log::info!("Store: {}", config.store_path().display());

    let service = KnowledgeService::from_config(&config)?;
    let files = service.watcher().backlog_scan()?;
    let coordinator = service.coordinator();
    let pending: Vec<_> = files
        .iter()
        .filter(|f| !coordinator.is_processed(&f.name))
        .cloned()
        .collect();

    println!(
        "Found {} files ({} already ingested, {} new)",
        files.len(),
        files.len() - pending.len(),
        pending.len()
    );

    if args.dry_run {
        for file in &pending {
            println!("  would ingest {}", file.name);
        }
        return Ok(());
    }

    let start = Instant::now();
    let mut failures = Vec::new();
    let mut committed = 0usize;
    for file in &pending {
        match coordinator.handle_candidate(file).await {
            IngestOutcome::Committed(record) => {
                committed += 1;
                println!("  ok    {} ({} bytes)", record.filename, record.fact_block_size);
            }
            IngestOutcome::Skipped | IngestOutcome::Coalesced => {}
            other => {
                println!("  FAIL  {} ({:?})", file.name, other);
                failures.push(file.name.clone());
            }
        }
    }

    println!(
        "\nIngested {} files in {:.1}s, {} failed",
        committed,
        start.elapsed().as_secs_f64(),
        failures.len()
    );
    if !failures.is_empty() {
        println!("Failed files are retried on the next run.");
    }
    Ok(())
}
