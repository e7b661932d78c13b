use anyhow::{Context, Result};
use chemkg::api::ApiServer;
use chemkg::{Config, KnowledgeService, KnowledgeStore, QueryEngine, QueryOptions};
use std::sync::Arc;

fn init_logging(config: &Config) {
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.chemkg.log_level.as_str()),
    )
    .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config);

    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("verify");

    match command {
        "serve" => run_service(config).await?,
        "verify" => run_verification(&config)?,
        other => {
            anyhow::bail!("Unknown command '{}'. Usage: chemkg [serve|verify]", other);
        }
    }

    Ok(())
}

/// Watch the directory, ingest continuously and serve the query API until Ctrl+C.
async fn run_service(config: Config) -> Result<()> {
    log::info!("Starting chemkg v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Watch dir: {}", config.watch_dir().display());
    log::info!("Store: {}", config.store_path().display());

    let mut service = KnowledgeService::from_config(&config).context("Failed to initialize knowledge service")?;
    let report = service.start().await?;
    log::info!(
        "Backlog processed: {} committed, {} already known, {} failed",
        report.committed,
        report.skipped,
        report.failed()
    );

    if config.http_server.enabled {
        let api = ApiServer::new(service.query_engine(), &config.http_server);
        api.run(config.http_server.port, shutdown_signal()).await?;
    } else {
        log::info!("HTTP query API disabled; ingesting until Ctrl+C");
        shutdown_signal().await;
    }

    service.stop().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {}", e);
        // Without a signal handler there is nothing to wait for.
        std::future::pending::<()>().await;
    }
    log::info!("Shutdown requested");
}

/// Check that the environment is usable and print a summary of the store.
fn run_verification(config: &Config) -> Result<()> {
    log::info!("chemkg v{}: verifying configuration", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(config.watch_dir())
        .with_context(|| format!("Cannot create watch dir {}", config.watch_dir().display()))?;
    let store = Arc::new(KnowledgeStore::open(config.store_path())?);
    log::info!("Store OK: {}", store.path().display());

    if command_on_path(&config.parser.command) {
        log::info!("Parser command found: {}", config.parser.command);
    } else {
        log::warn!(
            "Parser command '{}' not found on PATH; ingestion will report it as unavailable",
            config.parser.command
        );
    }

    let engine = QueryEngine::new(store, QueryOptions::from(&config.query));
    let stats = engine.aggregate_stats()?;
    log::info!(
        "Store holds {} files, {} molecules, {} energies, {} atoms",
        stats.total_files,
        stats.molecule_count,
        stats.energy_count,
        stats.atom_count
    );
    Ok(())
}

fn command_on_path(command: &str) -> bool {
    let path = std::path::Path::new(command);
    if path.components().count() > 1 {
        return path.is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(command).is_file()))
        .unwrap_or(false)
}
