use chemkg::{Config, KnowledgeStore, QueryEngine, QueryOptions};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "search")]
#[command(about = "Case-insensitive text search over stored facts")]
struct Args {
    /// Text to look for
    query: String,

    /// Maximum number of hits (defaults to query.search_limit)
    #[arg(short, long)]
    limit: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if args.query.trim().is_empty() {
        anyhow::bail!("Query cannot be empty");
    }

    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.chemkg.log_level.as_str()),
    )
    .init();

    let store = Arc::new(KnowledgeStore::open(config.store_path())?);
    let engine = QueryEngine::new(store, QueryOptions::from(&config.query));
    let limit = args.limit.unwrap_or(engine.options().search_limit);

    let start = Instant::now();
    let hits = engine.search_limited(&args.query, limit)?;
    let elapsed = start.elapsed();

    if hits.is_empty() {
        println!("No matches for \"{}\"", args.query);
        return Ok(());
    }

    println!("{} matches for \"{}\" ({:.1} ms)\n", hits.len(), args.query, elapsed.as_secs_f64() * 1000.0);
    for hit in hits {
        println!("{:<32} {}", hit.filename, hit.line);
    }
    Ok(())
}
