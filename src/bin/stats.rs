use chemkg::{Config, KnowledgeStore, QueryEngine, QueryOptions};
use clap::Parser;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "stats")]
#[command(about = "Summarize the knowledge store: totals, energies and molecular properties")]
struct Args {
    /// Print per-file energies and properties as well
    #[arg(short, long)]
    detailed: bool,

    /// Emit JSON instead of a table
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::load()?;
    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.chemkg.log_level.as_str()),
    )
    .init();

    let store = Arc::new(KnowledgeStore::open(config.store_path())?);
    let engine = QueryEngine::new(store, QueryOptions::from(&config.query));
    let stats = engine.aggregate_stats()?;

    if args.json {
        let mut out = serde_json::json!({ "stats": stats });
        if args.detailed {
            out["energies"] = serde_json::to_value(engine.energies_by_file()?)?;
            out["molecules"] = serde_json::to_value(engine.molecular_properties_by_file()?)?;
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("\n=== chemkg Knowledge Store ===\n");
    println!("Store:          {}", config.store_path().display());
    println!("Files:          {}", stats.total_files);
    println!("Molecules:      {}", stats.molecule_count);
    println!("SCF energies:   {}", stats.energy_count);
    println!("Atoms:          {}", stats.atom_count);
    match stats.last_update {
        Some(ts) => println!("Last update:    {}", ts.to_rfc3339()),
        None => println!("Last update:    never"),
    }

    if !args.detailed {
        return Ok(());
    }

    let energies = engine.energies_by_file()?;
    let molecules = engine.molecular_properties_by_file()?;

    println!("\n{:-<88}", "");
    println!(
        "{:<28} {:>10} {:>6} {:>6} {:>4} {:>16} {:>12}",
        "File", "Formula", "Atoms", "Charge", "Mult", "SCF (Hartree)", "Gap (eV)"
    );
    println!("{:-<88}", "");
    for (file, props) in &molecules {
        let energy = energies
            .get(file)
            .and_then(|e| e.last())
            .map(|e| format!("{:.6}", e.hartree))
            .unwrap_or_else(|| "-".to_string());
        let gap = props
            .homo_lumo_gap_ev
            .map(|g| format!("{:.4}", g))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<28} {:>10} {:>6} {:>6} {:>4} {:>16} {:>12}",
            file, props.formula, props.n_atoms, props.charge, props.multiplicity, energy, gap
        );
    }
    println!("{:-<88}", "");
    Ok(())
}
