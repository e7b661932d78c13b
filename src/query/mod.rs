//! Read-only queries over the knowledge store.
//!
//! Every query re-reads the store file and scans complete fact blocks with the
//! line tokenizer, so results always reflect what has been committed so far.

pub mod tokenizer;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::QueryConfig;
use crate::error::{ChemkgError, Result};
use crate::store::{parse_blocks, FactBlock, KnowledgeStore, ProcessedFileRecord, MARKER_PREFIX};
use tokenizer::{EnergyUnit, Fact, FactTokenizer, LineToken};

/// Conversion factor between the two energy units.
pub const HARTREE_TO_EV: f64 = 27.211386245988;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryOptions {
    pub hartree_tolerance: f64,
    pub ev_tolerance: f64,
    pub search_limit: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            hartree_tolerance: 1e-6,
            ev_tolerance: 1e-3,
            search_limit: 10,
        }
    }
}

impl From<&QueryConfig> for QueryOptions {
    fn from(config: &QueryConfig) -> Self {
        Self {
            hartree_tolerance: config.hartree_tolerance,
            ev_tolerance: config.ev_tolerance,
            search_limit: config.search_limit,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateStats {
    pub total_files: usize,
    pub molecule_count: usize,
    pub energy_count: usize,
    pub atom_count: usize,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EnergyEntry {
    pub hartree: f64,
    pub ev: f64,
}

impl EnergyEntry {
    fn from_pair(hartree: Option<f64>, ev: Option<f64>) -> Option<Self> {
        match (hartree, ev) {
            (Some(hartree), Some(ev)) => Some(Self { hartree, ev }),
            (Some(hartree), None) => Some(Self {
                hartree,
                ev: hartree * HARTREE_TO_EV,
            }),
            (None, Some(ev)) => Some(Self {
                hartree: ev / HARTREE_TO_EV,
                ev,
            }),
            (None, None) => None,
        }
    }

    fn is_near(&self, other: &EnergyEntry, options: &QueryOptions) -> bool {
        (self.hartree - other.hartree).abs() < options.hartree_tolerance
            && (self.ev - other.ev).abs() < options.ev_tolerance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MolecularPropertyEntry {
    pub n_atoms: usize,
    pub formula: String,
    pub charge: i64,
    pub multiplicity: i64,
    pub homo_lumo_gap_ev: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchHit {
    pub filename: String,
    pub line: String,
}

/// Accumulates first-seen properties for one file.
#[derive(Debug, Default)]
struct PropertyAccumulator {
    n_atoms: Option<usize>,
    atom_markers: usize,
    formula: Option<String>,
    charge: Option<i64>,
    multiplicity: Option<i64>,
    gap: Option<f64>,
}

impl PropertyAccumulator {
    fn finish(self) -> MolecularPropertyEntry {
        MolecularPropertyEntry {
            n_atoms: self.n_atoms.unwrap_or(self.atom_markers),
            formula: self.formula.unwrap_or_else(|| "unknown".to_string()),
            charge: self.charge.unwrap_or(0),
            multiplicity: self.multiplicity.unwrap_or(1),
            homo_lumo_gap_ev: self.gap,
        }
    }
}

/// Pairs hartree/eV observations as they appear in one block.
#[derive(Default)]
struct EnergyPairer {
    hartree: Option<f64>,
    entries: Vec<EnergyEntry>,
}

impl EnergyPairer {
    fn hartree(&mut self, value: f64) {
        self.flush();
        self.hartree = Some(value);
    }

    fn ev(&mut self, value: f64) {
        let hartree = self.hartree.take();
        self.entries.extend(EnergyEntry::from_pair(hartree, Some(value)));
    }

    fn flush(&mut self) {
        let hartree = self.hartree.take();
        self.entries.extend(EnergyEntry::from_pair(hartree, None));
    }

    fn finish(mut self) -> Vec<EnergyEntry> {
        self.flush();
        self.entries
    }
}

fn tokens<'a>(block: &'a FactBlock<'a>) -> impl Iterator<Item = LineToken> + 'a {
    let mut tokenizer = FactTokenizer::new();
    let filename = block.filename.as_str();
    block.payload.lines().map(move |line| {
        let token = tokenizer.next_line(line);
        if let LineToken::Garbled { predicate } = &token {
            log::debug!("query: skipping malformed {} value in {}: {}", predicate, filename, line.trim());
        }
        token
    })
}

/// Payload lines as the parser wrote them (marker neutralization undone).
fn original_line(line: &str) -> &str {
    let line = line.trim_end_matches('\r');
    match line.strip_prefix(' ') {
        Some(rest) if rest.starts_with(MARKER_PREFIX) => rest,
        _ => line,
    }
}

#[derive(Debug, Clone)]
pub struct QueryEngine {
    store: Arc<KnowledgeStore>,
    options: QueryOptions,
}

impl QueryEngine {
    pub fn new(store: Arc<KnowledgeStore>, options: QueryOptions) -> Self {
        Self { store, options }
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn aggregate_stats(&self) -> Result<AggregateStats> {
        let content = self.store.read_all()?;
        let blocks = parse_blocks(&content);

        let mut files = BTreeSet::new();
        let mut stats = AggregateStats::default();
        for block in &blocks {
            files.insert(block.filename.as_str());
            stats.last_update = stats.last_update.max(Some(block.processed_at));
            for token in tokens(block) {
                if token.is_energy_marker() {
                    stats.energy_count += 1;
                }
                match token {
                    LineToken::Fact(Fact::Molecule) => stats.molecule_count += 1,
                    LineToken::Fact(Fact::Atom) => stats.atom_count += 1,
                    _ => {}
                }
            }
        }
        stats.total_files = files.len();
        Ok(stats)
    }

    /// Distinct SCF energies per file, in the order they were observed.
    pub fn energies_by_file(&self) -> Result<BTreeMap<String, Vec<EnergyEntry>>> {
        let content = self.store.read_all()?;
        let mut result: BTreeMap<String, Vec<EnergyEntry>> = BTreeMap::new();

        for block in parse_blocks(&content) {
            let mut pairer = EnergyPairer::default();
            for token in tokens(&block) {
                match token {
                    LineToken::Fact(Fact::EnergyNode) => pairer.flush(),
                    LineToken::Fact(Fact::Energy(unit, value) | Fact::NodeEnergy(unit, value)) => {
                        match unit {
                            EnergyUnit::Hartree => pairer.hartree(value),
                            EnergyUnit::ElectronVolt => pairer.ev(value),
                        }
                    }
                    _ => {}
                }
            }

            let entries = pairer.finish();
            if entries.is_empty() {
                continue;
            }
            let merged = result.entry(block.filename.clone()).or_default();
            for entry in entries {
                if !merged.iter().any(|e| e.is_near(&entry, &self.options)) {
                    merged.push(entry);
                }
            }
        }
        Ok(result)
    }

    /// One property entry per processed file, with defaults for missing facts.
    pub fn molecular_properties_by_file(&self) -> Result<BTreeMap<String, MolecularPropertyEntry>> {
        let content = self.store.read_all()?;
        let mut acc: HashMap<String, PropertyAccumulator> = HashMap::new();

        for block in parse_blocks(&content) {
            let props = acc.entry(block.filename.clone()).or_default();
            for token in tokens(&block) {
                let LineToken::Fact(fact) = token else {
                    continue;
                };
                match fact {
                    Fact::Atom => props.atom_markers += 1,
                    Fact::AtomCount(n) => match usize::try_from(n) {
                        Ok(n) => {
                            props.n_atoms.get_or_insert(n);
                        }
                        Err(_) => log::debug!("query: ignoring negative atom count in {}", block.filename),
                    },
                    Fact::Formula(formula) => {
                        props.formula.get_or_insert(formula);
                    }
                    Fact::Charge(charge) => {
                        props.charge.get_or_insert(charge);
                    }
                    Fact::Multiplicity(m) => {
                        props.multiplicity.get_or_insert(m);
                    }
                    Fact::HomoLumoGap(gap) => {
                        props.gap.get_or_insert(gap);
                    }
                    _ => {}
                }
            }
        }

        Ok(acc.into_iter().map(|(name, props)| (name, props.finish())).collect())
    }

    /// Case-insensitive substring search over payload lines, capped at the
    /// configured limit.
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.search_limited(query, self.options.search_limit)
    }

    pub fn search_limited(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(ChemkgError::Query("search query must not be empty".to_string()));
        }
        if limit == 0 {
            return Err(ChemkgError::Query("search limit must be greater than 0".to_string()));
        }

        let content = self.store.read_all()?;
        let mut hits = Vec::new();
        'blocks: for block in parse_blocks(&content) {
            for line in block.payload.lines() {
                let line = original_line(line);
                if line.to_lowercase().contains(&needle) {
                    hits.push(SearchHit {
                        filename: block.filename.clone(),
                        line: line.trim().to_string(),
                    });
                    if hits.len() >= limit {
                        break 'blocks;
                    }
                }
            }
        }
        Ok(hits)
    }

    /// Committed files in store order.
    pub fn list_files(&self) -> Result<Vec<ProcessedFileRecord>> {
        let mut seen = BTreeSet::new();
        Ok(self
            .store
            .processed_records()?
            .into_iter()
            .filter(|r| seen.insert(r.filename.clone()))
            .collect())
    }
}
