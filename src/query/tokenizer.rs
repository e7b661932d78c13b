//! Line-oriented tokenizer for the fact vocabulary emitted by the Gaussian/cclib
//! parser (Turtle predicates from ontocompchem and cheminf).
//!
//! Statements span lines: `a ontocompchem:SCFEnergy ;` opens a typed node whose
//! `ontocompchem:hasValue` lines belong to it until a line ends with ` .`.

/// Energy unit carried by an energy fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnergyUnit {
    Hartree,
    ElectronVolt,
}

/// A recognized fact on one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Fact {
    Molecule,
    Atom,
    /// A `SCFEnergy` node was opened; its value lines follow.
    EnergyNode,
    /// Inline `hasSCFEnergy`/`hasSCFEnergyEV` value.
    Energy(EnergyUnit, f64),
    /// `hasValue`/`hasValueEV` inside an `SCFEnergy` node.
    NodeEnergy(EnergyUnit, f64),
    AtomCount(i64),
    Formula(String),
    Charge(i64),
    Multiplicity(i64),
    HomoLumoGap(f64),
}

/// Result of tokenizing one line.
#[derive(Debug, Clone, PartialEq)]
pub enum LineToken {
    Fact(Fact),
    /// A known predicate whose literal could not be read; the line is skipped.
    Garbled { predicate: &'static str },
    Other,
}

impl LineToken {
    /// Hartree-bearing energy markers: inline `hasSCFEnergy` lines (parsable or
    /// not) and `SCFEnergy` nodes.
    pub fn is_energy_marker(&self) -> bool {
        matches!(
            self,
            LineToken::Fact(Fact::EnergyNode)
                | LineToken::Fact(Fact::Energy(EnergyUnit::Hartree, _))
                | LineToken::Garbled {
                    predicate: SCF_ENERGY
                }
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    None,
    ScfEnergy,
    HomoLumoGap,
}

const MOLECULE_TYPE: &str = "a ontocompchem:QuantumCalculation";
const ATOM_TYPE: &str = "a cheminf:Atom";
const SCF_ENERGY_TYPE: &str = "a ontocompchem:SCFEnergy";
const GAP_TYPE: &str = "a ontocompchem:HOMOLUMOGap";

const SCF_ENERGY: &str = "ontocompchem:hasSCFEnergy";
const SCF_ENERGY_EV: &str = "ontocompchem:hasSCFEnergyEV";
const NODE_VALUE: &str = "ontocompchem:hasValue";
const NODE_VALUE_EV: &str = "ontocompchem:hasValueEV";
const GAP: &str = "ontocompchem:hasHOMOLUMOGap";
const GAP_VALUE: &str = "ontocompchem:hasGapValue";
const FORMULA: &str = "ontocompchem:hasMolecularFormula";
const ATOM_COUNT: [&str; 2] = ["ontocompchem:hasNAtoms", "cheminf:hasAtomCount"];
const CHARGE: [&str; 2] = ["ontocompchem:hasCharge", "cheminf:hasCharge"];
const MULTIPLICITY: [&str; 2] = ["ontocompchem:hasMultiplicity", "cheminf:hasMultiplicity"];

/// Stateful tokenizer over the lines of one payload.
#[derive(Debug)]
pub struct FactTokenizer {
    node: NodeKind,
}

impl Default for FactTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FactTokenizer {
    pub fn new() -> Self {
        Self { node: NodeKind::None }
    }

    /// Tokenize one line, updating the typed-node context.
    pub fn next_line(&mut self, raw: &str) -> LineToken {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with('@') {
            return LineToken::Other;
        }

        let token = self.classify(line);
        if line.ends_with('.') || closes_group(line) {
            self.node = NodeKind::None;
        }
        token
    }

    fn classify(&mut self, line: &str) -> LineToken {
        if contains_term(line, MOLECULE_TYPE) {
            return LineToken::Fact(Fact::Molecule);
        }
        if contains_term(line, ATOM_TYPE) {
            return LineToken::Fact(Fact::Atom);
        }
        if contains_term(line, SCF_ENERGY_TYPE) {
            self.node = NodeKind::ScfEnergy;
            return LineToken::Fact(Fact::EnergyNode);
        }
        if contains_term(line, GAP_TYPE) {
            self.node = NodeKind::HomoLumoGap;
            return LineToken::Other;
        }

        // The EV predicates share a prefix with the hartree ones; check them first.
        if let Some(object) = object_after(line, SCF_ENERGY_EV) {
            return float_fact(object, SCF_ENERGY_EV, |v| Fact::Energy(EnergyUnit::ElectronVolt, v));
        }
        if let Some(object) = object_after(line, SCF_ENERGY) {
            return float_fact(object, SCF_ENERGY, |v| Fact::Energy(EnergyUnit::Hartree, v));
        }
        if self.node == NodeKind::ScfEnergy {
            if let Some(object) = object_after(line, NODE_VALUE_EV) {
                return float_fact(object, NODE_VALUE_EV, |v| {
                    Fact::NodeEnergy(EnergyUnit::ElectronVolt, v)
                });
            }
            if let Some(object) = object_after(line, NODE_VALUE) {
                return float_fact(object, NODE_VALUE, |v| {
                    Fact::NodeEnergy(EnergyUnit::Hartree, v)
                });
            }
        }
        if let Some(object) = object_after(line, GAP) {
            return float_fact(object, GAP, Fact::HomoLumoGap);
        }
        if self.node == NodeKind::HomoLumoGap {
            if let Some(object) = object_after(line, GAP_VALUE) {
                return float_fact(object, GAP_VALUE, Fact::HomoLumoGap);
            }
            if let Some(object) = object_after(line, NODE_VALUE) {
                return float_fact(object, NODE_VALUE, Fact::HomoLumoGap);
            }
        }
        if let Some(object) = object_after(line, FORMULA) {
            return match parse_string_literal(object) {
                Some(formula) => LineToken::Fact(Fact::Formula(formula)),
                None => LineToken::Garbled { predicate: FORMULA },
            };
        }
        for predicate in ATOM_COUNT {
            if let Some(object) = object_after(line, predicate) {
                return int_fact(object, predicate, Fact::AtomCount);
            }
        }
        for predicate in CHARGE {
            if let Some(object) = object_after(line, predicate) {
                return int_fact(object, predicate, Fact::Charge);
            }
        }
        for predicate in MULTIPLICITY {
            if let Some(object) = object_after(line, predicate) {
                return int_fact(object, predicate, Fact::Multiplicity);
            }
        }

        LineToken::Other
    }
}

/// Whether `term` occurs in `line` as whole whitespace-separated tokens.
fn contains_term(line: &str, term: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = line[from..].find(term) {
        let start = from + pos;
        let end = start + term.len();
        let before_ok = start == 0 || line[..start].ends_with(char::is_whitespace);
        let after_ok = line[end..]
            .chars()
            .next()
            .map_or(true, |c| c.is_whitespace() || c == ';' || c == '.' || c == ',');
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

/// Text following `predicate` when it appears as a whole token.
fn object_after<'a>(line: &'a str, predicate: &str) -> Option<&'a str> {
    let mut from = 0;
    while let Some(pos) = line[from..].find(predicate) {
        let start = from + pos;
        let end = start + predicate.len();
        let before_ok = start == 0 || line[..start].ends_with(char::is_whitespace);
        let after_ok = end == line.len() || line[end..].starts_with(char::is_whitespace);
        if before_ok && after_ok {
            return Some(line[end..].trim());
        }
        from = end;
    }
    None
}

/// Whether the line ends a `[ ... ]` blank-node group.
fn closes_group(line: &str) -> bool {
    line.trim_end_matches([';', ',', '.'])
        .trim_end()
        .ends_with(']')
}

/// Strip the statement terminator (` .`, ` ;`, ` ,`) and a closing `]` from an object.
fn strip_terminator(object: &str) -> &str {
    let object = strip_statement_end(object);
    match object.strip_suffix(']') {
        Some(stripped) => strip_statement_end(stripped),
        None => object,
    }
}

fn strip_statement_end(object: &str) -> &str {
    let object = object.trim();
    for terminator in [" .", " ;", " ,"] {
        if let Some(stripped) = object.strip_suffix(terminator) {
            return stripped.trim();
        }
    }
    match object.strip_suffix(';').or_else(|| object.strip_suffix(',')) {
        Some(stripped) => stripped.trim(),
        None => object,
    }
}

/// Remove quotes and a `^^xsd:...` datatype suffix.
fn strip_literal_decoration(object: &str) -> &str {
    let object = match object.find("^^") {
        Some(pos) => &object[..pos],
        None => object,
    };
    object
        .strip_prefix('"')
        .and_then(|o| o.strip_suffix('"'))
        .unwrap_or(object)
        .trim()
}

/// Tolerant numeric literal: `[+-]? (digits [. digits?] | . digits) ([eE] [+-]? digits)?`
/// with a trailing statement terminator and optional quotes/datatype.
pub fn parse_numeric_literal(object: &str) -> Option<f64> {
    let mut text = strip_literal_decoration(strip_terminator(object));
    // `-227.856 .` without the space survives strip_terminator as `-227.856.`
    if let Some(stripped) = text.strip_suffix('.') {
        if stripped.ends_with(|c: char| c.is_ascii_digit()) && stripped.contains(['.', 'e', 'E']) {
            text = stripped;
        }
    }
    if !is_decimal_literal(text) {
        return None;
    }
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn is_decimal_literal(text: &str) -> bool {
    let bytes = text.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return false;
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+' | b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == bytes.len()
}

fn parse_integer_literal(object: &str) -> Option<i64> {
    let text = strip_literal_decoration(strip_terminator(object));
    let digits = text.strip_prefix(['+', '-']).unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn parse_string_literal(object: &str) -> Option<String> {
    let text = strip_terminator(object);
    let text = match text.find("^^") {
        Some(pos) => &text[..pos],
        None => text,
    };
    let inner = text.strip_prefix('"')?.strip_suffix('"')?;
    let inner = inner.trim();
    (!inner.is_empty()).then(|| inner.to_string())
}

fn float_fact(object: &str, predicate: &'static str, make: impl FnOnce(f64) -> Fact) -> LineToken {
    match parse_numeric_literal(object) {
        Some(value) => LineToken::Fact(make(value)),
        None => LineToken::Garbled { predicate },
    }
}

fn int_fact(object: &str, predicate: &'static str, make: impl FnOnce(i64) -> Fact) -> LineToken {
    match parse_integer_literal(object) {
        Some(value) => LineToken::Fact(make(value)),
        None => LineToken::Garbled { predicate },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(payload: &str) -> Vec<LineToken> {
        let mut tokenizer = FactTokenizer::new();
        payload.lines().map(|l| tokenizer.next_line(l)).collect()
    }

    #[test]
    fn test_numeric_literal_grammar() {
        assert_eq!(parse_numeric_literal("-227.856269 ."), Some(-227.856269));
        assert_eq!(parse_numeric_literal("-227.85626900 ;"), Some(-227.856269));
        assert_eq!(parse_numeric_literal("\"1.5e-3\"^^xsd:double ."), Some(1.5e-3));
        assert_eq!(parse_numeric_literal("+.5"), Some(0.5));
        assert_eq!(parse_numeric_literal("-227.856269."), Some(-227.856269));
        assert_eq!(parse_numeric_literal("-227.85x6 ."), None);
        assert_eq!(parse_numeric_literal("nan ."), None);
        assert_eq!(parse_numeric_literal("inf"), None);
        assert_eq!(parse_numeric_literal("1e ."), None);
        assert_eq!(parse_numeric_literal(". ."), None);
        assert_eq!(parse_numeric_literal(""), None);
    }

    #[test]
    fn test_inline_energy_lines() {
        let toks = tokens(
            "ex:lactone ontocompchem:hasSCFEnergy -227.85626900 .\nex:lactone ontocompchem:hasSCFEnergyEV -6200.257000 .",
        );
        assert_eq!(toks[0], LineToken::Fact(Fact::Energy(EnergyUnit::Hartree, -227.856269)));
        assert_eq!(toks[1], LineToken::Fact(Fact::Energy(EnergyUnit::ElectronVolt, -6200.257)));
    }

    #[test]
    fn test_typed_energy_node() {
        let payload = "\
ex:mol/scf_1 a ontocompchem:SCFEnergy ;
    ontocompchem:hasValue -227.85626900 ;
    ontocompchem:hasValueEV -6200.257000 ;
    ontocompchem:belongsTo ex:mol .
ex:mol/freq_1 a ontocompchem:VibrationalFrequency ;
    ontocompchem:hasValue 153.20 ;
    ontocompchem:belongsTo ex:mol .";
        let toks = tokens(payload);
        assert_eq!(toks[0], LineToken::Fact(Fact::EnergyNode));
        assert_eq!(toks[1], LineToken::Fact(Fact::NodeEnergy(EnergyUnit::Hartree, -227.856269)));
        assert_eq!(toks[2], LineToken::Fact(Fact::NodeEnergy(EnergyUnit::ElectronVolt, -6200.257)));
        assert!(toks[0].is_energy_marker());
        assert!(!toks[1].is_energy_marker());
        // The frequency value must not be read as an energy.
        assert_eq!(toks[5], LineToken::Other);
    }

    #[test]
    fn test_garbled_energy_is_reported() {
        let toks = tokens("ex:a ontocompchem:hasSCFEnergy -22x.1 .");
        assert_eq!(toks[0], LineToken::Garbled { predicate: SCF_ENERGY });
        assert!(toks[0].is_energy_marker());
    }

    #[test]
    fn test_properties() {
        let payload = "\
ex:m ontocompchem:hasNAtoms 12 .
ex:m ontocompchem:hasCharge -1 .
ex:m ontocompchem:hasMultiplicity 2 .
ex:m ontocompchem:hasMolecularFormula \"C4H6O2\" .
ex:m ontocompchem:hasHOMOLUMOGap 6.512300 .";
        let toks = tokens(payload);
        assert_eq!(toks[0], LineToken::Fact(Fact::AtomCount(12)));
        assert_eq!(toks[1], LineToken::Fact(Fact::Charge(-1)));
        assert_eq!(toks[2], LineToken::Fact(Fact::Multiplicity(2)));
        assert_eq!(toks[3], LineToken::Fact(Fact::Formula("C4H6O2".to_string())));
        assert_eq!(toks[4], LineToken::Fact(Fact::HomoLumoGap(6.5123)));
    }

    #[test]
    fn test_cheminf_property_aliases() {
        let payload = "ex:mol a cheminf:Molecule ;\n    cheminf:hasAtomCount 9 ;\n    cheminf:hasCharge 0 ;\n    cheminf:hasMultiplicity 1 .";
        let toks = tokens(payload);
        assert_eq!(toks[1], LineToken::Fact(Fact::AtomCount(9)));
        assert_eq!(toks[2], LineToken::Fact(Fact::Charge(0)));
        assert_eq!(toks[3], LineToken::Fact(Fact::Multiplicity(1)));
    }

    #[test]
    fn test_markers_and_comments() {
        let payload = "\
@prefix ex: <https://example.org/gaussian#> .
# Source file: lactone.log a ontocompchem:QuantumCalculation
ex:lactone a ontocompchem:QuantumCalculation ;
ex:lactone_atom_1 a cheminf:Atom ;";
        let toks = tokens(payload);
        assert_eq!(toks[0], LineToken::Other);
        assert_eq!(toks[1], LineToken::Other);
        assert_eq!(toks[2], LineToken::Fact(Fact::Molecule));
        assert_eq!(toks[3], LineToken::Fact(Fact::Atom));
    }

    #[test]
    fn test_gap_node_value() {
        let payload = "ex:m/gap_1 a ontocompchem:HOMOLUMOGap ;\n    ontocompchem:hasGapValue 6.512300 ;\n    ontocompchem:belongsTo ex:m .\nex:m/f a ontocompchem:Frequency ;\n    ontocompchem:hasGapValue 1.0 .";
        let toks = tokens(payload);
        assert_eq!(toks[1], LineToken::Fact(Fact::HomoLumoGap(6.5123)));
        assert_eq!(toks[4], LineToken::Other);
    }

    #[test]
    fn test_term_must_be_whole_token() {
        assert!(!contains_term("ex:x a ontocompchem:QuantumCalculationStep .", MOLECULE_TYPE));
        assert!(contains_term("ex:x a ontocompchem:QuantumCalculation;", MOLECULE_TYPE));
    }

    #[test]
    fn test_bracketed_nodes() {
        let payload = "\
ex:lactone a ontocompchem:QuantumCalculation ;
    ontocompchem:hasSCFEnergy [ a ontocompchem:SCFEnergy ;
            ontocompchem:hasUnit \"Hartree\" ;
            ontocompchem:hasValue -227.856269 ] ;
    ontocompchem:hasHOMOLUMOGap [ a ontocompchem:HOMOLUMOGap ;
            ontocompchem:hasUnit \"eV\" ;
            ontocompchem:hasValue 6.5123 ] ;
    ontocompchem:hasVibrationalFrequencies [ a ontocompchem:VibrationalFrequencyCollection ;
            ontocompchem:hasValue 153.2 ] .";
        let toks = tokens(payload);
        assert_eq!(toks[1], LineToken::Fact(Fact::EnergyNode));
        assert_eq!(toks[3], LineToken::Fact(Fact::NodeEnergy(EnergyUnit::Hartree, -227.856269)));
        assert_eq!(toks[6], LineToken::Fact(Fact::HomoLumoGap(6.5123)));
        // Closing the gap group ends its context.
        assert_eq!(toks[8], LineToken::Other);
    }

    #[test]
    fn test_closing_bracket_is_stripped() {
        assert_eq!(parse_numeric_literal("-227.856269 ] ;"), Some(-227.856269));
        assert_eq!(parse_numeric_literal("0.25 ] ."), Some(0.25));
        assert_eq!(parse_numeric_literal("0.25]"), Some(0.25));
        assert!(closes_group("ontocompchem:hasValue 0.25 ] ;"));
        assert!(!closes_group("ontocompchem:hasSCFEnergy [ a ontocompchem:SCFEnergy ;"));
    }
}
