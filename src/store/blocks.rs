//! Fact Block text format: rendering, marker neutralization, and the tolerant
//! block scanner used for index reconstruction and queries.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};

use super::ProcessedFileRecord;
use crate::error::{ChemkgError, Result};

/// Lines starting with this prefix are reserved for store markers.
pub const MARKER_PREFIX: &str = "#@";

const BLOCK_OPEN: &str = "#@ block file=";
const BLOCK_CLOSE: &str = "#@ end file=";

/// Written once when the store file is created.
pub const PREAMBLE: &str = "\
# chemkg knowledge store
# format: fact-block/v1
# Each fact block is a '#@ block' header line (source file, processing time,
# payload size in bytes), the parser payload, a '#@ end' line and a blank line.
# Blocks are append-only; an unterminated block is ignored on reload.

";

/// One complete block found in store content.
#[derive(Debug, Clone, PartialEq)]
pub struct FactBlock<'a> {
    pub filename: String,
    pub processed_at: DateTime<Utc>,
    pub size: usize,
    pub payload: &'a str,
}

impl FactBlock<'_> {
    pub fn record(&self) -> ProcessedFileRecord {
        ProcessedFileRecord {
            filename: self.filename.clone(),
            processed_at: self.processed_at,
            fact_block_size: self.size,
        }
    }
}

#[derive(Debug)]
struct BlockHeader {
    filename: String,
    processed_at: DateTime<Utc>,
    size: usize,
}

/// Neutralize payload lines that would read back as markers and make sure the
/// payload ends with a newline.
pub fn escape_payload(payload: &str) -> String {
    let mut escaped = String::with_capacity(payload.len() + 1);
    for line in payload.split_inclusive('\n') {
        if line.starts_with(MARKER_PREFIX) {
            escaped.push(' ');
        }
        escaped.push_str(line);
    }
    if !escaped.is_empty() && !escaped.ends_with('\n') {
        escaped.push('\n');
    }
    escaped
}

/// Render a full block. `payload` must already be escaped.
pub fn render_block(filename: &str, processed_at: DateTime<Utc>, payload: &str) -> Result<String> {
    let name = encode(filename)?;
    let timestamp = encode(&processed_at.to_rfc3339_opts(SecondsFormat::Millis, true))?;
    Ok(format!(
        "{BLOCK_OPEN}{name} processed={timestamp} bytes={}\n{payload}{BLOCK_CLOSE}{name}\n\n",
        payload.len()
    ))
}

fn encode(value: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| ChemkgError::Store(format!("encode marker field: {}", e)))
}

/// Read one JSON string literal off the front of `input`.
fn take_json_string(input: &str) -> Option<(String, &str)> {
    let mut stream = serde_json::Deserializer::from_str(input).into_iter::<String>();
    let value = stream.next()?.ok()?;
    let consumed = stream.byte_offset();
    Some((value, input.get(consumed..)?))
}

fn parse_header(line: &str) -> Option<BlockHeader> {
    let rest = line.strip_prefix(BLOCK_OPEN)?;
    let (filename, rest) = take_json_string(rest)?;
    let rest = rest.strip_prefix(" processed=")?;
    let (processed, rest) = take_json_string(rest)?;
    let size = rest.strip_prefix(" bytes=")?.trim().parse().ok()?;
    let processed_at = DateTime::parse_from_rfc3339(&processed).ok()?.with_timezone(&Utc);
    if filename.is_empty() {
        return None;
    }
    Some(BlockHeader {
        filename,
        processed_at,
        size,
    })
}

fn parse_close(line: &str) -> Option<String> {
    let rest = line.strip_prefix(BLOCK_CLOSE)?;
    let (filename, rest) = take_json_string(rest)?;
    rest.trim().is_empty().then_some(filename)
}

/// Scan store content and return every complete block in file order.
///
/// A block is complete when its header parses, an end marker naming the same
/// file follows, and the payload between them has the byte size the header
/// announced. Anything else (a crash mid-write, a hand-edited header) is skipped.
pub fn parse_blocks(content: &str) -> Vec<FactBlock<'_>> {
    let mut blocks = Vec::new();
    let mut open: Option<(BlockHeader, usize)> = None;
    let mut offset = 0usize;

    for raw_line in content.split_inclusive('\n') {
        let line_start = offset;
        offset += raw_line.len();
        let line = raw_line.trim_end_matches(['\n', '\r']);

        if line.starts_with(BLOCK_OPEN) {
            if let Some((pending, _)) = open.take() {
                log::warn!(
                    "store: block for {} has no end marker, ignoring it",
                    pending.filename
                );
            }
            match parse_header(line) {
                Some(header) => open = Some((header, offset)),
                None => log::warn!("store: malformed block header at byte {}", line_start),
            }
        } else if line.starts_with(BLOCK_CLOSE) {
            let Some((header, payload_start)) = open.take() else {
                continue;
            };
            let payload = &content[payload_start..line_start];
            match parse_close(line) {
                Some(name) if name == header.filename && payload.len() == header.size => {
                    blocks.push(FactBlock {
                        filename: header.filename,
                        processed_at: header.processed_at,
                        size: header.size,
                        payload,
                    });
                }
                _ => log::warn!(
                    "store: block for {} is inconsistent (expected {} bytes, found {}), ignoring it",
                    header.filename,
                    header.size,
                    payload.len()
                ),
            }
        }
    }

    if let Some((pending, _)) = open {
        log::warn!(
            "store: trailing block for {} is incomplete, it will be re-ingested",
            pending.filename
        );
    }

    blocks
}

/// Records for every committed block, in store order.
pub fn extract_processed_records(content: &str) -> Vec<ProcessedFileRecord> {
    parse_blocks(content).iter().map(FactBlock::record).collect()
}

/// Every filename that has a committed block.
pub fn extract_processed_filenames(content: &str) -> BTreeSet<String> {
    parse_blocks(content).into_iter().map(|b| b.filename).collect()
}
