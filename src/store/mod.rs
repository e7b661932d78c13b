//! Append-only knowledge store.
//!
//! The store is a single plain-text file: a fixed preamble followed by Fact
//! Blocks. Each block is rendered in memory and written with one `write_all`
//! followed by `sync_data`, so readers only ever observe whole blocks or a
//! truncated tail that [`parse_blocks`] ignores.

mod blocks;

pub use blocks::{
    escape_payload, extract_processed_filenames, extract_processed_records, parse_blocks,
    render_block, FactBlock, MARKER_PREFIX, PREAMBLE,
};

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

use crate::error::{ChemkgError, Result};

/// One successfully ingested source file, as recorded by its block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedFileRecord {
    pub filename: String,
    pub processed_at: DateTime<Utc>,
    /// Byte length of the block's payload section.
    pub fact_block_size: usize,
}

/// Handle to the store file
#[derive(Debug)]
pub struct KnowledgeStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl KnowledgeStore {
    /// Open the store, creating it (and its parent directory) with the preamble if absent.
    /// An existing file is left untouched.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if path.is_dir() {
            return Err(ChemkgError::Store(format!(
                "store path is a directory: {}",
                path.display()
            )));
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                ChemkgError::Store(format!("cannot create store directory {}: {}", parent.display(), e))
            })?;
        }

        if !path.exists() {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(PREAMBLE.as_bytes())?;
                    file.sync_all()?;
                    log::info!("Created knowledge store at {}", path.display());
                }
                // Someone else created it between the check and the open.
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    return Err(ChemkgError::Store(format!(
                        "cannot create store {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        OpenOptions::new().append(true).open(&path).map_err(|e| {
            ChemkgError::Store(format!("store is not writable {}: {}", path.display(), e))
        })?;

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one Fact Block stamped with the current time.
    pub fn append(&self, filename: &str, payload: &str) -> Result<ProcessedFileRecord> {
        self.append_at(filename, payload, Utc::now())
    }

    /// Append one Fact Block with an explicit processing time.
    ///
    /// The header keeps millisecond precision, so the time is truncated to
    /// milliseconds and the returned record equals the one read back later.
    pub fn append_at(
        &self,
        filename: &str,
        payload: &str,
        processed_at: DateTime<Utc>,
    ) -> Result<ProcessedFileRecord> {
        if filename.trim().is_empty() {
            return Err(ChemkgError::InvalidInput("filename must not be empty".to_string()));
        }
        if payload.trim().is_empty() {
            return Err(ChemkgError::InvalidInput(format!(
                "refusing to append empty payload for {}",
                filename
            )));
        }

        let processed_at = processed_at.trunc_subsecs(3);
        let escaped = escape_payload(payload);
        let block = render_block(filename, processed_at, &escaped)?;

        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut buf = String::with_capacity(block.len() + 1);
        if !self.ends_with_newline()? {
            // Previous writer died mid-line; start the header on a fresh line.
            buf.push('\n');
        }
        buf.push_str(&block);

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(buf.as_bytes())?;
        file.sync_data()?;

        log::debug!("store: appended {} bytes for {}", buf.len(), filename);

        Ok(ProcessedFileRecord {
            filename: filename.to_string(),
            processed_at,
            fact_block_size: escaped.len(),
        })
    }

    fn ends_with_newline(&self) -> Result<bool> {
        let mut file = File::open(&self.path)?;
        let len = file.metadata()?.len();
        if len == 0 {
            return Ok(true);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        Ok(last[0] == b'\n')
    }

    /// Entire current content. Invalid UTF-8 from a torn write is replaced, not fatal.
    pub fn read_all(&self) -> Result<String> {
        let bytes = fs::read(&self.path)?;
        Ok(match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
        })
    }

    /// Records for every committed block.
    pub fn processed_records(&self) -> Result<Vec<ProcessedFileRecord>> {
        Ok(extract_processed_records(&self.read_all()?))
    }
}
