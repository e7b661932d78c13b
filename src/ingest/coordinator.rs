//! Ingestion coordinator: the single writer of the knowledge store.
//!
//! Each candidate goes through skip/coalesce checks, the parser gateway, and
//! finally an append to the store followed by an index insert. A file only
//! enters the index after its block is durably written.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;

use super::index::ProcessedFileIndex;
use crate::error::Result;
use crate::gateway::{ParseFailure, ParseMetadata, ParseOutcome, ParserGateway};
use crate::store::{KnowledgeStore, ProcessedFileRecord};
use crate::watch::WatchedFile;

/// Upper bound on one gateway call unless overridden with
/// [`IngestionCoordinator::with_parse_timeout`].
pub const DEFAULT_PARSE_TIMEOUT: Duration = Duration::from_secs(120);

/// Terminal state of one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    /// Already has a committed block.
    Skipped,
    /// Another attempt for the same file is in progress.
    Coalesced,
    /// The file disappeared (or became unreadable) before it could be parsed.
    Vanished,
    ParseFailed(String),
    GatewayUnavailable(String),
    /// Shutdown was requested while the parser was running.
    Discarded,
    Committed(ProcessedFileRecord),
    StoreFailed(String),
}

impl IngestOutcome {
    /// Whether the same file will be attempted again on its next occurrence.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IngestOutcome::Vanished
                | IngestOutcome::ParseFailed(_)
                | IngestOutcome::GatewayUnavailable(_)
                | IngestOutcome::Discarded
                | IngestOutcome::StoreFailed(_)
        )
    }
}

/// Per-outcome counts for a batch of candidates.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub candidates: usize,
    pub committed: usize,
    pub skipped: usize,
    pub coalesced: usize,
    pub vanished: usize,
    pub parse_failed: usize,
    pub gateway_unavailable: usize,
    pub discarded: usize,
    pub store_failed: usize,
}

impl IngestReport {
    pub fn record(&mut self, outcome: &IngestOutcome) {
        self.candidates += 1;
        match outcome {
            IngestOutcome::Skipped => self.skipped += 1,
            IngestOutcome::Coalesced => self.coalesced += 1,
            IngestOutcome::Vanished => self.vanished += 1,
            IngestOutcome::ParseFailed(_) => self.parse_failed += 1,
            IngestOutcome::GatewayUnavailable(_) => self.gateway_unavailable += 1,
            IngestOutcome::Discarded => self.discarded += 1,
            IngestOutcome::Committed(_) => self.committed += 1,
            IngestOutcome::StoreFailed(_) => self.store_failed += 1,
        }
    }

    /// Failures that leave the file unindexed.
    pub fn failed(&self) -> usize {
        self.vanished + self.parse_failed + self.gateway_unavailable + self.store_failed
    }
}

#[derive(Debug, Default)]
struct State {
    index: ProcessedFileIndex,
    in_flight: HashSet<String>,
}

pub struct IngestionCoordinator {
    store: Arc<KnowledgeStore>,
    gateway: Arc<dyn ParserGateway>,
    watch_dir: PathBuf,
    source_tag: String,
    parse_timeout: Duration,
    state: Mutex<State>,
    shutdown: AtomicBool,
}

/// Clears the in-flight marker for a filename on every exit path.
struct InFlightGuard<'a> {
    coordinator: &'a IngestionCoordinator,
    filename: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.state().in_flight.remove(&self.filename);
    }
}

impl IngestionCoordinator {
    /// Build the coordinator and rebuild the processed-file index from the store.
    pub fn open(
        store: Arc<KnowledgeStore>,
        gateway: Arc<dyn ParserGateway>,
        watch_dir: impl Into<PathBuf>,
        source_tag: impl Into<String>,
    ) -> Result<Self> {
        let content = store.read_all()?;
        let index = ProcessedFileIndex::from_store_content(&content);
        log::info!(
            "Recovered {} processed files from {}",
            index.len(),
            store.path().display()
        );
        Ok(Self {
            store,
            gateway,
            watch_dir: watch_dir.into(),
            source_tag: source_tag.into(),
            parse_timeout: DEFAULT_PARSE_TIMEOUT,
            state: Mutex::new(State {
                index,
                in_flight: HashSet::new(),
            }),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Bound every gateway call; an expired call counts as a timed-out parse.
    pub fn with_parse_timeout(mut self, timeout: Duration) -> Self {
        self.parse_timeout = timeout;
        self
    }

    pub fn parse_timeout(&self) -> Duration {
        self.parse_timeout
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    pub fn store(&self) -> &Arc<KnowledgeStore> {
        &self.store
    }

    /// Sorted names of all committed files.
    pub fn processed_filenames(&self) -> Vec<String> {
        self.state().index.filenames()
    }

    pub fn is_processed(&self, filename: &str) -> bool {
        self.state().index.contains(filename)
    }

    /// Results of parses that finish after this call are dropped.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Check the index and claim the in-flight slot in one critical section.
    fn claim(&self, filename: &str) -> std::result::Result<InFlightGuard<'_>, IngestOutcome> {
        let mut state = self.state();
        if state.index.contains(filename) {
            return Err(IngestOutcome::Skipped);
        }
        if !state.in_flight.insert(filename.to_string()) {
            return Err(IngestOutcome::Coalesced);
        }
        Ok(InFlightGuard {
            coordinator: self,
            filename: filename.to_string(),
        })
    }

    /// Run one candidate through the pipeline.
    pub async fn handle_candidate(&self, file: &WatchedFile) -> IngestOutcome {
        if self.is_shutting_down() {
            return IngestOutcome::Discarded;
        }

        let _guard = match self.claim(&file.name) {
            Ok(guard) => guard,
            Err(outcome) => {
                log::debug!("ingest: {} {:?}", file.name, outcome);
                return outcome;
            }
        };

        let path = file.path_in(&self.watch_dir);
        if let Err(e) = std::fs::File::open(&path) {
            log::warn!("ingest: {} vanished before parsing: {}", file.name, e);
            return IngestOutcome::Vanished;
        }
        if !path.is_file() {
            log::warn!("ingest: {} is no longer a regular file", file.name);
            return IngestOutcome::Vanished;
        }

        let metadata = ParseMetadata {
            filename: file.name.clone(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            source: self.source_tag.clone(),
        };

        log::info!("Processing {}", file.name);
        let start = std::time::Instant::now();
        let parse = self.gateway.parse(&path, &metadata);
        let outcome = match tokio::time::timeout(self.parse_timeout, parse).await {
            Ok(outcome) => outcome,
            Err(_) => ParseOutcome::Failure(ParseFailure::TimedOut(self.parse_timeout)),
        };

        if self.is_shutting_down() {
            log::info!("ingest: discarding result for {} (shutting down)", file.name);
            return IngestOutcome::Discarded;
        }

        let payload = match outcome {
            ParseOutcome::Success(payload) if payload.trim().is_empty() => {
                log::warn!("ingest: parser returned no facts for {}", file.name);
                let failure = ParseFailure::Rejected("empty payload".to_string());
                return IngestOutcome::ParseFailed(failure.to_string());
            }
            ParseOutcome::Success(payload) => payload,
            ParseOutcome::Failure(ParseFailure::Unavailable(reason)) => {
                log::warn!("ingest: parser unavailable for {}: {}", file.name, reason);
                return IngestOutcome::GatewayUnavailable(reason);
            }
            ParseOutcome::Failure(failure) => {
                log::warn!("ingest: failed to parse {}: {}", file.name, failure);
                return IngestOutcome::ParseFailed(failure.to_string());
            }
        };

        let store = Arc::clone(&self.store);
        let filename = file.name.clone();
        let appended = tokio::task::spawn_blocking(move || store.append(&filename, &payload)).await;

        let record = match appended {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => {
                log::error!("ingest: failed to store facts for {}: {}", file.name, e);
                return IngestOutcome::StoreFailed(e.to_string());
            }
            Err(e) => {
                log::error!("ingest: store task for {} failed: {}", file.name, e);
                return IngestOutcome::StoreFailed(e.to_string());
            }
        };

        self.state().index.insert(record.clone());
        log::info!(
            "Committed {} ({} bytes of facts) in {:?}",
            file.name,
            record.fact_block_size,
            start.elapsed()
        );
        IngestOutcome::Committed(record)
    }

    /// Run candidates one after another; stops early on shutdown.
    pub async fn process_backlog(&self, files: &[WatchedFile]) -> IngestReport {
        let mut report = IngestReport::default();
        for file in files {
            if self.is_shutting_down() {
                break;
            }
            let outcome = self.handle_candidate(file).await;
            report.record(&outcome);
        }
        if report.candidates > 0 {
            log::info!(
                "Backlog: {} candidates, {} committed, {} skipped, {} failed",
                report.candidates,
                report.committed,
                report.skipped,
                report.failed()
            );
        }
        report
    }
}
