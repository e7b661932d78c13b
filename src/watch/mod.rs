//! Directory watcher: one-shot backlog scan plus a live notify subscription.
//!
//! Both sources yield [`WatchedFile`]s for the top level of the watched
//! directory only, filtered by extension. No deduplication against processed
//! files happens here; the ingestion coordinator owns that decision.

mod watcher;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{ChemkgError, Result};

/// A candidate file in the watched directory, identified by its name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchedFile {
    pub name: String,
    /// Lowercase, without the dot.
    pub extension: String,
}

impl WatchedFile {
    /// Build from a path if its extension is in `extensions` (lowercase, no dot).
    pub fn from_path(path: &Path, extensions: &[String]) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_string();
        let extension = path.extension()?.to_str()?.to_lowercase();
        if !extensions.iter().any(|e| *e == extension) {
            return None;
        }
        Some(Self { name, extension })
    }

    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(&self.name)
    }
}

/// Watches one directory (non-recursively) for chemistry output files.
#[derive(Debug, Clone)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    extensions: Vec<String>,
    debounce: Duration,
    channel_capacity: usize,
}

impl DirectoryWatcher {
    /// Create the watcher, creating `dir` if it does not exist.
    pub fn new<P: AsRef<Path>>(
        dir: P,
        extensions: Vec<String>,
        debounce_ms: u64,
        channel_capacity: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir).map_err(|e| {
            ChemkgError::Watch(format!("cannot create watch directory {}: {}", dir.display(), e))
        })?;
        if !dir.is_dir() {
            return Err(ChemkgError::Watch(format!(
                "watch path is not a directory: {}",
                dir.display()
            )));
        }

        let extensions: Vec<String> = extensions
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        if extensions.is_empty() {
            return Err(ChemkgError::InvalidInput(
                "at least one watched extension is required".to_string(),
            ));
        }

        Ok(Self {
            dir,
            extensions,
            debounce: Duration::from_millis(debounce_ms),
            channel_capacity: channel_capacity.max(1),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.watch_dir(),
            config.extensions(),
            config.watch.debounce_ms,
            config.watch.channel_capacity,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// List matching files currently in the directory, sorted by name.
    pub fn backlog_scan(&self) -> Result<Vec<WatchedFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.dir).min_depth(1).max_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("watch: skipping unreadable entry in {}: {}", self.dir.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(file) = WatchedFile::from_path(entry.path(), &self.extensions) {
                files.push(file);
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        log::debug!("watch: backlog scan of {} found {} files", self.dir.display(), files.len());
        Ok(files)
    }

    /// Start the live subscription.
    pub fn subscribe(&self) -> Result<WatchSubscription> {
        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let stop = Arc::new(AtomicBool::new(false));
        watcher::spawn_watcher_thread(
            &self.dir,
            self.extensions.clone(),
            self.debounce,
            tx,
            Arc::clone(&stop),
        )?;
        log::info!(
            "watch: watching {} for .{}",
            self.dir.display(),
            self.extensions.join(", .")
        );
        Ok(WatchSubscription {
            events: ReceiverStream::new(rx),
            stop,
        })
    }
}

/// Live stream of candidate files. Dropping it stops the watcher thread.
pub struct WatchSubscription {
    events: ReceiverStream<WatchedFile>,
    stop: Arc<AtomicBool>,
}

impl WatchSubscription {
    /// Next candidate, or `None` once the watcher has stopped.
    pub async fn next(&mut self) -> Option<WatchedFile> {
        self.events.next().await
    }

    /// Ask the watcher thread to exit. It notices within one debounce tick.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        self.events.close();
    }
}

impl Drop for WatchSubscription {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn exts() -> Vec<String> {
        vec!["log".to_string(), "out".to_string()]
    }

    #[test]
    fn test_watched_file_from_path() {
        let file = WatchedFile::from_path(Path::new("/data/Lactone.LOG"), &exts()).unwrap();
        assert_eq!(file.name, "Lactone.LOG");
        assert_eq!(file.extension, "log");
        assert!(WatchedFile::from_path(Path::new("/data/readme.txt"), &exts()).is_none());
        assert!(WatchedFile::from_path(Path::new("/data/noext"), &exts()).is_none());
    }

    #[test]
    fn test_new_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("incoming/gaussian");
        let watcher = DirectoryWatcher::new(&dir, exts(), 100, 8).unwrap();
        assert!(dir.is_dir());
        assert_eq!(watcher.dir(), dir.as_path());
    }

    #[test]
    fn test_new_rejects_file_path() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("not-a-dir");
        fs::write(&file, "x").unwrap();
        assert!(DirectoryWatcher::new(&file, exts(), 100, 8).is_err());
    }

    #[test]
    fn test_new_normalizes_extensions() {
        let temp_dir = TempDir::new().unwrap();
        let watcher =
            DirectoryWatcher::new(temp_dir.path(), vec![".LOG".into(), " ".into()], 100, 8).unwrap();
        assert_eq!(watcher.extensions(), &["log".to_string()]);
        assert!(DirectoryWatcher::new(temp_dir.path(), vec![], 100, 8).is_err());
    }

    #[test]
    fn test_backlog_scan_filters_and_sorts() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("b.out"), "x").unwrap();
        fs::write(dir.join("a.LOG"), "x").unwrap();
        fs::write(dir.join("notes.txt"), "x").unwrap();
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("nested/c.log"), "x").unwrap();
        fs::create_dir_all(dir.join("dir.log")).unwrap();

        let watcher = DirectoryWatcher::new(dir, exts(), 100, 8).unwrap();
        let names: Vec<String> = watcher
            .backlog_scan()
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["a.LOG".to_string(), "b.out".to_string()]);
    }

    #[tokio::test]
    async fn test_subscription_reports_new_file() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = DirectoryWatcher::new(temp_dir.path(), exts(), 50, 8).unwrap();
        let mut subscription = watcher.subscribe().unwrap();

        fs::write(temp_dir.path().join("ignored.txt"), "x").unwrap();
        fs::write(temp_dir.path().join("lactone.log"), "Gaussian output").unwrap();

        let file = tokio::time::timeout(Duration::from_secs(10), subscription.next())
            .await
            .expect("watcher event")
            .expect("open stream");
        assert_eq!(file.name, "lactone.log");
        subscription.stop();
    }
}
