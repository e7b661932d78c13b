//! Watcher thread: notify + debounce, forwards candidate files to the async side.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::event::{EventKind, ModifyKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc as async_mpsc;

use super::WatchedFile;
use crate::error::Result;

/// Start watching `dir` (non-recursive) and spawn the debounce thread.
///
/// The thread is detached; it exits when `stop` is raised, the receiving side
/// of `tx` is dropped, or the notify backend shuts down.
pub(super) fn spawn_watcher_thread(
    dir: &Path,
    extensions: Vec<String>,
    debounce: Duration,
    tx: async_mpsc::Sender<WatchedFile>,
    stop: Arc<AtomicBool>,
) -> Result<()> {
    let (event_tx, event_rx) = mpsc::channel::<Vec<PathBuf>>();

    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(ev) if is_candidate_event(&ev.kind) => {
                let _ = event_tx.send(ev.paths);
            }
            Ok(_) => {}
            Err(e) => log::warn!("watch: notify error: {}", e),
        })?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;

    let dir_display = dir.display().to_string();
    std::thread::Builder::new()
        .name("chemkg-watch".to_string())
        .spawn(move || {
            // The watcher must live as long as the loop; dropping it unregisters.
            let _watcher = watcher;
            debounce_loop(&event_rx, &extensions, debounce, &tx, &stop);
            log::debug!("watch: thread for {} exiting", dir_display);
        })?;

    Ok(())
}

/// Creation, content writes and renames into the directory are candidates.
fn is_candidate_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

fn debounce_loop(
    event_rx: &mpsc::Receiver<Vec<PathBuf>>,
    extensions: &[String],
    debounce: Duration,
    tx: &async_mpsc::Sender<WatchedFile>,
    stop: &AtomicBool,
) {
    let mut pending: HashMap<String, (WatchedFile, Instant)> = HashMap::new();
    let tick = debounce.max(Duration::from_millis(10));

    loop {
        if stop.load(Ordering::SeqCst) {
            return;
        }
        let disconnected = match event_rx.recv_timeout(tick) {
            Ok(paths) => {
                let now = Instant::now();
                for path in paths {
                    if let Some(file) = WatchedFile::from_path(&path, extensions) {
                        pending.insert(file.name.clone(), (file, now));
                    }
                }
                false
            }
            Err(mpsc::RecvTimeoutError::Timeout) => false,
            Err(mpsc::RecvTimeoutError::Disconnected) => true,
        };

        // On disconnect everything still pending is delivered.
        let now = Instant::now();
        let mut ready: Vec<String> = pending
            .iter()
            .filter(|(_, (_, seen))| disconnected || now.duration_since(*seen) >= debounce)
            .map(|(name, _)| name.clone())
            .collect();
        ready.sort();
        for name in ready {
            let Some((file, _)) = pending.remove(&name) else {
                continue;
            };
            if stop.load(Ordering::SeqCst) {
                return;
            }
            if tx.blocking_send(file).is_err() {
                // Receiver dropped: the subscription is gone.
                return;
            }
        }
        if disconnected {
            return;
        }
    }
}
