//! File-system watcher feeding single-file updates to the indexer.
//!
//! One `notify` watcher covers every workspace root. Events are collected
//! for a debounce window and then dispatched per workspace: each changed
//! path is re-indexed or forgotten depending on whether it still exists. A
//! window with too many changes for one workspace turns into a full sync.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, info, warn};

use crate::error::{IndexError, Result};
use crate::indexer::scanner::{is_hidden, relative_path};
use crate::indexer::Indexer;
use crate::shutdown::Shutdown;
use crate::workspace::Workspace;

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub debounce: Duration,
    /// More changes than this in one window trigger a full sync.
    pub bulk_threshold: usize,
}

impl Default for WatchOptions {
    fn default() -> Self {
        WatchOptions {
            debounce: Duration::from_millis(500),
            bulk_threshold: 100,
        }
    }
}

/// Longest the event thread sleeps before looking at the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

fn watch_error(e: notify::Error) -> IndexError {
    IndexError::Io(std::io::Error::other(e.to_string()))
}

pub struct WorkspaceWatcher {
    watcher: Mutex<RecommendedWatcher>,
    watched: Mutex<HashSet<PathBuf>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkspaceWatcher {
    /// Start the event thread. Roots are added with [`WorkspaceWatcher::watch`].
    pub fn start(indexer: Arc<Indexer>, shutdown: Shutdown, options: WatchOptions) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let watcher = RecommendedWatcher::new(tx, Config::default()).map_err(watch_error)?;
        let handle = std::thread::Builder::new()
            .name("haystack-watcher".to_string())
            .spawn(move || {
                let tick = options.debounce.min(SHUTDOWN_POLL);
                let mut changed: HashSet<PathBuf> = HashSet::new();
                let mut last_event = Instant::now();
                while !shutdown.is_triggered() {
                    match rx.recv_timeout(tick) {
                        Ok(Ok(event)) => {
                            if matches!(
                                event.kind,
                                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                            ) {
                                changed.extend(event.paths);
                                last_event = Instant::now();
                            }
                        }
                        Ok(Err(e)) => warn!(error = %e, "File watcher error"),
                        Err(RecvTimeoutError::Timeout) => {
                            if !changed.is_empty() && last_event.elapsed() >= options.debounce {
                                let batch: Vec<PathBuf> = changed.drain().collect();
                                dispatch(&indexer, &batch, options.bulk_threshold);
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("File watcher stopped");
            })?;
        Ok(WorkspaceWatcher {
            watcher: Mutex::new(watcher),
            watched: Mutex::new(HashSet::new()),
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn watch(&self, root: &str) -> Result<()> {
        let root = PathBuf::from(root);
        let mut watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
        if watched.contains(&root) {
            return Ok(());
        }
        self.watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .watch(&root, RecursiveMode::Recursive)
            .map_err(watch_error)?;
        info!(root = %root.display(), "Watching workspace");
        watched.insert(root);
        Ok(())
    }

    pub fn unwatch(&self, root: &str) {
        let root = PathBuf::from(root);
        let mut watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
        if !watched.remove(&root) {
            return;
        }
        if let Err(e) = self
            .watcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unwatch(&root)
        {
            debug!(root = %root.display(), error = %e, "Unwatch failed");
        }
    }

    /// Wait for the event thread, which exits once shutdown is raised.
    pub fn join(&self) {
        let handle = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

/// Workspace whose root is the longest prefix of `path`.
fn owner<'a>(workspaces: &'a [Workspace], path: &Path) -> Option<&'a Workspace> {
    workspaces
        .iter()
        .filter(|ws| path.starts_with(&ws.path))
        .max_by_key(|ws| ws.path.len())
}

fn dispatch(indexer: &Arc<Indexer>, paths: &[PathBuf], bulk_threshold: usize) {
    let workspaces = indexer.registry().list();
    let mut per_workspace: HashMap<&str, (&Workspace, Vec<String>)> = HashMap::new();
    for path in paths {
        let Some(ws) = owner(&workspaces, path) else {
            continue;
        };
        let Some(rel) = relative_path(Path::new(&ws.path), path) else {
            continue;
        };
        if is_hidden(&rel) {
            continue;
        }
        per_workspace
            .entry(ws.id.as_str())
            .or_insert_with(|| (ws, Vec::new()))
            .1
            .push(rel);
    }

    for (ws, rels) in per_workspace.into_values() {
        if rels.len() > bulk_threshold {
            info!(workspace = %ws.id, changes = rels.len(), "Bulk change, requesting full sync");
            if let Err(e) = indexer.request_sync(ws.clone()) {
                warn!(workspace = %ws.id, error = %e, "Failed to start sync");
            }
            continue;
        }
        apply(indexer, ws, &rels);
    }
}

fn apply(indexer: &Arc<Indexer>, ws: &Workspace, rels: &[String]) {
    let filter = match indexer.filter_for(ws) {
        Ok(f) => f,
        Err(e) => {
            warn!(workspace = %ws.id, error = %e, "Cannot build filter");
            return;
        }
    };
    let (mut updated, mut removed) = (0usize, 0usize);
    for rel in rels {
        let abs = ws.abs_path(rel);
        let path = Path::new(&abs);
        if path.is_dir() {
            // a directory appeared; its files may not have produced events
            if filter.accept(rel, true) {
                if let Err(e) = indexer.request_sync(ws.clone()) {
                    warn!(workspace = %ws.id, error = %e, "Failed to start sync");
                }
                return;
            }
            continue;
        }
        let result = if path.is_file() {
            if !filter.accept(rel, false) {
                continue;
            }
            updated += 1;
            match indexer.index_file(ws, rel) {
                Err(IndexError::NotFound(_)) => Ok(()),
                other => other,
            }
        } else {
            removed += 1;
            indexer.forget_file(ws, rel)
        };
        if let Err(e) = result {
            warn!(workspace = %ws.id, file = %rel, error = %e, "Watcher update failed");
        }
    }
    debug!(workspace = %ws.id, updated, removed, "Applied file changes");
}
