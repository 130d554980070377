//! Keeps the index in step with the files of each workspace: full syncs
//! (scan, parse in parallel, submit in chunks, drop vanished files) and
//! single-file updates from the API and the watcher.

pub mod filter;
pub mod parser;
pub mod scanner;
pub mod watcher;

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::Filters;
use crate::document::{count_documents, get_document, list_document_paths, Document};
use crate::error::{IndexError, Result};
use crate::shutdown::Shutdown;
use crate::store::KvStore;
use crate::workspace::{Workspace, WorkspaceRegistry};
use crate::writer::WriteQueue;

use filter::{build_filter, FileFilter};
use parser::{parse_file, ParseOutcome};

/// Documents per `SaveNewDocuments`/`UpdateDocuments` task.
pub const SYNC_CHUNK_SIZE: usize = 64;

#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub max_file_size: u64,
    pub workers: usize,
    /// Used by workspaces that defer to the global filters.
    pub filters: Filters,
}

/// Outcome of one full sync.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub files: usize,
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub deleted: usize,
    /// Shutdown cut the sync short; nothing was deleted.
    pub interrupted: bool,
}

impl SyncStats {
    fn merge(&mut self, other: &SyncStats) {
        self.added += other.added;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.skipped += other.skipped;
    }
}

/// Removes a workspace id from the running set on drop.
struct SyncGuard<'a> {
    running: &'a Mutex<HashSet<String>>,
    workspace_id: String,
}

impl<'a> SyncGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<String>>, workspace_id: &str) -> Option<Self> {
        let mut set = running.lock().unwrap_or_else(|e| e.into_inner());
        set.insert(workspace_id.to_string()).then(|| SyncGuard {
            running,
            workspace_id: workspace_id.to_string(),
        })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.workspace_id);
    }
}

pub struct Indexer {
    store: Arc<KvStore>,
    queue: WriteQueue,
    registry: Arc<WorkspaceRegistry>,
    options: IndexerOptions,
    shutdown: Shutdown,
    running: Mutex<HashSet<String>>,
}

impl Indexer {
    pub fn new(
        store: Arc<KvStore>,
        queue: WriteQueue,
        registry: Arc<WorkspaceRegistry>,
        options: IndexerOptions,
        shutdown: Shutdown,
    ) -> Self {
        Indexer {
            store,
            queue,
            registry,
            options,
            shutdown,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn registry(&self) -> &Arc<WorkspaceRegistry> {
        &self.registry
    }

    /// The filter `workspace` is scanned with.
    pub fn filter_for(&self, workspace: &Workspace) -> Result<Arc<dyn FileFilter>> {
        build_filter(
            Path::new(&workspace.path),
            workspace.effective_filters(&self.options.filters),
        )
    }

    pub fn is_syncing(&self, workspace_id: &str) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(workspace_id)
    }

    // ─── Full sync ───────────────────────────────────────────────────

    /// Bring the index of `workspace` in line with its directory. Returns
    /// `None` when a sync of the same workspace is already running.
    pub fn sync_workspace(&self, workspace: &Workspace) -> Result<Option<SyncStats>> {
        let Some(_guard) = SyncGuard::acquire(&self.running, &workspace.id) else {
            debug!(workspace = %workspace.id, "Sync already running, request coalesced");
            return Ok(None);
        };
        let started = Instant::now();
        let root = Path::new(&workspace.path);
        let filter = self.filter_for(workspace)?;
        let files = scanner::scan(root, filter, &self.shutdown)?;

        let mut stats = SyncStats {
            files: files.len(),
            ..SyncStats::default()
        };
        let keep = match self.parse_all(workspace, &files, &mut stats) {
            Ok(keep) => keep,
            Err(IndexError::NotFound(_)) if self.registry.get_by_id(&workspace.id).is_none() => {
                info!(workspace = %workspace.id, "Workspace deleted during sync");
                stats.interrupted = true;
                return Ok(Some(stats));
            }
            Err(e) => return Err(e),
        };
        if self.shutdown.is_triggered() {
            stats.interrupted = true;
            info!(workspace = %workspace.id, "Sync interrupted by shutdown");
            return Ok(Some(stats));
        }

        for (doc_id, rel_path) in list_document_paths(&self.store, &workspace.id)? {
            if keep.contains(&rel_path) {
                continue;
            }
            match self.queue.delete_document(&workspace.id, &doc_id) {
                Ok(()) | Err(IndexError::NotFound(_)) => stats.deleted += 1,
                Err(e) => return Err(e),
            }
        }

        let mut updated = self
            .registry
            .get_by_id(&workspace.id)
            .unwrap_or_else(|| workspace.clone());
        updated.total_files = count_documents(&self.store, &workspace.id)?;
        updated.last_full_sync = Some(Utc::now());
        if let Err(e) = self.registry.update(updated) {
            warn!(workspace = %workspace.id, error = %e, "Could not record sync time");
        }

        info!(
            workspace = %workspace.id,
            path = %workspace.path,
            files = stats.files,
            added = stats.added,
            updated = stats.updated,
            unchanged = stats.unchanged,
            skipped = stats.skipped,
            deleted = stats.deleted,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Workspace sync complete"
        );
        Ok(Some(stats))
    }

    /// Parse `files` on `options.workers` threads. Returns the relative
    /// paths that are indexed after the pass. The first worker error stops
    /// the others.
    fn parse_all(
        &self,
        workspace: &Workspace,
        files: &[String],
        stats: &mut SyncStats,
    ) -> Result<HashSet<String>> {
        let next = AtomicUsize::new(0);
        let failed = AtomicBool::new(false);
        let workers = self.options.workers.clamp(1, files.len().max(1));
        let results: Vec<Result<(SyncStats, Vec<String>)>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    s.spawn(|| {
                        let result = self.parse_worker(workspace, files, &next, &failed);
                        if result.is_err() {
                            failed.store(true, Ordering::Relaxed);
                        }
                        result
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .unwrap_or_else(|_| Err(IndexError::Store("parser thread panicked".into())))
                })
                .collect()
        });

        let mut keep = HashSet::with_capacity(files.len());
        for result in results {
            let (local, kept) = result?;
            stats.merge(&local);
            keep.extend(kept);
        }
        Ok(keep)
    }

    fn parse_worker(
        &self,
        workspace: &Workspace,
        files: &[String],
        next: &AtomicUsize,
        failed: &AtomicBool,
    ) -> Result<(SyncStats, Vec<String>)> {
        let mut stats = SyncStats::default();
        let mut keep = Vec::new();
        let mut new_docs = Vec::with_capacity(SYNC_CHUNK_SIZE);
        let mut changed_docs = Vec::with_capacity(SYNC_CHUNK_SIZE);

        loop {
            if self.shutdown.is_triggered() || failed.load(Ordering::Relaxed) {
                break;
            }
            let i = next.fetch_add(1, Ordering::Relaxed);
            let Some(rel_path) = files.get(i) else {
                break;
            };
            match parse_file(&self.store, workspace, rel_path, self.options.max_file_size) {
                Ok(ParseOutcome::New(doc)) => {
                    keep.push(rel_path.clone());
                    stats.added += 1;
                    new_docs.push(doc);
                    if new_docs.len() >= SYNC_CHUNK_SIZE {
                        self.queue
                            .save_new_documents(&workspace.id, std::mem::take(&mut new_docs))?;
                    }
                }
                Ok(ParseOutcome::Updated { doc, .. }) => {
                    keep.push(rel_path.clone());
                    stats.updated += 1;
                    changed_docs.push(doc);
                    if changed_docs.len() >= SYNC_CHUNK_SIZE {
                        self.queue
                            .update_documents(&workspace.id, std::mem::take(&mut changed_docs))?;
                    }
                }
                Ok(ParseOutcome::Unchanged) => {
                    keep.push(rel_path.clone());
                    stats.unchanged += 1;
                }
                Ok(ParseOutcome::Skipped(reason)) => {
                    debug!(file = %rel_path, ?reason, "Skipping file");
                    stats.skipped += 1;
                }
                Err(IndexError::StoreClosed) => return Err(IndexError::StoreClosed),
                Err(e) => {
                    warn!(file = %rel_path, error = %e, "Failed to parse file");
                    stats.skipped += 1;
                }
            }
        }
        if failed.load(Ordering::Relaxed) {
            return Ok((stats, keep));
        }
        if !new_docs.is_empty() {
            self.queue.save_new_documents(&workspace.id, new_docs)?;
        }
        if !changed_docs.is_empty() {
            self.queue.update_documents(&workspace.id, changed_docs)?;
        }
        Ok((stats, keep))
    }

    /// Sync every registered workspace, one after the other. Failures are
    /// logged and do not stop the others.
    pub fn sync_all(&self) {
        for workspace in self.registry.list() {
            if self.shutdown.is_triggered() {
                return;
            }
            if let Err(e) = self.sync_workspace(&workspace) {
                error!(workspace = %workspace.id, path = %workspace.path, error = %e, "Workspace sync failed");
            }
        }
    }

    /// Run [`Indexer::sync_workspace`] on a background thread.
    pub fn request_sync(self: &Arc<Self>, workspace: Workspace) -> Result<()> {
        let indexer = Arc::clone(self);
        std::thread::Builder::new()
            .name("haystack-sync".to_string())
            .spawn(move || {
                if let Err(e) = indexer.sync_workspace(&workspace) {
                    error!(workspace = %workspace.id, path = %workspace.path, error = %e, "Workspace sync failed");
                }
            })?;
        Ok(())
    }

    /// Run [`Indexer::sync_all`] on a background thread.
    pub fn request_sync_all(self: &Arc<Self>) -> Result<()> {
        let indexer = Arc::clone(self);
        std::thread::Builder::new()
            .name("haystack-sync".to_string())
            .spawn(move || indexer.sync_all())?;
        Ok(())
    }

    // ─── Single files ────────────────────────────────────────────────

    /// Re-index one file. A file that is gone, or no longer indexable, is
    /// dropped from the index.
    pub fn update_document(&self, workspace_path: &str, file_path: &str) -> Result<()> {
        let workspace = self.registry.get(workspace_path)?;
        let rel = resolve_file(&workspace, file_path)?;
        self.index_file(&workspace, &rel)
    }

    /// Drop one file from the index. `NotFound` when it was not indexed.
    pub fn delete_document(&self, workspace_path: &str, file_path: &str) -> Result<()> {
        let workspace = self.registry.get(workspace_path)?;
        let rel = resolve_file(&workspace, file_path)?;
        let id = Document::id_for_path(&workspace.abs_path(&rel));
        self.queue.delete_document(&workspace.id, &id)
    }

    pub(crate) fn index_file(&self, workspace: &Workspace, rel_path: &str) -> Result<()> {
        match parse_file(&self.store, workspace, rel_path, self.options.max_file_size)? {
            ParseOutcome::New(doc) => self.queue.save_new_documents(&workspace.id, vec![doc]),
            ParseOutcome::Updated { doc, .. } => self.queue.update_documents(&workspace.id, vec![doc]),
            ParseOutcome::Unchanged => Ok(()),
            ParseOutcome::Skipped(reason) => {
                let id = Document::id_for_path(&workspace.abs_path(rel_path));
                if get_document(&self.store, &workspace.id, &id, false)?.is_none() {
                    return Err(IndexError::not_found(format!("file {}", rel_path)));
                }
                debug!(file = %rel_path, ?reason, "Dropping file that can no longer be indexed");
                self.queue.delete_document(&workspace.id, &id)
            }
        }
    }

    /// Drop a file that disappeared; unknown files are ignored.
    pub(crate) fn forget_file(&self, workspace: &Workspace, rel_path: &str) -> Result<()> {
        let id = Document::id_for_path(&workspace.abs_path(rel_path));
        match self.queue.delete_document(&workspace.id, &id) {
            Ok(()) | Err(IndexError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Sync every workspace in the background, once, shortly after start.
    pub fn spawn_startup_sync(self: &Arc<Self>, delay: Duration) -> Result<std::thread::JoinHandle<()>> {
        let indexer = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("haystack-startup-sync".to_string())
            .spawn(move || {
                if indexer.shutdown.wait_timeout(delay) {
                    return;
                }
                indexer.sync_all();
            })?;
        Ok(handle)
    }
}

/// Relative path of a client-supplied file path, which may be absolute or
/// relative to the workspace root.
fn resolve_file(workspace: &Workspace, file_path: &str) -> Result<String> {
    let normalized = crate::normalize_path(file_path);
    let rel = if crate::is_absolute_path(&normalized) {
        workspace.rel_path(&normalized).ok_or_else(|| {
            IndexError::invalid(format!("{} is outside workspace {}", file_path, workspace.path))
        })?
    } else {
        normalized
            .replace('\\', "/")
            .trim_start_matches("./")
            .to_string()
    };
    if rel.is_empty() || rel == "." || rel.split('/').any(|part| part == "..") {
        return Err(IndexError::invalid(format!("invalid file path {}", file_path)));
    }
    Ok(rel)
}

#[cfg(test)]
#[path = "indexer_tests.rs"]
mod tests;
