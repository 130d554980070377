//! Pending-write cache: in-memory posting fragments waiting to be flushed.
//!
//! Owned by the write worker and never shared, so there is no locking. New
//! documents append their id under every keyword they contain; the periodic
//! flush turns each ready entry into one posting row. The rows this
//! produces are deliberately small and fragmented; the compactor merges them
//! later.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Minimum time between two non-final flush passes.
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(1);
/// An entry with at least this many ids is flushed right away.
pub const FLUSH_DOC_THRESHOLD: usize = 50;
/// An entry untouched for this long is flushed.
pub const FLUSH_MAX_AGE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub doc_ids: Vec<String>,
    pub updated_at: Instant,
}

/// One entry selected by a flush pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyEntry {
    pub workspace_id: String,
    pub keyword: String,
    /// Sorted and deduplicated.
    pub doc_ids: Vec<String>,
}

#[derive(Debug, Default)]
pub struct PendingWriteCache {
    workspaces: HashMap<String, HashMap<String, PendingEntry>>,
    last_flush: Option<Instant>,
}

impl PendingWriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `doc_id` under each keyword of `workspace_id`.
    pub fn add<I, S>(&mut self, workspace_id: &str, doc_id: &str, keywords: I, now: Instant)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ws = self.workspaces.entry(workspace_id.to_string()).or_default();
        for kw in keywords {
            let entry = ws
                .entry(kw.as_ref().to_string())
                .or_insert_with(|| PendingEntry {
                    doc_ids: Vec::new(),
                    updated_at: now,
                });
            entry.doc_ids.push(doc_id.to_string());
            entry.updated_at = now;
        }
        if ws.is_empty() {
            self.workspaces.remove(workspace_id);
        }
    }

    /// Withdraw a not-yet-flushed id, e.g. when a document loses the keyword
    /// or is deleted before the flush.
    pub fn remove(&mut self, workspace_id: &str, keyword: &str, doc_id: &str) {
        let Some(ws) = self.workspaces.get_mut(workspace_id) else {
            return;
        };
        if let Some(entry) = ws.get_mut(keyword) {
            entry.doc_ids.retain(|id| id != doc_id);
            if entry.doc_ids.is_empty() {
                ws.remove(keyword);
            }
        }
        if ws.is_empty() {
            self.workspaces.remove(workspace_id);
        }
    }

    /// Forget everything pending for a workspace.
    pub fn drop_workspace(&mut self, workspace_id: &str) {
        self.workspaces.remove(workspace_id);
    }

    pub fn is_empty(&self) -> bool {
        self.workspaces.is_empty()
    }

    /// Number of pending `(workspace, keyword)` entries.
    pub fn len(&self) -> usize {
        self.workspaces.values().map(HashMap::len).sum()
    }

    pub fn get(&self, workspace_id: &str, keyword: &str) -> Option<&PendingEntry> {
        self.workspaces.get(workspace_id)?.get(keyword)
    }

    /// Select the entries a flush pass at `now` should write.
    ///
    /// Returns `None` when the previous pass was less than
    /// [`MIN_FLUSH_INTERVAL`] ago and this is not the final pass. Selected
    /// entries stay in the cache until [`PendingWriteCache::mark_flushed`],
    /// so a failed commit loses nothing.
    pub fn select_ready(&mut self, closing: bool, now: Instant) -> Option<Vec<ReadyEntry>> {
        if !closing
            && self
                .last_flush
                .is_some_and(|last| now.saturating_duration_since(last) < MIN_FLUSH_INTERVAL)
        {
            return None;
        }
        self.last_flush = Some(now);

        let mut ready = Vec::new();
        for (ws_id, keywords) in &self.workspaces {
            for (kw, entry) in keywords {
                let due = closing
                    || entry.doc_ids.len() >= FLUSH_DOC_THRESHOLD
                    || now.saturating_duration_since(entry.updated_at) >= FLUSH_MAX_AGE;
                if !due {
                    continue;
                }
                let mut ids = entry.doc_ids.clone();
                ids.sort_unstable();
                ids.dedup();
                ready.push(ReadyEntry {
                    workspace_id: ws_id.clone(),
                    keyword: kw.clone(),
                    doc_ids: ids,
                });
            }
        }
        // deterministic row order makes batches reproducible
        ready.sort_by(|a, b| {
            (a.workspace_id.as_str(), a.keyword.as_str())
                .cmp(&(b.workspace_id.as_str(), b.keyword.as_str()))
        });
        Some(ready)
    }

    /// Drop entries that were written by a committed flush pass. Workspaces
    /// left without entries are removed.
    pub fn mark_flushed(&mut self, flushed: &[ReadyEntry]) {
        for entry in flushed {
            if let Some(ws) = self.workspaces.get_mut(&entry.workspace_id) {
                ws.remove(&entry.keyword);
                if ws.is_empty() {
                    self.workspaces.remove(&entry.workspace_id);
                }
            }
        }
    }
}
