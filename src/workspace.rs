//! Workspaces and the in-memory registry over their `ws:` rows.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::codec;
use crate::config::Filters;
use crate::error::{IndexError, Result};
use crate::store::KvStore;
use crate::writer::{WriteQueue, Writer};

/// A registered root directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Decimal counter value. Taken from the row key on load.
    pub id: String,
    /// Absolute, normalised root path.
    pub path: String,
    #[serde(default = "default_true")]
    pub use_global_filters: bool,
    #[serde(default)]
    pub filters: Option<Filters>,
    #[serde(default)]
    pub total_files: usize,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub last_full_sync: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl Workspace {
    /// A not yet persisted workspace rooted at `path`. The id is assigned by
    /// the write worker.
    pub fn new(path: impl Into<String>) -> Self {
        let now = Utc::now();
        Workspace {
            id: String::new(),
            path: path.into(),
            use_global_filters: true,
            filters: None,
            total_files: 0,
            created_at: now,
            last_accessed: now,
            last_full_sync: None,
        }
    }

    /// Filters for this workspace: its own unless it defers to `global`.
    pub fn effective_filters<'a>(&'a self, global: &'a Filters) -> &'a Filters {
        match (&self.filters, self.use_global_filters) {
            (Some(own), false) => own,
            _ => global,
        }
    }

    /// Absolute path of a file given relative to the root.
    pub fn abs_path(&self, rel_path: &str) -> String {
        let root = self.path.trim_end_matches(['/', '\\']);
        format!("{}/{}", root, rel_path.trim_start_matches('/'))
    }

    /// Path of `abs_path` relative to the root, forward slashes, or `None`
    /// when it lies outside the workspace.
    pub fn rel_path(&self, abs_path: &str) -> Option<String> {
        let rel = Path::new(abs_path).strip_prefix(&self.path).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        (!rel.is_empty()).then_some(rel)
    }
}

// ─── Mutations (write worker only) ───────────────────────────────────

impl Writer {
    /// Assign the next id and persist the workspace. Counter and row are
    /// written in one batch.
    pub(crate) fn create_workspace(&mut self, mut workspace: Workspace) -> Result<Workspace> {
        let next = match self.store.get(codec::NEXT_WORKSPACE_ID_KEY.as_bytes())? {
            None => 0,
            Some(raw) => codec::decode_next_workspace_id(&raw).ok_or_else(|| IndexError::Corruption {
                key: codec::NEXT_WORKSPACE_ID_KEY.to_string(),
                message: format!("not a counter: {}", String::from_utf8_lossy(&raw)),
            })?,
        };
        workspace.id = next.to_string();

        let mut batch = self.store.batch();
        batch.put(
            codec::NEXT_WORKSPACE_ID_KEY,
            codec::encode_next_workspace_id(next + 1),
        );
        batch.put(
            codec::workspace_key(&workspace.id),
            codec::encode_json(&workspace)?,
        );
        batch.commit()?;
        Ok(workspace)
    }

    /// Error unless the `ws:` row of `workspace_id` exists. Tasks queued
    /// behind a delete see the row gone and must not write.
    pub(crate) fn require_workspace(&self, workspace_id: &str) -> Result<()> {
        if self.store.is_closed() {
            return Err(IndexError::StoreClosed);
        }
        match self.store.get(codec::workspace_key(workspace_id).as_bytes())? {
            Some(_) => Ok(()),
            None => Err(IndexError::not_found(format!("workspace {}", workspace_id))),
        }
    }

    /// Rewrite an existing workspace row. A deleted workspace stays deleted.
    pub(crate) fn save_workspace(&mut self, workspace: &Workspace) -> Result<()> {
        self.require_workspace(&workspace.id)?;
        self.store.put(
            codec::workspace_key(&workspace.id).as_bytes(),
            &codec::encode_json(workspace)?,
        )
    }

    /// Delete the `ws:` row and every workspace-scoped row in one batch,
    /// then forget its pending postings.
    pub(crate) fn delete_workspace(&mut self, workspace_id: &str) -> Result<()> {
        let mut batch = self.store.batch();
        batch.delete(codec::workspace_key(workspace_id));
        for prefix in codec::workspace_scoped_prefixes(workspace_id) {
            batch.delete_prefix(prefix);
        }
        batch.commit()?;
        self.cache.drop_workspace(workspace_id);
        Ok(())
    }
}

/// Store a bare `ws:` row for each id, for tests that drive the writer
/// without a registry.
#[cfg(test)]
pub(crate) fn seed_workspace_rows(store: &KvStore, ids: &[&str]) {
    for id in ids {
        let mut ws = Workspace::new(format!("/tmp/ws{}", id));
        ws.id = id.to_string();
        let value = codec::encode_json(&ws).unwrap();
        store.put(codec::workspace_key(id).as_bytes(), &value).unwrap();
    }
}

// ─── Registry ────────────────────────────────────────────────────────

/// `last_accessed` is persisted at most this often per workspace.
const ACCESS_PERSIST_INTERVAL: i64 = 60;

#[derive(Debug, Default)]
struct Maps {
    by_id: HashMap<String, Workspace>,
    /// normalised path -> id
    by_path: HashMap<String, String>,
}

impl Maps {
    fn insert(&mut self, workspace: Workspace) {
        self.by_path.insert(workspace.path.clone(), workspace.id.clone());
        self.by_id.insert(workspace.id.clone(), workspace);
    }

    fn by_path(&self, path: &str) -> Option<&Workspace> {
        self.by_path.get(path).and_then(|id| self.by_id.get(id))
    }
}

/// Directory of known workspaces, keyed by id and by path.
///
/// Mutations go through the write queue while the mutex is held, so two
/// concurrent creates of one path cannot both succeed.
pub struct WorkspaceRegistry {
    queue: WriteQueue,
    maps: Mutex<Maps>,
}

impl WorkspaceRegistry {
    /// Populate from every `ws:` row in the store.
    pub fn load(store: &Arc<KvStore>, queue: WriteQueue) -> Result<Self> {
        let mut maps = Maps::default();
        let mut bad = 0usize;
        store.scan(codec::WORKSPACE_PREFIX.as_bytes(), |k, v| {
            let key = String::from_utf8_lossy(k);
            let Some(id) = codec::decode_workspace_key(&key) else {
                bad += 1;
                return true;
            };
            match codec::decode_json::<Workspace>(&key, v) {
                Ok(mut ws) => {
                    ws.id = id.to_string();
                    maps.insert(ws);
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable workspace row");
                    bad += 1;
                }
            }
            true
        })?;
        info!(workspaces = maps.by_id.len(), skipped = bad, "Workspace registry loaded");
        Ok(WorkspaceRegistry {
            queue,
            maps: Mutex::new(maps),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Maps> {
        self.maps.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register an existing directory.
    pub fn create(&self, path: &str) -> Result<Workspace> {
        let path = validate_path(path)?;
        let meta = std::fs::metadata(&path)
            .map_err(|_| IndexError::invalid(format!("{} does not exist", path)))?;
        if !meta.is_dir() {
            return Err(IndexError::invalid(format!("{} is not a directory", path)));
        }

        let mut maps = self.lock();
        if maps.by_path.contains_key(&path) {
            return Err(IndexError::invalid("workspace already exists"));
        }
        let created = self.queue.create_workspace(Workspace::new(path))?;
        maps.insert(created.clone());
        info!(workspace = %created.id, path = %created.path, "Workspace created");
        Ok(created)
    }

    /// Look up by path and refresh `last_accessed`.
    pub fn get(&self, path: &str) -> Result<Workspace> {
        let path = validate_path(path)?;
        let mut maps = self.lock();
        let id = maps
            .by_path
            .get(&path)
            .cloned()
            .ok_or_else(|| IndexError::not_found(format!("workspace {}", path)))?;
        let Some(ws) = maps.by_id.get_mut(&id) else {
            return Err(IndexError::not_found(format!("workspace {}", path)));
        };
        let now = Utc::now();
        let stale = now - ws.last_accessed >= ChronoDuration::seconds(ACCESS_PERSIST_INTERVAL);
        ws.last_accessed = now;
        let snapshot = ws.clone();
        drop(maps);

        if stale {
            match self.queue.save_workspace(snapshot.clone()) {
                Ok(()) | Err(IndexError::NotFound(_)) => {}
                Err(e) => warn!(workspace = %snapshot.id, error = %e, "Failed to persist access time"),
            }
        }
        Ok(snapshot)
    }

    /// Look up by path without touching it.
    pub fn find(&self, path: &str) -> Option<Workspace> {
        let path = crate::normalize_path(path);
        self.lock().by_path(&path).cloned()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Workspace> {
        self.lock().by_id.get(id).cloned()
    }

    /// Every workspace, in id order.
    pub fn list(&self) -> Vec<Workspace> {
        let mut all: Vec<Workspace> = self.lock().by_id.values().cloned().collect();
        all.sort_by_key(|ws| ws.id.parse::<u64>().unwrap_or(u64::MAX));
        all
    }

    /// Persist a changed workspace. Fails with `NotFound` if it was deleted
    /// in the meantime, so a late sync cannot resurrect it.
    pub fn update(&self, workspace: Workspace) -> Result<()> {
        let mut maps = self.lock();
        if !maps.by_id.contains_key(&workspace.id) {
            return Err(IndexError::not_found(format!("workspace {}", workspace.path)));
        }
        self.queue.save_workspace(workspace.clone())?;
        maps.insert(workspace);
        Ok(())
    }

    /// Remove a workspace and everything indexed under it.
    pub fn delete(&self, path: &str) -> Result<Workspace> {
        let path = validate_path(path)?;
        let mut maps = self.lock();
        let ws = maps
            .by_path(&path)
            .cloned()
            .ok_or_else(|| IndexError::not_found(format!("workspace {}", path)))?;
        self.queue.delete_workspace(&ws.id)?;
        maps.by_path.remove(&ws.path);
        maps.by_id.remove(&ws.id);
        info!(workspace = %ws.id, path = %ws.path, "Workspace deleted");
        Ok(ws)
    }
}

/// Normalise a client path, rejecting relative ones.
fn validate_path(path: &str) -> Result<String> {
    if path.trim().is_empty() {
        return Err(IndexError::invalid("workspace path is empty"));
    }
    let normalized = crate::normalize_path(path);
    if !crate::is_absolute_path(&normalized) {
        return Err(IndexError::invalid(format!("{} is not an absolute path", path)));
    }
    Ok(normalized)
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
