//! Directory walk yielding the candidate files of a workspace.

use std::path::Path;
use std::sync::Arc;

use ignore::WalkBuilder;
use tracing::{debug, warn};

use crate::error::{IndexError, Result};
use crate::indexer::filter::FileFilter;
use crate::shutdown::Shutdown;

/// Forward-slash path of `path` relative to `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let rel = crate::clean_path(&rel.to_string_lossy()).replace('\\', "/");
    (!rel.is_empty()).then_some(rel)
}

/// Hidden entries (any component starting with `.`) are never indexed.
pub fn is_hidden(rel_path: &str) -> bool {
    rel_path.split('/').any(|part| part.starts_with('.'))
}

/// Every regular file below `root` accepted by `filter`, as sorted
/// forward-slash relative paths. Stops early, returning what it has, once
/// `shutdown` is raised.
pub fn scan(root: &Path, filter: Arc<dyn FileFilter>, shutdown: &Shutdown) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(IndexError::not_found(format!("directory {}", root.display())));
    }

    let mut builder = WalkBuilder::new(root);
    builder.hidden(true);
    builder.parents(false);
    builder.require_git(false);
    builder.git_ignore(filter.uses_git_ignore());
    builder.git_exclude(filter.uses_git_ignore());
    builder.git_global(false);
    builder.follow_links(false);

    let walk_root = root.to_path_buf();
    let entry_filter = Arc::clone(&filter);
    builder.filter_entry(move |entry| {
        if entry.depth() == 0 {
            return true;
        }
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        relative_path(&walk_root, entry.path())
            .is_some_and(|rel| entry_filter.accept(&rel, is_dir))
    });

    let mut files = Vec::new();
    for result in builder.build() {
        if shutdown.is_triggered() {
            debug!(root = %root.display(), "Scan interrupted by shutdown");
            break;
        }
        let entry = match result {
            Ok(entry) => entry,
            Err(e) => {
                warn!(root = %root.display(), error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        if let Some(rel) = relative_path(root, entry.path()) {
            files.push(rel);
        }
    }
    files.sort();
    Ok(files)
}
