//! Which files of a workspace are indexed.
//!
//! Two [`FileFilter`] implementations: [`GitIgnoreFilter`] honours the
//! workspace's `.gitignore` files on top of the configured globs,
//! [`GlobFilter`] applies the configured globs alone.

use std::path::Path;
use std::sync::Arc;

use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use tracing::warn;

use crate::config::Filters;
use crate::error::{IndexError, Result};

// ─── Glob lists ──────────────────────────────────────────────────────

/// A gitignore-flavoured glob list matched against forward-slash relative
/// paths.
///
/// A pattern without `/` matches at any depth (`*.rs`, `target`); a pattern
/// containing `/` is anchored at the root. Every pattern also matches
/// everything below a directory it names.
#[derive(Debug, Clone)]
pub struct GlobList {
    set: GlobSet,
    len: usize,
}

impl GlobList {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut len = 0;
        for raw in patterns {
            let raw = raw.as_ref().trim().replace('\\', "/");
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let dir_only = raw.ends_with('/');
            let body = raw.trim_matches('/');
            if body.is_empty() {
                continue;
            }
            let anchored = raw.starts_with('/') || body.contains('/');
            let base = if anchored {
                body.to_string()
            } else {
                format!("**/{}", body)
            };
            let mut variants = vec![format!("{}/**", base)];
            if !dir_only {
                variants.push(base);
            }
            for pattern in variants {
                let glob = GlobBuilder::new(&pattern)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| IndexError::invalid(format!("invalid glob '{}': {}", raw, e)))?;
                builder.add(glob);
            }
            len += 1;
        }
        let set = builder
            .build()
            .map_err(|e| IndexError::invalid(format!("invalid glob list: {}", e)))?;
        Ok(GlobList { set, len })
    }

    /// Comma-separated list, as sent by clients.
    pub fn parse_csv(csv: &str) -> Result<Self> {
        let parts: Vec<&str> = csv.split(',').collect();
        Self::new(&parts)
    }

    pub fn empty() -> Self {
        GlobList {
            set: GlobSet::empty(),
            len: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_match(&self, rel_path: &str) -> bool {
        self.len > 0 && self.set.is_match(rel_path.trim_start_matches('/'))
    }
}

// ─── Filters ─────────────────────────────────────────────────────────

/// Decides whether a path below the workspace root is indexed.
pub trait FileFilter: Send + Sync {
    /// `rel_path` uses forward slashes. Directories are asked first, so a
    /// rejected directory prunes its whole subtree.
    fn accept(&self, rel_path: &str, is_dir: bool) -> bool;

    /// Whether the directory walker should also read nested `.gitignore`
    /// files.
    fn uses_git_ignore(&self) -> bool;
}

fn accept_globs(include: &GlobList, exclude: &GlobList, rel_path: &str, is_dir: bool) -> bool {
    if exclude.is_match(rel_path) {
        return false;
    }
    is_dir || include.is_empty() || include.is_match(rel_path)
}

/// Configured include/exclude globs, nothing else.
pub struct GlobFilter {
    include: GlobList,
    exclude: GlobList,
}

impl GlobFilter {
    pub fn new(filters: &Filters) -> Result<Self> {
        Ok(GlobFilter {
            include: GlobList::new(&filters.include)?,
            exclude: GlobList::new(&filters.exclude.customized)?,
        })
    }
}

impl FileFilter for GlobFilter {
    fn accept(&self, rel_path: &str, is_dir: bool) -> bool {
        accept_globs(&self.include, &self.exclude, rel_path, is_dir)
    }

    fn uses_git_ignore(&self) -> bool {
        false
    }
}

/// Root `.gitignore` rules plus the configured globs. Nested `.gitignore`
/// files are applied by the walker.
pub struct GitIgnoreFilter {
    gitignore: Gitignore,
    include: GlobList,
    exclude: GlobList,
}

impl GitIgnoreFilter {
    pub fn new(root: &Path, filters: &Filters) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(root);
        let file = root.join(".gitignore");
        if file.is_file() {
            if let Some(e) = builder.add(&file) {
                warn!(path = %file.display(), error = %e, "Ignoring bad .gitignore lines");
            }
        }
        let gitignore = builder.build().unwrap_or_else(|e| {
            warn!(root = %root.display(), error = %e, "Unusable .gitignore, ignoring it");
            Gitignore::empty()
        });
        Ok(GitIgnoreFilter {
            gitignore,
            include: GlobList::new(&filters.include)?,
            exclude: GlobList::new(&filters.exclude.customized)?,
        })
    }
}

impl FileFilter for GitIgnoreFilter {
    fn accept(&self, rel_path: &str, is_dir: bool) -> bool {
        if rel_path == ".git" || rel_path.starts_with(".git/") {
            return false;
        }
        if self
            .gitignore
            .matched_path_or_any_parents(rel_path, is_dir)
            .is_ignore()
        {
            return false;
        }
        accept_globs(&self.include, &self.exclude, rel_path, is_dir)
    }

    fn uses_git_ignore(&self) -> bool {
        true
    }
}

/// The filter a workspace rooted at `root` is scanned with.
pub fn build_filter(root: &Path, filters: &Filters) -> Result<Arc<dyn FileFilter>> {
    if filters.exclude.use_git_ignore {
        Ok(Arc::new(GitIgnoreFilter::new(root, filters)?))
    } else {
        Ok(Arc::new(GlobFilter::new(filters)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExcludeFilters;

    fn filters(include: &[&str], exclude: &[&str], git: bool) -> Filters {
        Filters {
            exclude: ExcludeFilters {
                use_git_ignore: git,
                customized: exclude.iter().map(|s| s.to_string()).collect(),
            },
            include: include.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_unanchored_glob_matches_any_depth() {
        let list = GlobList::new(&["*.rs"]).unwrap();
        assert!(list.is_match("main.rs"));
        assert!(list.is_match("src/deep/lib.rs"));
        assert!(!list.is_match("src/lib.rs.bak"));
    }

    #[test]
    fn test_anchored_glob_and_directory_contents() {
        let list = GlobList::new(&["/build", "docs/*.md", "node_modules/"]).unwrap();
        assert!(list.is_match("build"));
        assert!(list.is_match("build/out.o"));
        assert!(!list.is_match("src/build"));
        assert!(list.is_match("docs/a.md"));
        assert!(!list.is_match("docs/sub/a.md"));
        assert!(list.is_match("web/node_modules/x/index.js"));
        assert!(!list.is_match("node_modules"));
    }

    #[test]
    fn test_csv_and_empty_lists() {
        let list = GlobList::parse_csv(" *.go , ,*.ts").unwrap();
        assert!(list.is_match("a/b.go"));
        assert!(list.is_match("x.ts"));
        assert!(!list.is_match("x.js"));
        assert!(GlobList::parse_csv("").unwrap().is_empty());
        assert!(!GlobList::empty().is_match("anything"));
    }

    #[test]
    fn test_invalid_glob_is_invalid_input() {
        assert!(matches!(GlobList::new(&["a[b"]), Err(IndexError::InvalidInput(_))));
    }

    #[test]
    fn test_glob_filter() {
        let f = GlobFilter::new(&filters(&["*.rs"], &["target"], false)).unwrap();
        assert!(f.accept("src/main.rs", false));
        assert!(!f.accept("README.md", false));
        assert!(f.accept("src", true));
        assert!(!f.accept("target", true));
        assert!(!f.accept("target/debug/x.rs", false));
        assert!(!f.uses_git_ignore());
    }

    #[test]
    fn test_gitignore_filter_reads_root_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "generated/\n*.log\n").unwrap();
        let f = GitIgnoreFilter::new(dir.path(), &filters(&[], &["vendor"], true)).unwrap();
        assert!(f.accept("src/a.rs", false));
        assert!(!f.accept("generated", true));
        assert!(!f.accept("generated/a.rs", false));
        assert!(!f.accept("app.log", false));
        assert!(!f.accept("vendor/lib.c", false));
        assert!(!f.accept(".git", true));
        assert!(f.uses_git_ignore());
    }

    #[test]
    fn test_build_filter_picks_impl() {
        let dir = tempfile::tempdir().unwrap();
        assert!(build_filter(dir.path(), &filters(&[], &[], true)).unwrap().uses_git_ignore());
        assert!(!build_filter(dir.path(), &filters(&[], &[], false)).unwrap().uses_git_ignore());
    }
}
