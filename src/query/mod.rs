//! Query engine: content search over posting rows with line-level
//! confirmation, and fuzzy file-name search over path rows.

pub mod content;
pub mod files;
pub mod matcher;
pub mod parser;

use serde::{Deserialize, Serialize};

use crate::config::SearchLimit;

pub use content::search_content;
pub use files::search_files;
pub use parser::{parse_query, OrClause, Query, Term};

/// Context lines around each match when the request does not say.
pub const DEFAULT_BEFORE_AFTER: usize = 1;
/// Ceiling on requested context lines.
pub const MAX_BEFORE_AFTER: usize = 50;

// ─── Requests ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Relative path prefix.
    pub path: Option<String>,
    /// Comma-separated globs.
    pub include: Option<String>,
    /// Comma-separated globs.
    pub exclude: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimit {
    pub max_results: Option<usize>,
    pub max_results_per_file: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchContentRequest {
    /// Absolute workspace path.
    pub workspace: String,
    pub query: String,
    pub case_sensitive: bool,
    pub filters: Option<SearchFilters>,
    pub limit: Option<RequestLimit>,
    pub before_after: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilesRequest {
    pub workspace: String,
    pub query: String,
    pub limit: Option<usize>,
}

/// Limits actually applied: the smaller of the request and the server
/// ceiling, an absent or zero request value meaning the ceiling.
pub fn effective_limit(requested: Option<usize>, ceiling: usize) -> usize {
    match requested {
        Some(n) if n > 0 => n.min(ceiling),
        _ => ceiling,
    }
}

impl SearchContentRequest {
    pub fn max_results(&self, limits: &SearchLimit) -> usize {
        effective_limit(self.limit.and_then(|l| l.max_results), limits.max_results)
    }

    pub fn max_results_per_file(&self, limits: &SearchLimit) -> usize {
        effective_limit(
            self.limit.and_then(|l| l.max_results_per_file),
            limits.max_results_per_file,
        )
    }

    pub fn context_lines(&self) -> usize {
        self.before_after
            .unwrap_or(DEFAULT_BEFORE_AFTER)
            .min(MAX_BEFORE_AFTER)
    }
}

// ─── Results ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineText {
    pub line_number: usize,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedLine {
    pub line_number: usize,
    pub content: String,
    /// Byte span of the first match.
    #[serde(rename = "match")]
    pub match_span: [usize; 2],
    /// Byte spans of every match on the line.
    pub matches: Vec<[usize; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLine {
    pub before: Vec<LineText>,
    pub line: MatchedLine,
    pub after: Vec<LineText>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchContentResult {
    /// Absolute path.
    pub file: String,
    pub lines: Vec<ResultLine>,
    /// More lines matched than `max_results_per_file`.
    pub truncate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchContentResponse {
    pub results: Vec<SearchContentResult>,
    /// `max_results` cut the result list short.
    pub truncate: bool,
    /// Set when the search stopped early and `results` is partial.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHit {
    /// Absolute path.
    pub file: String,
    pub rel_path: String,
    /// Path tokens hit by some query token.
    pub score: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilesResponse {
    pub files: Vec<FileHit>,
}

#[cfg(test)]
#[path = "query_tests.rs"]
mod tests;
