//! Content search: candidates from posting rows, filtered, then confirmed
//! line by line against the files on disk.

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use tracing::{debug, warn};

use crate::codec;
use crate::config::SearchLimit;
use crate::document::get_document;
use crate::error::{IndexError, Result};
use crate::indexer::filter::GlobList;
use crate::query::matcher::LineMatcher;
use crate::query::parser::{parse_query, Query};
use crate::query::{
    LineText, MatchedLine, ResultLine, SearchContentRequest, SearchContentResponse,
    SearchContentResult, SearchFilters,
};
use crate::store::KvStore;
use crate::workspace::Workspace;

// ─── Candidates ──────────────────────────────────────────────────────

/// Union of the ids in every posting row whose keyword starts with
/// `lookup`.
fn term_candidates(store: &KvStore, workspace_id: &str, lookup: &str) -> Result<BTreeSet<String>> {
    let prefix = codec::keyword_search_prefix(workspace_id, lookup);
    let mut ids = BTreeSet::new();
    store.scan(prefix.as_bytes(), |k, v| {
        let key = String::from_utf8_lossy(k);
        if codec::decode_keyword_key(&key).is_none() {
            warn!(key = %key, "Skipping malformed posting key");
            return true;
        }
        match codec::decode_list(v) {
            Some(list) => ids.extend(list),
            None => warn!(key = %key, "Skipping undecodable posting row"),
        }
        true
    })?;
    Ok(ids)
}

/// AND within a clause, OR across clauses.
pub fn candidate_ids(store: &KvStore, workspace_id: &str, query: &Query) -> Result<BTreeSet<String>> {
    let mut per_lookup: HashMap<&str, BTreeSet<String>> = HashMap::new();
    let mut all = BTreeSet::new();
    for clause in &query.clauses {
        let mut clause_ids: Option<BTreeSet<String>> = None;
        for term in &clause.terms {
            if !per_lookup.contains_key(term.lookup.as_str()) {
                let ids = term_candidates(store, workspace_id, &term.lookup)?;
                per_lookup.insert(term.lookup.as_str(), ids);
            }
            let ids = &per_lookup[term.lookup.as_str()];
            clause_ids = Some(match clause_ids {
                None => ids.clone(),
                Some(acc) => acc.intersection(ids).cloned().collect(),
            });
            if clause_ids.as_ref().is_some_and(BTreeSet::is_empty) {
                break;
            }
        }
        all.extend(clause_ids.unwrap_or_default());
    }
    Ok(all)
}

// ─── Filters ─────────────────────────────────────────────────────────

struct PathFilters {
    prefix: Option<String>,
    include: GlobList,
    exclude: GlobList,
}

impl PathFilters {
    fn new(workspace: &Workspace, filters: Option<&SearchFilters>) -> Result<Self> {
        let Some(filters) = filters else {
            return Ok(PathFilters {
                prefix: None,
                include: GlobList::empty(),
                exclude: GlobList::empty(),
            });
        };
        let prefix = filters
            .path
            .as_deref()
            .map(|p| {
                let p = p.replace('\\', "/");
                workspace.rel_path(&p).unwrap_or(p)
            })
            .map(|p| {
                p.trim_start_matches("./")
                    .trim_matches('/')
                    .to_string()
            })
            .filter(|p| !p.is_empty() && p != ".");
        Ok(PathFilters {
            prefix,
            include: filters
                .include
                .as_deref()
                .map(GlobList::parse_csv)
                .transpose()?
                .unwrap_or_else(GlobList::empty),
            exclude: filters
                .exclude
                .as_deref()
                .map(GlobList::parse_csv)
                .transpose()?
                .unwrap_or_else(GlobList::empty),
        })
    }

    fn accept(&self, rel_path: &str) -> bool {
        if let Some(prefix) = &self.prefix {
            let under = rel_path == prefix
                || rel_path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'));
            if !under {
                return false;
            }
        }
        if !self.include.is_empty() && !self.include.is_match(rel_path) {
            return false;
        }
        !self.exclude.is_match(rel_path)
    }
}

// ─── Line confirmation ───────────────────────────────────────────────

fn split_lines(text: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = text
        .split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect();
    if text.ends_with('\n') {
        lines.pop();
    }
    lines
}

fn line_text(lines: &[&str], idx: usize) -> LineText {
    LineText {
        line_number: idx + 1,
        content: lines[idx].to_string(),
    }
}

/// Matched lines of one file, at most `max_lines`, plus whether more
/// matched.
fn confirm_file(
    text: &str,
    matcher: &LineMatcher,
    context: usize,
    max_lines: usize,
) -> (Vec<ResultLine>, bool) {
    let lines = split_lines(text);
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let spans = matcher.find(line);
        let Some(&(start, end)) = spans.first() else {
            continue;
        };
        if out.len() == max_lines {
            return (out, true);
        }
        let before = (idx.saturating_sub(context)..idx)
            .map(|i| line_text(&lines, i))
            .collect();
        let after = (idx + 1..(idx + 1 + context).min(lines.len()))
            .map(|i| line_text(&lines, i))
            .collect();
        out.push(ResultLine {
            before,
            line: MatchedLine {
                line_number: idx + 1,
                content: line.to_string(),
                match_span: [start, end],
                matches: spans.iter().map(|&(s, e)| [s, e]).collect(),
            },
            after,
        });
    }
    (out, false)
}

// ─── Entry point ─────────────────────────────────────────────────────

/// Run a content query against one workspace.
///
/// Stale candidates (no meta row) and unreadable files are skipped. If the
/// store closes part way, the results gathered so far come back with
/// `error` set.
pub fn search_content(
    store: &KvStore,
    workspace: &Workspace,
    request: &SearchContentRequest,
    limits: &SearchLimit,
) -> Result<SearchContentResponse> {
    let started = Instant::now();
    let query = parse_query(&request.query)?;
    let matcher = LineMatcher::compile(&query, request.case_sensitive)?;
    let filters = PathFilters::new(workspace, request.filters.as_ref())?;
    let max_results = request.max_results(limits);
    let max_per_file = request.max_results_per_file(limits);
    let context = request.context_lines();

    let ids = candidate_ids(store, &workspace.id, &query)?;

    let mut docs = Vec::with_capacity(ids.len());
    let mut response = SearchContentResponse::default();
    for id in &ids {
        match get_document(store, &workspace.id, id, false) {
            Ok(Some(doc)) => {
                if filters.accept(&doc.rel_path) {
                    docs.push(doc);
                }
            }
            Ok(None) => {}
            Err(IndexError::StoreClosed) => {
                response.error = Some(IndexError::StoreClosed.to_string());
                break;
            }
            Err(e) => warn!(doc = %id, error = %e, "Skipping unreadable document"),
        }
    }
    docs.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));

    let mut total = 0usize;
    for doc in &docs {
        let path = workspace.abs_path(&doc.rel_path);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                debug!(path = %path, error = %e, "Skipping unreadable file");
                continue;
            }
        };
        let text = String::from_utf8_lossy(&bytes);
        if total >= max_results {
            // only a confirmed match that had to be dropped counts as truncation
            if split_lines(&text).iter().any(|line| matcher.is_match(line)) {
                response.truncate = true;
                break;
            }
            continue;
        }
        let budget = max_per_file.min(max_results - total);
        let (lines, more) = confirm_file(&text, &matcher, context, budget);
        if lines.is_empty() {
            continue;
        }
        total += lines.len();
        let per_file_cut = more && lines.len() == max_per_file;
        if more && !per_file_cut {
            response.truncate = true;
        }
        response.results.push(SearchContentResult {
            file: path,
            lines,
            truncate: per_file_cut,
        });
        if response.truncate {
            break;
        }
    }

    debug!(
        workspace = %workspace.id,
        query = %request.query,
        candidates = ids.len(),
        files = response.results.len(),
        lines = total,
        truncate = response.truncate,
        elapsed_ms = format_args!("{:.2}", started.elapsed().as_secs_f64() * 1000.0),
        "Content search"
    );
    Ok(response)
}
