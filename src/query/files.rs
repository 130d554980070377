//! Fuzzy file-name search over the `dp:` rows of a workspace.

use crate::config::SearchLimit;
use crate::document::list_document_paths;
use crate::error::{IndexError, Result};
use crate::query::{effective_limit, FileHit, SearchFilesRequest, SearchFilesResponse};
use crate::store::KvStore;
use crate::tokenizer;
use crate::workspace::Workspace;

/// Path tokens of `rel_path` hit by some query token, or `None` when a
/// query token prefixes none of them.
fn score(query_words: &[String], rel_path: &str) -> Option<usize> {
    let path_words = tokenizer::parse_path_words(rel_path);
    if !query_words
        .iter()
        .all(|q| path_words.iter().any(|w| w.starts_with(q.as_str())))
    {
        return None;
    }
    Some(
        path_words
            .iter()
            .filter(|w| query_words.iter().any(|q| w.starts_with(q.as_str())))
            .count(),
    )
}

/// Files whose path tokens are prefixed by every query token, best first.
pub fn search_files(
    store: &KvStore,
    workspace: &Workspace,
    request: &SearchFilesRequest,
    limits: &SearchLimit,
) -> Result<SearchFilesResponse> {
    let words = tokenizer::parse_query_words(&request.query);
    if words.is_empty() {
        return Err(IndexError::Parse("query is empty".to_string()));
    }
    let limit = effective_limit(request.limit, limits.max_files_results);

    let mut hits: Vec<FileHit> = list_document_paths(store, &workspace.id)?
        .into_iter()
        .filter_map(|(_, rel_path)| {
            score(&words, &rel_path).map(|score| FileHit {
                file: workspace.abs_path(&rel_path),
                rel_path,
                score,
            })
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.rel_path.len().cmp(&b.rel_path.len()))
            .then_with(|| a.rel_path.cmp(&b.rel_path))
    });
    hits.truncate(limit);
    Ok(SearchFilesResponse { files: hits })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(q: &str) -> Vec<String> {
        tokenizer::parse_query_words(q)
    }

    #[test]
    fn test_every_query_token_must_prefix_a_path_token() {
        assert_eq!(score(&words("main"), "src/main.rs"), Some(1));
        assert_eq!(score(&words("src mai"), "src/main.rs"), Some(2));
        assert_eq!(score(&words("src lib"), "src/main.rs"), None);
        assert_eq!(score(&words("ain"), "src/main.rs"), None);
    }

    #[test]
    fn test_query_is_case_insensitive() {
        assert_eq!(score(&words("README"), "docs/readme.md"), Some(1));
        assert_eq!(score(&words("readme"), "docs/README.md"), Some(1));
    }
}
