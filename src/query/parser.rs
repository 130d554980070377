//! Content query grammar.
//!
//! ```text
//! query    := clause ('|' clause)*
//! clause   := term (('AND' | WS+) term)*
//! term     := anchor pattern-suffix
//! anchor   := [A-Za-z0-9_][A-Za-z0-9_-]+
//! ```

use crate::error::{IndexError, Result};
use crate::tokenizer::MIN_WORD_LEN;

/// One term of a clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    /// The term as typed, pattern characters included.
    pub pattern: String,
    /// Leading `[A-Za-z0-9_][A-Za-z0-9_-]+` run.
    pub anchor: String,
    /// Lower-cased keyword prefix used for the posting lookup.
    pub lookup: String,
}

/// Terms that must all match, in order, on one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrClause {
    pub terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub clauses: Vec<OrClause>,
}

fn is_anchor_start(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_anchor_char(c: char) -> bool {
    is_anchor_start(c) || c == '-'
}

fn anchor_of(term: &str) -> Option<&str> {
    let mut chars = term.char_indices();
    let (_, first) = chars.next()?;
    if !is_anchor_start(first) {
        return None;
    }
    let end = chars
        .find(|&(_, c)| !is_anchor_char(c))
        .map(|(i, _)| i)
        .unwrap_or(term.len());
    (end >= 2).then(|| &term[..end])
}

/// Pick the alphanumeric run of the anchor to look up.
///
/// Any run of the anchor is a whole token of the matched text, except the
/// last one, which may continue past the anchor. The longest run that is
/// long enough to be indexed wins; otherwise the last run is used as a
/// plain prefix.
fn lookup_of(anchor: &str) -> Option<String> {
    let runs: Vec<&str> = anchor
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|r| !r.is_empty())
        .collect();
    let best = runs
        .iter()
        .filter(|r| r.len() >= MIN_WORD_LEN)
        .max_by_key(|r| r.len())
        .or(runs.last())?;
    Some(best.to_ascii_lowercase())
}

fn parse_term(raw: &str) -> Result<Term> {
    let anchor = anchor_of(raw).ok_or_else(|| {
        IndexError::Parse(format!(
            "invalid term '{}': a term must start with at least two word characters",
            raw
        ))
    })?;
    let lookup = lookup_of(anchor).ok_or_else(|| {
        IndexError::Parse(format!("invalid term '{}': no letters or digits", raw))
    })?;
    Ok(Term {
        pattern: raw.to_string(),
        anchor: anchor.to_string(),
        lookup,
    })
}

pub fn parse_query(query: &str) -> Result<Query> {
    let query = query.trim();
    if query.is_empty() {
        return Err(IndexError::Parse("query is empty".to_string()));
    }
    let mut clauses = Vec::new();
    for clause in query.split('|') {
        let terms = clause
            .split_whitespace()
            .filter(|t| *t != "AND")
            .map(parse_term)
            .collect::<Result<Vec<_>>>()?;
        if !terms.is_empty() {
            clauses.push(OrClause { terms });
        }
    }
    if clauses.is_empty() {
        return Err(IndexError::Parse("query is empty".to_string()));
    }
    Ok(Query { clauses })
}
