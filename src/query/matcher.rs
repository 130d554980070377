//! Line confirmation: the regexes that turn posting-list candidates into
//! exact match spans.

use regex::{Regex, RegexBuilder};

use crate::error::{IndexError, Result};
use crate::query::parser::Query;

/// Upper bound on what `*` may expand to.
const STAR_EXPANSION: &str = r"[^\s]{0,32}";

/// Regex source for one term. Everything but `*` and `?` is literal; the
/// term must begin at the start of the line or after a non-alphanumeric
/// character, and capture group 1 is the term itself.
pub fn term_regex(pattern: &str, case_sensitive: bool) -> String {
    let mut body = String::with_capacity(pattern.len() * 2);
    let mut buf = [0u8; 4];
    for c in pattern.chars() {
        match c {
            '*' => body.push_str(STAR_EXPANSION),
            '?' => body.push_str(".?"),
            _ => body.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    let flags = if case_sensitive { "" } else { "(?i)" };
    format!("{}(?:^|[^A-Za-z0-9])({})", flags, body)
}

struct ClauseMatcher {
    terms: Vec<Regex>,
}

impl ClauseMatcher {
    /// Every in-order occurrence of the clause's terms on `line`. After a
    /// full sequence matched, the search restarts where it ended.
    fn find_into(&self, line: &str, spans: &mut Vec<(usize, usize)>) {
        let mut pos = 0;
        let mut sequence = Vec::with_capacity(self.terms.len());
        loop {
            sequence.clear();
            let mut at = pos;
            for re in &self.terms {
                let Some(m) = re.captures_at(line, at).and_then(|c| c.get(1)) else {
                    return;
                };
                sequence.push((m.start(), m.end()));
                at = m.end();
            }
            spans.extend_from_slice(&sequence);
            if at <= pos || at >= line.len() {
                return;
            }
            pos = at;
        }
    }
}

/// Compiled form of a [`Query`] for per-line confirmation.
pub struct LineMatcher {
    clauses: Vec<ClauseMatcher>,
}

impl LineMatcher {
    pub fn compile(query: &Query, case_sensitive: bool) -> Result<Self> {
        let mut clauses = Vec::with_capacity(query.clauses.len());
        for clause in &query.clauses {
            let mut terms = Vec::with_capacity(clause.terms.len());
            for term in &clause.terms {
                let source = term_regex(&term.pattern, case_sensitive);
                let re = RegexBuilder::new(&source)
                    .size_limit(1 << 20)
                    .build()
                    .map_err(|e| IndexError::InvalidRegex {
                        pattern: term.pattern.clone(),
                        source: e,
                    })?;
                terms.push(re);
            }
            clauses.push(ClauseMatcher { terms });
        }
        Ok(LineMatcher { clauses })
    }

    /// Byte spans of every match on `line`, sorted and deduplicated. Empty
    /// when no clause matches.
    pub fn find(&self, line: &str) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        for clause in &self.clauses {
            clause.find_into(line, &mut spans);
        }
        spans.sort_unstable();
        spans.dedup();
        spans
    }

    pub fn is_match(&self, line: &str) -> bool {
        !self.find(line).is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_query;

    fn matcher(q: &str, case_sensitive: bool) -> LineMatcher {
        LineMatcher::compile(&parse_query(q).unwrap(), case_sensitive).unwrap()
    }

    #[test]
    fn test_term_regex_escapes_literals() {
        assert_eq!(
            term_regex("a.b", true),
            r"(?:^|[^A-Za-z0-9])(a\.b)"
        );
        assert_eq!(
            term_regex("ab*", false),
            r"(?i)(?:^|[^A-Za-z0-9])(ab[^\s]{0,32})"
        );
        assert!(term_regex("arr[0]$", true).contains(r"arr\[0\]\$"));
        assert!(term_regex("ab?", true).ends_with("(ab.?)"));
    }

    #[test]
    fn test_case_insensitive_by_default() {
        let m = matcher("hello", false);
        assert_eq!(m.find("hello world HELLO"), vec![(0, 5), (12, 17)]);
        let m = matcher("hello", true);
        assert_eq!(m.find("hello world HELLO"), vec![(0, 5)]);
    }

    #[test]
    fn test_leading_boundary_required() {
        let m = matcher("world", false);
        assert!(m.find("helloworld").is_empty());
        assert_eq!(m.find("hello_world"), vec![(6, 11)]);
        assert_eq!(m.find("(world)"), vec![(1, 6)]);
    }

    #[test]
    fn test_prefix_expansion_stops_at_whitespace() {
        let m = matcher("hello*", false);
        assert_eq!(m.find("hello helloworld"), vec![(0, 5), (6, 16)]);
    }

    #[test]
    fn test_terms_match_in_order() {
        let m = matcher("cat dog", false);
        assert_eq!(m.find("cat and dog"), vec![(0, 3), (8, 11)]);
        assert!(m.find("dog and cat").is_empty());
        assert!(m.find("cat only").is_empty());
        assert_eq!(m.find("cat dog cat dog").len(), 4);
    }

    #[test]
    fn test_or_clauses_union() {
        let m = matcher("cat | dog", false);
        assert_eq!(m.find("dog cat"), vec![(0, 3), (4, 7)]);
        assert!(m.is_match("just a dog"));
        assert!(!m.is_match("bird"));
    }

    #[test]
    fn test_pattern_characters_are_literal() {
        let m = matcher("fmt.Println", true);
        assert!(m.is_match("    fmt.Println(x)"));
        assert!(!m.is_match("    fmtXPrintln(x)"));
        let m = matcher("std::io", true);
        assert!(m.is_match("use std::io;"));
    }

    #[test]
    fn test_multibyte_lines() {
        let m = matcher("naïve", false);
        assert_eq!(m.find("a naïve café"), vec![(2, 8)]);
    }
}
