//! Key and value codec for every row the index persists.
//!
//! | key                                          | value                   |
//! |----------------------------------------------|-------------------------|
//! | `ws:<workspace_id>`                          | workspace JSON          |
//! | `dm:<workspace_id>\|<doc_id>`                | document meta JSON      |
//! | `dw:<workspace_id>\|<doc_id>`                | `word1\|word2\|...`     |
//! | `dp:<workspace_id>\|<doc_id>`                | relative path           |
//! | `kw:<workspace_id>\|<keyword>\|<n>\|<tick>`  | `docid1\|docid2\|...`   |
//! | `next_workspace_id`                          | decimal integer         |
//!
//! Decoders return `None` for anything that does not match the grammar.
//! Numeric fields are canonical decimal (no sign, no leading zeros), so a
//! decoded key always re-encodes to the same bytes.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{IndexError, Result};

pub const WORKSPACE_PREFIX: &str = "ws:";
pub const DOC_META_PREFIX: &str = "dm:";
pub const DOC_WORDS_PREFIX: &str = "dw:";
pub const DOC_PATH_PREFIX: &str = "dp:";
pub const KEYWORD_PREFIX: &str = "kw:";
pub const NEXT_WORKSPACE_ID_KEY: &str = "next_workspace_id";

pub const SEPARATOR: char = '|';

/// The three per-document row families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocFamily {
    Meta,
    Words,
    Path,
}

impl DocFamily {
    pub const ALL: [DocFamily; 3] = [DocFamily::Meta, DocFamily::Words, DocFamily::Path];

    pub fn prefix(self) -> &'static str {
        match self {
            DocFamily::Meta => DOC_META_PREFIX,
            DocFamily::Words => DOC_WORDS_PREFIX,
            DocFamily::Path => DOC_PATH_PREFIX,
        }
    }
}

fn is_field(s: &str) -> bool {
    !s.is_empty() && !s.contains(SEPARATOR)
}

fn parse_canonical_u64(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if s.len() > 1 && s.starts_with('0') {
        return None;
    }
    s.parse().ok()
}

// ─── Workspace rows ──────────────────────────────────────────────────

pub fn workspace_key(workspace_id: &str) -> String {
    format!("{}{}", WORKSPACE_PREFIX, workspace_id)
}

pub fn decode_workspace_key(key: &str) -> Option<&str> {
    key.strip_prefix(WORKSPACE_PREFIX).filter(|id| is_field(id))
}

pub fn encode_next_workspace_id(id: u64) -> String {
    id.to_string()
}

pub fn decode_next_workspace_id(value: &[u8]) -> Option<u64> {
    std::str::from_utf8(value).ok().and_then(parse_canonical_u64)
}

// ─── Document rows ───────────────────────────────────────────────────

pub fn doc_key(family: DocFamily, workspace_id: &str, doc_id: &str) -> String {
    format!("{}{}{}{}", family.prefix(), workspace_id, SEPARATOR, doc_id)
}

/// `dm:<ws>|`, the scan prefix of one family within one workspace.
pub fn doc_prefix(family: DocFamily, workspace_id: &str) -> String {
    format!("{}{}{}", family.prefix(), workspace_id, SEPARATOR)
}

/// Split a document key into `(workspace_id, doc_id)`.
pub fn decode_doc_key(family: DocFamily, key: &str) -> Option<(&str, &str)> {
    let rest = key.strip_prefix(family.prefix())?;
    let (ws, doc) = rest.split_once(SEPARATOR)?;
    (is_field(ws) && is_field(doc)).then_some((ws, doc))
}

// ─── Keyword posting rows ────────────────────────────────────────────

/// A decoded posting-row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordKey {
    pub workspace_id: String,
    pub keyword: String,
    pub doc_count: usize,
    pub tick: u64,
}

impl KeywordKey {
    pub fn encode(&self) -> String {
        keyword_key(&self.workspace_id, &self.keyword, self.doc_count, self.tick)
    }
}

pub fn keyword_key(workspace_id: &str, keyword: &str, doc_count: usize, tick: u64) -> String {
    format!(
        "{}{}{sep}{}{sep}{}{sep}{}",
        KEYWORD_PREFIX,
        workspace_id,
        keyword,
        doc_count,
        tick,
        sep = SEPARATOR
    )
}

/// Split a posting-row key into exactly four fields with numeric count and
/// tick.
pub fn decode_keyword_key(key: &str) -> Option<KeywordKey> {
    let rest = key.strip_prefix(KEYWORD_PREFIX)?;
    let mut parts = rest.split(SEPARATOR);
    let ws = parts.next().filter(|s| !s.is_empty())?;
    let keyword = parts.next().filter(|s| !s.is_empty())?;
    let doc_count = parse_canonical_u64(parts.next()?)?;
    let tick = parse_canonical_u64(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }
    Some(KeywordKey {
        workspace_id: ws.to_string(),
        keyword: keyword.to_string(),
        doc_count: usize::try_from(doc_count).ok()?,
        tick,
    })
}

/// `kw:<ws>|<keyword>|`: every fragment of exactly this keyword.
pub fn keyword_prefix(workspace_id: &str, keyword: &str) -> String {
    format!(
        "{}{}{sep}{}{sep}",
        KEYWORD_PREFIX,
        workspace_id,
        keyword,
        sep = SEPARATOR
    )
}

/// `kw:<ws>|<partial>`: every fragment of every keyword starting with
/// `partial`.
pub fn keyword_search_prefix(workspace_id: &str, partial: &str) -> String {
    format!("{}{}{}{}", KEYWORD_PREFIX, workspace_id, SEPARATOR, partial)
}

/// The prefixes that hold every row belonging to a workspace, apart from
/// its `ws:` row.
pub fn workspace_scoped_prefixes(workspace_id: &str) -> [String; 4] {
    [
        doc_prefix(DocFamily::Meta, workspace_id),
        doc_prefix(DocFamily::Words, workspace_id),
        doc_prefix(DocFamily::Path, workspace_id),
        format!("{}{}{}", KEYWORD_PREFIX, workspace_id, SEPARATOR),
    ]
}

// ─── List values ─────────────────────────────────────────────────────

pub fn encode_list<S: AsRef<str>>(items: &[S]) -> String {
    let mut out = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        out.push_str(item.as_ref());
    }
    out
}

/// Split a pipe-joined value. Empty fields are dropped, so the empty
/// string decodes to the empty list.
pub fn decode_list(value: &[u8]) -> Option<Vec<String>> {
    let s = std::str::from_utf8(value).ok()?;
    Some(
        s.split(SEPARATOR)
            .filter(|part| !part.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

// ─── JSON values ─────────────────────────────────────────────────────

pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

pub fn decode_json<T: DeserializeOwned>(key: &str, value: &[u8]) -> Result<T> {
    serde_json::from_slice(value).map_err(|e| IndexError::Corruption {
        key: key.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_workspace_key_round_trip() {
        assert_eq!(workspace_key("7"), "ws:7");
        assert_eq!(decode_workspace_key("ws:7"), Some("7"));
        assert_eq!(decode_workspace_key("ws:"), None);
        assert_eq!(decode_workspace_key("dm:7"), None);
    }

    #[test]
    fn test_doc_key_layout() {
        assert_eq!(doc_key(DocFamily::Meta, "1", "abc"), "dm:1|abc");
        assert_eq!(doc_key(DocFamily::Words, "1", "abc"), "dw:1|abc");
        assert_eq!(doc_key(DocFamily::Path, "1", "abc"), "dp:1|abc");
        assert_eq!(decode_doc_key(DocFamily::Path, "dp:1|abc"), Some(("1", "abc")));
        assert_eq!(decode_doc_key(DocFamily::Path, "dm:1|abc"), None);
        assert_eq!(decode_doc_key(DocFamily::Meta, "dm:1|"), None);
        assert_eq!(decode_doc_key(DocFamily::Meta, "dm:1|a|b"), None);
    }

    #[test]
    fn test_keyword_key_layout() {
        let key = keyword_key("3", "hello", 20, 1_700_000_000_000_000);
        assert_eq!(key, "kw:3|hello|20|1700000000000000");
        let decoded = decode_keyword_key(&key).unwrap();
        assert_eq!(decoded.workspace_id, "3");
        assert_eq!(decoded.keyword, "hello");
        assert_eq!(decoded.doc_count, 20);
        assert_eq!(decoded.encode(), key);
    }

    #[test]
    fn test_keyword_key_rejects_malformed() {
        for bad in [
            "kw:3|hello|20",
            "kw:3|hello|20|1|extra",
            "kw:3|hello|x|1",
            "kw:3|hello|20|",
            "kw:3||20|1",
            "kw:|hello|20|1",
            "kw:3|hello|020|1",
            "kw:3|hello|-1|1",
            "ws:3|hello|1|1",
        ] {
            assert_eq!(decode_keyword_key(bad), None, "{}", bad);
        }
    }

    #[test]
    fn test_prefixes() {
        assert_eq!(keyword_prefix("1", "alpha"), "kw:1|alpha|");
        assert_eq!(keyword_search_prefix("1", "alp"), "kw:1|alp");
        assert_eq!(doc_prefix(DocFamily::Words, "12"), "dw:12|");
        assert_eq!(
            workspace_scoped_prefixes("4"),
            ["dm:4|", "dw:4|", "dp:4|", "kw:4|"].map(String::from)
        );
    }

    #[test]
    fn test_list_values() {
        assert_eq!(encode_list(&["a", "b", "c"]), "a|b|c");
        assert_eq!(encode_list::<&str>(&[]), "");
        assert_eq!(decode_list(b"a|b|c").unwrap(), vec!["a", "b", "c"]);
        assert!(decode_list(b"").unwrap().is_empty());
        assert_eq!(decode_list(b"a||b").unwrap(), vec!["a", "b"]);
        assert_eq!(decode_list(&[0xff, 0xfe]), None);
    }

    #[test]
    fn test_next_workspace_id() {
        assert_eq!(decode_next_workspace_id(b"42"), Some(42));
        assert_eq!(decode_next_workspace_id(b"0"), Some(0));
        assert_eq!(decode_next_workspace_id(b"x"), None);
        assert_eq!(decode_next_workspace_id(b""), None);
        assert_eq!(encode_next_workspace_id(42), "42");
    }

    #[test]
    fn test_decode_json_reports_key() {
        let err = decode_json::<serde_json::Value>("dm:1|x", b"{broken").unwrap_err();
        assert!(err.to_string().contains("dm:1|x"));
    }

    proptest! {
        #[test]
        fn prop_keyword_key_round_trip(
            ws in "[0-9]{1,6}",
            kw in "[A-Za-z0-9]{3,80}",
            count in 0usize..100_000,
            tick in any::<u64>(),
        ) {
            let key = keyword_key(&ws, &kw, count, tick);
            let decoded = decode_keyword_key(&key).unwrap();
            prop_assert_eq!(&decoded.workspace_id, &ws);
            prop_assert_eq!(&decoded.keyword, &kw);
            prop_assert_eq!(decoded.doc_count, count);
            prop_assert_eq!(decoded.tick, tick);
            prop_assert_eq!(decoded.encode(), key);
        }

        #[test]
        fn prop_doc_key_round_trip(ws in "[0-9]{1,6}", doc in "[0-9a-f]{32}") {
            for family in DocFamily::ALL {
                let key = doc_key(family, &ws, &doc);
                prop_assert_eq!(decode_doc_key(family, &key), Some((ws.as_str(), doc.as_str())));
            }
        }

        #[test]
        fn prop_list_round_trip(items in proptest::collection::vec("[0-9a-f]{32}", 0..50)) {
            let encoded = encode_list(&items);
            prop_assert_eq!(decode_list(encoded.as_bytes()).unwrap(), items);
        }
    }
}
