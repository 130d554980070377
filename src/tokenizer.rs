//! Token extraction for file content, relative paths and file-name queries.

use std::collections::BTreeSet;
use std::path::Path;

/// Shortest token kept by the tokenizer.
pub const MIN_WORD_LEN: usize = 3;
/// Longest token kept by the tokenizer.
pub const MAX_WORD_LEN: usize = 80;

/// How many leading bytes the printable-ratio check inspects.
pub const SNIFF_LEN: usize = 512;

/// Minimum share of printable bytes for content to count as text.
const PRINTABLE_RATIO: f64 = 0.95;

/// Iterate over maximal runs of ASCII letters and digits.
fn alnum_runs(content: &[u8]) -> impl Iterator<Item = &[u8]> {
    content
        .split(|b| !b.is_ascii_alphanumeric())
        .filter(|run| !run.is_empty())
}

fn is_valid_len(run: &[u8]) -> bool {
    (MIN_WORD_LEN..=MAX_WORD_LEN).contains(&run.len())
}

/// Extract the sorted, deduplicated set of valid words from raw bytes.
///
/// A valid word is a maximal `[A-Za-z0-9]+` run of length 3..=80. Case is
/// preserved.
///
/// # Examples
///
/// ```
/// use haystack::tokenizer::parse_words;
///
/// let words = parse_words(b"fn read_file(path: &Path) -> io::Result<Vec<u8>>");
/// assert_eq!(words, vec!["Path", "Result", "Vec", "file", "path", "read"]);
/// ```
#[must_use]
pub fn parse_words(content: &[u8]) -> Vec<String> {
    let set: BTreeSet<&[u8]> = alnum_runs(content).filter(|r| is_valid_len(r)).collect();
    set.into_iter()
        // runs are ASCII, so this never allocates a replacement
        .map(|r| String::from_utf8_lossy(r).into_owned())
        .collect()
}

/// Lower-cased token set of a relative path, used for file search.
#[must_use]
pub fn parse_path_words(rel_path: &str) -> Vec<String> {
    let set: BTreeSet<String> = alnum_runs(rel_path.as_bytes())
        .filter(|r| is_valid_len(r))
        .map(|r| String::from_utf8_lossy(r).to_ascii_lowercase())
        .collect();
    set.into_iter().collect()
}

/// Tokens of a file-name query, lower-cased, in query order without
/// duplicates.
#[must_use]
pub fn parse_query_words(query: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    alnum_runs(query.as_bytes())
        .filter(|r| is_valid_len(r))
        .map(|r| String::from_utf8_lossy(r).to_ascii_lowercase())
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// The posting-list keywords for a word set: lower-cased and deduplicated.
///
/// Documents store their words with case preserved; posting rows are keyed
/// by the lower-cased form so that lower-cased query anchors find them.
#[must_use]
pub fn keywords_of<S: AsRef<str>>(words: &[S]) -> BTreeSet<String> {
    words
        .iter()
        .map(|w| w.as_ref().to_ascii_lowercase())
        .collect()
}

// ─── Text detection ──────────────────────────────────────────────────

fn is_text_mime(essence: &str) -> bool {
    let essence = essence.to_ascii_lowercase();
    essence.starts_with("text/")
        || matches!(
            essence.as_str(),
            "application/json" | "application/xml" | "application/javascript"
        )
        || essence.ends_with("+json")
        || essence.ends_with("+xml")
}

fn is_printable(b: u8) -> bool {
    matches!(b, 0x20..=0x7E | b'\t' | b'\n' | b'\r' | 0x80..=0xFF)
}

/// Share of printable bytes in the first [`SNIFF_LEN`] bytes of `content`.
/// Empty content counts as fully printable.
#[must_use]
pub fn printable_ratio(content: &[u8]) -> f64 {
    let prefix = &content[..content.len().min(SNIFF_LEN)];
    if prefix.is_empty() {
        return 1.0;
    }
    let printable = prefix.iter().filter(|&&b| is_printable(b)).count();
    printable as f64 / prefix.len() as f64
}

/// Decide whether a file is worth tokenizing: either its MIME type (guessed
/// from the name) is textual, or its content prefix is mostly printable.
#[must_use]
pub fn is_textual(path: &Path, content: &[u8]) -> bool {
    let mime_says_text = mime_guess::from_path(path)
        .iter()
        .any(|m| is_text_mime(m.essence_str()));
    mime_says_text || printable_ratio(content) > PRINTABLE_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_words_basic() {
        assert_eq!(
            parse_words(b"hello world HELLO\n"),
            vec!["HELLO", "hello", "world"]
        );
    }

    #[test]
    fn test_parse_words_drops_short_and_long() {
        let long = "x".repeat(81);
        let exact = "y".repeat(80);
        let content = format!("ab abc {} {}", long, exact);
        assert_eq!(parse_words(content.as_bytes()), vec!["abc".to_string(), exact]);
    }

    #[test]
    fn test_parse_words_splits_on_underscore_and_punctuation() {
        assert_eq!(
            parse_words(b"_client.send_request(); foo-bar"),
            vec!["bar", "client", "foo", "request", "send"]
        );
    }

    #[test]
    fn test_parse_words_non_ascii_breaks_runs() {
        assert_eq!(parse_words("caféteria naïve".as_bytes()), vec!["caf", "teria"]);
    }

    #[test]
    fn test_parse_words_empty() {
        assert!(parse_words(b"").is_empty());
        assert!(parse_words(b"!! ?? ..").is_empty());
    }

    #[test]
    fn test_parse_path_words_lowercases() {
        assert_eq!(
            parse_path_words("src/Server/HttpHandler.rs"),
            vec!["httphandler", "server", "src"]
        );
    }

    #[test]
    fn test_parse_query_words_keeps_order() {
        assert_eq!(parse_query_words("Main handler MAIN"), vec!["main", "handler"]);
    }

    #[test]
    fn test_keywords_of_merges_case() {
        let kws = keywords_of(&["HELLO", "hello", "World"]);
        assert_eq!(kws.into_iter().collect::<Vec<_>>(), vec!["hello", "world"]);
    }

    #[test]
    fn test_is_textual_by_extension() {
        assert!(is_textual(Path::new("a.json"), &[0u8; 64]));
        assert!(is_textual(Path::new("a.txt"), &[0u8; 64]));
    }

    #[test]
    fn test_is_textual_by_content() {
        assert!(is_textual(Path::new("noext"), b"plain text\n"));
        assert!(is_textual(Path::new("noext"), "unicode ✓ text".as_bytes()));
        assert!(!is_textual(Path::new("noext"), &[0u8, 1, 2, 3, 4, 5, 6, 7]));
    }

    #[test]
    fn test_printable_ratio_threshold() {
        // 96 printable + 4 NUL => 0.96, just over the bar
        let mut content = vec![b'a'; 96];
        content.extend([0u8; 4]);
        assert!(printable_ratio(&content) > 0.95);
        content.push(0);
        content.push(0);
        assert!(printable_ratio(&content) < 0.95);
    }

    #[test]
    fn test_printable_ratio_only_looks_at_prefix() {
        let mut content = vec![b'a'; SNIFF_LEN];
        content.extend(vec![0u8; 4096]);
        assert_eq!(printable_ratio(&content), 1.0);
    }

    #[test]
    fn test_text_mime_families() {
        assert!(is_text_mime("text/x-rust"));
        assert!(is_text_mime("application/ld+json"));
        assert!(is_text_mime("image/svg+xml"));
        assert!(!is_text_mime("image/png"));
        assert!(!is_text_mime("application/octet-stream"));
    }

    proptest! {
        #[test]
        fn prop_parse_words_valid_sorted_unique(content in proptest::collection::vec(any::<u8>(), 0..2000)) {
            let words = parse_words(&content);
            for w in &words {
                prop_assert!(w.len() >= MIN_WORD_LEN && w.len() <= MAX_WORD_LEN);
                prop_assert!(w.bytes().all(|b| b.is_ascii_alphanumeric()));
            }
            for pair in words.windows(2) {
                prop_assert!(pair[0] < pair[1]);
            }
        }

        #[test]
        fn prop_every_word_occurs_in_content(content in "[a-zA-Z0-9 _.]{0,300}") {
            for w in parse_words(content.as_bytes()) {
                prop_assert!(content.contains(&w));
            }
        }
    }
}
