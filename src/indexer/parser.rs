//! Turns one file on disk into a [`Document`], deciding whether the index
//! needs to hear about it.

use std::path::Path;
use std::time::UNIX_EPOCH;

use crate::document::{get_document, Document};
use crate::error::Result;
use crate::store::KvStore;
use crate::tokenizer;
use crate::workspace::Workspace;

/// Why a file was left out of the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    TooLarge,
    NotText,
}

#[derive(Debug)]
pub enum ParseOutcome {
    /// Never indexed in this workspace.
    New(Document),
    /// Indexed before and touched since. `content_changed` is false when
    /// only the modification time moved.
    Updated {
        doc: Document,
        content_changed: bool,
    },
    /// Same modification time as the indexed copy.
    Unchanged,
    Skipped(SkipReason),
}

fn mtime_nanos(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Stat, read and tokenize `rel_path` of `workspace`, comparing with the
/// stored meta row.
pub fn parse_file(
    store: &KvStore,
    workspace: &Workspace,
    rel_path: &str,
    max_file_size: u64,
) -> Result<ParseOutcome> {
    let abs = workspace.abs_path(rel_path);
    let meta = match std::fs::metadata(&abs) {
        Ok(m) if m.is_file() => m,
        Ok(_) => return Ok(ParseOutcome::Skipped(SkipReason::Missing)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ParseOutcome::Skipped(SkipReason::Missing));
        }
        Err(e) => return Err(e.into()),
    };
    if meta.len() > max_file_size {
        return Ok(ParseOutcome::Skipped(SkipReason::TooLarge));
    }

    let id = Document::id_for_path(&abs);
    let existing = get_document(store, &workspace.id, &id, false)?;
    let modified_time = mtime_nanos(&meta);
    if existing
        .as_ref()
        .is_some_and(|d| d.modified_time == modified_time && d.rel_path == rel_path)
    {
        return Ok(ParseOutcome::Unchanged);
    }

    let content = match std::fs::read(&abs) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ParseOutcome::Skipped(SkipReason::Missing));
        }
        Err(e) => return Err(e.into()),
    };
    if !tokenizer::is_textual(Path::new(&abs), &content) {
        return Ok(ParseOutcome::Skipped(SkipReason::NotText));
    }

    let doc = Document {
        id,
        rel_path: rel_path.to_string(),
        size: content.len() as u64,
        hash: crate::md5_hex(&content),
        modified_time,
        last_sync_time: 0,
        words: tokenizer::parse_words(&content),
        path_words: tokenizer::parse_path_words(rel_path),
    };
    Ok(match existing {
        None => ParseOutcome::New(doc),
        Some(old) => {
            let content_changed = old.hash != doc.hash;
            ParseOutcome::Updated {
                doc,
                content_changed,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::store::STORE_FILE_NAME;
    use crate::writer::WriteQueue;

    fn setup() -> (tempfile::TempDir, tempfile::TempDir, Arc<KvStore>, Workspace) {
        let data = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let store = KvStore::open(&data.path().join(STORE_FILE_NAME)).unwrap();
        let mut ws = Workspace::new(crate::normalize_path(&root.path().to_string_lossy()));
        ws.id = "7".to_string();
        crate::workspace::seed_workspace_rows(&store, &["7"]);
        (data, root, store, ws)
    }

    #[test]
    fn test_new_then_unchanged_then_updated() {
        let (_data, root, store, ws) = setup();
        let file = root.path().join("a.txt");
        std::fs::write(&file, "hello world\n").unwrap();

        let ParseOutcome::New(doc) = parse_file(&store, &ws, "a.txt", 1 << 20).unwrap() else {
            panic!("expected a new document");
        };
        assert_eq!(doc.id, crate::md5_hex(ws.abs_path("a.txt").as_bytes()));
        assert_eq!(doc.hash, crate::md5_hex(b"hello world\n"));
        assert_eq!(doc.words, vec!["hello", "world"]);
        assert_eq!(doc.size, 12);

        let (queue, mut worker) = WriteQueue::start(Arc::clone(&store)).unwrap();
        queue.save_new_documents(&ws.id, vec![doc]).unwrap();
        assert!(matches!(
            parse_file(&store, &ws, "a.txt", 1 << 20).unwrap(),
            ParseOutcome::Unchanged
        ));

        // same content, new mtime
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(5);
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(later)
            .unwrap();
        match parse_file(&store, &ws, "a.txt", 1 << 20).unwrap() {
            ParseOutcome::Updated {
                content_changed, ..
            } => assert!(!content_changed),
            other => panic!("unexpected {:?}", other),
        }

        std::fs::write(&file, "goodbye\n").unwrap();
        let later = std::time::SystemTime::now() + std::time::Duration::from_secs(10);
        std::fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(later)
            .unwrap();
        match parse_file(&store, &ws, "a.txt", 1 << 20).unwrap() {
            ParseOutcome::Updated {
                doc,
                content_changed,
            } => {
                assert!(content_changed);
                assert_eq!(doc.words, vec!["goodbye"]);
            }
            other => panic!("unexpected {:?}", other),
        }
        worker.stop();
    }

    #[test]
    fn test_skips() {
        let (_data, root, store, ws) = setup();
        std::fs::write(root.path().join("big.txt"), "x".repeat(100)).unwrap();
        std::fs::write(root.path().join("blob.dat"), [0u8, 1, 2, 3, 0, 0, 0, 0]).unwrap();
        std::fs::create_dir(root.path().join("dir")).unwrap();

        assert!(matches!(
            parse_file(&store, &ws, "big.txt", 10).unwrap(),
            ParseOutcome::Skipped(SkipReason::TooLarge)
        ));
        assert!(matches!(
            parse_file(&store, &ws, "blob.dat", 1 << 20).unwrap(),
            ParseOutcome::Skipped(SkipReason::NotText)
        ));
        assert!(matches!(
            parse_file(&store, &ws, "missing.txt", 1 << 20).unwrap(),
            ParseOutcome::Skipped(SkipReason::Missing)
        ));
        assert!(matches!(
            parse_file(&store, &ws, "dir", 1 << 20).unwrap(),
            ParseOutcome::Skipped(SkipReason::Missing)
        ));
    }
}
