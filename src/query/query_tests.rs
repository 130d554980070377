use std::sync::Arc;

use super::*;
use crate::codec;
use crate::document::Document;
use crate::error::IndexError;
use crate::store::{KvStore, STORE_FILE_NAME};
use crate::tokenizer;
use crate::workspace::Workspace;
use crate::writer::{WriteQueue, WriteWorker};

struct Env {
    _data: tempfile::TempDir,
    root: tempfile::TempDir,
    store: Arc<KvStore>,
    queue: WriteQueue,
    worker: WriteWorker,
    ws: Workspace,
}

fn env() -> Env {
    let data = tempfile::tempdir().unwrap();
    let root = tempfile::tempdir().unwrap();
    let store = KvStore::open(&data.path().join(STORE_FILE_NAME)).unwrap();
    let (queue, worker) = WriteQueue::start(Arc::clone(&store)).unwrap();
    let path = crate::normalize_path(&root.path().to_string_lossy());
    let ws = queue.create_workspace(Workspace::new(path)).unwrap();
    Env {
        _data: data,
        root,
        store,
        queue,
        worker,
        ws,
    }
}

impl Env {
    fn write(&self, rel: &str, content: &str) -> Document {
        let abs = self.ws.abs_path(rel);
        if let Some(parent) = std::path::Path::new(&abs).parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&abs, content).unwrap();
        Document {
            id: Document::id_for_path(&abs),
            rel_path: rel.to_string(),
            size: content.len() as u64,
            hash: crate::md5_hex(content.as_bytes()),
            words: tokenizer::parse_words(content.as_bytes()),
            ..Document::default()
        }
    }

    fn index(&self, rel: &str, content: &str) -> Document {
        let doc = self.write(rel, content);
        self.queue.save_new_documents(&self.ws.id, vec![doc.clone()]).unwrap();
        self.queue.flush_pending(true).unwrap();
        doc
    }

    fn search(&self, query: &str) -> SearchContentResponse {
        self.search_with(SearchContentRequest {
            workspace: self.ws.path.clone(),
            query: query.to_string(),
            ..SearchContentRequest::default()
        })
    }

    fn search_with(&self, request: SearchContentRequest) -> SearchContentResponse {
        search_content(&self.store, &self.ws, &request, &SearchLimit::default()).unwrap()
    }

    fn files(&self, response: &SearchContentResponse) -> Vec<String> {
        response
            .results
            .iter()
            .map(|r| self.ws.rel_path(&r.file).unwrap())
            .collect()
    }

    fn posting_ids(&self, keyword: &str) -> Vec<String> {
        let mut ids = Vec::new();
        self.store
            .scan(codec::keyword_prefix(&self.ws.id, keyword).as_bytes(), |_, v| {
                ids.extend(codec::decode_list(v).unwrap());
                true
            })
            .unwrap();
        ids
    }
}

#[test]
fn test_single_file_index_and_find() {
    let mut e = env();
    let doc = e.index("a.txt", "hello world HELLO\n");

    let res = e.search("hello");
    assert_eq!(e.files(&res), vec!["a.txt"]);
    let line = &res.results[0].lines[0].line;
    assert_eq!(line.line_number, 1);
    assert_eq!(line.content, "hello world HELLO");
    assert_eq!(line.match_span, [0, 5]);
    assert_eq!(line.matches, vec![[0, 5], [12, 17]]);
    assert!(!res.truncate);

    let mut rows = Vec::new();
    e.store
        .scan(codec::keyword_prefix(&e.ws.id, "hello").as_bytes(), |k, v| {
            rows.push((String::from_utf8_lossy(k).into_owned(), codec::decode_list(v).unwrap()));
            true
        })
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].0.starts_with(&format!("kw:{}|hello|1|", e.ws.id)));
    assert_eq!(rows[0].1, vec![crate::md5_hex(e.ws.abs_path("a.txt").as_bytes())]);
    assert_eq!(rows[0].1, vec![doc.id]);
    e.worker.stop();
}

#[test]
fn test_update_replaces_tokens() {
    let mut e = env();
    e.index("a.txt", "hello world HELLO\n");
    let updated = e.write("a.txt", "foo bar\n");
    e.queue.update_documents(&e.ws.id, vec![updated]).unwrap();
    e.queue.flush_pending(true).unwrap();

    assert!(e.search("hello").results.is_empty());
    assert_eq!(e.files(&e.search("foo")), vec!["a.txt"]);
    e.worker.stop();
}

#[test]
fn test_delete_removes_postings_and_rows() {
    let mut e = env();
    let doc = e.index("a.txt", "hello world HELLO\n");
    e.queue.delete_document(&e.ws.id, &doc.id).unwrap();

    for kw in ["hello", "world"] {
        assert!(!e.posting_ids(kw).contains(&doc.id));
    }
    for family in codec::DocFamily::ALL {
        let key = codec::doc_key(family, &e.ws.id, &doc.id);
        assert!(e.store.get(key.as_bytes()).unwrap().is_none());
    }
    assert!(e.search("hello").results.is_empty());
    e.worker.stop();
}

#[test]
fn test_boolean_queries() {
    let mut e = env();
    e.index("f1.txt", "cat dog\n");
    e.index("f2.txt", "cat\n");
    e.index("f3.txt", "dog\n");

    assert_eq!(e.files(&e.search("cat dog")), vec!["f1.txt"]);
    assert_eq!(e.files(&e.search("cat AND dog")), vec!["f1.txt"]);
    assert_eq!(
        e.files(&e.search("cat | dog")),
        vec!["f1.txt", "f2.txt", "f3.txt"]
    );
    // order matters within a line
    assert!(e.search("dog cat").results.is_empty());
    e.worker.stop();
}

#[test]
fn test_prefix_expansion() {
    let mut e = env();
    e.index("f1.txt", "hello helloworld\n");

    let res = e.search("hello*");
    assert_eq!(res.results.len(), 1);
    let line = &res.results[0].lines[0].line;
    assert_eq!(line.matches, vec![[0, 5], [6, 16]]);
    assert_eq!(line.match_span, [0, 5]);
    // a plain term still finds the longer token's file through the prefix scan
    assert_eq!(e.files(&e.search("hellowor*")), vec!["f1.txt"]);
    e.worker.stop();
}

#[test]
fn test_case_sensitive_request() {
    let mut e = env();
    e.index("a.txt", "Hello\n");
    e.index("b.txt", "hello\n");
    let res = e.search_with(SearchContentRequest {
        workspace: e.ws.path.clone(),
        query: "Hello".to_string(),
        case_sensitive: true,
        ..SearchContentRequest::default()
    });
    assert_eq!(e.files(&res), vec!["a.txt"]);
    assert_eq!(e.files(&e.search("Hello")), vec!["a.txt", "b.txt"]);
    e.worker.stop();
}

#[test]
fn test_context_lines() {
    let mut e = env();
    e.index("a.txt", "one\ntwo\nneedle here\nfour\r\nfive\n");
    let res = e.search("needle");
    let hit = &res.results[0].lines[0];
    assert_eq!(hit.line.line_number, 3);
    assert_eq!(hit.before.len(), 1);
    assert_eq!(hit.before[0].content, "two");
    assert_eq!(hit.after[0].content, "four");

    let res = e.search_with(SearchContentRequest {
        workspace: e.ws.path.clone(),
        query: "needle".to_string(),
        before_after: Some(5),
        ..SearchContentRequest::default()
    });
    let hit = &res.results[0].lines[0];
    assert_eq!(hit.before.len(), 2);
    assert_eq!(hit.after.len(), 2);

    let res = e.search_with(SearchContentRequest {
        workspace: e.ws.path.clone(),
        query: "needle".to_string(),
        before_after: Some(0),
        ..SearchContentRequest::default()
    });
    assert!(res.results[0].lines[0].before.is_empty());
    e.worker.stop();
}

#[test]
fn test_path_and_glob_filters() {
    let mut e = env();
    e.index("src/a.rs", "token\n");
    e.index("src/b.go", "token\n");
    e.index("docs/c.md", "token\n");
    e.index("srcx/d.rs", "token\n");

    let run = |filters: SearchFilters| {
        e.files(&e.search_with(SearchContentRequest {
            workspace: e.ws.path.clone(),
            query: "token".to_string(),
            filters: Some(filters),
            ..SearchContentRequest::default()
        }))
    };
    assert_eq!(
        run(SearchFilters {
            path: Some("src".to_string()),
            ..SearchFilters::default()
        }),
        vec!["src/a.rs", "src/b.go"]
    );
    assert_eq!(
        run(SearchFilters {
            include: Some("*.rs".to_string()),
            ..SearchFilters::default()
        }),
        vec!["src/a.rs", "srcx/d.rs"]
    );
    assert_eq!(
        run(SearchFilters {
            exclude: Some("docs, *.go".to_string()),
            ..SearchFilters::default()
        }),
        vec!["src/a.rs", "srcx/d.rs"]
    );
    assert_eq!(
        run(SearchFilters {
            path: Some(e.ws.abs_path("srcx")),
            ..SearchFilters::default()
        }),
        vec!["srcx/d.rs"]
    );
    e.worker.stop();
}

#[test]
fn test_limits_truncate() {
    let mut e = env();
    e.index("a.txt", "match\nmatch\nmatch\n");
    e.index("b.txt", "match\n");

    let res = e.search_with(SearchContentRequest {
        workspace: e.ws.path.clone(),
        query: "match".to_string(),
        limit: Some(RequestLimit {
            max_results: None,
            max_results_per_file: Some(2),
        }),
        ..SearchContentRequest::default()
    });
    assert_eq!(res.results[0].lines.len(), 2);
    assert!(res.results[0].truncate);
    assert!(!res.results[1].truncate);
    assert!(!res.truncate);

    let res = e.search_with(SearchContentRequest {
        workspace: e.ws.path.clone(),
        query: "match".to_string(),
        limit: Some(RequestLimit {
            max_results: Some(2),
            max_results_per_file: None,
        }),
        ..SearchContentRequest::default()
    });
    assert_eq!(res.results.len(), 1);
    assert_eq!(res.results[0].lines.len(), 2);
    assert!(res.truncate);
    e.worker.stop();
}

#[test]
fn test_global_limit_ignores_candidates_without_matches() {
    let mut e = env();
    e.index("a.txt", "needle other\n");
    // both keywords make b.txt a candidate, but the terms are out of order
    e.index("b.txt", "other needle\n");

    let res = e.search_with(SearchContentRequest {
        workspace: e.ws.path.clone(),
        query: "needle other".to_string(),
        limit: Some(RequestLimit {
            max_results: Some(1),
            max_results_per_file: None,
        }),
        ..SearchContentRequest::default()
    });
    assert_eq!(res.results.len(), 1);
    assert!(!res.truncate);

    let res = e.search_with(SearchContentRequest {
        workspace: e.ws.path.clone(),
        query: "needle".to_string(),
        limit: Some(RequestLimit {
            max_results: Some(1),
            max_results_per_file: None,
        }),
        ..SearchContentRequest::default()
    });
    assert_eq!(res.results.len(), 1);
    assert!(res.truncate, "b.txt still had a match to drop");
    e.worker.stop();
}

#[test]
fn test_stale_and_unreadable_candidates_are_skipped() {
    let mut e = env();
    e.index("a.txt", "ghost\n");
    e.index("b.txt", "ghost\n");
    std::fs::remove_file(e.ws.abs_path("a.txt")).unwrap();
    // posting row pointing at a document that no longer has meta
    e.store
        .put(
            codec::keyword_key(&e.ws.id, "ghost", 1, 1).as_bytes(),
            b"0123456789abcdef0123456789abcdef",
        )
        .unwrap();
    assert_eq!(e.files(&e.search("ghost")), vec!["b.txt"]);
    e.worker.stop();
}

#[test]
fn test_unflushed_postings_are_not_visible_yet() {
    let mut e = env();
    let doc = e.write("a.txt", "pending\n");
    e.queue.save_new_documents(&e.ws.id, vec![doc]).unwrap();
    assert!(e.search("pending").results.is_empty());
    e.queue.flush_pending(true).unwrap();
    assert_eq!(e.search("pending").results.len(), 1);
    e.worker.stop();
}

#[test]
fn test_bad_queries_are_errors() {
    let e = env();
    let run = |q: &str| {
        search_content(
            &e.store,
            &e.ws,
            &SearchContentRequest {
                workspace: e.ws.path.clone(),
                query: q.to_string(),
                ..SearchContentRequest::default()
            },
            &SearchLimit::default(),
        )
    };
    assert!(matches!(run(""), Err(IndexError::Parse(_))));
    assert!(matches!(run("*"), Err(IndexError::Parse(_))));
}

#[test]
fn test_closed_store_is_reported() {
    let e = env();
    e.store.close();
    let err = search_content(
        &e.store,
        &e.ws,
        &SearchContentRequest {
            workspace: e.ws.path.clone(),
            query: "hello".to_string(),
            ..SearchContentRequest::default()
        },
        &SearchLimit::default(),
    )
    .unwrap_err();
    assert!(matches!(err, IndexError::StoreClosed));
}

#[test]
fn test_file_search() {
    let mut e = env();
    e.index("src/main.rs", "x\n");
    e.index("src/indexer/main_loop.rs", "x\n");
    e.index("docs/readme.md", "x\n");

    let req = |q: &str, limit: Option<usize>| SearchFilesRequest {
        workspace: e.ws.path.clone(),
        query: q.to_string(),
        limit,
    };
    let names = |r: SearchFilesResponse| -> Vec<String> {
        r.files.into_iter().map(|f| f.rel_path).collect()
    };
    let limits = SearchLimit::default();

    let res = search_files(&e.store, &e.ws, &req("main", None), &limits).unwrap();
    assert_eq!(names(res), vec!["src/main.rs", "src/indexer/main_loop.rs"]);

    let res = search_files(&e.store, &e.ws, &req("src ind", None), &limits).unwrap();
    assert_eq!(names(res), vec!["src/indexer/main_loop.rs"]);

    let res = search_files(&e.store, &e.ws, &req("main", Some(1)), &limits).unwrap();
    assert_eq!(res.files.len(), 1);
    assert_eq!(res.files[0].file, e.ws.abs_path("src/main.rs"));

    assert!(matches!(
        search_files(&e.store, &e.ws, &req("", None), &limits),
        Err(IndexError::Parse(_))
    ));
    e.worker.stop();
}

#[test]
fn test_effective_limit() {
    assert_eq!(effective_limit(None, 100), 100);
    assert_eq!(effective_limit(Some(0), 100), 100);
    assert_eq!(effective_limit(Some(10), 100), 10);
    assert_eq!(effective_limit(Some(1000), 100), 100);
}
