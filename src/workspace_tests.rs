use super::*;
use crate::document::Document;
use crate::store::STORE_FILE_NAME;
use crate::tokenizer;
use crate::writer::WriteWorker;

struct Fixture {
    _data: tempfile::TempDir,
    roots: tempfile::TempDir,
    store: Arc<KvStore>,
    queue: WriteQueue,
    worker: WriteWorker,
}

fn fixture() -> Fixture {
    let data = tempfile::tempdir().unwrap();
    let roots = tempfile::tempdir().unwrap();
    let store = KvStore::open(&data.path().join(STORE_FILE_NAME)).unwrap();
    let (queue, worker) = WriteQueue::start(Arc::clone(&store)).unwrap();
    Fixture {
        _data: data,
        roots,
        store,
        queue,
        worker,
    }
}

impl Fixture {
    fn dir(&self, name: &str) -> String {
        let p = self.roots.path().join(name);
        std::fs::create_dir_all(&p).unwrap();
        p.to_string_lossy().into_owned()
    }

    fn registry(&self) -> WorkspaceRegistry {
        WorkspaceRegistry::load(&self.store, self.queue.clone()).unwrap()
    }

    fn count_prefix(&self, prefix: &str) -> usize {
        let mut n = 0;
        self.store
            .scan(prefix.as_bytes(), |_, _| {
                n += 1;
                true
            })
            .unwrap();
        n
    }
}

#[test]
fn test_ids_are_assigned_from_counter() {
    let f = fixture();
    let reg = f.registry();
    let a = reg.create(&f.dir("a")).unwrap();
    let b = reg.create(&f.dir("b")).unwrap();
    assert_eq!(a.id, "0");
    assert_eq!(b.id, "1");
    let counter = f.store.get(codec::NEXT_WORKSPACE_ID_KEY.as_bytes()).unwrap().unwrap();
    assert_eq!(counter, b"2");
}

#[test]
fn test_ids_are_never_reused() {
    let f = fixture();
    let reg = f.registry();
    let a = reg.create(&f.dir("a")).unwrap();
    reg.delete(&a.path).unwrap();
    let again = reg.create(&f.dir("a")).unwrap();
    assert_ne!(again.id, a.id);
    assert_eq!(again.id, "1");
}

#[test]
fn test_create_rejects_bad_paths() {
    let f = fixture();
    let reg = f.registry();
    assert!(matches!(reg.create("relative/dir"), Err(IndexError::InvalidInput(_))));
    assert!(matches!(reg.create(""), Err(IndexError::InvalidInput(_))));

    let missing = f.roots.path().join("missing");
    assert!(matches!(
        reg.create(&missing.to_string_lossy()),
        Err(IndexError::InvalidInput(_))
    ));

    let file = f.roots.path().join("file.txt");
    std::fs::write(&file, "x").unwrap();
    assert!(matches!(
        reg.create(&file.to_string_lossy()),
        Err(IndexError::InvalidInput(_))
    ));
}

#[test]
fn test_duplicate_create_fails() {
    let f = fixture();
    let reg = f.registry();
    let dir = f.dir("a");
    reg.create(&dir).unwrap();
    let err = reg.create(&format!("{}/", dir)).unwrap_err();
    assert_eq!(err.to_string(), "workspace already exists");
    assert_eq!(reg.list().len(), 1);
}

#[test]
fn test_registry_reloads_from_store() {
    let f = fixture();
    let a = f.dir("a");
    let b = f.dir("b");
    {
        let reg = f.registry();
        reg.create(&a).unwrap();
        reg.create(&b).unwrap();
    }
    let reg = f.registry();
    let listed: Vec<String> = reg.list().into_iter().map(|w| w.path).collect();
    assert_eq!(listed, vec![a.clone(), b]);
    assert_eq!(reg.find(&a).unwrap().id, "0");
    assert_eq!(reg.get_by_id("1").unwrap().id, "1");
}

#[test]
fn test_get_refreshes_access_time() {
    let f = fixture();
    let reg = f.registry();
    let ws = reg.create(&f.dir("a")).unwrap();
    std::thread::sleep(std::time::Duration::from_millis(5));
    let got = reg.get(&ws.path).unwrap();
    assert!(got.last_accessed > ws.last_accessed);
    assert!(matches!(reg.get("/definitely/not/registered"), Err(IndexError::NotFound(_))));
}

#[test]
fn test_delete_cascades_every_scoped_row() {
    let mut f = fixture();
    let reg = f.registry();
    let keep = reg.create(&f.dir("keep")).unwrap();
    let gone = reg.create(&f.dir("gone")).unwrap();

    for ws in [&keep, &gone] {
        let abs = ws.abs_path("a.txt");
        let doc = Document {
            id: Document::id_for_path(&abs),
            rel_path: "a.txt".to_string(),
            words: tokenizer::parse_words(b"hello world"),
            ..Document::default()
        };
        f.queue.save_new_documents(&ws.id, vec![doc]).unwrap();
    }
    f.queue.flush_pending(true).unwrap();
    // a second batch left in the cache must not resurface after deletion
    let late = Document {
        id: Document::id_for_path(&gone.abs_path("b.txt")),
        rel_path: "b.txt".to_string(),
        words: tokenizer::parse_words(b"late words"),
        ..Document::default()
    };
    f.queue.save_new_documents(&gone.id, vec![late]).unwrap();

    reg.delete(&gone.path).unwrap();
    f.queue.flush_pending(true).unwrap();

    assert!(f.store.get(codec::workspace_key(&gone.id).as_bytes()).unwrap().is_none());
    for prefix in codec::workspace_scoped_prefixes(&gone.id) {
        assert_eq!(f.count_prefix(&prefix), 0, "rows left under {}", prefix);
    }
    for prefix in codec::workspace_scoped_prefixes(&keep.id) {
        assert!(f.count_prefix(&prefix) > 0, "rows missing under {}", prefix);
    }
    assert!(reg.find(&gone.path).is_none());
    assert!(matches!(reg.delete(&gone.path), Err(IndexError::NotFound(_))));
    f.worker.stop();
}

#[test]
fn test_update_after_delete_is_rejected() {
    let f = fixture();
    let reg = f.registry();
    let mut ws = reg.create(&f.dir("a")).unwrap();
    reg.delete(&ws.path).unwrap();
    ws.total_files = 10;
    assert!(matches!(reg.update(ws.clone()), Err(IndexError::NotFound(_))));
    assert!(f.store.get(codec::workspace_key(&ws.id).as_bytes()).unwrap().is_none());
}

#[test]
fn test_stale_access_does_not_resurrect_deleted_row() {
    let f = fixture();
    let reg = f.registry();
    let mut ws = reg.create(&f.dir("a")).unwrap();
    ws.last_accessed = Utc::now() - ChronoDuration::seconds(ACCESS_PERSIST_INTERVAL * 2);
    reg.update(ws.clone()).unwrap();

    // the row goes away behind the registry's back, as a queued delete would
    f.queue.delete_workspace(&ws.id).unwrap();
    let got = reg.get(&ws.path).unwrap();
    assert!(got.last_accessed > ws.last_accessed);
    assert!(f.store.get(codec::workspace_key(&ws.id).as_bytes()).unwrap().is_none());
}

#[test]
fn test_save_of_unknown_workspace_is_not_found() {
    let f = fixture();
    let mut ws = Workspace::new("/tmp/never-created".to_string());
    ws.id = "42".to_string();
    assert!(matches!(f.queue.save_workspace(ws), Err(IndexError::NotFound(_))));
    assert_eq!(f.count_prefix(codec::WORKSPACE_PREFIX), 0);
}

#[test]
fn test_update_persists() {
    let f = fixture();
    let reg = f.registry();
    let mut ws = reg.create(&f.dir("a")).unwrap();
    ws.total_files = 42;
    ws.last_full_sync = Some(Utc::now());
    reg.update(ws.clone()).unwrap();

    let reloaded = f.registry();
    let got = reloaded.get_by_id(&ws.id).unwrap();
    assert_eq!(got.total_files, 42);
    assert!(got.last_full_sync.is_some());
}

#[test]
fn test_effective_filters() {
    let global = Filters::default();
    let own = Filters {
        include: vec!["*.rs".to_string()],
        ..Filters::default()
    };
    let mut ws = Workspace::new("/w");
    assert_eq!(ws.effective_filters(&global), &global);
    ws.filters = Some(own.clone());
    assert_eq!(ws.effective_filters(&global), &global);
    ws.use_global_filters = false;
    assert_eq!(ws.effective_filters(&global), &own);
}

#[test]
fn test_relative_and_absolute_paths() {
    let ws = Workspace::new("/w/root");
    assert_eq!(ws.abs_path("src/a.rs"), "/w/root/src/a.rs");
    assert_eq!(ws.rel_path("/w/root/src/a.rs").as_deref(), Some("src/a.rs"));
    assert_eq!(ws.rel_path("/w/other/a.rs"), None);
    assert_eq!(ws.rel_path("/w/root"), None);
}
