use super::*;
use crate::document::get_document;
use crate::store::STORE_FILE_NAME;
use crate::tokenizer;

fn open_temp() -> (tempfile::TempDir, Arc<KvStore>) {
    let dir = tempfile::tempdir().unwrap();
    let store = KvStore::open(&dir.path().join(STORE_FILE_NAME)).unwrap();
    crate::workspace::seed_workspace_rows(&store, &["1"]);
    (dir, store)
}

fn doc(abs_path: &str, content: &str) -> Document {
    Document {
        id: Document::id_for_path(abs_path),
        rel_path: abs_path.trim_start_matches('/').to_string(),
        words: tokenizer::parse_words(content.as_bytes()),
        ..Document::default()
    }
}

fn keyword_ids(store: &KvStore, ws: &str, keyword: &str) -> Vec<String> {
    let mut ids = Vec::new();
    store
        .scan(codec::keyword_prefix(ws, keyword).as_bytes(), |_, v| {
            ids.extend(codec::decode_list(v).unwrap());
            true
        })
        .unwrap();
    ids.sort();
    ids
}

#[test]
fn test_tick_clock_strictly_increases() {
    let mut clock = TickClock::default();
    let mut last = 0;
    for _ in 0..10_000 {
        let t = clock.next();
        assert!(t > last);
        last = t;
    }
}

#[test]
fn test_completed_save_is_visible_to_readers() {
    let (_dir, store) = open_temp();
    let (queue, mut worker) = WriteQueue::start(Arc::clone(&store)).unwrap();
    let d = doc("/w/a.txt", "hello world");
    queue.save_new_documents("1", vec![d.clone()]).unwrap();

    assert!(get_document(&store, "1", &d.id, false).unwrap().is_some());
    // postings may still be pending
    queue.flush_pending(true).unwrap();
    assert_eq!(keyword_ids(&store, "1", "hello"), vec![d.id.clone()]);
    worker.stop();
}

#[test]
fn test_tasks_run_in_submission_order() {
    let (_dir, store) = open_temp();
    let (queue, mut worker) = WriteQueue::start(Arc::clone(&store)).unwrap();
    let d = doc("/w/a.txt", "hello");

    let producers: Vec<_> = (0..4)
        .map(|i| {
            let q = queue.clone();
            let d = doc(&format!("/w/{}.txt", i), "shared");
            std::thread::spawn(move || q.save_new_documents("1", vec![d]).unwrap())
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    queue.save_new_documents("1", vec![d.clone()]).unwrap();
    queue.delete_document("1", &d.id).unwrap();
    assert!(get_document(&store, "1", &d.id, false).unwrap().is_none());

    queue.flush_pending(true).unwrap();
    assert_eq!(keyword_ids(&store, "1", "shared").len(), 4);
    assert!(keyword_ids(&store, "1", "hello").is_empty());
    worker.stop();
}

#[test]
fn test_errors_come_back_through_completion() {
    let (_dir, store) = open_temp();
    let (queue, mut worker) = WriteQueue::start(store).unwrap();
    let err = queue.delete_document("1", "missing").unwrap_err();
    assert!(matches!(err, IndexError::NotFound(_)));
    // the worker keeps going after a failed task
    assert!(queue.flush_pending(true).is_ok());
    worker.stop();
}

#[test]
fn test_stop_performs_final_flush() {
    let (_dir, store) = open_temp();
    let (queue, mut worker) = WriteQueue::start(Arc::clone(&store)).unwrap();
    let d = doc("/w/a.txt", "pending words");
    queue.save_new_documents("1", vec![d.clone()]).unwrap();
    worker.stop();

    assert_eq!(keyword_ids(&store, "1", "pending"), vec![d.id.clone()]);
    assert_eq!(keyword_ids(&store, "1", "words"), vec![d.id]);
}

#[test]
fn test_submit_after_stop_reports_closed() {
    let (_dir, store) = open_temp();
    let (queue, mut worker) = WriteQueue::start(store).unwrap();
    worker.stop();
    // second stop is a no-op
    worker.stop();
    assert!(matches!(
        queue.flush_pending(false),
        Err(IndexError::StoreClosed)
    ));
}

#[test]
fn test_flush_rate_limit_reported() {
    let (_dir, store) = open_temp();
    let (queue, mut worker) = WriteQueue::start(store).unwrap();
    let first = queue.flush_pending(false).unwrap();
    assert!(first.ran);
    let second = queue.flush_pending(false).unwrap();
    assert!(!second.ran);
    let forced = queue.flush_pending(true).unwrap();
    assert!(forced.ran);
    assert_eq!(forced.remaining, 0);
    worker.stop();
}

#[test]
fn test_flush_timer_drains_aged_entries() {
    let (_dir, store) = open_temp();
    let (queue, mut worker) = WriteQueue::start(Arc::clone(&store)).unwrap();
    let shutdown = Shutdown::new();
    let timer = spawn_flush_timer(queue.clone(), shutdown.clone()).unwrap();

    let d = doc("/w/a.txt", "eventually visible");
    queue.save_new_documents("1", vec![d.clone()]).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while keyword_ids(&store, "1", "eventually").is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(keyword_ids(&store, "1", "eventually"), vec![d.id]);

    shutdown.trigger();
    timer.join().unwrap();
    worker.stop();
}

#[test]
fn test_closed_store_fails_tasks() {
    let (_dir, store) = open_temp();
    let (queue, mut worker) = WriteQueue::start(Arc::clone(&store)).unwrap();
    store.close();
    assert!(matches!(
        queue.save_new_documents("1", vec![doc("/w/a.txt", "abc")]),
        Err(IndexError::StoreClosed)
    ));
    worker.stop();
}
