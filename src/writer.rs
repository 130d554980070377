//! Write serializer: the single worker thread that owns every mutation.
//!
//! Producers (HTTP handlers, the indexer, the flush timer, the compactor)
//! never write to the store themselves. They send a [`Task`] over an
//! unbounded FIFO channel and block on the task's completion channel. The
//! worker runs tasks one at a time in submission order, which is what lets
//! the pending-write cache live without a lock and lets the compactor rely
//! on "nothing is in flight" while it runs.

use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::cache::PendingWriteCache;
use crate::codec;
use crate::compactor::{MergeBudget, Merging};
use crate::document::Document;
use crate::error::{IndexError, Result};
use crate::shutdown::Shutdown;
use crate::store::KvStore;
use crate::workspace::Workspace;

/// Upper bound on the number of ids in one posting row written by the
/// engine.
pub const MAX_KEYWORD_INDEX_SIZE: usize = 1000;

/// How often the flush timer enqueues a flush pass.
pub const FLUSH_TICK: Duration = Duration::from_secs(1);

// ─── Ticks ───────────────────────────────────────────────────────────

/// Strictly increasing microsecond clock for posting-row keys.
///
/// Two rows for the same `(workspace, keyword, doc_count)` written in the
/// same microsecond would otherwise share a key and the second would
/// silently replace the first.
#[derive(Debug, Default)]
pub struct TickClock {
    last: u64,
}

impl TickClock {
    pub fn next(&mut self) -> u64 {
        let now = crate::now_micros();
        self.last = now.max(self.last + 1);
        self.last
    }
}

// ─── Tasks ───────────────────────────────────────────────────────────

type Done<T> = Sender<Result<T>>;

/// Result of one flush pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    /// False when the pass was skipped by the rate limit.
    pub ran: bool,
    pub rows_written: usize,
    /// Entries still pending after the pass.
    pub remaining: usize,
}

pub(crate) enum Task {
    CreateWorkspace {
        workspace: Workspace,
        done: Done<Workspace>,
    },
    SaveWorkspace {
        workspace: Workspace,
        done: Done<()>,
    },
    DeleteWorkspace {
        workspace_id: String,
        done: Done<()>,
    },
    SaveNewDocuments {
        workspace_id: String,
        docs: Vec<Document>,
        done: Done<()>,
    },
    UpdateDocuments {
        workspace_id: String,
        docs: Vec<Document>,
        done: Done<()>,
    },
    DeleteDocument {
        workspace_id: String,
        doc_id: String,
        done: Done<()>,
    },
    FlushPending {
        closing: bool,
        done: Done<FlushStats>,
    },
    MergeKeywords {
        merging: Merging,
        done: Done<Merging>,
    },
    Stop,
}

impl Task {
    fn name(&self) -> &'static str {
        match self {
            Task::CreateWorkspace { .. } => "create_workspace",
            Task::SaveWorkspace { .. } => "save_workspace",
            Task::DeleteWorkspace { .. } => "delete_workspace",
            Task::SaveNewDocuments { .. } => "save_new_documents",
            Task::UpdateDocuments { .. } => "update_documents",
            Task::DeleteDocument { .. } => "delete_document",
            Task::FlushPending { .. } => "flush_pending",
            Task::MergeKeywords { .. } => "merge_keywords",
            Task::Stop => "stop",
        }
    }

    /// Execute against the worker state and report through the completion
    /// channel. A caller that stopped waiting is not an error.
    fn run(self, writer: &mut Writer) {
        match self {
            Task::CreateWorkspace { workspace, done } => {
                let _ = done.send(writer.create_workspace(workspace));
            }
            Task::SaveWorkspace { workspace, done } => {
                let _ = done.send(writer.save_workspace(&workspace));
            }
            Task::DeleteWorkspace { workspace_id, done } => {
                let _ = done.send(writer.delete_workspace(&workspace_id));
            }
            Task::SaveNewDocuments {
                workspace_id,
                docs,
                done,
            } => {
                let _ = done.send(writer.save_new_documents(&workspace_id, &docs));
            }
            Task::UpdateDocuments {
                workspace_id,
                docs,
                done,
            } => {
                let _ = done.send(writer.update_documents(&workspace_id, &docs));
            }
            Task::DeleteDocument {
                workspace_id,
                doc_id,
                done,
            } => {
                let _ = done.send(writer.delete_document(&workspace_id, &doc_id));
            }
            Task::FlushPending { closing, done } => {
                let _ = done.send(writer.flush_pending(closing));
            }
            Task::MergeKeywords { merging, done } => {
                let _ = done.send(writer.merge_keywords(merging));
            }
            Task::Stop => {}
        }
    }
}

// ─── Worker state ────────────────────────────────────────────────────

/// Everything the worker thread owns. Only tasks touch it.
pub(crate) struct Writer {
    pub(crate) store: Arc<KvStore>,
    pub(crate) cache: PendingWriteCache,
    pub(crate) clock: TickClock,
    pub(crate) max_keyword_index_size: usize,
    pub(crate) merge_budget: MergeBudget,
}

impl Writer {
    pub(crate) fn new(store: Arc<KvStore>) -> Self {
        Writer {
            store,
            cache: PendingWriteCache::new(),
            clock: TickClock::default(),
            max_keyword_index_size: MAX_KEYWORD_INDEX_SIZE,
            merge_budget: MergeBudget::default(),
        }
    }

    /// Write every due cache entry as a fresh posting row, in one batch.
    pub(crate) fn flush_pending(&mut self, closing: bool) -> Result<FlushStats> {
        if self.store.is_closed() {
            return Err(IndexError::StoreClosed);
        }
        let Some(ready) = self.cache.select_ready(closing, Instant::now()) else {
            return Ok(FlushStats {
                ran: false,
                rows_written: 0,
                remaining: self.cache.len(),
            });
        };
        if ready.is_empty() {
            return Ok(FlushStats {
                ran: true,
                rows_written: 0,
                remaining: self.cache.len(),
            });
        }

        let mut batch = self.store.batch();
        for entry in &ready {
            let key = codec::keyword_key(
                &entry.workspace_id,
                &entry.keyword,
                entry.doc_ids.len(),
                self.clock.next(),
            );
            batch.put(key, codec::encode_list(&entry.doc_ids));
        }
        batch.commit()?;
        self.cache.mark_flushed(&ready);

        let stats = FlushStats {
            ran: true,
            rows_written: ready.len(),
            remaining: self.cache.len(),
        };
        debug!(
            rows = stats.rows_written,
            remaining = stats.remaining,
            closing,
            "Flushed pending keyword writes"
        );
        Ok(stats)
    }

    fn run_loop(mut self, rx: Receiver<Task>) {
        info!("Write worker started");
        while let Ok(task) = rx.recv() {
            if matches!(task, Task::Stop) {
                break;
            }
            self.run_task(task);
        }
        // Drain whatever was queued behind the stop request.
        while let Ok(task) = rx.try_recv() {
            if !matches!(task, Task::Stop) {
                self.run_task(task);
            }
        }
        match self.flush_pending(true) {
            Ok(stats) => info!(rows = stats.rows_written, "Final flush complete"),
            Err(e) => error!(error = %e, "Final flush failed"),
        }
        info!("Write worker stopped");
    }

    fn run_task(&mut self, task: Task) {
        let name = task.name();
        let start = Instant::now();
        task.run(self);
        let elapsed = start.elapsed();
        if elapsed > Duration::from_secs(1) {
            warn!(
                task = name,
                elapsed_ms = format_args!("{:.1}", elapsed.as_secs_f64() * 1000.0),
                "Slow write task"
            );
        }
    }
}

// ─── Queue handle ────────────────────────────────────────────────────

/// Cloneable handle for submitting tasks. Every method blocks until the
/// worker has run the task.
#[derive(Clone)]
pub struct WriteQueue {
    tx: Sender<Task>,
}

/// Owns the worker thread. [`WriteWorker::stop`] drains the queue, runs
/// the final flush and joins the thread.
pub struct WriteWorker {
    tx: Sender<Task>,
    handle: Option<JoinHandle<()>>,
}

impl WriteQueue {
    /// Spawn the worker thread over `store`.
    pub fn start(store: Arc<KvStore>) -> Result<(WriteQueue, WriteWorker)> {
        Self::start_with(Writer::new(store))
    }

    pub(crate) fn start_with(writer: Writer) -> Result<(WriteQueue, WriteWorker)> {
        let (tx, rx) = mpsc::channel::<Task>();
        let handle = std::thread::Builder::new()
            .name("haystack-writer".to_string())
            .spawn(move || writer.run_loop(rx))?;
        Ok((
            WriteQueue { tx: tx.clone() },
            WriteWorker {
                tx,
                handle: Some(handle),
            },
        ))
    }

    fn submit<T>(&self, make: impl FnOnce(Done<T>) -> Task) -> Result<T> {
        let (done, wait) = mpsc::channel();
        self.tx
            .send(make(done))
            .map_err(|_| IndexError::StoreClosed)?;
        // The worker dropped the task without answering: it has stopped.
        wait.recv().map_err(|_| IndexError::StoreClosed)?
    }

    pub fn create_workspace(&self, workspace: Workspace) -> Result<Workspace> {
        self.submit(|done| Task::CreateWorkspace { workspace, done })
    }

    pub fn save_workspace(&self, workspace: Workspace) -> Result<()> {
        self.submit(|done| Task::SaveWorkspace { workspace, done })
    }

    pub fn delete_workspace(&self, workspace_id: &str) -> Result<()> {
        let workspace_id = workspace_id.to_string();
        self.submit(|done| Task::DeleteWorkspace { workspace_id, done })
    }

    pub fn save_new_documents(&self, workspace_id: &str, docs: Vec<Document>) -> Result<()> {
        let workspace_id = workspace_id.to_string();
        self.submit(|done| Task::SaveNewDocuments {
            workspace_id,
            docs,
            done,
        })
    }

    pub fn update_documents(&self, workspace_id: &str, docs: Vec<Document>) -> Result<()> {
        let workspace_id = workspace_id.to_string();
        self.submit(|done| Task::UpdateDocuments {
            workspace_id,
            docs,
            done,
        })
    }

    pub fn delete_document(&self, workspace_id: &str, doc_id: &str) -> Result<()> {
        let workspace_id = workspace_id.to_string();
        let doc_id = doc_id.to_string();
        self.submit(|done| Task::DeleteDocument {
            workspace_id,
            doc_id,
            done,
        })
    }

    pub fn flush_pending(&self, closing: bool) -> Result<FlushStats> {
        self.submit(|done| Task::FlushPending { closing, done })
    }

    pub fn merge_keywords(&self, merging: Merging) -> Result<Merging> {
        self.submit(|done| Task::MergeKeywords { merging, done })
    }
}

impl WriteWorker {
    /// Stop accepting work after everything already queued, final-flush
    /// and wait for the thread. Idempotent.
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.tx.send(Task::Stop);
        if handle.join().is_err() {
            error!("Write worker panicked");
        }
    }
}

impl Drop for WriteWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Enqueue a flush pass every [`FLUSH_TICK`] until shutdown.
pub fn spawn_flush_timer(queue: WriteQueue, shutdown: Shutdown) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("haystack-flush".to_string())
        .spawn(move || {
            while !shutdown.wait_timeout(FLUSH_TICK) {
                match queue.flush_pending(false) {
                    Ok(_) => {}
                    Err(IndexError::StoreClosed) => break,
                    Err(e) => warn!(error = %e, "Periodic flush failed"),
                }
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
#[path = "writer_tests.rs"]
mod tests;
