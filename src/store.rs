//! Ordered key-value store adapter.
//!
//! A thin wrapper over a single redb table of byte keys and byte values.
//! Everything the index persists goes through [`KvStore`]: point reads and
//! writes, prefix and range scans in ascending key order, atomic batches,
//! background compaction and a closed flag that every operation checks.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use redb::{Database, ReadableTable, TableDefinition};
use tracing::{info, warn};

use crate::error::{IndexError, Result};

/// The only table. Keys are the codec's ASCII keys, values are JSON or
/// pipe-joined lists.
const KV: TableDefinition<&[u8], &[u8]> = TableDefinition::new("kv");

/// File name of the store inside `<home>/data/`.
pub const STORE_FILE_NAME: &str = "index.redb";

pub struct KvStore {
    db: RwLock<Option<Database>>,
    closed: AtomicBool,
    compacting: AtomicBool,
}

impl KvStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let db = Database::create(path)?;
        // Read transactions fail on a table that was never created.
        let txn = db.begin_write()?;
        txn.open_table(KV)?;
        txn.commit()?;
        info!(path = %path.display(), "KV store opened");
        Ok(Arc::new(KvStore {
            db: RwLock::new(Some(db)),
            closed: AtomicBool::new(false),
            compacting: AtomicBool::new(false),
        }))
    }

    fn with_db<T>(&self, f: impl FnOnce(&Database) -> Result<T>) -> Result<T> {
        if self.is_closed() {
            return Err(IndexError::StoreClosed);
        }
        let guard = self.db.read().unwrap_or_else(|e| e.into_inner());
        match guard.as_ref() {
            Some(db) => f(db),
            None => Err(IndexError::StoreClosed),
        }
    }

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.with_db(|db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(KV)?;
                table.insert(key, value)?;
            }
            txn.commit()?;
            Ok(())
        })
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(KV)?;
            Ok(table.get(key)?.map(|v| v.value().to_vec()))
        })
    }

    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.with_db(|db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(KV)?;
                table.remove(key)?;
            }
            txn.commit()?;
            Ok(())
        })
    }

    /// Visit every pair whose key starts with `prefix`, in ascending key
    /// order, until `f` returns false. The slices are only valid for the
    /// duration of the callback.
    pub fn scan(&self, prefix: &[u8], f: impl FnMut(&[u8], &[u8]) -> bool) -> Result<()> {
        match prefix_end(prefix) {
            Some(hi) => self.scan_range(prefix, Some(&hi), f),
            None => self.scan_range(prefix, None, f),
        }
    }

    /// Visit every pair with `lo <= key < hi` (unbounded above when `hi` is
    /// `None`), in ascending key order, until `f` returns false.
    pub fn scan_range(
        &self,
        lo: &[u8],
        hi: Option<&[u8]>,
        mut f: impl FnMut(&[u8], &[u8]) -> bool,
    ) -> Result<()> {
        self.with_db(|db| {
            let txn = db.begin_read()?;
            let table = txn.open_table(KV)?;
            let range = match hi {
                Some(hi) if hi <= lo => return Ok(()),
                Some(hi) => table.range(lo..hi)?,
                None => table.range(lo..)?,
            };
            for item in range {
                let (k, v) = item?;
                if !f(k.value(), v.value()) {
                    break;
                }
            }
            Ok(())
        })
    }

    /// Start an atomic batch. Nothing is written until [`Batch::commit`].
    pub fn batch(&self) -> Batch<'_> {
        Batch {
            store: self,
            ops: Vec::new(),
        }
    }

    /// Request physical compaction on a background thread. Concurrent
    /// requests while one is running are dropped.
    pub fn schedule_compact(self: &Arc<Self>) {
        if self.is_closed() || self.compacting.swap(true, Ordering::AcqRel) {
            return;
        }
        let store = Arc::clone(self);
        std::thread::spawn(move || {
            let result = store.compact_now();
            store.compacting.store(false, Ordering::Release);
            match result {
                Ok(true) => info!("KV store compacted"),
                Ok(false) => info!("KV store compaction found nothing to reclaim"),
                Err(e) => warn!(error = %e, "KV store compaction failed"),
            }
        });
    }

    /// Compact on the calling thread. Blocks every reader and writer while
    /// it runs.
    pub fn compact_now(&self) -> Result<bool> {
        if self.is_closed() {
            return Err(IndexError::StoreClosed);
        }
        let mut guard = self.db.write().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(db) => Ok(db.compact()?),
            None => Err(IndexError::StoreClosed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the store. Waits for in-flight operations, then drops the
    /// database handle. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut guard = self.db.write().unwrap_or_else(|e| e.into_inner());
        if guard.take().is_some() {
            info!("KV store closed");
        }
    }
}

impl Drop for KvStore {
    fn drop(&mut self) {
        self.close();
    }
}

// ─── Batches ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
    DeleteRange(Vec<u8>, Vec<u8>),
}

/// A set of writes applied in one write transaction: either all of them
/// survive a crash or none do.
pub struct Batch<'a> {
    store: &'a KvStore,
    ops: Vec<BatchOp>,
}

impl Batch<'_> {
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
    }

    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::Delete(key.into()));
    }

    /// Delete every key in `[lo, hi)`.
    pub fn delete_range(&mut self, lo: impl Into<Vec<u8>>, hi: impl Into<Vec<u8>>) {
        self.ops.push(BatchOp::DeleteRange(lo.into(), hi.into()));
    }

    /// `delete_range(prefix, prefix ++ 0xFF)`.
    pub fn delete_prefix(&mut self, prefix: impl Into<Vec<u8>>) {
        let lo = prefix.into();
        let mut hi = lo.clone();
        hi.push(0xFF);
        self.ops.push(BatchOp::DeleteRange(lo, hi));
    }

    /// Number of queued operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply every queued operation atomically. An empty batch is a no-op.
    pub fn commit(self) -> Result<()> {
        if self.ops.is_empty() {
            return if self.store.is_closed() {
                Err(IndexError::StoreClosed)
            } else {
                Ok(())
            };
        }
        let ops = self.ops;
        self.store.with_db(|db| {
            let txn = db.begin_write()?;
            {
                let mut table = txn.open_table(KV)?;
                for op in &ops {
                    match op {
                        BatchOp::Put(k, v) => {
                            table.insert(k.as_slice(), v.as_slice())?;
                        }
                        BatchOp::Delete(k) => {
                            table.remove(k.as_slice())?;
                        }
                        BatchOp::DeleteRange(lo, hi) => {
                            if hi <= lo {
                                continue;
                            }
                            let mut doomed: Vec<Vec<u8>> = Vec::new();
                            for item in table.range(lo.as_slice()..hi.as_slice())? {
                                let (k, _) = item?;
                                doomed.push(k.value().to_vec());
                            }
                            for k in &doomed {
                                table.remove(k.as_slice())?;
                            }
                        }
                    }
                }
            }
            txn.commit()?;
            Ok(())
        })
    }
}

/// Smallest key strictly greater than every key starting with `prefix`,
/// or `None` when no such key exists (empty or all-0xFF prefix).
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
