//! Keyword compactor: coalesces fragmented posting rows.
//!
//! The pending-write cache produces many small rows per keyword. The
//! compactor walks the `kw:` keyspace in key order in short, time-boxed
//! iterations, each submitted through the write queue so it never races
//! with document writes or flushes. Fragments of one `(workspace, keyword)`
//! are merged into rows of at most `max_keyword_index_size` ids. After a
//! full pass that removed at least a quarter of the rows, the store is asked
//! to compact itself.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::codec;
use crate::error::{IndexError, Result};
use crate::shutdown::Shutdown;
use crate::store::KvStore;
use crate::writer::{WriteQueue, Writer};

/// Limits of a single compactor iteration.
#[derive(Debug, Clone, Copy)]
pub struct MergeBudget {
    /// Stop after this many keyword groups have been collected.
    pub max_groups: usize,
    /// Stop at the next keyword boundary once this much time has passed.
    pub max_duration: Duration,
}

impl Default for MergeBudget {
    fn default() -> Self {
        MergeBudget {
            max_groups: 500,
            max_duration: Duration::from_millis(300),
        }
    }
}

/// Progress of one compaction pass over the `kw:` keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Merging {
    /// Where the next iteration resumes; `None` once the pass reached the
    /// end of the keyspace.
    pub next_iter: Option<Vec<u8>>,
    /// The last iteration found unflushed postings and did nothing.
    pub waiting_for_flush: bool,
    /// The last iteration stopped on its time budget.
    pub timed_out: bool,
    pub total_keywords: usize,
    pub total_rows_before: usize,
    pub total_rows_after: usize,
}

impl Default for Merging {
    fn default() -> Self {
        Self::new()
    }
}

impl Merging {
    /// A pass positioned at the start of the keyspace.
    pub fn new() -> Self {
        Merging {
            next_iter: Some(codec::KEYWORD_PREFIX.as_bytes().to_vec()),
            waiting_for_flush: false,
            timed_out: false,
            total_keywords: 0,
            total_rows_before: 0,
            total_rows_after: 0,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.next_iter.is_none()
    }

    /// Share of rows removed so far, in `[0, 1]`.
    pub fn reduction(&self) -> f64 {
        if self.total_rows_before == 0 {
            return 0.0;
        }
        let removed = self.total_rows_before.saturating_sub(self.total_rows_after);
        removed as f64 / self.total_rows_before as f64
    }
}

/// All rows of one `(workspace, keyword)` seen by an iteration.
#[derive(Debug, Default)]
struct InvertedIndex {
    workspace_id: String,
    keyword: String,
    /// Keys of the small fragments that are candidates for merging.
    rows: Vec<Vec<u8>>,
    doc_ids: BTreeSet<String>,
    doc_count: usize,
    /// Fragments already holding more than half a full row.
    well_batched_rows: usize,
}

/// Split a sorted, deduplicated id list into rows of `max` ids. A tail
/// shorter than `max / 5` is folded into the previous row rather than left
/// as a tiny fragment.
pub fn pack_doc_ids(ids: &[String], max: usize) -> Vec<Vec<String>> {
    let max = max.max(1);
    let mut groups: Vec<Vec<String>> = ids.chunks(max).map(<[String]>::to_vec).collect();
    if groups.len() >= 2 && groups.last().is_some_and(|g| g.len() < max / 5) {
        if let Some(tail) = groups.pop() {
            if let Some(last) = groups.last_mut() {
                last.extend(tail);
            }
        }
    }
    groups
}

impl Writer {
    /// One compactor iteration. Does nothing but set `waiting_for_flush`
    /// while the pending-write cache holds entries.
    pub(crate) fn merge_keywords(&mut self, mut merging: Merging) -> Result<Merging> {
        if self.store.is_closed() {
            return Err(IndexError::StoreClosed);
        }
        if !self.cache.is_empty() {
            merging.waiting_for_flush = true;
            return Ok(merging);
        }
        merging.waiting_for_flush = false;
        merging.timed_out = false;
        let Some(start) = merging.next_iter.clone() else {
            return Ok(merging);
        };
        self.merge_keywords_index(&mut merging, &start)?;
        Ok(merging)
    }

    fn merge_keywords_index(&mut self, merging: &mut Merging, start: &[u8]) -> Result<()> {
        let max = self.max_keyword_index_size.max(1);
        let budget = self.merge_budget;
        let began = Instant::now();
        let mut hi = codec::KEYWORD_PREFIX.as_bytes().to_vec();
        hi.push(0xFF);

        let mut groups: Vec<InvertedIndex> = Vec::new();
        let mut current: Option<InvertedIndex> = None;
        let mut garbage: Vec<Vec<u8>> = Vec::new();
        let mut stop_at: Option<Vec<u8>> = None;
        let mut timed_out = false;

        self.store.scan_range(start, Some(&hi), |k, v| {
            let Some(parsed) = std::str::from_utf8(k).ok().and_then(codec::decode_keyword_key) else {
                warn!(key = %String::from_utf8_lossy(k), "Dropping malformed posting key");
                garbage.push(k.to_vec());
                return true;
            };

            let same_group = current
                .as_ref()
                .is_some_and(|c| c.workspace_id == parsed.workspace_id && c.keyword == parsed.keyword);
            if !same_group {
                let workspace_changed = current
                    .as_ref()
                    .is_some_and(|c| c.workspace_id != parsed.workspace_id);
                if let Some(finished) = current.take() {
                    groups.push(finished);
                }
                if !groups.is_empty() {
                    let out_of_time = began.elapsed() >= budget.max_duration;
                    if out_of_time || groups.len() >= budget.max_groups || workspace_changed {
                        timed_out = out_of_time;
                        stop_at = Some(k.to_vec());
                        return false;
                    }
                }
            }

            let group = current.get_or_insert_with(|| InvertedIndex {
                workspace_id: parsed.workspace_id.clone(),
                keyword: parsed.keyword.clone(),
                ..InvertedIndex::default()
            });
            if parsed.doc_count > max / 2 {
                group.well_batched_rows += 1;
                return true;
            }
            match codec::decode_list(v) {
                Some(ids) => {
                    group.rows.push(k.to_vec());
                    group.doc_count += parsed.doc_count;
                    group.doc_ids.extend(ids);
                }
                None => {
                    warn!(key = %String::from_utf8_lossy(k), "Dropping undecodable posting row");
                    garbage.push(k.to_vec());
                }
            }
            true
        })?;
        if let Some(finished) = current.take() {
            groups.push(finished);
        }

        let store = Arc::clone(&self.store);
        let mut batch = store.batch();
        for key in garbage {
            batch.delete(key);
        }
        for group in groups {
            merging.total_keywords += 1;
            let rows = group.rows.len();
            merging.total_rows_before += rows + group.well_batched_rows;

            if rows > 1 && group.doc_count / rows <= max {
                let ids: Vec<String> = group.doc_ids.into_iter().collect();
                let packed = pack_doc_ids(&ids, max);
                for key in group.rows {
                    batch.delete(key);
                }
                for chunk in &packed {
                    batch.put(
                        codec::keyword_key(
                            &group.workspace_id,
                            &group.keyword,
                            chunk.len(),
                            self.clock.next(),
                        ),
                        codec::encode_list(chunk),
                    );
                }
                merging.total_rows_after += packed.len() + group.well_batched_rows;
            } else {
                merging.total_rows_after += rows + group.well_batched_rows;
            }
        }
        batch.commit()?;

        merging.next_iter = stop_at;
        merging.timed_out = timed_out;
        debug!(
            keywords = merging.total_keywords,
            rows_before = merging.total_rows_before,
            rows_after = merging.total_rows_after,
            finished = merging.is_finished(),
            "Keyword merge iteration"
        );
        Ok(())
    }
}

// ─── Scheduler ───────────────────────────────────────────────────────

/// Timers of the compactor state machine.
#[derive(Debug, Clone, Copy)]
pub struct CompactorOptions {
    /// Before the first pass.
    pub initial_delay: Duration,
    /// While postings are still waiting in the cache.
    pub flush_wait: Duration,
    /// After an iteration that ran out of time.
    pub resume_delay: Duration,
    /// Between full passes.
    pub pass_interval: Duration,
    /// Minimum row reduction of a pass that triggers store compaction.
    pub compact_threshold: f64,
}

impl Default for CompactorOptions {
    fn default() -> Self {
        CompactorOptions {
            initial_delay: Duration::from_secs(300),
            flush_wait: Duration::from_secs(5),
            resume_delay: Duration::from_secs(1),
            pass_interval: Duration::from_secs(3600),
            compact_threshold: 0.25,
        }
    }
}

/// Run full compaction passes until shutdown. Each iteration goes through
/// `queue`; only the final compaction request touches `store`.
pub fn spawn_compactor(
    queue: WriteQueue,
    store: Arc<KvStore>,
    shutdown: Shutdown,
    options: CompactorOptions,
) -> Result<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("haystack-compactor".to_string())
        .spawn(move || {
            if shutdown.wait_timeout(options.initial_delay) {
                return;
            }
            loop {
                let Some(merging) = run_pass(&queue, &shutdown, &options) else {
                    return;
                };
                let reduction = merging.reduction();
                info!(
                    keywords = merging.total_keywords,
                    rows_before = merging.total_rows_before,
                    rows_after = merging.total_rows_after,
                    reduction = format_args!("{:.1}%", reduction * 100.0),
                    "Keyword compaction pass complete"
                );
                if merging.total_rows_before > 0 && reduction >= options.compact_threshold {
                    store.schedule_compact();
                }
                if shutdown.wait_timeout(options.pass_interval) {
                    return;
                }
            }
        })?;
    Ok(handle)
}

/// Drive one pass to the end of the keyspace. `None` means shutdown.
fn run_pass(queue: &WriteQueue, shutdown: &Shutdown, options: &CompactorOptions) -> Option<Merging> {
    let mut merging = Merging::new();
    loop {
        if shutdown.is_triggered() {
            return None;
        }
        let delay = match queue.merge_keywords(merging.clone()) {
            Ok(next) => {
                merging = next;
                if merging.waiting_for_flush {
                    options.flush_wait
                } else if merging.is_finished() {
                    return Some(merging);
                } else if merging.timed_out {
                    options.resume_delay
                } else {
                    Duration::ZERO
                }
            }
            Err(IndexError::StoreClosed) => return None,
            Err(e) => {
                warn!(error = %e, "Keyword merge iteration failed");
                options.resume_delay
            }
        };
        if !delay.is_zero() && shutdown.wait_timeout(delay) {
            return None;
        }
    }
}

#[cfg(test)]
#[path = "compactor_tests.rs"]
mod tests;
