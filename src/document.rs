//! Document engine: add, update and delete documents and keep the posting
//! rows consistent with each document's token set.
//!
//! Every mutation runs on the write worker (see [`crate::writer`]) and
//! writes one batch. The `dm:`, `dw:` and `dp:` rows of a document are
//! always written or deleted together in that batch.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::{self, DocFamily};
use crate::error::{IndexError, Result};
use crate::store::{Batch, KvStore};
use crate::tokenizer;
use crate::writer::Writer;

/// One file of a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Hex MD5 of the absolute path. Always taken from the row key, never
    /// from the stored JSON.
    #[serde(skip)]
    pub id: String,
    /// Relative to the workspace root, forward slashes.
    pub rel_path: String,
    pub size: u64,
    /// Hex MD5 of the content.
    pub hash: String,
    /// Nanoseconds since the epoch.
    pub modified_time: i64,
    /// Nanoseconds since the epoch.
    pub last_sync_time: i64,
    /// Sorted, unique, case-preserving content tokens.
    #[serde(skip)]
    pub words: Vec<String>,
    /// Lower-cased relative path tokens.
    #[serde(skip)]
    pub path_words: Vec<String>,
}

impl Document {
    /// The id a file at `abs_path` gets in every workspace.
    pub fn id_for_path(abs_path: &str) -> String {
        crate::md5_hex(abs_path.as_bytes())
    }
}

// ─── Reads ───────────────────────────────────────────────────────────

/// Load a document's meta row and, optionally, its token row.
pub fn get_document(
    store: &KvStore,
    workspace_id: &str,
    doc_id: &str,
    include_words: bool,
) -> Result<Option<Document>> {
    let key = codec::doc_key(DocFamily::Meta, workspace_id, doc_id);
    let Some(raw) = store.get(key.as_bytes())? else {
        return Ok(None);
    };
    let mut doc: Document = codec::decode_json(&key, &raw)?;
    doc.id = doc_id.to_string();
    doc.path_words = tokenizer::parse_path_words(&doc.rel_path);
    if include_words {
        doc.words = get_document_words(store, workspace_id, doc_id)?.unwrap_or_default();
    }
    Ok(Some(doc))
}

/// Load a document's token row.
pub fn get_document_words(
    store: &KvStore,
    workspace_id: &str,
    doc_id: &str,
) -> Result<Option<Vec<String>>> {
    let key = codec::doc_key(DocFamily::Words, workspace_id, doc_id);
    match store.get(key.as_bytes())? {
        None => Ok(None),
        Some(raw) => codec::decode_list(&raw)
            .map(Some)
            .ok_or_else(|| IndexError::Corruption {
                key,
                message: "token list is not UTF-8".to_string(),
            }),
    }
}

/// Every `(doc_id, rel_path)` of a workspace, from its `dp:` rows.
pub fn list_document_paths(store: &KvStore, workspace_id: &str) -> Result<Vec<(String, String)>> {
    let prefix = codec::doc_prefix(DocFamily::Path, workspace_id);
    let mut out = Vec::new();
    store.scan(prefix.as_bytes(), |k, v| {
        let key = String::from_utf8_lossy(k);
        match (codec::decode_doc_key(DocFamily::Path, &key), std::str::from_utf8(v)) {
            (Some((_, doc_id)), Ok(rel)) => out.push((doc_id.to_string(), rel.to_string())),
            _ => warn!(key = %key, "Skipping malformed document path row"),
        }
        true
    })?;
    Ok(out)
}

/// Number of documents indexed in a workspace.
pub fn count_documents(store: &KvStore, workspace_id: &str) -> Result<usize> {
    let prefix = codec::doc_prefix(DocFamily::Meta, workspace_id);
    let mut n = 0;
    store.scan(prefix.as_bytes(), |_, _| {
        n += 1;
        true
    })?;
    Ok(n)
}

// ─── Mutations (write worker only) ───────────────────────────────────

fn put_document_rows(batch: &mut Batch<'_>, workspace_id: &str, doc: &Document) -> Result<()> {
    batch.put(
        codec::doc_key(DocFamily::Meta, workspace_id, &doc.id),
        codec::encode_json(doc)?,
    );
    batch.put(
        codec::doc_key(DocFamily::Words, workspace_id, &doc.id),
        codec::encode_list(&doc.words),
    );
    batch.put(
        codec::doc_key(DocFamily::Path, workspace_id, &doc.id),
        doc.rel_path.clone(),
    );
    Ok(())
}

fn delete_document_rows(batch: &mut Batch<'_>, workspace_id: &str, doc_id: &str) {
    for family in DocFamily::ALL {
        batch.delete(codec::doc_key(family, workspace_id, doc_id));
    }
}

fn validate(doc: &Document) -> Result<()> {
    if doc.id.is_empty() || doc.id.contains(codec::SEPARATOR) {
        return Err(IndexError::invalid(format!(
            "invalid document id '{}' for {}",
            doc.id, doc.rel_path
        )));
    }
    Ok(())
}

impl Writer {
    /// Index documents the caller saw for the first time. An id that is
    /// already stored (another producer got there first) is diffed like an
    /// update, so its old postings do not outlive it.
    pub(crate) fn save_new_documents(&mut self, workspace_id: &str, docs: &[Document]) -> Result<()> {
        self.require_workspace(workspace_id)?;
        self.write_documents(workspace_id, docs)
    }

    pub(crate) fn update_documents(&mut self, workspace_id: &str, docs: &[Document]) -> Result<()> {
        self.require_workspace(workspace_id)?;
        self.write_documents(workspace_id, docs)
    }

    /// Write the rows of `docs` and move their postings from the stored
    /// token set to the new one. The last copy of a repeated id wins.
    fn write_documents(&mut self, workspace_id: &str, docs: &[Document]) -> Result<()> {
        let mut latest: BTreeMap<&str, &Document> = BTreeMap::new();
        for doc in docs {
            validate(doc)?;
            latest.insert(doc.id.as_str(), doc);
        }

        let now_ns = crate::now_nanos();
        let store = Arc::clone(&self.store);
        let mut batch = store.batch();
        // keyword -> documents losing it, so each posting list is rewritten once
        let mut removals: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut additions: Vec<(String, BTreeSet<String>)> = Vec::with_capacity(latest.len());

        for doc in latest.into_values() {
            let current = get_document_words(&store, workspace_id, &doc.id)?.unwrap_or_default();
            let current = tokenizer::keywords_of(&current);
            let updated = tokenizer::keywords_of(&doc.words);

            for kw in current.difference(&updated) {
                removals.entry(kw.clone()).or_default().insert(doc.id.clone());
            }
            additions.push((
                doc.id.clone(),
                updated.difference(&current).cloned().collect(),
            ));

            let mut doc = doc.clone();
            doc.last_sync_time = now_ns;
            put_document_rows(&mut batch, workspace_id, &doc)?;
        }

        for (kw, doc_ids) in &removals {
            self.remove_from_keyword(&mut batch, workspace_id, kw, doc_ids)?;
        }
        batch.commit()?;

        let now = Instant::now();
        for (kw, doc_ids) in &removals {
            for id in doc_ids {
                self.cache.remove(workspace_id, kw, id);
            }
        }
        for (doc_id, new_keywords) in additions {
            self.cache.add(workspace_id, &doc_id, new_keywords, now);
        }
        Ok(())
    }

    pub(crate) fn delete_document(&mut self, workspace_id: &str, doc_id: &str) -> Result<()> {
        if self.store.is_closed() {
            return Err(IndexError::StoreClosed);
        }
        let meta_key = codec::doc_key(DocFamily::Meta, workspace_id, doc_id);
        if self.store.get(meta_key.as_bytes())?.is_none() {
            return Err(IndexError::not_found(format!("document {}", doc_id)));
        }
        let words = get_document_words(&self.store, workspace_id, doc_id)?.unwrap_or_default();
        let keywords = tokenizer::keywords_of(&words);
        let only_this: BTreeSet<String> = std::iter::once(doc_id.to_string()).collect();

        let store = Arc::clone(&self.store);
        let mut batch = store.batch();
        for kw in &keywords {
            self.remove_from_keyword(&mut batch, workspace_id, kw, &only_this)?;
        }
        delete_document_rows(&mut batch, workspace_id, doc_id);
        batch.commit()?;

        for kw in &keywords {
            self.cache.remove(workspace_id, kw, doc_id);
        }
        Ok(())
    }

    /// Rewrite every posting row of `keyword` without `doc_ids`.
    ///
    /// Reads all fragments under `kw:<ws>|<keyword>|`, deletes them in
    /// `batch` and writes the remaining union back in rows of at most
    /// `max_keyword_index_size` ids. Rows whose value cannot be decoded are
    /// deleted. Nothing is written when none of the ids was present.
    pub(crate) fn remove_from_keyword(
        &mut self,
        batch: &mut Batch<'_>,
        workspace_id: &str,
        keyword: &str,
        doc_ids: &BTreeSet<String>,
    ) -> Result<()> {
        let prefix = codec::keyword_prefix(workspace_id, keyword);
        let mut keys: Vec<Vec<u8>> = Vec::new();
        let mut union: BTreeSet<String> = BTreeSet::new();
        let mut corrupt = false;
        self.store.scan(prefix.as_bytes(), |k, v| {
            keys.push(k.to_vec());
            match codec::decode_list(v) {
                Some(ids) => union.extend(ids),
                None => {
                    warn!(key = %String::from_utf8_lossy(k), "Dropping undecodable posting row");
                    corrupt = true;
                }
            }
            true
        })?;

        let before = union.len();
        union.retain(|id| !doc_ids.contains(id));
        if union.len() == before && !corrupt {
            return Ok(());
        }

        for key in keys {
            batch.delete(key);
        }
        let remaining: Vec<String> = union.into_iter().collect();
        for chunk in remaining.chunks(self.max_keyword_index_size.max(1)) {
            batch.put(
                codec::keyword_key(workspace_id, keyword, chunk.len(), self.clock.next()),
                codec::encode_list(chunk),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
