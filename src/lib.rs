//! # haystack: local code search service
//!
//! A daemon keeps a persistent inverted index of every registered
//! workspace in a single-file KV store and answers content and file-name
//! searches over a localhost HTTP API. The same binary is the CLI client.
//!
//! ## Library usage
//!
//! The binary is a thin shell over this crate: [`context::IndexerContext`]
//! wires the store, the write queue, the workspace registry and the
//! indexer together; [`server::serve`] exposes them over HTTP.

use std::time::{SystemTime, UNIX_EPOCH};

pub mod cache;
pub mod client;
pub mod codec;
pub mod compactor;
pub mod config;
pub mod context;
pub mod document;
pub mod error;
pub mod indexer;
pub mod lock;
pub mod query;
pub mod server;
pub mod shutdown;
pub mod store;
pub mod tokenizer;
pub mod workspace;
pub mod writer;

pub use error::{IndexError, Result};

// ─── Hashing and clocks ──────────────────────────────────────────────

/// Lower-case hex MD5 of `data`. Document ids and content hashes.
#[must_use]
pub fn md5_hex(data: impl AsRef<[u8]>) -> String {
    format!("{:x}", md5::compute(data))
}

fn since_epoch() -> std::time::Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(std::time::Duration::ZERO)
}

/// Wall clock in microseconds.
pub fn now_micros() -> u64 {
    u64::try_from(since_epoch().as_micros()).unwrap_or(u64::MAX)
}

/// Wall clock in nanoseconds.
pub fn now_nanos() -> i64 {
    i64::try_from(since_epoch().as_nanos()).unwrap_or(i64::MAX)
}

// ─── Paths ───────────────────────────────────────────────────────────

/// Strip the `\\?\` extended-length path prefix that Windows canonicalize adds.
#[must_use]
pub fn clean_path(p: &str) -> String {
    p.strip_prefix(r"\\?\").unwrap_or(p).to_string()
}

/// `X:` at the start of `p`.
fn drive_prefix(p: &str) -> Option<&str> {
    let bytes = p.as_bytes();
    (bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':').then(|| &p[..2])
}

/// True for `/...` and for Windows drive paths `X:\...` or `X:/...`,
/// whatever the host platform.
#[must_use]
pub fn is_absolute_path(p: &str) -> bool {
    if std::path::Path::new(p).is_absolute() || p.starts_with('/') {
        return true;
    }
    drive_prefix(p).is_some() && matches!(p.as_bytes().get(2), Some(b'/') | Some(b'\\'))
}

/// Lexically normalised form of `p`.
///
/// - Separators become `/`.
/// - `.` components are dropped and `..` folds into its parent. A leading
///   `..` of a relative path is kept.
/// - Trailing separators are removed, except for a bare root.
/// - A drive letter is upper-cased.
#[must_use]
pub fn normalize_path(p: &str) -> String {
    let unified = clean_path(p.trim()).replace('\\', "/");
    let (drive, rest) = match drive_prefix(&unified) {
        Some(d) => (d.to_ascii_uppercase(), &unified[2..]),
        None => (String::new(), unified.as_str()),
    };
    let rooted = rest.starts_with('/');

    let mut parts: Vec<&str> = Vec::new();
    for part in rest.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }

    let body = parts.join("/");
    match (rooted, body.is_empty()) {
        (true, _) => format!("{}/{}", drive, body),
        (false, false) => format!("{}{}", drive, body),
        (false, true) if !drive.is_empty() => drive,
        (false, true) => ".".to_string(),
    }
}


// ─── Property-based tests (proptest) ─────────────────────────────────
