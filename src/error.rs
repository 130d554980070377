//! Unified error type for the indexing and query engine.

use thiserror::Error;

/// All errors that can occur in index, store and query operations.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Malformed request, empty query, non-absolute path
    #[error("{0}")]
    InvalidInput(String),

    /// Unknown workspace, missing document, absent row
    #[error("{0} not found")]
    NotFound(String),

    /// The KV store was closed before or during the operation
    #[error("database is closed")]
    StoreClosed,

    /// A stored row that does not match its declared grammar
    #[error("corrupted row '{key}': {message}")]
    Corruption { key: String, message: String },

    /// I/O error (file read, directory access, lock file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by the underlying KV engine
    #[error("store error: {0}")]
    Store(String),

    /// Query parser error, returned verbatim to the client
    #[error("{0}")]
    Parse(String),

    /// A query term that did not translate into a valid regex
    #[error("Invalid regex pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Configuration file could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// Another daemon already holds the single-instance lock
    #[error("server is running")]
    AlreadyRunning,

    /// Nothing is listening on the configured port
    #[error("server is not running")]
    NotRunning,

    /// The daemon could not be reached over HTTP
    #[error("request to server failed: {0}")]
    Http(String),

    /// The daemon answered with a non-zero code
    #[error("{0}")]
    Remote(String),

    /// On-disk data was written by an incompatible version
    #[error("storage version mismatch: found '{found}', expected '{expected}'")]
    VersionMismatch { found: String, expected: String },
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub fn not_found(what: impl Into<String>) -> Self {
        IndexError::NotFound(what.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        IndexError::InvalidInput(message.into())
    }
}

// ─── redb conversions ───────────────────────────────────────────────

macro_rules! store_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for IndexError {
                fn from(e: $ty) -> Self {
                    IndexError::Store(e.to_string())
                }
            }
        )*
    };
}

store_error_from!(
    redb::Error,
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
    redb::CompactionError,
);

impl From<reqwest::Error> for IndexError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            IndexError::NotRunning
        } else {
            IndexError::Http(e.to_string())
        }
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        IndexError::Corruption {
            key: String::new(),
            message: e.to_string(),
        }
    }
}
