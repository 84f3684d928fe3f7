use std::borrow::Cow;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors surfaced by the shingles index backends.
///
/// Unknown documents and empty candidate sets are not errors: lookups return
/// empty collections or `None` for them. Everything here means the storage
/// itself could not serve the request, so callers can tell "no data" apart
/// from "storage unavailable".
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        source: std::io::Error,
        path: Option<PathBuf>,
    },

    #[error("Serialization error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Deserialization error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("Tantivy directory error: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    #[error("Stored record is invalid: {reason}")]
    Schema { reason: Cow<'static, str> },

    #[error("Capacity exceeded in {backend} backend: requested {requested}, limit {limit}")]
    CapacityExceeded {
        backend: &'static str,
        requested: usize,
        limit: usize,
    },
}

impl IndexError {
    pub(crate) fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        IndexError::Io {
            source,
            path: Some(path.into()),
        }
    }

    pub(crate) fn schema(reason: impl Into<Cow<'static, str>>) -> Self {
        IndexError::Schema {
            reason: reason.into(),
        }
    }

    /// Returns true if the error is a capacity limit of the backend rather than
    /// a storage failure.
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, IndexError::CapacityExceeded { .. })
    }
}

impl From<std::io::Error> for IndexError {
    fn from(source: std::io::Error) -> Self {
        IndexError::Io { source, path: None }
    }
}
