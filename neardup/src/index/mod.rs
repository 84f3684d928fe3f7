//! The shingles index contract and its storage backends.
//!
//! Every backend implements [`ShinglesIndex`] with the same observable
//! semantics:
//!
//! * [`MemoryShinglesIndex`] keeps everything in hash maps and serializes the
//!   whole aggregate into one file on [`save_index`](ShinglesIndex::save_index).
//! * [`SqliteShinglesIndex`] stores document/hash associations and similarity
//!   edges in two SQLite tables.
//! * [`TantivyShinglesIndex`] stores each sketch as a whitespace tokenized text
//!   field and answers candidate lookups with boolean term queries.
//!
//! [`TracedIndex`] wraps any of them and records per-operation latencies.
//!
//! # Concurrency
//!
//! The contract is not thread-safe by itself. Mutations take `&mut self`, so a
//! caller that ingests from several threads has to serialize writes, e.g.
//! behind a `Mutex`. Reads take `&self`.
mod memory;
mod sqlite;
mod text_index;
mod traced;

pub use self::memory::MemoryShinglesIndex;
pub use self::sqlite::{BatchOverflow, SqliteOptions, SqliteShinglesIndex};
pub use self::text_index::{TantivyOptions, TantivyShinglesIndex};
pub use self::traced::{Operation, TraceEntry, TraceReport, TracedIndex};

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{IndexError, Result};
use crate::{CandidateSketches, DocumentId, DocumentIds, ShingleHash, Sketch};

/// Where an index keeps its data: a base directory and the index name.
///
/// Backends derive their physical location from it (a file or a directory
/// named after the index inside `base_path`), so one location binds exactly
/// one index of a given backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IndexLocation {
    base_path: PathBuf,
    name: String,
}

impl IndexLocation {
    pub fn new(base_path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        IndexLocation {
            base_path: base_path.into(),
            name: name.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `<base_path>/<name>.<extension>`
    pub fn file_with_extension(&self, extension: &str) -> PathBuf {
        self.base_path.join(format!("{}.{}", self.name, extension))
    }

    /// `<base_path>/<name>`
    pub fn directory(&self) -> PathBuf {
        self.base_path.join(&self.name)
    }
}

impl Default for IndexLocation {
    fn default() -> Self {
        IndexLocation::new("data/models/shingles", "shingles_index")
    }
}

/// Storage of document sketches, the inverted hash -> documents association
/// and the directed similarity graph.
///
/// Unknown documents and hashes are not errors: lookups return empty
/// collections or `None`. Errors mean the storage could not serve the request.
///
/// Adding a document that is already indexed replaces its sketch. An empty
/// sketch stores nothing, so the document ends up without a stored sketch and
/// is not counted.
pub trait ShinglesIndex {
    /// Short name of the storage engine, used in logs and trace reports.
    fn backend_name(&self) -> &'static str;

    fn add_document(&mut self, document_id: DocumentId, sketch: &Sketch) -> Result<()>;

    /// Adds many documents. Backends override this to write them in one
    /// transaction or commit.
    fn add_documents<I>(&mut self, documents: I) -> Result<()>
    where
        I: IntoIterator<Item = (DocumentId, Sketch)>,
        Self: Sized,
    {
        for (document_id, sketch) in documents {
            self.add_document(document_id, &sketch)?;
        }
        Ok(())
    }

    fn documents_for_hash(&self, hash: ShingleHash) -> Result<DocumentIds>;

    fn sketch_for_document(&self, document_id: DocumentId) -> Result<Option<Sketch>>;

    /// Returns every document sharing at least one hash with `sketch`, together
    /// with its full stored sketch.
    ///
    /// Overriding implementations must return exactly what
    /// [`collect_documents_for_sketch`] returns.
    fn documents_for_sketch(&self, sketch: &Sketch) -> Result<CandidateSketches> {
        collect_documents_for_sketch(self, sketch)
    }

    /// Records the directed edge `master -> similar`. Recording an existing
    /// edge again is not an error.
    fn add_document_similarity(&mut self, master: DocumentId, similar: DocumentId) -> Result<()>;

    fn similar_documents(&self, document_id: DocumentId) -> Result<DocumentIds>;

    /// The whole similarity graph, keyed by master document.
    fn all_similar_documents(&self) -> Result<BTreeMap<DocumentId, DocumentIds>>;

    fn number_of_documents(&self) -> Result<usize>;

    /// Removes all documents and similarity edges, keeping the storage.
    fn clear(&mut self) -> Result<()>;

    /// Flushes pending state to the backing storage.
    fn save_index(&mut self) -> Result<()>;

    /// Closes the index and removes its backing storage. Deleting an index
    /// that was never persisted is a no-op.
    fn delete_index(self) -> Result<()>
    where
        Self: Sized;
}

/// Candidate lookup expressed with single-hash and single-document lookups:
/// union the documents of every hash, then fetch each candidate's sketch.
pub fn collect_documents_for_sketch<I>(index: &I, sketch: &Sketch) -> Result<CandidateSketches>
where
    I: ShinglesIndex + ?Sized,
{
    let mut candidate_ids = DocumentIds::default();
    for hash in sketch {
        candidate_ids.extend(index.documents_for_hash(*hash)?);
    }
    let mut candidates = CandidateSketches::default();
    candidates.reserve(candidate_ids.len());
    for document_id in candidate_ids {
        if let Some(candidate_sketch) = index.sketch_for_document(document_id)? {
            candidates.insert(document_id, candidate_sketch);
        }
    }
    Ok(candidates)
}

/// Removes a file or a directory tree. Returns false if nothing was there.
pub(crate) fn remove_path(path: &Path) -> Result<bool> {
    let removed = if path.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    };
    match removed {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => {
            warn!(?path, %err, "Failed to remove index storage");
            Err(IndexError::io(err, path))
        }
    }
}

pub(crate) fn create_dir_all(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|err| {
        warn!(?path, %err, "Failed to create index directory");
        IndexError::io(err, path)
    })
}
