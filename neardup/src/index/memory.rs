use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, trace, warn, Span};

use crate::error::{IndexError, Result};
use crate::index::{create_dir_all, remove_path, IndexLocation, ShinglesIndex};
use crate::{DocumentId, DocumentIds, ShingleHash, Sketch};

const BACKEND_NAME: &str = "memory";
const FILE_EXTENSION: &str = "bin";

#[derive(Default, Serialize, Deserialize)]
struct MemoryState {
    hash_documents: HashMap<ShingleHash, DocumentIds, RandomState>,
    document_sketches: HashMap<DocumentId, Sketch, RandomState>,
    similarities: HashMap<DocumentId, DocumentIds, RandomState>,
}

impl MemoryState {
    fn remove_hash_associations(&mut self, document_id: DocumentId, sketch: &Sketch) {
        for hash in sketch {
            if let Entry::Occupied(mut entry) = self.hash_documents.entry(*hash) {
                entry.get_mut().remove(&document_id);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }
    }

    fn insert(&mut self, document_id: DocumentId, sketch: Sketch) {
        if let Some(previous) = self.document_sketches.remove(&document_id) {
            self.remove_hash_associations(document_id, &previous);
        }
        if sketch.is_empty() {
            return;
        }
        for hash in &sketch {
            self.hash_documents
                .entry(*hash)
                .or_default()
                .insert(document_id);
        }
        self.document_sketches.insert(document_id, sketch);
    }
}

/// Index held entirely in process memory.
///
/// Nothing touches the disk until [`save_index`](ShinglesIndex::save_index),
/// which writes the whole index into `<base_path>/<name>.bin`.
/// An index created with [`in_memory`](MemoryShinglesIndex::in_memory) is not
/// bound to a file and never persists.
///
/// # Examples
///
/// ```
/// use neardup::index::{MemoryShinglesIndex, ShinglesIndex};
/// use neardup::sketch_of;
///
/// let mut index = MemoryShinglesIndex::in_memory();
/// index.add_document(1, &sketch_of([10, 20, 30])).unwrap();
/// index.add_document(2, &sketch_of([20, 30, 40])).unwrap();
///
/// let candidates = index.documents_for_sketch(&sketch_of([30])).unwrap();
/// assert_eq!(candidates.len(), 2);
/// ```
pub struct MemoryShinglesIndex {
    location: Option<IndexLocation>,
    state: MemoryState,
    span: Span,
}

impl MemoryShinglesIndex {
    pub fn in_memory() -> Self {
        MemoryShinglesIndex {
            location: None,
            state: MemoryState::default(),
            span: info_span!("shingles_index", backend = BACKEND_NAME, name = "in_memory"),
        }
    }

    /// Opens the index saved at `location`, or starts an empty one if nothing
    /// was saved there yet.
    pub fn open(location: IndexLocation) -> Result<Self> {
        let span = info_span!("shingles_index", backend = BACKEND_NAME, name = location.name());
        let path = location.file_with_extension(FILE_EXTENSION);
        let state = {
            let _enter = span.enter();
            match std::fs::read(&path) {
                Ok(bytes) => {
                    let (state, _): (MemoryState, usize) =
                        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
                            .inspect_err(|err| warn!(?path, %err, "Failed to decode saved index"))?;
                    debug!(
                        ?path,
                        documents = state.document_sketches.len(),
                        "Loaded index"
                    );
                    state
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    debug!(?path, "No saved index, starting empty");
                    MemoryState::default()
                }
                Err(err) => {
                    warn!(?path, %err, "Failed to read saved index");
                    return Err(IndexError::io(err, path));
                }
            }
        };
        Ok(MemoryShinglesIndex {
            location: Some(location),
            state,
            span,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn location(&self) -> Option<&IndexLocation> {
        self.location.as_ref()
    }

    /// Number of distinct hashes with at least one document.
    pub fn number_of_hashes(&self) -> usize {
        self.state.hash_documents.len()
    }

    fn file_path(&self) -> Option<PathBuf> {
        self.location
            .as_ref()
            .map(|location| location.file_with_extension(FILE_EXTENSION))
    }
}

impl ShinglesIndex for MemoryShinglesIndex {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn add_document(&mut self, document_id: DocumentId, sketch: &Sketch) -> Result<()> {
        let _enter = self.span.enter();
        trace!(document_id, hashes = sketch.len(), "add_document");
        self.state.insert(document_id, sketch.clone());
        Ok(())
    }

    fn add_documents<I>(&mut self, documents: I) -> Result<()>
    where
        I: IntoIterator<Item = (DocumentId, Sketch)>,
    {
        let _enter = self.span.enter();
        let mut added = 0usize;
        for (document_id, sketch) in documents {
            self.state.insert(document_id, sketch);
            added += 1;
        }
        debug!(added, "add_documents");
        Ok(())
    }

    fn documents_for_hash(&self, hash: ShingleHash) -> Result<DocumentIds> {
        Ok(self
            .state
            .hash_documents
            .get(&hash)
            .cloned()
            .unwrap_or_default())
    }

    fn sketch_for_document(&self, document_id: DocumentId) -> Result<Option<Sketch>> {
        Ok(self.state.document_sketches.get(&document_id).cloned())
    }

    fn add_document_similarity(&mut self, master: DocumentId, similar: DocumentId) -> Result<()> {
        let _enter = self.span.enter();
        trace!(master, similar, "add_document_similarity");
        self.state
            .similarities
            .entry(master)
            .or_default()
            .insert(similar);
        Ok(())
    }

    fn similar_documents(&self, document_id: DocumentId) -> Result<DocumentIds> {
        Ok(self
            .state
            .similarities
            .get(&document_id)
            .cloned()
            .unwrap_or_default())
    }

    fn all_similar_documents(&self) -> Result<BTreeMap<DocumentId, DocumentIds>> {
        Ok(self
            .state
            .similarities
            .iter()
            .map(|(master, similar)| (*master, similar.clone()))
            .collect())
    }

    fn number_of_documents(&self) -> Result<usize> {
        Ok(self.state.document_sketches.len())
    }

    fn clear(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        debug!("clear");
        self.state = MemoryState::default();
        Ok(())
    }

    fn save_index(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        let (Some(location), Some(path)) = (self.location.as_ref(), self.file_path()) else {
            trace!("save_index on an unbound index");
            return Ok(());
        };
        create_dir_all(location.base_path())?;
        let bytes = bincode::serde::encode_to_vec(&self.state, bincode::config::standard())
            .inspect_err(|err| warn!(%err, "Failed to encode index"))?;
        let tmp_path = path.with_extension(format!("{}.tmp", FILE_EXTENSION));
        std::fs::write(&tmp_path, &bytes).map_err(|err| {
            warn!(path = ?tmp_path, %err, "Failed to write index");
            IndexError::io(err, &tmp_path)
        })?;
        std::fs::rename(&tmp_path, &path).map_err(|err| {
            warn!(?path, %err, "Failed to move saved index into place");
            IndexError::io(err, &path)
        })?;
        debug!(?path, bytes = bytes.len(), "Saved index");
        Ok(())
    }

    fn delete_index(self) -> Result<()> {
        let _enter = self.span.enter();
        if let Some(path) = self.file_path() {
            let removed = remove_path(&path)?;
            debug!(?path, removed, "Deleted index");
        }
        Ok(())
    }
}

impl Display for MemoryShinglesIndex {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MemoryShinglesIndex<{}> {{ documents: {}, hashes: {}, masters: {} }}",
            self.location.as_ref().map_or("in_memory", |location| location.name()),
            self.state.document_sketches.len(),
            self.state.hash_documents.len(),
            self.state.similarities.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch_of;
    use tempfile::TempDir;

    #[test]
    fn test_replace_removes_old_hashes() {
        let mut index = MemoryShinglesIndex::in_memory();
        index.add_document(1, &sketch_of([10, 20, 30])).unwrap();
        index.add_document(1, &sketch_of([30, 40])).unwrap();

        assert_eq!(index.sketch_for_document(1).unwrap(), Some(sketch_of([30, 40])));
        assert!(index.documents_for_hash(10).unwrap().is_empty());
        assert!(index.documents_for_hash(40).unwrap().contains(&1));
        assert_eq!(index.number_of_hashes(), 2);
        assert_eq!(index.number_of_documents().unwrap(), 1);
    }

    #[test]
    fn test_empty_sketch_is_not_stored() {
        let mut index = MemoryShinglesIndex::in_memory();
        index.add_document(1, &sketch_of([10])).unwrap();
        index.add_document(1, &Sketch::default()).unwrap();
        assert_eq!(index.sketch_for_document(1).unwrap(), None);
        assert_eq!(index.number_of_documents().unwrap(), 0);
        assert_eq!(index.number_of_hashes(), 0);
    }

    #[test]
    fn test_save_and_reopen() {
        let dir = TempDir::new().unwrap();
        let location = IndexLocation::new(dir.path().join("nested"), "memory_test");

        let mut index = MemoryShinglesIndex::open(location.clone()).unwrap();
        index.add_document(1, &sketch_of([10, 20])).unwrap();
        index.add_document(2, &sketch_of([20, 30])).unwrap();
        index.add_document_similarity(1, 2).unwrap();
        index.save_index().unwrap();
        assert!(location.file_with_extension("bin").exists());
        drop(index);

        let reopened = MemoryShinglesIndex::open(location.clone()).unwrap();
        assert_eq!(reopened.number_of_documents().unwrap(), 2);
        assert_eq!(reopened.sketch_for_document(2).unwrap(), Some(sketch_of([20, 30])));
        assert_eq!(reopened.similar_documents(1).unwrap().len(), 1);
        assert!(reopened.to_string().contains("documents: 2"));

        reopened.delete_index().unwrap();
        assert!(!location.file_with_extension("bin").exists());
        let reopened = MemoryShinglesIndex::open(location).unwrap();
        assert_eq!(reopened.number_of_documents().unwrap(), 0);
    }

    #[test]
    fn test_in_memory_never_persists() {
        let mut index = MemoryShinglesIndex::in_memory();
        index.add_document(1, &sketch_of([10])).unwrap();
        index.save_index().unwrap();
        assert!(index.location().is_none());
        index.delete_index().unwrap();
    }

    #[test]
    fn test_corrupt_file_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let location = IndexLocation::new(dir.path(), "corrupt");
        std::fs::write(location.file_with_extension("bin"), [0xff; 3]).unwrap();
        let result = MemoryShinglesIndex::open(location);
        assert!(matches!(result, Err(IndexError::Decode(_))));
    }

    #[test]
    fn test_unreadable_file_is_an_io_error() {
        let dir = TempDir::new().unwrap();
        let location = IndexLocation::new(dir.path(), "unreadable");
        std::fs::create_dir(location.file_with_extension("bin")).unwrap();
        let result = MemoryShinglesIndex::open(location);
        assert!(matches!(result, Err(IndexError::Io { path: Some(_), .. })));
    }

    #[test]
    fn test_save_into_blocked_base_path_fails() {
        let dir = TempDir::new().unwrap();
        let base_path = dir.path().join("blocked");
        let mut index = MemoryShinglesIndex::open(IndexLocation::new(&base_path, "index")).unwrap();
        index.add_document(1, &sketch_of([10])).unwrap();
        std::fs::write(&base_path, b"").unwrap();
        assert!(matches!(index.save_index(), Err(IndexError::Io { .. })));
    }
}
