use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use itertools::Itertools;
use tantivy::collector::DocSetCollector;
use tantivy::directory::MmapDirectory;
use tantivy::query::{AllQuery, BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{
    Field, IndexRecordOption, OwnedValue, Schema, TantivyDocument, TextFieldIndexing, TextOptions,
    INDEXED, STORED, STRING,
};
use tantivy::tokenizer::{TextAnalyzer, WhitespaceTokenizer};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyError, Term};
use tracing::{debug, info_span, trace, warn, Span};

use crate::error::{IndexError, Result};
use crate::index::{create_dir_all, remove_path, IndexLocation, ShinglesIndex};
use crate::{CandidateSketches, DocumentId, DocumentIds, ShingleHash, Sketch};

const BACKEND_NAME: &str = "tantivy";
const SKETCH_TOKENIZER: &str = "sketch_whitespace";
const SKETCHES_DIR: &str = "sketches";
const SIMILARITIES_DIR: &str = "similarities";

/// tantivy refuses writer budgets under 15MB per indexing thread.
pub const DEFAULT_WRITER_HEAP_BYTES: usize = 20_000_000;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TantivyOptions {
    writer_heap_bytes: usize,
}

impl TantivyOptions {
    /// Memory budget of each of the two index writers.
    pub fn with_writer_heap_bytes(mut self, writer_heap_bytes: usize) -> Self {
        self.writer_heap_bytes = writer_heap_bytes;
        self
    }

    pub fn writer_heap_bytes(&self) -> usize {
        self.writer_heap_bytes
    }
}

impl Default for TantivyOptions {
    fn default() -> Self {
        TantivyOptions {
            writer_heap_bytes: DEFAULT_WRITER_HEAP_BYTES,
        }
    }
}

#[derive(Clone, Copy)]
struct Fields {
    document_id: Field,
    sketch: Field,
    master_id: Field,
    similar_id: Field,
    edge: Field,
}

fn sketches_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_u64_field("document_id", INDEXED | STORED);
    let indexing = TextFieldIndexing::default()
        .set_tokenizer(SKETCH_TOKENIZER)
        .set_index_option(IndexRecordOption::Basic);
    builder.add_text_field(
        "sketch",
        TextOptions::default().set_indexing_options(indexing).set_stored(),
    );
    builder.build()
}

fn similarities_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_u64_field("master_id", INDEXED | STORED);
    builder.add_u64_field("similar_id", STORED);
    // "<master>:<similar>", keeps one record per edge
    builder.add_text_field("edge", STRING);
    builder.build()
}

/// One tantivy index with its single writer and a manually reloaded reader.
struct Store {
    writer: IndexWriter,
    reader: IndexReader,
}

impl Store {
    fn open(index: Index, writer_heap_bytes: usize) -> tantivy::Result<Self> {
        index.tokenizers().register(
            SKETCH_TOKENIZER,
            TextAnalyzer::builder(WhitespaceTokenizer::default()).build(),
        );
        let writer = index.writer_with_num_threads(1, writer_heap_bytes)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Store { writer, reader })
    }

    fn commit(&mut self) -> tantivy::Result<()> {
        self.writer.commit()?;
        self.reader.reload()
    }

    fn collect(&self, query: &dyn Query) -> tantivy::Result<Vec<TantivyDocument>> {
        let searcher = self.reader.searcher();
        let addresses = searcher.search(query, &DocSetCollector)?;
        addresses
            .into_iter()
            .map(|address| searcher.doc::<TantivyDocument>(address))
            .collect()
    }
}

/// Index stored as two tantivy indices under `<base_path>/<name>/`.
///
/// `sketches/` holds one record per document: the id and the sketch as text,
/// hashes separated by single spaces and tokenized on whitespace only, so every
/// hash is one exact term. `similarities/` holds one record per similarity edge.
///
/// Every mutation commits and reloads the reader before returning.
pub struct TantivyShinglesIndex {
    directory: Option<PathBuf>,
    sketches: Store,
    similarities: Store,
    fields: Fields,
    span: Span,
}

impl TantivyShinglesIndex {
    pub fn open(location: IndexLocation, options: TantivyOptions) -> Result<Self> {
        let span = info_span!("shingles_index", backend = BACKEND_NAME, name = location.name());
        let directory = location.directory();
        let (sketches, similarities) = {
            let _enter = span.enter();
            (
                Self::open_in(&directory.join(SKETCHES_DIR), sketches_schema())?,
                Self::open_in(&directory.join(SIMILARITIES_DIR), similarities_schema())?,
            )
        };
        let index = Self::from_indices(sketches, similarities, &options, span)?;
        debug!(parent: &index.span, ?directory, "Opened index");
        Ok(TantivyShinglesIndex {
            directory: Some(directory),
            ..index
        })
    }

    /// An index kept in RAM, gone when dropped.
    pub fn in_ram(options: TantivyOptions) -> Result<Self> {
        Self::from_indices(
            Index::create_in_ram(sketches_schema()),
            Index::create_in_ram(similarities_schema()),
            &options,
            info_span!("shingles_index", backend = BACKEND_NAME, name = "in_ram"),
        )
    }

    fn open_in(path: &Path, schema: Schema) -> Result<Index> {
        create_dir_all(path)?;
        let directory = MmapDirectory::open(path).map_err(|err| {
            warn!(?path, %err, "Failed to open tantivy directory");
            IndexError::OpenDirectory(err)
        })?;
        Index::open_or_create(directory, schema).map_err(|err| storage_error("open", err))
    }

    fn from_indices(
        sketches: Index,
        similarities: Index,
        options: &TantivyOptions,
        span: Span,
    ) -> Result<Self> {
        let (fields, sketches, similarities) = {
            let _enter = span.enter();
            let sketches_schema = sketches.schema();
            let similarities_schema = similarities.schema();
            let field = |schema: &Schema, name: &str| {
                schema.get_field(name).map_err(|err| storage_error("schema", err))
            };
            let fields = Fields {
                document_id: field(&sketches_schema, "document_id")?,
                sketch: field(&sketches_schema, "sketch")?,
                master_id: field(&similarities_schema, "master_id")?,
                similar_id: field(&similarities_schema, "similar_id")?,
                edge: field(&similarities_schema, "edge")?,
            };
            let open_store = |index: Index| {
                Store::open(index, options.writer_heap_bytes)
                    .map_err(|err| storage_error("open writer", err))
            };
            (fields, open_store(sketches)?, open_store(similarities)?)
        };
        Ok(TantivyShinglesIndex {
            directory: None,
            sketches,
            similarities,
            fields,
            span,
        })
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    fn hash_term(&self, hash: ShingleHash) -> Term {
        Term::from_field_text(self.fields.sketch, &hash.to_string())
    }

    fn stage_sketch(&self, document_id: DocumentId, sketch: &Sketch) -> tantivy::Result<()> {
        let writer = &self.sketches.writer;
        writer.delete_term(Term::from_field_u64(self.fields.document_id, document_id));
        if !sketch.is_empty() {
            writer.add_document(doc!(
                self.fields.document_id => document_id,
                self.fields.sketch => sketch.iter().join(" "),
            ))?;
        }
        Ok(())
    }

    fn search_sketches(&self, query: &dyn Query) -> Result<CandidateSketches> {
        let documents = self
            .sketches
            .collect(query)
            .map_err(|err| storage_error("search sketches", err))?;
        documents
            .iter()
            .map(|document| self.decode_sketch(document))
            .collect()
    }

    fn search_similarities(&self, query: &dyn Query) -> Result<Vec<(DocumentId, DocumentId)>> {
        let documents = self
            .similarities
            .collect(query)
            .map_err(|err| storage_error("search similarities", err))?;
        documents
            .iter()
            .map(|document| {
                Ok((
                    u64_field(document, self.fields.master_id, "master_id")?,
                    u64_field(document, self.fields.similar_id, "similar_id")?,
                ))
            })
            .collect()
    }

    fn decode_sketch(&self, document: &TantivyDocument) -> Result<(DocumentId, Sketch)> {
        let document_id = u64_field(document, self.fields.document_id, "document_id")?;
        let text = match document.get_first(self.fields.sketch).map(OwnedValue::from) {
            Some(OwnedValue::Str(text)) => text,
            _ => return Err(IndexError::schema("sketch record without sketch text")),
        };
        let sketch = text
            .split_whitespace()
            .map(|token| {
                token
                    .parse::<ShingleHash>()
                    .map_err(|_| IndexError::schema(format!("invalid hash {:?}", token)))
            })
            .collect::<Result<Sketch>>()?;
        Ok((document_id, sketch))
    }
}

fn u64_field(document: &TantivyDocument, field: Field, name: &'static str) -> Result<u64> {
    match document.get_first(field).map(OwnedValue::from) {
        Some(OwnedValue::U64(value)) => Ok(value),
        _ => Err(IndexError::schema(format!("record without {}", name))),
    }
}

fn storage_error(operation: &'static str, err: TantivyError) -> IndexError {
    warn!(operation, %err, "tantivy operation failed");
    IndexError::Tantivy(err)
}

fn term_query(term: Term) -> Box<dyn Query> {
    Box::new(TermQuery::new(term, IndexRecordOption::Basic))
}

impl ShinglesIndex for TantivyShinglesIndex {
    fn backend_name(&self) -> &'static str {
        BACKEND_NAME
    }

    fn add_document(&mut self, document_id: DocumentId, sketch: &Sketch) -> Result<()> {
        let _enter = self.span.enter();
        trace!(document_id, hashes = sketch.len(), "add_document");
        self.stage_sketch(document_id, sketch)
            .and_then(|_| self.sketches.commit())
            .map_err(|err| storage_error("add_document", err))
    }

    fn add_documents<I>(&mut self, documents: I) -> Result<()>
    where
        I: IntoIterator<Item = (DocumentId, Sketch)>,
    {
        let _enter = self.span.enter();
        let mut added = 0usize;
        for (document_id, sketch) in documents {
            self.stage_sketch(document_id, &sketch)
                .map_err(|err| storage_error("add_documents", err))?;
            added += 1;
        }
        self.sketches
            .commit()
            .map_err(|err| storage_error("add_documents", err))?;
        debug!(added, "add_documents");
        Ok(())
    }

    fn documents_for_hash(&self, hash: ShingleHash) -> Result<DocumentIds> {
        let _enter = self.span.enter();
        trace!(hash, "documents_for_hash");
        let query = term_query(self.hash_term(hash));
        Ok(self.search_sketches(query.as_ref())?.into_keys().collect())
    }

    fn sketch_for_document(&self, document_id: DocumentId) -> Result<Option<Sketch>> {
        let _enter = self.span.enter();
        trace!(document_id, "sketch_for_document");
        let query = term_query(Term::from_field_u64(self.fields.document_id, document_id));
        Ok(self.search_sketches(query.as_ref())?.remove(&document_id))
    }

    fn documents_for_sketch(&self, sketch: &Sketch) -> Result<CandidateSketches> {
        let _enter = self.span.enter();
        trace!(hashes = sketch.len(), "documents_for_sketch");
        if sketch.is_empty() {
            return Ok(CandidateSketches::default());
        }
        let clauses: Vec<(Occur, Box<dyn Query>)> = sketch
            .iter()
            .map(|hash| (Occur::Should, term_query(self.hash_term(*hash))))
            .collect();
        self.search_sketches(&BooleanQuery::new(clauses))
    }

    fn add_document_similarity(&mut self, master: DocumentId, similar: DocumentId) -> Result<()> {
        let _enter = self.span.enter();
        trace!(master, similar, "add_document_similarity");
        let edge = format!("{}:{}", master, similar);
        let writer = &self.similarities.writer;
        writer.delete_term(Term::from_field_text(self.fields.edge, &edge));
        writer
            .add_document(doc!(
                self.fields.master_id => master,
                self.fields.similar_id => similar,
                self.fields.edge => edge,
            ))
            .and_then(|_| self.similarities.commit())
            .map_err(|err| storage_error("add_document_similarity", err))?;
        Ok(())
    }

    fn similar_documents(&self, document_id: DocumentId) -> Result<DocumentIds> {
        let _enter = self.span.enter();
        let query = term_query(Term::from_field_u64(self.fields.master_id, document_id));
        Ok(self
            .search_similarities(query.as_ref())?
            .into_iter()
            .map(|(_, similar)| similar)
            .collect())
    }

    fn all_similar_documents(&self) -> Result<BTreeMap<DocumentId, DocumentIds>> {
        let _enter = self.span.enter();
        let mut similarities: BTreeMap<DocumentId, DocumentIds> = BTreeMap::new();
        for (master, similar) in self.search_similarities(&AllQuery)? {
            similarities.entry(master).or_default().insert(similar);
        }
        Ok(similarities)
    }

    fn number_of_documents(&self) -> Result<usize> {
        Ok(self.sketches.reader.searcher().num_docs() as usize)
    }

    fn clear(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        debug!("clear");
        for store in [&mut self.sketches, &mut self.similarities] {
            store
                .writer
                .delete_all_documents()
                .and_then(|_| store.commit())
                .map_err(|err| storage_error("clear", err))?;
        }
        Ok(())
    }

    fn save_index(&mut self) -> Result<()> {
        let _enter = self.span.enter();
        self.sketches
            .commit()
            .and_then(|_| self.similarities.commit())
            .map_err(|err| storage_error("save_index", err))?;
        debug!(directory = ?self.directory, "Committed index");
        Ok(())
    }

    fn delete_index(self) -> Result<()> {
        let TantivyShinglesIndex {
            directory,
            sketches,
            similarities,
            span,
            ..
        } = self;
        let _enter = span.enter();
        // writers hold the directory locks until dropped
        drop(sketches);
        drop(similarities);
        if let Some(directory) = directory {
            let removed = remove_path(&directory)?;
            debug!(?directory, removed, "Deleted index");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch_of;
    use tempfile::TempDir;

    #[test]
    fn test_hash_terms_are_exact() {
        let mut index = TantivyShinglesIndex::in_ram(TantivyOptions::default()).unwrap();
        index.add_document(1, &sketch_of([12, 123])).unwrap();
        index.add_document(2, &sketch_of([1234, u64::MAX])).unwrap();

        assert_eq!(index.documents_for_hash(12).unwrap().len(), 1);
        assert!(index.documents_for_hash(1).unwrap().is_empty());
        assert!(index.documents_for_hash(u64::MAX).unwrap().contains(&2));
        assert_eq!(index.sketch_for_document(2).unwrap(), Some(sketch_of([1234, u64::MAX])));
    }

    #[test]
    fn test_replace_within_one_commit() {
        let mut index = TantivyShinglesIndex::in_ram(TantivyOptions::default()).unwrap();
        index
            .add_documents(vec![(1, sketch_of([10, 20])), (1, sketch_of([30]))])
            .unwrap();
        assert_eq!(index.number_of_documents().unwrap(), 1);
        assert_eq!(index.sketch_for_document(1).unwrap(), Some(sketch_of([30])));
        assert!(index.documents_for_hash(10).unwrap().is_empty());
    }

    #[test]
    fn test_repeated_edge_is_one_record() {
        let mut index = TantivyShinglesIndex::in_ram(TantivyOptions::default()).unwrap();
        index.add_document_similarity(1, 2).unwrap();
        index.add_document_similarity(1, 2).unwrap();
        index.add_document_similarity(1, 3).unwrap();
        assert_eq!(index.search_similarities(&AllQuery).unwrap().len(), 2);
        assert_eq!(index.similar_documents(1).unwrap().len(), 2);
        assert!(index.similar_documents(2).unwrap().is_empty());
    }

    #[test]
    fn test_reopen_and_delete() {
        let dir = TempDir::new().unwrap();
        let location = IndexLocation::new(dir.path(), "tantivy_test");
        let mut index = TantivyShinglesIndex::open(location.clone(), TantivyOptions::default()).unwrap();
        index.add_document(1, &sketch_of([10, 20, 30])).unwrap();
        index.add_document_similarity(1, 2).unwrap();
        index.save_index().unwrap();
        drop(index);

        let index = TantivyShinglesIndex::open(location.clone(), TantivyOptions::default()).unwrap();
        assert_eq!(index.number_of_documents().unwrap(), 1);
        assert_eq!(index.documents_for_sketch(&sketch_of([30, 99])).unwrap().len(), 1);
        assert_eq!(index.all_similar_documents().unwrap().len(), 1);
        index.delete_index().unwrap();
        assert!(!location.directory().exists());

        let index = TantivyShinglesIndex::open(location, TantivyOptions::default()).unwrap();
        assert_eq!(index.number_of_documents().unwrap(), 0);
    }

    #[test]
    fn test_clear() {
        let mut index = TantivyShinglesIndex::in_ram(TantivyOptions::default()).unwrap();
        index.add_document(1, &sketch_of([10])).unwrap();
        index.add_document_similarity(1, 2).unwrap();
        index.clear().unwrap();
        assert_eq!(index.number_of_documents().unwrap(), 0);
        assert!(index.all_similar_documents().unwrap().is_empty());
        index.add_document(3, &sketch_of([10])).unwrap();
        assert_eq!(index.documents_for_hash(10).unwrap().len(), 1);
    }

    #[test]
    fn test_open_under_a_file_fails() {
        let dir = TempDir::new().unwrap();
        let base_path = dir.path().join("blocked");
        std::fs::write(&base_path, b"").unwrap();
        let result = TantivyShinglesIndex::open(IndexLocation::new(&base_path, "index"), TantivyOptions::default());
        assert!(matches!(result, Err(IndexError::Io { .. })));
    }
}
