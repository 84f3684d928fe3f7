//! Registration of incoming documents against a [`ShinglesIndex`].
//!
//! A new document is compared with the candidates the index returns for its
//! sketch. If any candidate is within the similarity threshold the document is
//! a near-duplicate: the edge `master -> document` is recorded, with the
//! smallest matching id as master, and the document itself is not indexed.
//! Otherwise the document is indexed and becomes a candidate for later ones.
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::io::BufRead;
use std::path::Path;

use tracing::{debug, warn};

use crate::error::{IndexError, Result};
use crate::index::ShinglesIndex;
use crate::sketch::{jaccard_distance, SketchModel};
use crate::{DocumentId, Sketch};

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DetectorConfig {
    /// Jaccard distance under which two sketches are near-duplicates.
    pub similarity_threshold: f64,
}

impl DetectorConfig {
    pub fn with_similarity_threshold(mut self, similarity_threshold: f64) -> Self {
        self.similarity_threshold = similarity_threshold;
        self
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SimilarDocument {
    pub document_id: DocumentId,
    pub distance: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Registration {
    /// No indexed document was close enough; the document is now indexed.
    Unique,
    /// The document is a near-duplicate of `master` and was not indexed.
    /// `matches` holds every document within the threshold, closest first.
    Duplicate {
        master: DocumentId,
        matches: Vec<SimilarDocument>,
    },
}

impl Registration {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Registration::Duplicate { .. })
    }

    pub fn master(&self) -> Option<DocumentId> {
        match self {
            Registration::Unique => None,
            Registration::Duplicate { master, .. } => Some(*master),
        }
    }
}

pub struct NearDuplicateDetector<I, M> {
    index: I,
    model: M,
    config: DetectorConfig,
    next_file_id: DocumentId,
}

impl<I: ShinglesIndex, M: SketchModel> NearDuplicateDetector<I, M> {
    pub fn new(index: I, model: M) -> Self {
        NearDuplicateDetector {
            index,
            model,
            config: DetectorConfig::default(),
            next_file_id: 1,
        }
    }

    pub fn with_config(mut self, config: DetectorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn index(&self) -> &I {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut I {
        &mut self.index
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn into_index(self) -> I {
        self.index
    }

    /// Sketches the text and registers it under `document_id`.
    pub fn add_document(&mut self, document_id: DocumentId, text: &str) -> Result<Registration> {
        let sketch = self.model.sketch_of(document_id, text);
        self.add_sketch(document_id, &sketch)
    }

    pub fn add_sketch(&mut self, document_id: DocumentId, sketch: &Sketch) -> Result<Registration> {
        let matches = self.find_similar(document_id, sketch)?;
        match matches.iter().map(|similar| similar.document_id).min() {
            Some(master) => {
                self.index.add_document_similarity(master, document_id)?;
                debug!(document_id, master, matches = matches.len(), "Near-duplicate");
                Ok(Registration::Duplicate { master, matches })
            }
            None => {
                self.index.add_document(document_id, sketch)?;
                Ok(Registration::Unique)
            }
        }
    }

    /// Indexed documents within the similarity threshold of `sketch`, closest
    /// first. `document_id` itself is never a match.
    pub fn find_similar(&self, document_id: DocumentId, sketch: &Sketch) -> Result<Vec<SimilarDocument>> {
        let candidates = self.index.documents_for_sketch(sketch)?;
        let mut matches: Vec<SimilarDocument> = candidates
            .iter()
            .filter(|(candidate_id, _)| **candidate_id != document_id)
            .filter_map(|(candidate_id, candidate_sketch)| {
                let distance = jaccard_distance(candidate_sketch, sketch);
                (distance == 0.0 || distance < self.config.similarity_threshold).then_some(
                    SimilarDocument {
                        document_id: *candidate_id,
                        distance,
                    },
                )
            })
            .collect();
        matches.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then(a.document_id.cmp(&b.document_id))
        });
        Ok(matches)
    }

    /// Registers the file content as one document. Files get ids 1, 2, 3...
    /// in the order they are added.
    pub fn add_file<P: AsRef<Path>>(&mut self, path: P) -> Result<Registration> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| IndexError::io(err, path))?;
        let document_id = self.next_file_id;
        self.next_file_id += 1;
        self.add_document(document_id, &text)
    }

    /// Registers every line as one document, the 1-based line number being its
    /// id. Returns the ids of the near-duplicate lines.
    pub fn add_documents_from_lines<R: BufRead>(&mut self, reader: R) -> Result<BTreeSet<DocumentId>> {
        let mut duplicates = BTreeSet::new();
        for (number, line) in reader.lines().enumerate() {
            let document_id = number as DocumentId + 1;
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(document_id, %err, "Skipping unreadable line");
                    continue;
                }
            };
            if self.add_document(document_id, &line)?.is_duplicate() {
                duplicates.insert(document_id);
            }
        }
        debug!(duplicates = duplicates.len(), "Registered lines");
        Ok(duplicates)
    }

    /// Sketches all texts in parallel, then registers them in order.
    pub fn add_texts(&mut self, documents: &[(DocumentId, &str)]) -> Result<Vec<Registration>>
    where
        M: Sync,
    {
        let sketches = self.model.bulk_sketch(documents);
        documents
            .iter()
            .zip(sketches.iter())
            .map(|((document_id, _), sketch)| self.add_sketch(*document_id, sketch))
            .collect()
    }

    /// Human readable dump of the similarity graph and the document count.
    pub fn similarity_report(&self) -> Result<String> {
        let mut report = String::from("---------- similar documents -----------\n");
        for (master, similar) in self.index.all_similar_documents()? {
            let mut similar: Vec<_> = similar.into_iter().collect();
            similar.sort_unstable();
            let _ = writeln!(report, "{} : {:?}", master, similar);
        }
        report.push_str("----------------------------------------\n");
        let _ = write!(report, "# of total documents {}", self.index.number_of_documents()?);
        Ok(report)
    }

    pub fn save_index(&mut self) -> Result<()> {
        self.index.save_index()
    }
}
