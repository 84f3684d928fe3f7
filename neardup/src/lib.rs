/*!
This library detects near-duplicate text documents in a growing corpus
without all-pairs comparison.

Every document is reduced to a small *sketch*: the k smallest hashes of its
n-gram shingles. A [`ShinglesIndex`](index::ShinglesIndex) keeps the sketches,
the inverted hash -> documents association used to find candidates, and a
directed similarity graph of confirmed near-duplicates. Three storage backends
implement it:

* [`MemoryShinglesIndex`](index::MemoryShinglesIndex): hash maps, saved with bincode
* [`SqliteShinglesIndex`](index::SqliteShinglesIndex): embedded SQLite tables
* [`TantivyShinglesIndex`](index::TantivyShinglesIndex): a tantivy inverted index

[`TracedIndex`](index::TracedIndex) wraps any of them and records latencies.
[`NearDuplicateDetector`] ties a [`SketchModel`](sketch::SketchModel) and an
index together into the registration workflow.

## Example

 ```
 use neardup::index::{MemoryShinglesIndex, ShinglesIndex};
 use neardup::sketch::ShingleSketcher;
 use neardup::{NearDuplicateDetector, Registration};

 let corpus = [
     "the quick brown fox jumps over the lazy dog near the river bank",
     "a completely different sentence about storage engines and indexes",
     "the quick brown fox jumps over the lazy dog near the river bank!",
 ];
 let mut detector = NearDuplicateDetector::new(
     MemoryShinglesIndex::in_memory(),
     ShingleSketcher::new(3, 200),
 );
 let registrations: Vec<_> = corpus
     .iter()
     .enumerate()
     .map(|(i, text)| detector.add_document(i as u64, text).unwrap())
     .collect();

 assert_eq!(registrations[0], Registration::Unique);
 assert_eq!(registrations[1], Registration::Unique);
 assert_eq!(registrations[2].master(), Some(0));
 assert_eq!(detector.index().number_of_documents().unwrap(), 2);
 assert!(detector.index().similar_documents(0).unwrap().contains(&2));
 ```

## References
[[1] Chapter 3, Mining of Massive Datasets](http://www.mmds.org)

[[2] On the resemblance and containment of documents](https://www.cs.princeton.edu/courses/archive/spring13/cos598C/broder97resemblance.pdf)
 */

pub mod detector;
pub mod error;
pub mod index;
pub mod sketch;
pub mod text;

use std::collections::{HashMap, HashSet};

pub use crate::detector::{DetectorConfig, NearDuplicateDetector, Registration, SimilarDocument};
pub use crate::error::{IndexError, Result};

/// Caller-assigned document identifier, unique within one index.
pub type DocumentId = u64;

/// 64-bit hash of one shingle.
pub type ShingleHash = u64;

/// The k smallest shingle hashes of a document.
pub type Sketch = HashSet<ShingleHash, ahash::RandomState>;

pub type DocumentIds = HashSet<DocumentId, ahash::RandomState>;

/// Candidate documents with their full stored sketches.
pub type CandidateSketches = HashMap<DocumentId, Sketch, ahash::RandomState>;

/// Builds a [`Sketch`] from a list of hashes.
///
/// ```
/// let sketch = neardup::sketch_of([10, 20, 30]);
/// assert_eq!(sketch.len(), 3);
/// ```
pub fn sketch_of<I: IntoIterator<Item = ShingleHash>>(hashes: I) -> Sketch {
    hashes.into_iter().collect()
}
