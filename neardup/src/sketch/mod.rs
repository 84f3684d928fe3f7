//! The sketch model: turning a document's text into a small set of shingle
//! hashes.
//!
//! The index never computes sketches itself; it only stores and retrieves
//! them. [`SketchModel`] is the boundary, and [`ShingleSketcher`] is the
//! reference implementation (n-gram shingles reduced with smallest-k hashing).
mod hashers;
mod shingle_sketcher;

pub use self::hashers::{Sha1Hasher, ShingleHasher};
pub use self::shingle_sketcher::{ShingleSketcher, ShingleUnit};

use std::collections::{BinaryHeap, HashSet};
use std::hash::{BuildHasher, Hash};

use rayon::prelude::*;

use crate::{DocumentId, ShingleHash, Sketch};

/// Produces the sketch of a document.
pub trait SketchModel {
    /// Returns the (at most k element) set of shingle hashes for the document.
    /// Documents too short to fill the sketch produce a smaller set.
    fn sketch_of(&self, document_id: DocumentId, text: &str) -> Sketch;

    fn bulk_sketch(&self, documents: &[(DocumentId, &str)]) -> Vec<Sketch>
    where
        Self: Sync,
    {
        documents
            .par_iter()
            .map(|(document_id, text)| self.sketch_of(*document_id, text))
            .collect()
    }
}

/// Keeps the `k` smallest distinct hashes.
///
/// # Examples
///
/// ```
/// use neardup::sketch::smallest_k;
///
/// let sketch = smallest_k(vec![50, 10, 40, 10, 20, 30], 3);
/// let mut hashes: Vec<_> = sketch.into_iter().collect();
/// hashes.sort();
/// assert_eq!(hashes, vec![10, 20, 30]);
/// ```
pub fn smallest_k<I>(hashes: I, k: usize) -> Sketch
where
    I: IntoIterator<Item = ShingleHash>,
{
    let mut seen = Sketch::default();
    // max-heap, the root is the largest of the k smallest so far
    let mut heap: BinaryHeap<ShingleHash> = BinaryHeap::with_capacity(k + 1);
    for hash in hashes {
        if k == 0 || !seen.insert(hash) {
            continue;
        }
        if heap.len() < k {
            heap.push(hash);
        } else if let Some(&largest) = heap.peek() {
            if hash < largest {
                heap.pop();
                heap.push(hash);
            }
        }
    }
    heap.into_iter().collect()
}

/// Jaccard similarity of two sets. Two empty sets are considered identical.
pub fn jaccard_similarity<T, S>(set_1: &HashSet<T, S>, set_2: &HashSet<T, S>) -> f64
where
    T: Hash + Eq,
    S: BuildHasher,
{
    if set_1.is_empty() && set_2.is_empty() {
        return 1.0;
    }
    let (smaller, larger) = if set_1.len() <= set_2.len() {
        (set_1, set_2)
    } else {
        (set_2, set_1)
    };
    let intersection_len = smaller.iter().filter(|item| larger.contains(*item)).count();
    intersection_len as f64 / (set_1.len() + set_2.len() - intersection_len) as f64
}

/// Jaccard distance, `1 - similarity`. The bigger the value, the more
/// dissimilar the sets.
///
/// # Examples
///
/// ```
/// use neardup::Sketch;
/// use neardup::sketch::jaccard_distance;
///
/// let s1: Sketch = [1, 2, 3, 4].into_iter().collect();
/// let s2: Sketch = [1, 2, 3, 5].into_iter().collect();
/// assert!((jaccard_distance(&s1, &s2) - 0.4).abs() < 1e-9);
/// ```
pub fn jaccard_distance<T, S>(set_1: &HashSet<T, S>, set_2: &HashSet<T, S>) -> f64
where
    T: Hash + Eq,
    S: BuildHasher,
{
    1.0 - jaccard_similarity(set_1, set_2)
}
