use std::cmp::min;
use std::hash::{BuildHasher, Hash, Hasher};

use fnv::FnvBuildHasher;

use crate::sketch::{smallest_k, SketchModel};
use crate::text::{preprocess, tokenize_text, AsShingles};
use crate::{DocumentId, ShingleHash, Sketch};

pub const DEFAULT_N_GRAM_LENGTH: usize = 3;
pub const DEFAULT_SKETCH_SIZE: usize = 200;

/// What a shingle is made of.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShingleUnit {
    /// n consecutive tokens
    #[default]
    Words,
    /// n consecutive characters of the preprocessed text
    Characters,
}

/// Reference [`SketchModel`]: preprocesses the text, builds n-gram shingles,
/// hashes every shingle with `B` and keeps the `sketch_size` smallest hashes.
///
/// Texts shorter than the n-gram length are hashed as a single shingle, so
/// every non-empty text gets a non-empty sketch.
///
/// # Examples
///
/// ```
/// use neardup::sketch::{jaccard_similarity, ShingleSketcher};
///
/// let sketcher = ShingleSketcher::new(2, 100);
/// let s1 = sketcher.sketch("the quick brown fox jumps over the lazy dog");
/// let s2 = sketcher.sketch("The quick brown fox jumps over the lazy cat");
/// assert_eq!(s1.len(), 8);
/// assert!((jaccard_similarity(&s1, &s2) - 7.0 / 9.0).abs() < 1e-9);
/// ```
#[derive(Clone, Debug)]
pub struct ShingleSketcher<B: BuildHasher = FnvBuildHasher> {
    build_hasher: B,
    unit: ShingleUnit,
    min_ngram: usize,
    max_ngram: usize,
    sketch_size: usize,
}

impl ShingleSketcher<FnvBuildHasher> {
    pub fn new(n_gram_length: usize, sketch_size: usize) -> Self {
        ShingleSketcher::new_with_hasher(n_gram_length, sketch_size, FnvBuildHasher::default())
    }
}

impl Default for ShingleSketcher<FnvBuildHasher> {
    fn default() -> Self {
        ShingleSketcher::new(DEFAULT_N_GRAM_LENGTH, DEFAULT_SKETCH_SIZE)
    }
}

impl<B: BuildHasher> ShingleSketcher<B> {
    pub fn new_with_hasher(n_gram_length: usize, sketch_size: usize, build_hasher: B) -> Self {
        assert!(n_gram_length > 0, "n-gram length must be positive");
        ShingleSketcher {
            build_hasher,
            unit: ShingleUnit::Words,
            min_ngram: n_gram_length,
            max_ngram: n_gram_length,
            sketch_size,
        }
    }

    /// Use shingles of every length in `min_ngram..=max_ngram`.
    pub fn with_ngram_range(mut self, min_ngram: usize, max_ngram: usize) -> Self {
        assert!(
            min_ngram > 0 && min_ngram <= max_ngram,
            "invalid n-gram range {}..={}",
            min_ngram,
            max_ngram
        );
        self.min_ngram = min_ngram;
        self.max_ngram = max_ngram;
        self
    }

    pub fn with_unit(mut self, unit: ShingleUnit) -> Self {
        self.unit = unit;
        self
    }

    pub fn sketch_size(&self) -> usize {
        self.sketch_size
    }

    pub fn ngram_range(&self) -> (usize, usize) {
        (self.min_ngram, self.max_ngram)
    }

    pub fn unit(&self) -> ShingleUnit {
        self.unit
    }

    pub fn sketch(&self, text: &str) -> Sketch {
        let text = preprocess(text);
        match self.unit {
            ShingleUnit::Words => {
                let tokens: Vec<&str> = tokenize_text(&text).collect();
                match self.clamp_range(tokens.len()) {
                    Some((from, to)) => smallest_k(
                        tokens
                            .as_slice()
                            .as_shingles(from, to)
                            .map(|shingle| self.hash_shingle(shingle)),
                        self.sketch_size,
                    ),
                    None => Sketch::default(),
                }
            }
            ShingleUnit::Characters => match self.clamp_range(text.chars().count()) {
                Some((from, to)) => smallest_k(
                    text.as_str()
                        .as_shingles(from, to)
                        .map(|shingle| self.hash_shingle(shingle)),
                    self.sketch_size,
                ),
                None => Sketch::default(),
            },
        }
    }

    fn clamp_range(&self, len: usize) -> Option<(usize, usize)> {
        if len == 0 {
            return None;
        }
        let to = min(self.max_ngram, len);
        Some((min(self.min_ngram, to), to))
    }

    #[inline]
    fn hash_shingle<U: Hash>(&self, shingle: U) -> ShingleHash {
        let mut hasher = self.build_hasher.build_hasher();
        shingle.hash(&mut hasher);
        hasher.finish()
    }
}

impl<B: BuildHasher> SketchModel for ShingleSketcher<B> {
    fn sketch_of(&self, _document_id: DocumentId, text: &str) -> Sketch {
        self.sketch(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch::{jaccard_similarity, ShingleHasher};

    static S1: &str = "local sensitive hashing is cool";
    static S2: &str = "local sensitive hashing is great";
    static S3: &str = "we all scream for ice cream";

    #[test]
    fn test_sketch_size_is_bounded() {
        let sketcher = ShingleSketcher::new(1, 3);
        assert_eq!(sketcher.sketch(S1).len(), 3);
        let sketcher = ShingleSketcher::new(1, 100);
        assert_eq!(sketcher.sketch(S1).len(), 5);
    }

    #[test]
    fn test_preprocessing_is_applied() {
        let sketcher = ShingleSketcher::default();
        assert_eq!(
            sketcher.sketch("Local  Sensitive\nHashing is COOL"),
            sketcher.sketch(S1)
        );
    }

    #[test]
    fn test_short_text_gets_single_shingle() {
        let sketcher = ShingleSketcher::new(3, 200);
        assert_eq!(sketcher.sketch("hello world").len(), 1);
        assert!(sketcher.sketch("   ").is_empty());
    }

    #[test]
    fn test_similar_texts_share_hashes() {
        let sketcher = ShingleSketcher::new(2, 200);
        let s1 = sketcher.sketch(S1);
        let s2 = sketcher.sketch(S2);
        let s3 = sketcher.sketch(S3);
        // 3 shared bigrams out of 5 distinct ones
        assert!((jaccard_similarity(&s1, &s2) - 0.6).abs() < 1e-9);
        assert_eq!(jaccard_similarity(&s1, &s3), 0.0);
    }

    #[test]
    fn test_character_shingles() {
        let sketcher = ShingleSketcher::new(3, 200).with_unit(ShingleUnit::Characters);
        assert_eq!(sketcher.sketch("abcde").len(), 3);
        assert_eq!(sketcher.sketch("ab").len(), 1);
        assert_eq!(sketcher.unit(), ShingleUnit::Characters);
    }

    #[test]
    fn test_ngram_range() {
        let sketcher = ShingleSketcher::new(1, 200).with_ngram_range(1, 2);
        // 5 unigrams + 4 bigrams
        assert_eq!(sketcher.sketch(S1).len(), 9);
        assert_eq!(sketcher.ngram_range(), (1, 2));
    }

    #[test]
    fn test_hashers_produce_different_sketches() {
        let sip = ShingleSketcher::new_with_hasher(2, 200, ShingleHasher::Sip);
        let sea = ShingleSketcher::new_with_hasher(2, 200, ShingleHasher::Sea);
        assert_eq!(sip.sketch(S1).len(), sea.sketch(S1).len());
        assert_ne!(sip.sketch(S1), sea.sketch(S1));
    }
}
