use rand::distributions::Uniform;
use rand::prelude::Distribution;
use rand::thread_rng;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use itertools::Itertools;
use neardup::DocumentId;

pub struct GeneratedCluster {
    /// Document id -> document text.
    pub documents: HashMap<DocumentId, String>,
}

/// DifferenceMode indicates whether the edits of the documents in one cluster
/// hit the same or different word positions.
///
/// With SameIndices the num_changes positions are chosen once per cluster and
/// every document replaces the words at those positions.
/// With DiffIndices every document chooses its own positions.
#[derive(Debug, PartialOrd, PartialEq)]
pub enum DifferenceMode {
    SameIndices,
    DiffIndices,
}

/// Generates clusters of documents whose distinct words have at least
/// `jaccard_similarity` with the cluster centroid.
pub struct ClusterGenerator {
    pub jaccard_similarity: f64,
    pub cluster_size: usize,
    pub document_words: usize,
    pub num_clusters: usize,
    pub vocabulary_size: usize,
    pub num_changes: usize,
    pub mode: DifferenceMode,
}

impl ClusterGenerator {
    pub fn new(
        jaccard_similarity: f64,
        cluster_size: usize,
        document_words: usize,
        num_clusters: usize,
        vocabulary_size: usize,
        mode: DifferenceMode,
    ) -> Self {
        ClusterGenerator {
            jaccard_similarity,
            cluster_size,
            document_words,
            num_clusters,
            vocabulary_size,
            num_changes: 0,
            mode,
        }
    }

    pub fn generate(&mut self) -> Vec<GeneratedCluster> {
        let document_id_seq = AtomicU64::new(1);
        self.num_changes = self.num_changes();
        println!("num changes {}", self.num_changes);
        (0..self.num_clusters)
            .into_par_iter()
            .map(|_| self.generate_cluster(&document_id_seq))
            .collect()
    }

    /// The largest number of replaced words that keeps the similarity with
    /// the centroid above `jaccard_similarity`.
    fn num_changes(&self) -> usize {
        let mut k = 1;
        let n = self.document_words as f64;
        while (n - k as f64) / (n + k as f64) > self.jaccard_similarity {
            k += 1
        }
        k - 1
    }

    fn generate_cluster(&self, document_id_seq: &AtomicU64) -> GeneratedCluster {
        let mut rng = thread_rng();
        let words = Uniform::new(0, self.vocabulary_size);
        let positions = Uniform::new(0, self.document_words);
        let centroid: Vec<usize> = words
            .sample_iter(&mut rng)
            .take(self.document_words)
            .collect();
        let shared_positions: Vec<usize> = positions
            .sample_iter(&mut rng)
            .take(self.num_changes)
            .collect();

        let mut documents = HashMap::with_capacity(self.cluster_size);
        for _ in 0..self.cluster_size {
            let mut document = centroid.clone();
            for j in 0..self.num_changes {
                let position = match self.mode {
                    DifferenceMode::SameIndices => shared_positions[j],
                    DifferenceMode::DiffIndices => positions.sample(&mut rng),
                };
                document[position] = words.sample(&mut rng);
            }
            documents.insert(
                document_id_seq.fetch_add(1, Ordering::Relaxed),
                to_text(&document),
            );
        }

        GeneratedCluster { documents }
    }
}

fn to_text(words: &[usize]) -> String {
    words.iter().map(|word| format!("w{}", word)).join(" ")
}
