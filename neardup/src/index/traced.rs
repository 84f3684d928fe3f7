use std::collections::BTreeMap;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::Result;
use crate::index::ShinglesIndex;
use crate::{CandidateSketches, DocumentId, DocumentIds, ShingleHash, Sketch};

/// Category of an index call, one counter each.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Add,
    HashLookup,
    SketchLookup,
    DocumentLookup,
    AddSimilarity,
    SimilarityLookup,
    Count,
    Lifecycle,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::Add,
        Operation::HashLookup,
        Operation::SketchLookup,
        Operation::DocumentLookup,
        Operation::AddSimilarity,
        Operation::SimilarityLookup,
        Operation::Count,
        Operation::Lifecycle,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::HashLookup => "hash_lookup",
            Operation::SketchLookup => "sketch_lookup",
            Operation::DocumentLookup => "document_lookup",
            Operation::AddSimilarity => "add_similarity",
            Operation::SimilarityLookup => "similarity_lookup",
            Operation::Count => "count",
            Operation::Lifecycle => "lifecycle",
        }
    }
}

#[derive(Default)]
struct Counter {
    calls: AtomicU64,
    nanos: AtomicU64,
}

/// Cumulative calls and time of one [`Operation`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TraceEntry {
    pub calls: u64,
    pub elapsed: Duration,
}

impl TraceEntry {
    pub fn mean(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            let nanos = self.elapsed.as_nanos() / u128::from(self.calls);
            Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
        }
    }
}

/// Snapshot of the counters of a [`TracedIndex`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TraceReport {
    pub backend: &'static str,
    pub entries: BTreeMap<Operation, TraceEntry>,
}

impl TraceReport {
    pub fn get(&self, operation: Operation) -> TraceEntry {
        self.entries.get(&operation).copied().unwrap_or_default()
    }

    pub fn total_calls(&self) -> u64 {
        self.entries.values().map(|entry| entry.calls).sum()
    }
}

impl Display for TraceReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Index trace [{}]", self.backend)?;
        writeln!(
            f,
            "{:<18} {:>10} {:>14} {:>12}",
            "operation", "calls", "total ms", "mean us"
        )?;
        for (operation, entry) in &self.entries {
            writeln!(
                f,
                "{:<18} {:>10} {:>14.3} {:>12.3}",
                operation.name(),
                entry.calls,
                entry.elapsed.as_secs_f64() * 1e3,
                entry.mean().as_secs_f64() * 1e6
            )?;
        }
        Ok(())
    }
}

/// Wraps an index and times every call.
///
/// Calls are forwarded unchanged: the wrapped index sees the same arguments
/// and the caller gets the same values and errors back.
///
/// ```
/// use neardup::index::{MemoryShinglesIndex, Operation, ShinglesIndex, TracedIndex};
/// use neardup::sketch_of;
///
/// let mut index = TracedIndex::new(MemoryShinglesIndex::in_memory());
/// index.add_document(1, &sketch_of([10, 20])).unwrap();
/// index.documents_for_sketch(&sketch_of([20])).unwrap();
///
/// let report = index.trace_report();
/// assert_eq!(report.get(Operation::Add).calls, 1);
/// assert_eq!(report.get(Operation::SketchLookup).calls, 1);
/// ```
pub struct TracedIndex<I> {
    inner: I,
    counters: [Counter; 8],
}

impl<I: ShinglesIndex> TracedIndex<I> {
    pub fn new(inner: I) -> Self {
        TracedIndex {
            inner,
            counters: Default::default(),
        }
    }

    pub fn inner(&self) -> &I {
        &self.inner
    }

    pub fn into_inner(self) -> I {
        self.inner
    }

    pub fn trace_report(&self) -> TraceReport {
        let entries = Operation::ALL
            .iter()
            .filter_map(|operation| {
                let counter = &self.counters[*operation as usize];
                let calls = counter.calls.load(Ordering::Relaxed);
                if calls == 0 {
                    return None;
                }
                let elapsed = Duration::from_nanos(counter.nanos.load(Ordering::Relaxed));
                Some((*operation, TraceEntry { calls, elapsed }))
            })
            .collect();
        TraceReport {
            backend: self.inner.backend_name(),
            entries,
        }
    }

    pub fn reset(&self) {
        for counter in &self.counters {
            counter.calls.store(0, Ordering::Relaxed);
            counter.nanos.store(0, Ordering::Relaxed);
        }
    }

    fn record(&self, operation: Operation, started: Instant) {
        let elapsed = started.elapsed();
        let counter = &self.counters[operation as usize];
        counter.calls.fetch_add(1, Ordering::Relaxed);
        counter
            .nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
        trace!(
            backend = self.inner.backend_name(),
            operation = operation.name(),
            elapsed_us = elapsed.as_micros() as u64,
            "index call"
        );
    }
}

impl<I: ShinglesIndex> ShinglesIndex for TracedIndex<I> {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    fn add_document(&mut self, document_id: DocumentId, sketch: &Sketch) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.add_document(document_id, sketch);
        self.record(Operation::Add, started);
        result
    }

    fn add_documents<D>(&mut self, documents: D) -> Result<()>
    where
        D: IntoIterator<Item = (DocumentId, Sketch)>,
    {
        let started = Instant::now();
        let result = self.inner.add_documents(documents);
        self.record(Operation::Add, started);
        result
    }

    fn documents_for_hash(&self, hash: ShingleHash) -> Result<DocumentIds> {
        let started = Instant::now();
        let result = self.inner.documents_for_hash(hash);
        self.record(Operation::HashLookup, started);
        result
    }

    fn sketch_for_document(&self, document_id: DocumentId) -> Result<Option<Sketch>> {
        let started = Instant::now();
        let result = self.inner.sketch_for_document(document_id);
        self.record(Operation::DocumentLookup, started);
        result
    }

    fn documents_for_sketch(&self, sketch: &Sketch) -> Result<CandidateSketches> {
        let started = Instant::now();
        let result = self.inner.documents_for_sketch(sketch);
        self.record(Operation::SketchLookup, started);
        result
    }

    fn add_document_similarity(&mut self, master: DocumentId, similar: DocumentId) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.add_document_similarity(master, similar);
        self.record(Operation::AddSimilarity, started);
        result
    }

    fn similar_documents(&self, document_id: DocumentId) -> Result<DocumentIds> {
        let started = Instant::now();
        let result = self.inner.similar_documents(document_id);
        self.record(Operation::SimilarityLookup, started);
        result
    }

    fn all_similar_documents(&self) -> Result<BTreeMap<DocumentId, DocumentIds>> {
        let started = Instant::now();
        let result = self.inner.all_similar_documents();
        self.record(Operation::SimilarityLookup, started);
        result
    }

    fn number_of_documents(&self) -> Result<usize> {
        let started = Instant::now();
        let result = self.inner.number_of_documents();
        self.record(Operation::Count, started);
        result
    }

    fn clear(&mut self) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.clear();
        self.record(Operation::Lifecycle, started);
        result
    }

    fn save_index(&mut self) -> Result<()> {
        let started = Instant::now();
        let result = self.inner.save_index();
        self.record(Operation::Lifecycle, started);
        result
    }

    fn delete_index(self) -> Result<()> {
        let started = Instant::now();
        let backend = self.inner.backend_name();
        let result = self.inner.delete_index();
        trace!(
            backend,
            operation = Operation::Lifecycle.name(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "index call"
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::index::{BatchOverflow, IndexLocation, MemoryShinglesIndex, SqliteOptions, SqliteShinglesIndex};
    use crate::sketch_of;
    use tempfile::TempDir;

    #[test]
    fn test_counts_per_operation() {
        let mut index = TracedIndex::new(MemoryShinglesIndex::in_memory());
        index.add_document(1, &sketch_of([10, 20])).unwrap();
        index
            .add_documents(vec![(2, sketch_of([20])), (3, sketch_of([30]))])
            .unwrap();
        index.documents_for_hash(20).unwrap();
        index.sketch_for_document(1).unwrap();
        index.add_document_similarity(1, 2).unwrap();
        index.similar_documents(1).unwrap();
        index.all_similar_documents().unwrap();
        index.number_of_documents().unwrap();
        index.save_index().unwrap();

        let report = index.trace_report();
        assert_eq!(report.backend, "memory");
        assert_eq!(report.get(Operation::Add).calls, 2);
        assert_eq!(report.get(Operation::HashLookup).calls, 1);
        assert_eq!(report.get(Operation::DocumentLookup).calls, 1);
        assert_eq!(report.get(Operation::SketchLookup).calls, 0);
        assert_eq!(report.get(Operation::AddSimilarity).calls, 1);
        assert_eq!(report.get(Operation::SimilarityLookup).calls, 2);
        assert_eq!(report.get(Operation::Count).calls, 1);
        assert_eq!(report.get(Operation::Lifecycle).calls, 1);
        assert_eq!(report.total_calls(), 9);

        let rendered = report.to_string();
        assert!(rendered.contains("similarity_lookup"));
        assert!(!rendered.contains("sketch_lookup"));

        index.reset();
        assert_eq!(index.trace_report().total_calls(), 0);
    }

    #[test]
    fn test_errors_pass_through() {
        let dir = TempDir::new().unwrap();
        let sqlite = SqliteShinglesIndex::open(
            IndexLocation::new(dir.path(), "traced"),
            SqliteOptions::default()
                .with_batch_width(2)
                .with_overflow(BatchOverflow::Reject),
        )
        .unwrap();
        let index = TracedIndex::new(sqlite);
        let err = index.documents_for_sketch(&sketch_of([1, 2, 3])).unwrap_err();
        assert!(matches!(err, IndexError::CapacityExceeded { requested: 3, limit: 2, .. }));
        assert_eq!(index.trace_report().get(Operation::SketchLookup).calls, 1);
    }

    #[test]
    fn test_mean() {
        let entry = TraceEntry {
            calls: 4,
            elapsed: Duration::from_millis(8),
        };
        assert_eq!(entry.mean(), Duration::from_millis(2));
        assert_eq!(TraceEntry::default().mean(), Duration::ZERO);
    }

    #[test]
    fn test_mean_with_call_count_above_u32() {
        let entry = TraceEntry {
            calls: 1 << 32,
            elapsed: Duration::from_secs(1 << 32),
        };
        assert_eq!(entry.mean(), Duration::from_secs(1));
        let entry = TraceEntry {
            calls: 1 << 32,
            elapsed: Duration::from_secs(1),
        };
        assert_eq!(entry.mean(), Duration::from_nanos(0));
    }
}
