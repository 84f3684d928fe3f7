use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::distributions::Alphanumeric;
use rand::prelude::{Distribution, StdRng};
use rand::SeedableRng;
use tempfile::TempDir;

use neardup::index::{
    IndexLocation, MemoryShinglesIndex, ShinglesIndex, SqliteOptions, SqliteShinglesIndex,
    TantivyOptions, TantivyShinglesIndex,
};
use neardup::sketch::{jaccard_distance, ShingleSketcher, ShingleUnit, SketchModel};
use neardup::{DocumentId, Sketch};

const NUM_DOCUMENTS: usize = 10_000;

fn bench_sketch(c: &mut Criterion) {
    let text = "Near-duplicate detection compares documents by the overlap of their shingle sets, \
                keeping only the smallest hashes of each set as a compact sketch of the text. ";
    let words = ShingleSketcher::new(3, 200);
    let chars = ShingleSketcher::new(5, 200).with_unit(ShingleUnit::Characters);
    let mut group = c.benchmark_group("bench_sketch");
    group.throughput(Throughput::Elements(1));
    group.bench_function("word_trigrams", |b| b.iter(|| black_box(words.sketch(text))));
    group.bench_function("char_5grams", |b| b.iter(|| black_box(chars.sketch(text))));
    group.finish();
}

fn bench_jaccard_distance(c: &mut Criterion) {
    let sketcher = ShingleSketcher::new(1, 200);
    let sketch1 = sketcher.sketch("Hello, World and all the people living in it");
    let sketch2 = sketcher.sketch("Bonjour, Monde and all the people living in it");
    let mut group = c.benchmark_group("bench_jaccard");
    group.throughput(Throughput::Elements(1));
    group.bench_function("jaccard_distance", |b| b.iter(|| {
        black_box(jaccard_distance(&sketch1, &sketch2));
    }));
    group.finish();
}

fn random_corpus() -> Vec<(DocumentId, Sketch)> {
    let seed = [1, 0, 0, 0, 23, 0, 0, 0, 200, 1, 0, 0, 210, 30, 0, 0,
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    let mut rng = StdRng::from_seed(seed);
    let sketcher = ShingleSketcher::new(5, 100).with_unit(ShingleUnit::Characters);
    let texts: Vec<(DocumentId, String)> = (0..NUM_DOCUMENTS as u64)
        .map(|id| {
            let text: String = Alphanumeric
                .sample_iter(&mut rng)
                .take(200)
                .map(char::from)
                .collect();
            (id, text)
        })
        .collect();
    let refs: Vec<(DocumentId, &str)> = texts.iter().map(|(id, text)| (*id, text.as_str())).collect();
    let sketches = sketcher.bulk_sketch(&refs);
    texts.iter().map(|(id, _)| *id).zip(sketches).collect()
}

fn bench_lookup<I: ShinglesIndex>(c: &mut Criterion, mut index: I, corpus: &[(DocumentId, Sketch)]) {
    index.add_documents(corpus.to_vec()).unwrap();
    let query = corpus[NUM_DOCUMENTS / 2].1.clone();
    let name = index.backend_name();

    let mut group = c.benchmark_group("documents_for_sketch");
    group.throughput(Throughput::Elements(1));
    group.bench_with_input(BenchmarkId::new("batch", name), &query, |b, query| b.iter(|| {
        let candidates = index.documents_for_sketch(query).unwrap();
        assert!(!candidates.is_empty());
        black_box(candidates);
    }));
    group.bench_with_input(BenchmarkId::new("per_hash", name), &query, |b, query| b.iter(|| {
        black_box(neardup::index::collect_documents_for_sketch(&index, query).unwrap());
    }));
    group.finish();
}

fn bench_backends(c: &mut Criterion) {
    let corpus = random_corpus();
    let dir = TempDir::new().unwrap();
    bench_lookup(c, MemoryShinglesIndex::in_memory(), &corpus);
    bench_lookup(
        c,
        SqliteShinglesIndex::open(IndexLocation::new(dir.path(), "bench"), SqliteOptions::default()).unwrap(),
        &corpus,
    );
    bench_lookup(
        c,
        TantivyShinglesIndex::open(IndexLocation::new(dir.path(), "bench"), TantivyOptions::default()).unwrap(),
        &corpus,
    );
}

criterion_group!(benches, bench_sketch, bench_jaccard_distance, bench_backends);
criterion_main!(benches);
