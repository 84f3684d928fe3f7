mod generate_clusters;
mod metrics;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::time::Instant;

use itertools::Itertools;
use neardup::index::{
    IndexLocation, MemoryShinglesIndex, ShinglesIndex, SqliteOptions, SqliteShinglesIndex,
    TantivyOptions, TantivyShinglesIndex, TracedIndex,
};
use neardup::sketch::ShingleSketcher;
use neardup::{DetectorConfig, DocumentId, NearDuplicateDetector, Registration};
use tracing::info;

use crate::generate_clusters::*;
use crate::metrics::Metrics;

fn run_registration<I: ShinglesIndex>(
    generated_clusters: &[GeneratedCluster],
    index: I,
    config: DetectorConfig,
) -> neardup::Result<()> {
    let index = TracedIndex::new(index);
    println!("Registering into {}", index.backend_name());
    // word unigrams, so sketch similarity follows the generated word similarity
    let mut detector = NearDuplicateDetector::new(index, ShingleSketcher::new(1, 200)).with_config(config);
    let documents: Vec<(DocumentId, &str)> = generated_clusters
        .iter()
        .flat_map(|cluster| cluster.documents.iter().map(|(id, text)| (*id, text.as_str())))
        .sorted_by_key(|(id, _)| *id)
        .collect();

    let now = Instant::now();
    let registrations = detector.add_texts(&documents)?;
    let elapsed = now.elapsed();
    let duplicates = registrations.iter().filter(|r| r.is_duplicate()).count();
    println!(
        "Elapsed millis {}. Documents {}. Duplicates {}. Indexed {}",
        elapsed.as_millis(),
        documents.len(),
        duplicates,
        detector.index().number_of_documents()?
    );

    let masters: HashMap<DocumentId, DocumentId> = documents
        .iter()
        .zip(registrations.iter())
        .map(|((id, _), registration)| match registration {
            Registration::Unique => (*id, *id),
            Registration::Duplicate { master, .. } => (*id, *master),
        })
        .collect();
    let mut groups: HashMap<DocumentId, HashSet<DocumentId>> = HashMap::new();
    for (id, master) in &masters {
        groups.entry(*master).or_default().insert(*id);
    }

    let mut metrics = Metrics::new();
    for generated_cluster in generated_clusters {
        let reference: HashSet<DocumentId> = generated_cluster.documents.keys().copied().collect();
        let dominant_master = reference
            .iter()
            .map(|id| masters[id])
            .counts()
            .into_iter()
            .max_by_key(|(_, count)| *count)
            .map(|(master, _)| master);
        match dominant_master.and_then(|master| groups.get(&master)) {
            Some(found) => metrics.update_metrics(found, &reference),
            None => metrics.update_metrics(&HashSet::new(), &reference),
        }
    }
    println!("{:?}", metrics.get_result());
    println!("{}", detector.index().trace_report());

    detector.into_index().into_inner().delete_index()
}

/// Copies the lines of `input` that are not near-duplicates of an earlier
/// line to `output`.
fn dedup(input: &str, output: &str) -> neardup::Result<()> {
    let mut detector = NearDuplicateDetector::new(MemoryShinglesIndex::in_memory(), ShingleSketcher::default());
    let reader = BufReader::new(File::open(input)?);
    let mut writer = BufWriter::new(File::create(output)?);
    let now = Instant::now();
    let mut duplicates = 0;
    for (number, line) in reader.lines().enumerate() {
        let line = line?;
        if detector.add_document(number as DocumentId + 1, &line)?.is_duplicate() {
            duplicates += 1;
        } else {
            writeln!(writer, "{}", line)?;
        }
    }
    writer.flush()?;
    info!(output, "Wrote result");
    println!("number of (near)duplicates: {}", duplicates);
    println!("elapsed millis for de-duplication: {}", now.elapsed().as_millis());
    Ok(())
}

fn main() -> neardup::Result<()> {
    tracing_subscriber::fmt::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() == 4 && args[1] == "dedup" {
        return dedup(&args[2], &args[3]);
    }

    let mode = match args.get(1).map(String::as_str) {
        Some("diff") => DifferenceMode::DiffIndices,
        _ => DifferenceMode::SameIndices,
    };
    let mut generator = ClusterGenerator::new(0.8, 50, 100, 200, 50_000, mode);
    let generated_clusters = generator.generate();
    println!("Generated {} clusters", generated_clusters.len());
    let config = DetectorConfig::default().with_similarity_threshold(0.35);

    let dir = tempfile::TempDir::new()?;
    run_registration(&generated_clusters, MemoryShinglesIndex::in_memory(), config)?;
    run_registration(
        &generated_clusters,
        SqliteShinglesIndex::open(IndexLocation::new(dir.path(), "bench"), SqliteOptions::default())?,
        config,
    )?;
    run_registration(
        &generated_clusters,
        TantivyShinglesIndex::open(IndexLocation::new(dir.path(), "bench"), TantivyOptions::default())?,
        config,
    )?;
    Ok(())
}
