mod common;

use std::collections::HashSet;

use blake3::hash;
use common::*;
use seqfan::partition::Partitioner;
use seqfan::{Aggregator, ChunkNaming, Dispatcher, HeaderPolicy};

#[test]
fn repartitioning_yields_identical_chunk_sets() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_file(tmp.path(), "q.fasta", &fasta(57));
    let out_dir = tmp.path().join("chunks");
    let partitioner = Partitioner::new(9, ChunkNaming::new("fasta"));

    let mut fingerprints = HashSet::new();
    let mut counts = HashSet::new();
    for _ in 0..4 {
        let outcome = partitioner
            .partition_file(&input, &out_dir)
            .expect("partitioning succeeds");
        fingerprints.insert(outcome.manifest.fingerprint().unwrap());
        counts.insert(outcome.chunk_count());
    }

    assert_eq!(fingerprints.len(), 1, "chunk sets diverged across runs");
    assert_eq!(counts.into_iter().collect::<Vec<_>>(), vec![9]);
}

#[test]
fn aggregate_is_independent_of_thread_count() {
    let tmp = tempfile::tempdir().unwrap();
    let input = write_file(tmp.path(), "q.fasta", &fasta(64));
    let chunks = Partitioner::new(16, ChunkNaming::new("fasta"))
        .partition_file(&input, &tmp.path().join("chunks"))
        .unwrap();

    let mut digests = HashSet::new();
    for threads in [1, 2, 8] {
        let dispatcher = Dispatcher::new(threads, ChunkNaming::new("tsv")).unwrap();
        let report = dispatcher
            .dispatch(
                &chunks.manifest,
                &tmp.path().join(format!("results_{threads}")),
                &tmp.path().join(format!("logs_{threads}")),
                &fake_search,
            )
            .unwrap();
        let output = tmp.path().join(format!("joined_{threads}.tsv"));
        Aggregator::new(HeaderPolicy::FirstLine)
            .aggregate(&report.results, chunks.chunk_count(), &output)
            .unwrap();
        digests.insert(hash(&std::fs::read(&output).unwrap()));
    }

    assert_eq!(digests.len(), 1, "output depends on scheduling");
}
