//! Partitioning throughput benchmarks

use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use seqfan::partition::{count_records, PartitionMode, Partitioner};
use seqfan::ChunkNaming;

fn synthetic_fasta(records: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(records * 96);
    for i in 0..records {
        out.extend_from_slice(format!(">read{i}\n").as_bytes());
        out.extend_from_slice(b"ACGTACGTTGCAACGTACGTTGCAACGTACGTTGCAACGTACGTTGCA");
        out.extend_from_slice(b"ACGTACGTTGCAACGTACGTTGCA\n");
    }
    out
}

fn benchmark_partition(c: &mut Criterion) {
    let input = synthetic_fasta(50_000);
    let dir = tempfile::tempdir().expect("scratch dir");
    let total = count_records(Cursor::new(&input), b'>').expect("count");

    c.bench_function("count_records n=50000", |b| {
        b.iter(|| count_records(Cursor::new(black_box(&input)), b'>').expect("count"));
    });

    c.bench_function("partition n=50000 chunks=100", |b| {
        let partitioner = Partitioner::new(100, ChunkNaming::new("fasta"));
        b.iter(|| {
            partitioner
                .partition_reader(
                    Cursor::new(black_box(&input)),
                    PartitionMode::Counted { total_records: total },
                    dir.path(),
                )
                .expect("partition")
        });
    });
}

criterion_group!(benches, benchmark_partition);
criterion_main!(benches);
