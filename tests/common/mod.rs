#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use seqfan::{ChunkJob, ExecError, Manifest};

/// FASTA text with `n` records of varying length.
pub fn fasta(n: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for i in 0..n {
        out.extend_from_slice(format!(">query{i} sample record\n").as_bytes());
        for line in 0..(i % 3 + 1) {
            out.extend_from_slice(&b"ACGTTGCA"[..(line + i) % 8 + 1]);
            out.push(b'\n');
        }
    }
    out
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, bytes).expect("write test input");
    path
}

pub fn write_gzip(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
    encoder.write_all(bytes).expect("compress");
    write_file(dir, name, &encoder.finish().expect("finish gzip"))
}

/// Raw concatenation of every file in the manifest, in index order.
pub fn concat(manifest: &Manifest) -> Vec<u8> {
    manifest
        .iter()
        .flat_map(|(_, path)| fs::read(path).expect("read chunk"))
        .collect()
}

/// Stand-in for a search tool: a header line, then one hit line per query.
pub fn fake_search(job: &ChunkJob) -> Result<(), ExecError> {
    let input = fs::read_to_string(&job.input)?;
    let mut out = String::from("query\tchunk\n");
    for line in input.lines().filter(|line| line.starts_with('>')) {
        let id = line[1..].split_whitespace().next().unwrap_or("");
        out.push_str(&format!("{id}\t{}\n", job.index));
    }
    fs::write(&job.output, out)?;
    fs::write(&job.log, format!("processed chunk {}\n", job.index))?;
    Ok(())
}

/// Expected aggregate of `fake_search` over `fasta(n)` split into chunks of
/// `per_chunk` records.
pub fn expected_hits(n: usize, per_chunk: usize) -> String {
    let mut out = String::from("query\tchunk\n");
    for i in 0..n {
        out.push_str(&format!("query{i}\t{}\n", i / per_chunk));
    }
    out
}
