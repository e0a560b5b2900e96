//! Splitting a record stream into ordered chunk files.
//!
//! Records are copied byte-for-byte; a chunk boundary only ever falls on a
//! record boundary, so concatenating the chunk files in index order yields
//! the input again.

mod reader;

pub use reader::{count_records, open_records, RawRecord, RecordReader};

use std::fs::{self, File};
use std::io::{self, BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::manifest::{self, ChunkNaming, Manifest, ManifestError};
use crate::sizing::records_per_chunk;

/// Default record sigil for FASTA input.
pub const FASTA_SIGIL: u8 = b'>';

/// Errors raised while partitioning.
#[derive(Debug, Error)]
pub enum PartitionError {
    /// A chunk file (or the chunk directory) could not be written.
    #[error("failed to write chunk {path}: {source}")]
    Write {
        /// Path that failed.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// The input could not be read.
    #[error("failed to read input {path}: {source}")]
    Read {
        /// Input being read.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// Stale chunks could not be cleared.
    #[error("failed to clear stale chunks: {0}")]
    Stale(#[from] ManifestError),
}

/// How records per chunk are decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionMode {
    /// Total record count is known up front.
    Counted {
        /// Exact number of records in the input.
        total_records: u64,
    },
    /// Single pass with an estimate; the last chunk absorbs the remainder.
    Streaming {
        /// Expected number of records.
        estimated_records: u64,
    },
}

/// Result of a partitioning pass.
#[derive(Debug, Clone)]
pub struct PartitionOutcome {
    /// Chunk files written, by index.
    pub manifest: Manifest,
    /// Records seen in the input.
    pub records: u64,
    /// Records per chunk that was applied.
    pub records_per_chunk: u64,
}

impl PartitionOutcome {
    /// Number of chunks produced.
    pub fn chunk_count(&self) -> usize {
        self.manifest.len()
    }
}

/// Writes chunk files `{dir}/{index}.{ext}` from a record stream.
#[derive(Debug, Clone)]
pub struct Partitioner {
    chunk_target: usize,
    naming: ChunkNaming,
    sigil: u8,
}

impl Partitioner {
    /// Partitioner aiming for `chunk_target` chunks named with `naming`.
    pub fn new(chunk_target: usize, naming: ChunkNaming) -> Self {
        Self {
            chunk_target: chunk_target.max(1),
            naming,
            sigil: FASTA_SIGIL,
        }
    }

    /// Use a different record start byte.
    pub fn with_sigil(mut self, sigil: u8) -> Self {
        self.sigil = sigil;
        self
    }

    /// Naming used for chunk files.
    pub fn naming(&self) -> &ChunkNaming {
        &self.naming
    }

    /// Partition a file, counting its records first.
    ///
    /// Gzip input is decompressed; chunk files are always plain.
    pub fn partition_file(
        &self,
        input: &Path,
        out_dir: &Path,
    ) -> Result<PartitionOutcome, PartitionError> {
        let read_err = |source: io::Error| PartitionError::Read {
            path: input.display().to_string(),
            source,
        };
        let total_records =
            count_records(open_records(input).map_err(read_err)?, self.sigil).map_err(read_err)?;
        debug!(input = %input.display(), total_records, "counted input records");

        let reader = open_records(input).map_err(read_err)?;
        self.partition_reader(reader, PartitionMode::Counted { total_records }, out_dir)
            .map_err(|err| match err {
                PartitionError::Read { source, .. } => read_err(source),
                other => other,
            })
    }

    /// Partition any buffered reader according to `mode`.
    pub fn partition_reader<R: BufRead>(
        &self,
        reader: R,
        mode: PartitionMode,
        out_dir: &Path,
    ) -> Result<PartitionOutcome, PartitionError> {
        let (per_chunk, max_chunks) = match mode {
            PartitionMode::Counted { total_records } => {
                (records_per_chunk(total_records, self.chunk_target), usize::MAX)
            }
            PartitionMode::Streaming { estimated_records } => (
                records_per_chunk(estimated_records, self.chunk_target),
                self.chunk_target,
            ),
        };

        self.prepare_dir(out_dir)?;

        let mut writer = ChunkWriter::new(out_dir, &self.naming);
        let mut records = 0u64;
        let mut in_chunk = 0u64;

        for record in RecordReader::new(reader, self.sigil) {
            let record = record.map_err(|source| PartitionError::Read {
                path: "<stream>".to_string(),
                source,
            })?;
            if record.headed {
                let room_for_next = writer.chunk_count() < max_chunks;
                if in_chunk >= per_chunk && room_for_next {
                    writer.finish_current()?;
                    in_chunk = 0;
                }
                records += 1;
                in_chunk += 1;
            }
            writer.write(&record.bytes)?;
        }

        let manifest = writer.finish()?;
        info!(
            dir = %out_dir.display(),
            records,
            chunks = manifest.len(),
            records_per_chunk = per_chunk,
            "partitioned input"
        );
        Ok(PartitionOutcome {
            manifest,
            records,
            records_per_chunk: per_chunk,
        })
    }

    fn prepare_dir(&self, out_dir: &Path) -> Result<(), PartitionError> {
        fs::create_dir_all(out_dir).map_err(|source| PartitionError::Write {
            path: out_dir.display().to_string(),
            source,
        })?;
        let stale = manifest::scan(out_dir, &self.naming)?;
        for (index, path) in stale.iter() {
            debug!(index, path = %path.display(), "removing stale chunk");
            fs::remove_file(path).map_err(|source| PartitionError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Opens chunk files lazily so that no empty chunk is ever created.
struct ChunkWriter<'a> {
    dir: &'a Path,
    naming: &'a ChunkNaming,
    current: Option<(usize, PathBuf, BufWriter<File>)>,
    manifest: Manifest,
}

impl<'a> ChunkWriter<'a> {
    fn new(dir: &'a Path, naming: &'a ChunkNaming) -> Self {
        Self {
            dir,
            naming,
            current: None,
            manifest: Manifest::new(),
        }
    }

    /// Chunks opened so far, including the one being written.
    fn chunk_count(&self) -> usize {
        self.manifest.len() + usize::from(self.current.is_some())
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), PartitionError> {
        if self.current.is_none() {
            let index = self.manifest.len();
            let path = self.naming.path_for(self.dir, index);
            let file = File::create(&path).map_err(|source| PartitionError::Write {
                path: path.display().to_string(),
                source,
            })?;
            self.current = Some((index, path, BufWriter::new(file)));
        }
        if let Some((_, path, out)) = self.current.as_mut() {
            out.write_all(bytes).map_err(|source| PartitionError::Write {
                path: path.display().to_string(),
                source,
            })?;
        }
        Ok(())
    }

    fn finish_current(&mut self) -> Result<(), PartitionError> {
        if let Some((index, path, mut out)) = self.current.take() {
            out.flush().map_err(|source| PartitionError::Write {
                path: path.display().to_string(),
                source,
            })?;
            debug!(index, path = %path.display(), "wrote chunk");
            self.manifest.insert(index, path);
        }
        Ok(())
    }

    fn finish(mut self) -> Result<Manifest, PartitionError> {
        self.finish_current()?;
        Ok(self.manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fasta(n: usize) -> Vec<u8> {
        (0..n)
            .flat_map(|i| format!(">seq{i}\nACGT\nGG\n").into_bytes())
            .collect()
    }

    fn concat(manifest: &Manifest) -> Vec<u8> {
        manifest
            .iter()
            .flat_map(|(_, path)| fs::read(path).unwrap())
            .collect()
    }

    #[test]
    fn counted_mode_spreads_records() {
        let dir = tempfile::tempdir().unwrap();
        let input = fasta(15);
        let outcome = Partitioner::new(10, ChunkNaming::new("fasta"))
            .partition_reader(
                Cursor::new(&input),
                PartitionMode::Counted { total_records: 15 },
                dir.path(),
            )
            .unwrap();
        assert_eq!(outcome.records, 15);
        assert_eq!(outcome.records_per_chunk, 2);
        assert_eq!(outcome.chunk_count(), 8);
        assert_eq!(concat(&outcome.manifest), input);
    }

    #[test]
    fn streaming_mode_caps_chunk_count() {
        let dir = tempfile::tempdir().unwrap();
        let input = fasta(20);
        // estimate is far too low: two records per chunk, at most three chunks
        let outcome = Partitioner::new(3, ChunkNaming::new("fasta"))
            .partition_reader(
                Cursor::new(&input),
                PartitionMode::Streaming { estimated_records: 6 },
                dir.path(),
            )
            .unwrap();
        assert_eq!(outcome.chunk_count(), 3);
        let last = fs::read(outcome.manifest.get(2).unwrap()).unwrap();
        assert_eq!(count_records(Cursor::new(last), b'>').unwrap(), 16);
        assert_eq!(concat(&outcome.manifest), input);
    }

    #[test]
    fn preamble_travels_with_first_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let input = b";header\n>a\nA\n>b\nC\n".to_vec();
        let outcome = Partitioner::new(2, ChunkNaming::new("fasta"))
            .partition_reader(
                Cursor::new(&input),
                PartitionMode::Counted { total_records: 2 },
                dir.path(),
            )
            .unwrap();
        assert_eq!(outcome.chunk_count(), 2);
        assert_eq!(fs::read(outcome.manifest.get(0).unwrap()).unwrap(), b";header\n>a\nA\n");
    }

    #[test]
    fn preamble_only_input_keeps_its_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = Partitioner::new(2, ChunkNaming::new("fasta"))
            .partition_reader(
                Cursor::new(b"no records here\n".to_vec()),
                PartitionMode::Counted { total_records: 0 },
                dir.path(),
            )
            .unwrap();
        assert_eq!(outcome.records, 0);
        assert_eq!(outcome.chunk_count(), 1);
    }

    #[test]
    fn stale_chunks_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..5 {
            fs::write(dir.path().join(format!("{i}.fasta")), b"stale").unwrap();
        }
        fs::write(dir.path().join("keep.txt"), b"mine").unwrap();

        let outcome = Partitioner::new(2, ChunkNaming::new("fasta"))
            .partition_reader(
                Cursor::new(fasta(2)),
                PartitionMode::Counted { total_records: 2 },
                dir.path(),
            )
            .unwrap();
        assert_eq!(outcome.chunk_count(), 2);
        assert!(!dir.path().join("2.fasta").exists());
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn custom_sigil() {
        let dir = tempfile::tempdir().unwrap();
        let input = b"@r1\nAC\n+\nII\n@r2\nGT\n+\nII\n".to_vec();
        let outcome = Partitioner::new(2, ChunkNaming::new("fq"))
            .with_sigil(b'@')
            .partition_reader(
                Cursor::new(&input),
                PartitionMode::Counted { total_records: 2 },
                dir.path(),
            )
            .unwrap();
        assert_eq!(outcome.chunk_count(), 2);
        assert_eq!(concat(&outcome.manifest), input);
    }

    #[test]
    fn out_dir_that_is_a_file_is_a_write_error() {
        let dir = tempfile::tempdir().unwrap();
        let not_a_dir = dir.path().join("chunks");
        fs::write(&not_a_dir, b"occupied").unwrap();

        let err = Partitioner::new(2, ChunkNaming::new("fasta"))
            .partition_reader(
                Cursor::new(fasta(2)),
                PartitionMode::Counted { total_records: 2 },
                &not_a_dir,
            )
            .unwrap_err();
        assert!(matches!(err, PartitionError::Write { .. }));
    }

    #[test]
    fn write_failure_keeps_earlier_chunks() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("1.fasta")).unwrap();

        let err = Partitioner::new(2, ChunkNaming::new("fasta"))
            .partition_reader(
                Cursor::new(fasta(2)),
                PartitionMode::Counted { total_records: 2 },
                dir.path(),
            )
            .unwrap_err();
        match err {
            PartitionError::Write { path, .. } => assert!(path.ends_with("1.fasta")),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(
            fs::read(dir.path().join("0.fasta")).unwrap(),
            b">seq0\nACGT\nGG\n"
        );
    }
}
