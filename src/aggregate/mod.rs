//! Fan-in of per-chunk results into one output.
//!
//! Chunks are read in ascending index order. The output is staged in the
//! destination directory and renamed into place only after every chunk was
//! copied, so the final path never shows a partial aggregate.

use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::manifest::Manifest;

/// Errors raised while aggregating chunk results.
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Expected chunk results are absent.
    #[error("missing chunk results {missing:?} (expected {expected} chunks)")]
    MissingChunk {
        /// Declared chunk count.
        expected: usize,
        /// Absent indices, ascending.
        missing: Vec<usize>,
    },

    /// Results exist for indices outside the declared range.
    #[error("unexpected chunk results {unexpected:?} (expected {expected} chunks)")]
    UnexpectedChunk {
        /// Declared chunk count.
        expected: usize,
        /// Extra indices, ascending.
        unexpected: Vec<usize>,
    },

    /// A chunk result could not be read.
    #[error("failed to read chunk {index} result {path}: {source}")]
    Read {
        /// Chunk index.
        index: usize,
        /// Result path.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// The aggregate could not be written or published.
    #[error("failed to write aggregate {path}: {source}")]
    Write {
        /// Final output path.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },
}

/// Treatment of a per-chunk header line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HeaderPolicy {
    /// Results have no header; concatenate as-is.
    #[default]
    None,
    /// The first line of every result is a header that must appear once.
    FirstLine,
}

/// Optional per-record annotation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Annotation {
    /// Lines are copied unchanged.
    #[default]
    None,
    /// Each body line gets a `{index}\t` prefix and the header `chunk\t`.
    ChunkIndex,
}

/// What an aggregation wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateSummary {
    /// Published output.
    pub path: PathBuf,
    /// Chunks read.
    pub chunks: usize,
    /// Bytes in the output.
    pub bytes: u64,
}

/// Concatenates chunk results in index order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator {
    header: HeaderPolicy,
    annotation: Annotation,
}

impl Aggregator {
    /// Aggregator with the given header policy and no annotation.
    pub fn new(header: HeaderPolicy) -> Self {
        Self {
            header,
            annotation: Annotation::None,
        }
    }

    /// Set the per-record annotation.
    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotation = annotation;
        self
    }

    /// Aggregate `results` into `output`.
    ///
    /// `expected` is the number of chunks the partitioner produced; every
    /// index in `0..expected` must be present. Zero chunks give an empty
    /// output.
    pub fn aggregate(
        &self,
        results: &Manifest,
        expected: usize,
        output: &Path,
    ) -> Result<AggregateSummary, AggregateError> {
        check_complete(results, expected)?;

        let write_err = |source: io::Error| AggregateError::Write {
            path: output.display().to_string(),
            source,
        };
        let parent = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_err)?;
        let mut staging = NamedTempFile::new_in(parent).map_err(write_err)?;

        {
            let mut out = BufWriter::new(staging.as_file_mut());
            let single = match (results.len(), self.annotation) {
                (1, Annotation::None) => results.iter().next(),
                _ => None,
            };
            if let Some((index, path)) = single {
                copy_verbatim(index, path, &mut out, output)?;
            } else {
                self.concatenate(results, &mut out, output)?;
            }
            out.flush().map_err(write_err)?;
        }
        staging.as_file().sync_all().map_err(write_err)?;
        staging
            .persist(output)
            .map_err(|err| write_err(err.error))?;

        let bytes = fs::metadata(output).map_err(write_err)?.len();
        info!(
            output = %output.display(),
            chunks = results.len(),
            bytes,
            "aggregated chunk results"
        );
        Ok(AggregateSummary {
            path: output.to_path_buf(),
            chunks: results.len(),
            bytes,
        })
    }

    fn concatenate<W: Write>(
        &self,
        results: &Manifest,
        out: &mut W,
        output: &Path,
    ) -> Result<(), AggregateError> {
        let write_err = |source: io::Error| AggregateError::Write {
            path: output.display().to_string(),
            source,
        };
        let mut header_written = false;
        let mut needs_newline = false;
        let mut line = Vec::new();

        for (index, path) in results.iter() {
            let mut reader = open_chunk(index, path)?;
            let prefix = format!("{index}\t");
            let mut first_line = true;
            loop {
                line.clear();
                let n = reader
                    .read_until(b'\n', &mut line)
                    .map_err(|source| read_err(index, path, source))?;
                if n == 0 {
                    break;
                }
                let is_header = first_line && self.header == HeaderPolicy::FirstLine;
                first_line = false;
                if is_header && header_written {
                    continue;
                }

                if needs_newline {
                    out.write_all(b"\n").map_err(write_err)?;
                }
                let annotated = match (self.annotation, is_header) {
                    (Annotation::ChunkIndex, true) => out.write_all(b"chunk\t"),
                    (Annotation::ChunkIndex, false) => out.write_all(prefix.as_bytes()),
                    (Annotation::None, _) => Ok(()),
                };
                annotated.map_err(write_err)?;
                out.write_all(&line).map_err(write_err)?;
                needs_newline = !line.ends_with(b"\n");
                header_written |= is_header;
            }
            debug!(index, path = %path.display(), "appended chunk result");
        }
        Ok(())
    }
}

fn check_complete(results: &Manifest, expected: usize) -> Result<(), AggregateError> {
    let missing = results.missing(expected);
    if !missing.is_empty() {
        return Err(AggregateError::MissingChunk { expected, missing });
    }
    let unexpected: Vec<usize> = results
        .indices()
        .into_iter()
        .filter(|index| *index >= expected)
        .collect();
    if !unexpected.is_empty() {
        return Err(AggregateError::UnexpectedChunk {
            expected,
            unexpected,
        });
    }
    Ok(())
}

fn open_chunk(index: usize, path: &Path) -> Result<BufReader<File>, AggregateError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| read_err(index, path, source))
}

fn read_err(index: usize, path: &Path, source: io::Error) -> AggregateError {
    AggregateError::Read {
        index,
        path: path.display().to_string(),
        source,
    }
}

fn copy_verbatim<W: Write>(
    index: usize,
    path: &Path,
    out: &mut W,
    output: &Path,
) -> Result<(), AggregateError> {
    let mut input = open_chunk(index, path)?;
    loop {
        let buf = input
            .fill_buf()
            .map_err(|source| read_err(index, path, source))?;
        if buf.is_empty() {
            break;
        }
        out.write_all(buf).map_err(|source| AggregateError::Write {
            path: output.display().to_string(),
            source,
        })?;
        let len = buf.len();
        input.consume(len);
    }
    Ok(())
}
