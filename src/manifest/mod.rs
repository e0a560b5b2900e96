//! Chunk naming and manifests.
//!
//! A manifest is the realized mapping `chunk index -> file`. It is normally
//! returned by the step that produced the files; [`scan`] rebuilds one from
//! a directory when only the files are left.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Errors raised while building or checking a manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Indices in `0..expected` have no file.
    #[error("manifest incomplete: expected {expected} chunks, missing indices {missing:?}")]
    Incomplete {
        /// Declared chunk count.
        expected: usize,
        /// Indices without an entry, ascending.
        missing: Vec<usize>,
    },

    /// Indices at or beyond the declared count are present.
    #[error("manifest has unexpected chunks beyond {expected}: {unexpected:?}")]
    Unexpected {
        /// Declared chunk count.
        expected: usize,
        /// Indices outside `0..expected`, ascending.
        unexpected: Vec<usize>,
    },

    /// Directory listing failed.
    #[error("failed to scan {path}: {source}")]
    Scan {
        /// Directory being scanned.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// Reading a chunk for fingerprinting failed.
    #[error("failed to read chunk {index} at {path}: {source}")]
    Read {
        /// Chunk index.
        index: usize,
        /// Chunk path.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },
}

/// File naming convention `{index}.{extension}`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChunkNaming {
    extension: String,
}

impl ChunkNaming {
    /// Naming with the given extension (a leading dot is ignored).
    pub fn new(extension: impl Into<String>) -> Self {
        let extension = extension.into();
        let extension = extension.trim_start_matches('.').to_string();
        Self { extension }
    }

    /// Extension without the dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// File name for a chunk index.
    pub fn file_name(&self, index: usize) -> String {
        format!("{}.{}", index, self.extension)
    }

    /// Full path for a chunk index inside `dir`.
    pub fn path_for(&self, dir: &Path, index: usize) -> PathBuf {
        dir.join(self.file_name(index))
    }

    /// Parse a file name back into its index.
    ///
    /// Only canonical decimal indices match: `7.fasta` does, `07.fasta`,
    /// `+7.fasta` and `7.fasta.tmp` do not.
    pub fn parse(&self, file_name: &str) -> Option<usize> {
        let stem = file_name
            .strip_suffix(self.extension.as_str())?
            .strip_suffix('.')?;
        if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if stem.len() > 1 && stem.starts_with('0') {
            return None;
        }
        stem.parse().ok()
    }
}

/// Ordered mapping from chunk index to file path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Manifest {
    entries: BTreeMap<usize, PathBuf>,
}

impl Manifest {
    /// Empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the file for a chunk, replacing any previous entry.
    pub fn insert(&mut self, index: usize, path: PathBuf) -> Option<PathBuf> {
        self.entries.insert(index, path)
    }

    /// Path for a chunk index.
    pub fn get(&self, index: usize) -> Option<&Path> {
        self.entries.get(&index).map(PathBuf::as_path)
    }

    /// Number of chunks present.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no chunks are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Path)> + '_ {
        self.entries
            .iter()
            .map(|(index, path)| (*index, path.as_path()))
    }

    /// Indices present, ascending.
    pub fn indices(&self) -> Vec<usize> {
        self.entries.keys().copied().collect()
    }

    /// Indices in `0..expected` that have no entry.
    pub fn missing(&self, expected: usize) -> Vec<usize> {
        (0..expected)
            .filter(|index| !self.entries.contains_key(index))
            .collect()
    }

    /// Require exactly the indices `0..expected`.
    pub fn verify(&self, expected: usize) -> Result<(), ManifestError> {
        let missing = self.missing(expected);
        if !missing.is_empty() {
            return Err(ManifestError::Incomplete { expected, missing });
        }
        let unexpected: Vec<usize> = self.entries.range(expected..).map(|(i, _)| *i).collect();
        if !unexpected.is_empty() {
            return Err(ManifestError::Unexpected {
                expected,
                unexpected,
            });
        }
        Ok(())
    }

    /// Digest over indices and file contents.
    ///
    /// Two runs that produced the same chunk set yield the same fingerprint.
    /// Files are streamed through the hasher, never loaded whole.
    pub fn fingerprint(&self) -> Result<blake3::Hash, ManifestError> {
        let mut hasher = blake3::Hasher::new();
        for (index, path) in self.iter() {
            let read_err = |source: io::Error| ManifestError::Read {
                index,
                path: path.display().to_string(),
                source,
            };
            let file = File::open(path).map_err(read_err)?;
            let len = file.metadata().map_err(read_err)?.len();
            hasher.update(&(index as u64).to_le_bytes());
            hasher.update(&len.to_le_bytes());
            hasher.update_reader(file).map_err(read_err)?;
        }
        Ok(hasher.finalize())
    }
}

impl FromIterator<(usize, PathBuf)> for Manifest {
    fn from_iter<I: IntoIterator<Item = (usize, PathBuf)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Discover chunk files in `dir` that follow `naming`.
///
/// Non-matching entries are ignored. A directory that does not exist yields
/// an empty manifest.
pub fn scan(dir: &Path, naming: &ChunkNaming) -> Result<Manifest, ManifestError> {
    let scan_err = |source: io::Error| ManifestError::Scan {
        path: dir.display().to_string(),
        source,
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Manifest::new()),
        Err(err) => return Err(scan_err(err)),
    };

    let mut manifest = Manifest::new();
    for entry in entries {
        let entry = entry.map_err(scan_err)?;
        if !entry.file_type().map_err(scan_err)?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(index) = name.to_str().and_then(|name| naming.parse(name)) else {
            continue;
        };
        manifest.insert(index, entry.path());
    }
    debug!(dir = %dir.display(), chunks = manifest.len(), "scanned chunk directory");
    Ok(manifest)
}

/// [`scan`] and require the contiguous range `0..expected`.
pub fn scan_expecting(
    dir: &Path,
    naming: &ChunkNaming,
    expected: usize,
) -> Result<Manifest, ManifestError> {
    let manifest = scan(dir, naming)?;
    let missing = manifest.missing(expected);
    if !missing.is_empty() {
        return Err(ManifestError::Incomplete { expected, missing });
    }
    Ok(manifest)
}
