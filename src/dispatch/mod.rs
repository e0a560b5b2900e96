//! Fan-out of one worker execution per realized chunk.
//!
//! The chunk set is only known once partitioning has finished, so the
//! dispatcher takes the chunk [`Manifest`] as an explicit argument and
//! returns a result manifest that holds only the chunks that succeeded.

mod invocation;

pub use invocation::{ChunkJob, CommandInvocation, ExecError, WorkerInvocation};

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::manifest::{ChunkNaming, Manifest};

/// Errors that stop dispatch as a whole (as opposed to per-chunk failures).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Worker pool could not be created.
    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Result or log directory could not be created.
    #[error("failed to prepare {path}: {source}")]
    Prepare {
        /// Directory that failed.
        path: String,
        /// Underlying I/O failure.
        source: io::Error,
    },
}

/// A chunk whose execution did not produce a result.
#[derive(Debug)]
pub struct ChunkFailure {
    /// Chunk index.
    pub index: usize,
    /// Log file of the failed execution.
    pub log: PathBuf,
    /// Why it failed.
    pub error: ExecError,
}

/// Outcome of dispatching a chunk set.
#[derive(Debug)]
pub struct DispatchReport {
    /// Result files of the chunks that succeeded.
    pub results: Manifest,
    /// Chunks that failed, ascending by index.
    pub failures: Vec<ChunkFailure>,
}

impl DispatchReport {
    /// Whether every chunk produced a result.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs a [`WorkerInvocation`] over every chunk on a bounded pool.
#[derive(Debug)]
pub struct Dispatcher {
    pool: rayon::ThreadPool,
    result_naming: ChunkNaming,
}

impl Dispatcher {
    /// Dispatcher with `threads` workers (0 lets rayon decide).
    pub fn new(threads: usize, result_naming: ChunkNaming) -> Result<Self, DispatchError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("seqfan-worker-{i}"))
            .build()?;
        Ok(Self {
            pool,
            result_naming,
        })
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `invocation` once per chunk.
    ///
    /// Results land at `{result_dir}/{index}.{ext}` and logs at
    /// `{log_dir}/{index}.log`. A result file only appears once its
    /// execution succeeded, so a failure never leaves a partial result.
    pub fn dispatch<W: WorkerInvocation + ?Sized>(
        &self,
        chunks: &Manifest,
        result_dir: &Path,
        log_dir: &Path,
        invocation: &W,
    ) -> Result<DispatchReport, DispatchError> {
        for dir in [result_dir, log_dir] {
            fs::create_dir_all(dir).map_err(|source| DispatchError::Prepare {
                path: dir.display().to_string(),
                source,
            })?;
        }
        info!(
            chunks = chunks.len(),
            threads = self.threads(),
            "dispatching chunk jobs"
        );

        let jobs: Vec<(usize, &Path)> = chunks.iter().collect();
        let outcomes: Vec<(usize, PathBuf, Result<PathBuf, ExecError>)> = self.pool.install(|| {
            jobs.par_iter()
                .map(|&(index, input)| {
                    let log = log_dir.join(format!("{index}.log"));
                    let outcome = self.run_one(index, input, result_dir, &log, invocation);
                    (index, log, outcome)
                })
                .collect()
        });

        let mut results = Manifest::new();
        let mut failures = Vec::new();
        for (index, log, outcome) in outcomes {
            match outcome {
                Ok(path) => {
                    results.insert(index, path);
                }
                Err(error) => {
                    warn!(index, log = %log.display(), %error, "chunk execution failed");
                    failures.push(ChunkFailure { index, log, error });
                }
            }
        }
        info!(
            succeeded = results.len(),
            failed = failures.len(),
            "dispatch finished"
        );
        Ok(DispatchReport { results, failures })
    }

    fn run_one<W: WorkerInvocation + ?Sized>(
        &self,
        index: usize,
        input: &Path,
        result_dir: &Path,
        log: &Path,
        invocation: &W,
    ) -> Result<PathBuf, ExecError> {
        let final_path = self.result_naming.path_for(result_dir, index);
        let staging = tempfile::Builder::new()
            .prefix(&format!(".{index}."))
            .suffix(".partial")
            .tempfile_in(result_dir)?
            .into_temp_path();

        let job = ChunkJob {
            index,
            input: input.to_path_buf(),
            output: staging.to_path_buf(),
            log: log.to_path_buf(),
        };
        debug!(index, input = %input.display(), "starting chunk");
        invocation.execute(&job)?;

        staging
            .persist(&final_path)
            .map_err(|err| ExecError::Io(err.error))?;
        debug!(index, output = %final_path.display(), "chunk finished");
        Ok(final_path)
    }
}
