use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::debug;

/// Errors reported by a single chunk execution.
#[derive(Debug, Error)]
pub enum ExecError {
    /// External program could not be started.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying I/O failure.
        source: io::Error,
    },

    /// External program exited unsuccessfully.
    #[error("{program} exited with {status}")]
    Failed {
        /// Program name.
        program: String,
        /// Exit status.
        status: ExitStatus,
    },

    /// Log or output plumbing around the execution failed.
    #[error("i/o error around chunk execution: {0}")]
    Io(#[from] io::Error),

    /// Worker-defined failure.
    #[error("worker failed: {0}")]
    Worker(String),
}

impl ExecError {
    /// Helper for worker-originated errors.
    pub fn worker(msg: impl Into<String>) -> Self {
        ExecError::Worker(msg.into())
    }
}

/// Everything one chunk execution needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkJob {
    /// Zero-based chunk index.
    pub index: usize,
    /// Chunk file to read.
    pub input: PathBuf,
    /// File the result must be written to.
    pub output: PathBuf,
    /// Per-chunk log file.
    pub log: PathBuf,
}

/// Capability to run the wrapped unit of work over one chunk.
///
/// Implementations must only read `job.input` and only write `job.output`
/// and `job.log`; jobs run concurrently.
pub trait WorkerInvocation: Sync {
    /// Process one chunk.
    fn execute(&self, job: &ChunkJob) -> Result<(), ExecError>;
}

impl<F> WorkerInvocation for F
where
    F: Fn(&ChunkJob) -> Result<(), ExecError> + Sync,
{
    fn execute(&self, job: &ChunkJob) -> Result<(), ExecError> {
        self(job)
    }
}

/// Runs an external program per chunk.
///
/// Arguments may contain `{input}`, `{output}`, `{index}` and `{log}`
/// placeholders. When no argument mentions `{output}` the program's stdout
/// becomes the result file. Stderr always goes to the chunk log. The child
/// inherits the caller's working directory, so relative job paths resolve
/// the same way they do for the caller.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    program: String,
    args: Vec<String>,
}

impl CommandInvocation {
    /// Invocation of `program` with templated `args`.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Program name.
    pub fn program(&self) -> &str {
        &self.program
    }

    fn writes_output_itself(&self) -> bool {
        self.args.iter().any(|arg| arg.contains("{output}"))
    }

    /// Arguments with placeholders substituted for `job`.
    pub fn render_args(&self, job: &ChunkJob) -> Vec<OsString> {
        self.args
            .iter()
            .map(|arg| {
                OsString::from(
                    arg.replace("{input}", &job.input.to_string_lossy())
                        .replace("{output}", &job.output.to_string_lossy())
                        .replace("{log}", &job.log.to_string_lossy())
                        .replace("{index}", &job.index.to_string()),
                )
            })
            .collect()
    }
}

impl WorkerInvocation for CommandInvocation {
    fn execute(&self, job: &ChunkJob) -> Result<(), ExecError> {
        let log = File::create(&job.log)?;
        let stdout = if self.writes_output_itself() {
            Stdio::from(log.try_clone()?)
        } else {
            Stdio::from(File::create(&job.output)?)
        };

        let args = self.render_args(job);
        debug!(index = job.index, program = %self.program, ?args, "running chunk command");
        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::from(log))
            .status()
            .map_err(|source| ExecError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ExecError::Failed {
                program: self.program.clone(),
                status,
            });
        }
        Ok(())
    }
}
