//! # Dynamic fan-out/fan-in for large sequence query sets
//!
//! Searching a large query FASTA against a large database is split into
//! independent pieces whose number is only known at run time:
//!
//! 1. **Size estimation**: `chunk_target = clamp(round(K / S), min, max)`
//!    from the database size `S` and a capacity constant `K`
//! 2. **Partitioning**: the query stream is cut into chunk files on record
//!    boundaries, returning a [`Manifest`] of what was written
//! 3. **Dispatch**: one isolated worker execution per chunk, in parallel
//! 4. **Aggregation**: results are joined in chunk order and atomically
//!    published; any gap fails the run
//!
//! ## Usage Example
//!
//! ```ignore
//! use seqfan::{CommandInvocation, Pipeline, PipelineConfig, SizeMetric};
//!
//! let pipeline = Pipeline::new(PipelineConfig::new("work"))?;
//! let blast = CommandInvocation::new("blastn", vec![
//!     "-db".into(), "nt".into(), "-query".into(), "{input}".into(),
//!     "-out".into(), "{output}".into(), "-outfmt".into(), "7".into(),
//! ]);
//! let metric = SizeMetric::new(3e11)?;
//! let summary = pipeline.run("queries.fasta.gz".as_ref(), metric, &blast, "hits.tsv".as_ref())?;
//! ```

#![warn(missing_docs, missing_debug_implementations)]

pub mod aggregate; // Ordered fan-in of chunk results
pub mod dispatch;  // Per-chunk worker fan-out
pub mod manifest;  // Chunk naming, manifests, directory tracking
pub mod partition; // Record-preserving chunking
pub mod sizing;    // Chunk-count estimation

pub use aggregate::{AggregateError, AggregateSummary, Aggregator, Annotation, HeaderPolicy};
pub use dispatch::{
    ChunkFailure, ChunkJob, CommandInvocation, DispatchError, DispatchReport, Dispatcher,
    ExecError, WorkerInvocation,
};
pub use manifest::{ChunkNaming, Manifest, ManifestError};
pub use partition::{PartitionError, PartitionMode, PartitionOutcome, Partitioner};
pub use sizing::{ChunkBounds, PartitionPlan, SizeMetric, SizingError};

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

/// Pipeline configuration
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PipelineConfig {
    /// Scratch directory holding chunks, results and logs
    pub work_dir: PathBuf,

    /// Bounds on the chunk count (`nseq_min`, `nseq_max`)
    pub bounds: ChunkBounds,

    /// Capacity constant `K` of the size-to-chunk mapping
    pub capacity: f64,

    /// Byte that starts a record
    pub sigil: u8,

    /// Extension of chunk files
    pub chunk_extension: String,

    /// Extension of result files
    pub result_extension: String,

    /// Worker threads (0 = one per core)
    pub threads: usize,

    /// Header handling during aggregation
    pub header: HeaderPolicy,

    /// Per-record annotation during aggregation
    pub annotation: Annotation,

    /// Keep chunk and result files after a successful run
    pub keep_intermediates: bool,
}

impl PipelineConfig {
    /// Defaults tuned for BLASTN query splitting, rooted at `work_dir`.
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            bounds: ChunkBounds::default(),
            capacity: sizing::DEFAULT_CAPACITY,
            sigil: partition::FASTA_SIGIL,
            chunk_extension: "fasta".to_string(),
            result_extension: "out".to_string(),
            threads: 0,
            header: HeaderPolicy::None,
            annotation: Annotation::None,
            keep_intermediates: false,
        }
    }

    /// Set chunk-count bounds.
    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.bounds = ChunkBounds { min, max };
        self
    }

    /// Set the capacity constant.
    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the record sigil.
    pub fn with_sigil(mut self, sigil: u8) -> Self {
        self.sigil = sigil;
        self
    }

    /// Set chunk and result file extensions.
    pub fn with_extensions(
        mut self,
        chunk_extension: impl Into<String>,
        result_extension: impl Into<String>,
    ) -> Self {
        self.chunk_extension = chunk_extension.into();
        self.result_extension = result_extension.into();
        self
    }

    /// Set the worker thread count.
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    /// Set the header policy.
    pub fn with_header(mut self, header: HeaderPolicy) -> Self {
        self.header = header;
        self
    }

    /// Set the per-record annotation.
    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotation = annotation;
        self
    }

    /// Keep intermediates after success.
    pub fn with_keep_intermediates(mut self, keep: bool) -> Self {
        self.keep_intermediates = keep;
        self
    }

    /// Directory for chunk files.
    pub fn chunk_dir(&self) -> PathBuf {
        self.work_dir.join("chunks")
    }

    /// Directory for result files.
    pub fn result_dir(&self) -> PathBuf {
        self.work_dir.join("results")
    }

    /// Directory for per-chunk logs.
    pub fn log_dir(&self) -> PathBuf {
        self.work_dir.join("logs")
    }

    /// Naming of chunk files.
    pub fn chunk_naming(&self) -> ChunkNaming {
        ChunkNaming::new(self.chunk_extension.as_str())
    }

    /// Naming of result files.
    pub fn result_naming(&self) -> ChunkNaming {
        ChunkNaming::new(self.result_extension.as_str())
    }

    /// Check invariants that do not depend on the input.
    pub fn validate(&self) -> Result<(), PipelineError> {
        self.bounds.validate()?;
        if !self.capacity.is_finite() || self.capacity <= 0.0 {
            return Err(SizingError::InvalidCapacity(self.capacity).into());
        }
        if self.chunk_extension.trim_start_matches('.').is_empty()
            || self.result_extension.trim_start_matches('.').is_empty()
        {
            return Err(PipelineError::InvalidConfig(
                "chunk and result extensions must be non-empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Errors that terminate a pipeline run
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Configuration rejected before any work started
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Size estimation failed
    #[error(transparent)]
    Sizing(#[from] SizingError),

    /// Partitioning failed
    #[error(transparent)]
    Partition(#[from] PartitionError),

    /// Dispatch could not run
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Manifest discovery failed
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Aggregation failed
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// Cleanup of intermediates failed
    #[error("failed to remove intermediate {path}: {source}")]
    Cleanup {
        /// File that could not be removed
        path: String,
        /// Underlying I/O failure
        source: std::io::Error,
    },
}

/// Result of a full run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Plan the run was based on
    pub plan: PartitionPlan,
    /// Records found in the input
    pub records: u64,
    /// Chunks produced
    pub chunks: usize,
    /// Fingerprint of the chunk set
    pub chunk_fingerprint: blake3::Hash,
    /// Published aggregate
    pub aggregate: AggregateSummary,
}

/// Partition, dispatch and aggregate orchestrator
///
/// Each phase hands its manifest to the next explicitly, so every phase can
/// also be invoked on its own.
#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    dispatcher: Dispatcher,
}

impl Pipeline {
    /// Create a pipeline, validating the configuration
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let dispatcher = Dispatcher::new(config.threads, config.result_naming())?;
        Ok(Self { config, dispatcher })
    }

    /// Configuration in use
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Size estimation step
    pub fn plan(&self, metric: SizeMetric) -> Result<PartitionPlan, PipelineError> {
        let plan = PartitionPlan::estimate(metric, self.config.bounds, self.config.capacity)?;
        info!(
            metric = metric.value(),
            chunk_target = plan.chunk_target,
            min = plan.bounds.min,
            max = plan.bounds.max,
            "estimated partition plan"
        );
        Ok(plan)
    }

    /// Partition step: writes chunks into the work directory
    pub fn partition(
        &self,
        input: &Path,
        plan: &PartitionPlan,
    ) -> Result<PartitionOutcome, PipelineError> {
        let outcome = Partitioner::new(plan.chunk_target, self.config.chunk_naming())
            .with_sigil(self.config.sigil)
            .partition_file(input, &self.config.chunk_dir())?;
        Ok(outcome)
    }

    /// Dispatch step over an explicit chunk manifest
    pub fn dispatch<W: WorkerInvocation + ?Sized>(
        &self,
        chunks: &Manifest,
        invocation: &W,
    ) -> Result<DispatchReport, PipelineError> {
        let report = self.dispatcher.dispatch(
            chunks,
            &self.config.result_dir(),
            &self.config.log_dir(),
            invocation,
        )?;
        Ok(report)
    }

    /// Aggregation step; `expected` is the partitioner's chunk count
    pub fn aggregate(
        &self,
        results: &Manifest,
        expected: usize,
        output: &Path,
    ) -> Result<AggregateSummary, PipelineError> {
        let summary = Aggregator::new(self.config.header)
            .with_annotation(self.config.annotation)
            .aggregate(results, expected, output)?;
        Ok(summary)
    }

    /// Run every step and publish the aggregate at `output`
    ///
    /// On failure the work directory is left as is for inspection.
    pub fn run<W: WorkerInvocation + ?Sized>(
        &self,
        input: &Path,
        metric: SizeMetric,
        invocation: &W,
        output: &Path,
    ) -> Result<RunSummary, PipelineError> {
        let plan = self.plan(metric)?;
        let partitioned = self.partition(input, &plan)?;
        let chunk_fingerprint = partitioned.manifest.fingerprint()?;
        debug!(fingerprint = %chunk_fingerprint.to_hex(), "chunk set fingerprint");

        let report = self.dispatch(&partitioned.manifest, invocation)?;
        for failure in &report.failures {
            warn!(
                index = failure.index,
                log = %failure.log.display(),
                "chunk has no result"
            );
        }

        let aggregate = self.aggregate(&report.results, partitioned.chunk_count(), output)?;

        if !self.config.keep_intermediates {
            remove_files(&partitioned.manifest)?;
            remove_files(&report.results)?;
        }

        Ok(RunSummary {
            plan,
            records: partitioned.records,
            chunks: partitioned.chunk_count(),
            chunk_fingerprint,
            aggregate,
        })
    }
}

fn remove_files(manifest: &Manifest) -> Result<(), PipelineError> {
    for (_, path) in manifest.iter() {
        fs::remove_file(path).map_err(|source| PipelineError::Cleanup {
            path: path.display().to_string(),
            source,
        })?;
    }
    Ok(())
}
