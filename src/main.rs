use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use seqfan::manifest;
use seqfan::partition::{PartitionMode, Partitioner};
use seqfan::sizing::{self, read_size_metric, ChunkBounds, PartitionPlan, SizeMetric};
use seqfan::{
    Aggregator, Annotation, ChunkNaming, CommandInvocation, HeaderPolicy, Pipeline,
    PipelineConfig,
};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "seqfan",
    version,
    about = "Split query FASTA files, run a tool per chunk, and join the results"
)]
struct Cli {
    /// Enable debug-level logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the chunk target for a size metric.
    Plan {
        #[command(flatten)]
        sizing: SizingArgs,
    },
    /// Partition an input into `{index}.{ext}` chunk files.
    Split {
        /// Query file (plain or gzip).
        input: PathBuf,
        /// Directory receiving the chunks.
        #[arg(long)]
        out_dir: PathBuf,
        #[command(flatten)]
        sizing: SizingArgs,
        /// Chunk file extension.
        #[arg(long, default_value = "fasta")]
        extension: String,
        /// Single pass with this many expected records instead of counting first.
        #[arg(long)]
        estimated_records: Option<u64>,
    },
    /// Split, run a command per chunk, and join the results.
    Run {
        /// Query file (plain or gzip).
        input: PathBuf,
        /// Final joined output.
        output: PathBuf,
        /// Scratch directory for chunks, results and logs.
        #[arg(long, default_value = "seqfan_work")]
        work_dir: PathBuf,
        #[command(flatten)]
        sizing: SizingArgs,
        #[command(flatten)]
        join: JoinArgs,
        /// Worker threads (0 = one per core).
        #[arg(long, default_value_t = 0)]
        threads: usize,
        /// Keep chunks and per-chunk results after success.
        #[arg(long)]
        keep_intermediates: bool,
        /// Result file extension.
        #[arg(long, default_value = "out")]
        result_extension: String,
        /// Program and arguments; `{input}`, `{output}`, `{index}`, `{log}` are substituted.
        #[arg(last = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },
    /// Join `{index}.{ext}` result files found in a directory.
    Join {
        /// Directory holding chunk results.
        dir: PathBuf,
        /// Final joined output.
        output: PathBuf,
        /// Result file extension.
        #[arg(long, default_value = "out")]
        extension: String,
        /// Declared chunk count; defaults to the highest index found plus one.
        #[arg(long)]
        expected: Option<usize>,
        #[command(flatten)]
        join: JoinArgs,
    },
}

#[derive(Args, Debug)]
struct SizingArgs {
    #[command(flatten)]
    metric: MetricArgs,
    /// Lower bound on the chunk count.
    #[arg(long, default_value_t = sizing::DEFAULT_MIN_CHUNKS)]
    nseq_min: usize,
    /// Upper bound on the chunk count.
    #[arg(long, default_value_t = sizing::DEFAULT_MAX_CHUNKS)]
    nseq_max: usize,
    /// Work capacity per chunk (K in round(K / size)).
    #[arg(long, default_value_t = sizing::DEFAULT_CAPACITY)]
    capacity: f64,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct MetricArgs {
    /// File holding the size metric as a single number.
    #[arg(long)]
    metric_file: Option<PathBuf>,
    /// Size metric given directly.
    #[arg(long)]
    metric: Option<f64>,
}

#[derive(Args, Debug)]
struct JoinArgs {
    /// Header handling for chunk results.
    #[arg(long, value_enum, default_value_t = HeaderArg::None)]
    header: HeaderArg,
    /// Prefix each result line with its chunk index.
    #[arg(long)]
    annotate: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum HeaderArg {
    /// Results carry no header.
    None,
    /// First line of each result is a header kept once.
    FirstLine,
}

impl JoinArgs {
    fn header(&self) -> HeaderPolicy {
        match self.header {
            HeaderArg::None => HeaderPolicy::None,
            HeaderArg::FirstLine => HeaderPolicy::FirstLine,
        }
    }

    fn annotation(&self) -> Annotation {
        if self.annotate {
            Annotation::ChunkIndex
        } else {
            Annotation::None
        }
    }
}

impl SizingArgs {
    fn metric(&self) -> Result<SizeMetric> {
        match (&self.metric.metric_file, self.metric.metric) {
            (Some(path), _) => read_size_metric(path)
                .with_context(|| format!("failed to load size metric from {}", path.display())),
            (None, Some(value)) => Ok(SizeMetric::new(value)?),
            (None, None) => bail!("either --metric or --metric-file is required"),
        }
    }

    fn bounds(&self) -> Result<ChunkBounds> {
        Ok(ChunkBounds::new(self.nseq_min, self.nseq_max)?)
    }

    fn plan(&self) -> Result<PartitionPlan> {
        let plan = PartitionPlan::estimate(self.metric()?, self.bounds()?, self.capacity)
            .context("failed to estimate partition plan")?;
        Ok(plan)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Plan { sizing } => run_plan(&sizing)?,
        Commands::Split {
            input,
            out_dir,
            sizing,
            extension,
            estimated_records,
        } => run_split(&input, &out_dir, &sizing, &extension, estimated_records)?,
        Commands::Run {
            input,
            output,
            work_dir,
            sizing,
            join,
            threads,
            keep_intermediates,
            result_extension,
            command,
        } => {
            let config = PipelineConfig::new(work_dir)
                .with_bounds(sizing.nseq_min, sizing.nseq_max)
                .with_capacity(sizing.capacity)
                .with_extensions("fasta", result_extension)
                .with_threads(threads)
                .with_header(join.header())
                .with_annotation(join.annotation())
                .with_keep_intermediates(keep_intermediates);
            run_pipeline(&input, &output, config, &sizing, command)?
        }
        Commands::Join {
            dir,
            output,
            extension,
            expected,
            join,
        } => run_join(&dir, &output, &extension, expected, &join)?,
    }

    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_plan(sizing: &SizingArgs) -> Result<()> {
    let plan = sizing.plan()?;
    println!("{}", plan.chunk_target);
    Ok(())
}

fn run_split(
    input: &Path,
    out_dir: &Path,
    sizing: &SizingArgs,
    extension: &str,
    estimated_records: Option<u64>,
) -> Result<()> {
    let plan = sizing.plan()?;
    let partitioner = Partitioner::new(plan.chunk_target, ChunkNaming::new(extension));
    let outcome = match estimated_records {
        Some(estimated_records) => {
            let reader = seqfan::partition::open_records(input)
                .with_context(|| format!("failed to open {}", input.display()))?;
            partitioner.partition_reader(
                reader,
                PartitionMode::Streaming { estimated_records },
                out_dir,
            )
        }
        None => partitioner.partition_file(input, out_dir),
    }
    .with_context(|| format!("failed to partition {}", input.display()))?;

    info!(
        chunk_target = plan.chunk_target,
        chunks = outcome.chunk_count(),
        records = outcome.records,
        "split complete"
    );
    println!("{}", outcome.chunk_count());
    Ok(())
}

fn run_pipeline(
    input: &Path,
    output: &Path,
    config: PipelineConfig,
    sizing: &SizingArgs,
    command: Vec<String>,
) -> Result<()> {
    let mut command = command.into_iter();
    let program = command
        .next()
        .context("a command to run per chunk is required after `--`")?;
    let invocation = CommandInvocation::new(program, command.collect());

    let metric = sizing.metric()?;
    let pipeline = Pipeline::new(config).context("invalid pipeline configuration")?;
    let summary = pipeline
        .run(input, metric, &invocation, output)
        .with_context(|| format!("pipeline failed for {}", input.display()))?;

    info!(
        records = summary.records,
        chunks = summary.chunks,
        bytes = summary.aggregate.bytes,
        fingerprint = %summary.chunk_fingerprint.to_hex(),
        output = %summary.aggregate.path.display(),
        "run complete"
    );
    Ok(())
}

fn run_join(
    dir: &Path,
    output: &Path,
    extension: &str,
    expected: Option<usize>,
    join: &JoinArgs,
) -> Result<()> {
    let naming = ChunkNaming::new(extension);
    let results = match expected {
        Some(expected) => manifest::scan_expecting(dir, &naming, expected)?,
        None => manifest::scan(dir, &naming)?,
    };
    let expected = expected.unwrap_or_else(|| {
        results
            .indices()
            .last()
            .map(|index| index + 1)
            .unwrap_or(0)
    });

    let summary = Aggregator::new(join.header())
        .with_annotation(join.annotation())
        .aggregate(&results, expected, output)
        .with_context(|| format!("failed to join results from {}", dir.display()))?;

    info!(
        chunks = summary.chunks,
        bytes = summary.bytes,
        output = %summary.path.display(),
        "join complete"
    );
    Ok(())
}
