use clap::{Parser, Subcommand};
use merset_lib::counting::ClosedFormEstimator;
use merset_lib::serialization::index_file_path;
use merset_lib::{
    plan_run, AdjustOp, Combine, CountingConfig, FilterRule, Histogram, IndexReader, MerOp,
    MerOperation, OpReport, Orientation, Statistics, ThresholdSpec,
};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "merset")]
#[command(version = "0.1.0")]
#[command(about = "merset: k-mer counting and multiset algebra", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count k-mers in sequence files into an index
    Count {
        /// Input FASTA/FASTQ file (repeat for multiple inputs)
        #[arg(short, long, required = true)]
        input: Vec<PathBuf>,

        /// K-mer length
        #[arg(short, long)]
        k: u32,

        /// Output index file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Orientation: forward, reverse, or canonical
        #[arg(long, default_value = "canonical")]
        orientation: String,

        /// Memory budget in GiB (0 = detect physical memory)
        #[arg(short = 'm', long, default_value = "0")]
        memory: u64,

        /// Number of threads (0 = all available cores)
        #[arg(short = 't', long, default_value = "0")]
        threads: usize,

        /// Directory for spill files when counting out of core
        #[arg(long)]
        tmp_dir: Option<PathBuf>,

        /// Override the distinct-k-mer estimate used for planning
        #[arg(long)]
        expected_distinct: Option<u64>,

        /// Resolve and log the counting plan without reading any input
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Merge counted indexes under a set operator
    Merge {
        /// Set operator to apply across the inputs
        #[arg(long)]
        op: String,

        /// Input index files (first input survives a difference)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output index file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Keep k-mers whose count passes a threshold rule
    Filter {
        /// Input index file
        input: PathBuf,

        /// Rule: less-than, greater-than, at-least, at-most, equal-to, not-equal-to
        #[arg(long)]
        rule: String,

        /// Fixed count threshold
        #[arg(long)]
        value: Option<u64>,

        /// Threshold at the given fraction of distinct k-mers
        #[arg(long)]
        fraction_distinct: Option<f64>,

        /// Threshold at the given fraction of total occurrences
        #[arg(long)]
        word_frequency: Option<f64>,

        /// Output index file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rewrite every count by a constant
    Adjust {
        /// Input index file
        input: PathBuf,

        /// Operation: increase, decrease, multiply, divide, modulo
        #[arg(long)]
        op: String,

        /// Constant applied to every count
        #[arg(long)]
        value: u64,

        /// Output index file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the count histogram stored in an index
    Histogram {
        /// Input index file
        input: PathBuf,
    },

    /// Print summary statistics for an index
    Stats {
        /// Input index file
        input: PathBuf,
    },

    /// Compare two indexes k-mer by k-mer
    Compare {
        /// First index file
        first: PathBuf,

        /// Second index file
        second: PathBuf,
    },

    /// Dump an index as KMER<TAB>count text
    Print {
        /// Input index file
        input: PathBuf,

        /// Write text here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing: use RUST_LOG if set, otherwise default to info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Count {
            input,
            k,
            output,
            orientation,
            memory,
            threads,
            tmp_dir,
            expected_distinct,
            dry_run,
        } => {
            count_command(
                input,
                k,
                output,
                orientation,
                memory,
                threads,
                tmp_dir,
                expected_distinct,
                dry_run,
            )?;
        }
        Commands::Merge { op, inputs, output } => {
            merge_command(op, inputs, output)?;
        }
        Commands::Filter {
            input,
            rule,
            value,
            fraction_distinct,
            word_frequency,
            output,
        } => {
            filter_command(input, rule, value, fraction_distinct, word_frequency, output)?;
        }
        Commands::Adjust {
            input,
            op,
            value,
            output,
        } => {
            adjust_command(input, op, value, output)?;
        }
        Commands::Histogram { input } => {
            histogram_command(input)?;
        }
        Commands::Stats { input } => {
            stats_command(input)?;
        }
        Commands::Compare { first, second } => {
            compare_command(first, second)?;
        }
        Commands::Print { input, output } => {
            print_command(input, output)?;
        }
    }

    Ok(())
}

/// Count k-mers from sequence files into an index
#[allow(clippy::too_many_arguments)]
fn count_command(
    input: Vec<PathBuf>,
    k: u32,
    output: Option<PathBuf>,
    orientation: String,
    memory: u64,
    threads: usize,
    tmp_dir: Option<PathBuf>,
    expected_distinct: Option<u64>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let orientation = parse_orientation(&orientation)?;

    let mut config = CountingConfig::new(k)?;
    config.orientation = orientation;
    config.memory_bytes = memory * (1 << 30);
    config.num_threads = threads;
    config.expected_distinct = expected_distinct;
    if let Some(dir) = tmp_dir {
        config.tmp_dirname = dir;
    }

    if dry_run {
        config.print();
        let summary = plan_run(&config, &input, &ClosedFormEstimator)?;
        summary.print();
        info!("Dry run: no input was read");
        return Ok(());
    }

    let output =
        output.ok_or_else(|| anyhow::anyhow!("count needs --output unless --dry-run is set"))?;
    let output = index_file_path(output);

    info!("Counting k-mers...");
    for path in &input {
        info!("  Input: {}", path.display());
    }

    let mut node = MerOperation::new(MerOp::Count(orientation));
    node.add_input_sequences(input, config);
    node.set_output(&output);
    node.run_to_end()?;

    info!("Index written to {}", output.display());
    Ok(())
}

/// Merge indexes under a set operator
fn merge_command(op: String, inputs: Vec<PathBuf>, output: PathBuf) -> anyhow::Result<()> {
    let op = parse_merge_op(&op)?;
    let output = index_file_path(output);
    info!("Merging {} indexes under {}...", inputs.len(), op.name());

    let mut node = MerOperation::new(op);
    for path in &inputs {
        node.add_input_index(path)?;
    }
    node.set_output(&output);
    node.run_to_end()?;

    info!("Index written to {}", output.display());
    Ok(())
}

/// Filter an index by a count threshold
fn filter_command(
    input: PathBuf,
    rule: String,
    value: Option<u64>,
    fraction_distinct: Option<f64>,
    word_frequency: Option<f64>,
    output: PathBuf,
) -> anyhow::Result<()> {
    let rule = parse_filter_rule(&rule)?;
    let threshold = match (value, fraction_distinct, word_frequency) {
        (Some(v), None, None) => ThresholdSpec::Value(v),
        (None, Some(f), None) => ThresholdSpec::FractionDistinct(f),
        (None, None, Some(f)) => ThresholdSpec::WordFrequency(f),
        _ => anyhow::bail!(
            "filter needs exactly one of --value, --fraction-distinct, --word-frequency"
        ),
    };

    let output = index_file_path(output);
    let mut node = MerOperation::new(MerOp::Filter { rule, threshold });
    node.add_input_index(&input)?;
    node.set_output(&output);
    node.run_to_end()?;

    info!("Index written to {}", output.display());
    Ok(())
}

/// Adjust every count in an index by a constant
fn adjust_command(input: PathBuf, op: String, value: u64, output: PathBuf) -> anyhow::Result<()> {
    let op = parse_adjust_op(&op)?;
    let output = index_file_path(output);

    let mut node = MerOperation::new(MerOp::Adjust { op, constant: value });
    node.add_input_index(&input)?;
    node.set_output(&output);
    node.run_to_end()?;

    info!("Index written to {}", output.display());
    Ok(())
}

/// Print the histogram stored in an index trailer
fn histogram_command(input: PathBuf) -> anyhow::Result<()> {
    let reader = IndexReader::open(&input)?;
    info!(
        "Index loaded (k={}, {} distinct, {} total)",
        reader.k(),
        reader.distinct(),
        reader.total()
    );

    let histogram = Histogram::from_stored(reader.histogram());
    histogram.render(&mut io::stdout().lock())?;
    Ok(())
}

/// Print summary statistics derived from the stored histogram
fn stats_command(input: PathBuf) -> anyhow::Result<()> {
    let reader = IndexReader::open(&input)?;
    info!(
        "Index loaded (k={}, {} distinct, {} total)",
        reader.k(),
        reader.distinct(),
        reader.total()
    );

    let stats = Statistics::from_histogram(Histogram::from_stored(reader.histogram()));
    stats.render(&mut io::stdout().lock())?;
    Ok(())
}

/// Compare two indexes and report the differences
fn compare_command(first: PathBuf, second: PathBuf) -> anyhow::Result<()> {
    info!("Comparing indexes...");
    info!("  First: {}", first.display());
    info!("  Second: {}", second.display());

    let mut node = MerOperation::new(MerOp::Compare);
    node.add_input_index(&first)?;
    node.add_input_index(&second)?;

    if let Some(OpReport::Compare(report)) = node.run_to_end()? {
        report.render(&mut io::stdout().lock())?;
        if !report.is_identical() {
            warn!("Indexes differ");
            println!("\n✗ Indexes differ");
            std::process::exit(1);
        }
        println!("\n✓ Indexes are identical");
    }
    Ok(())
}

/// Dump an index as text, one KMER<TAB>count line per record
fn print_command(input: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut node = MerOperation::new(MerOp::PassThrough);
    node.add_input_index(&input)?;

    let printer: Box<dyn Write> = match &output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(BufWriter::new(io::stdout())),
    };
    node.add_printer(printer);
    node.run_to_end()?;
    Ok(())
}

fn parse_orientation(name: &str) -> anyhow::Result<Orientation> {
    match name {
        "forward" => Ok(Orientation::Forward),
        "reverse" => Ok(Orientation::Reverse),
        "canonical" => Ok(Orientation::Canonical),
        _ => Err(anyhow::anyhow!(
            "unknown orientation '{name}' (expected forward, reverse, or canonical)"
        )),
    }
}

fn parse_merge_op(name: &str) -> anyhow::Result<MerOp> {
    match name {
        "union" => Ok(MerOp::Union(Combine::First)),
        "union-min" => Ok(MerOp::Union(Combine::Min)),
        "union-max" => Ok(MerOp::Union(Combine::Max)),
        "union-sum" => Ok(MerOp::Union(Combine::Sum)),
        "intersect" => Ok(MerOp::Intersect(Combine::First)),
        "intersect-min" => Ok(MerOp::Intersect(Combine::Min)),
        "intersect-max" => Ok(MerOp::Intersect(Combine::Max)),
        "intersect-sum" => Ok(MerOp::Intersect(Combine::Sum)),
        "difference" => Ok(MerOp::Difference),
        "symmetric-difference" => Ok(MerOp::SymmetricDifference),
        _ => Err(anyhow::anyhow!(
            "unknown merge operator '{name}' (expected union[-min|-max|-sum], \
             intersect[-min|-max|-sum], difference, or symmetric-difference)"
        )),
    }
}

fn parse_filter_rule(name: &str) -> anyhow::Result<FilterRule> {
    match name {
        "less-than" => Ok(FilterRule::LessThan),
        "greater-than" => Ok(FilterRule::GreaterThan),
        "at-least" => Ok(FilterRule::AtLeast),
        "at-most" => Ok(FilterRule::AtMost),
        "equal-to" => Ok(FilterRule::EqualTo),
        "not-equal-to" => Ok(FilterRule::NotEqualTo),
        _ => Err(anyhow::anyhow!(
            "unknown filter rule '{name}' (expected less-than, greater-than, at-least, \
             at-most, equal-to, or not-equal-to)"
        )),
    }
}

fn parse_adjust_op(name: &str) -> anyhow::Result<AdjustOp> {
    match name {
        "increase" => Ok(AdjustOp::Increase),
        "decrease" => Ok(AdjustOp::Decrease),
        "multiply" => Ok(AdjustOp::Multiply),
        "divide" => Ok(AdjustOp::Divide),
        "modulo" => Ok(AdjustOp::Modulo),
        _ => Err(anyhow::anyhow!(
            "unknown adjust operation '{name}' (expected increase, decrease, multiply, \
             divide, or modulo)"
        )),
    }
}
