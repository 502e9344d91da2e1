//! Counting pipeline: sequence files in, sorted counted records out
//!
//! `count_files` picks between two schemes by projected footprint: a
//! direct `4^k` table when the budget allows it, and prefix-bucketized
//! spill files when it does not. Both honor the same stream contract of
//! strictly ascending keys with positive counts.

pub mod bucketized;
pub mod config;
pub mod estimate;
pub mod simple;

pub use bucketized::BucketStream;
pub use config::CountingConfig;
pub use estimate::{ClosedFormEstimator, DistinctEstimator};

use std::path::PathBuf;

use tracing::info;

use crate::error::{EngineError, Result};
use crate::kmer::{KmerCodec, Orientation};
use crate::layout::{plan_counting, CountingPlan};
use crate::record::KmerRecord;

/// Sorted counted records, fully resident or draining spill buckets
#[derive(Debug)]
pub enum CountStream {
    /// Everything collapsed in memory up front
    Memory {
        /// Records in ascending key order
        records: Vec<KmerRecord>,
        /// Cursor into `records`
        pos: usize,
    },
    /// Buckets loaded one at a time from the external pass
    Buckets(BucketStream),
}

impl CountStream {
    /// Wrap records already in ascending key order
    pub fn from_records(records: Vec<KmerRecord>) -> Self {
        debug_assert!(records.windows(2).all(|w| w[0].kmer < w[1].kmer));
        CountStream::Memory { records, pos: 0 }
    }

    /// The record the cursor is on, if any
    pub fn peek(&self) -> Option<KmerRecord> {
        match self {
            CountStream::Memory { records, pos } => records.get(*pos).copied(),
            CountStream::Buckets(stream) => stream.peek(),
        }
    }

    /// Step past the current record and return the next
    pub fn advance(&mut self) -> Result<Option<KmerRecord>> {
        match self {
            CountStream::Memory { records, pos } => {
                if *pos < records.len() {
                    *pos += 1;
                }
                Ok(records.get(*pos).copied())
            }
            CountStream::Buckets(stream) => stream.advance(),
        }
    }
}

/// The resolved shape of a counting run before any input is read
#[derive(Debug, Clone)]
pub struct PlanSummary {
    /// Window size
    pub k: u32,
    /// Orientation applied to every window
    pub orientation: Orientation,
    /// Worker count the plan assumed
    pub threads: usize,
    /// Memory budget the plan fits inside
    pub memory_bytes: u64,
    /// Guessed window total across all inputs
    pub est_total_windows: u64,
    /// Estimated distinct keys
    pub est_distinct: u64,
    /// The selected counting scheme
    pub plan: CountingPlan,
}

impl PlanSummary {
    /// Log the chosen scheme via tracing
    pub fn print(&self) {
        info!("Counting plan:");
        info!("  scheme = {}", self.plan.name());
        info!("  threads = {}", self.threads);
        info!("  memory budget = {} MiB", self.memory_bytes >> 20);
        info!("  estimated windows = {}", self.est_total_windows);
        info!("  estimated distinct = {}", self.est_distinct);
        match &self.plan {
            CountingPlan::Simple {
                slots,
                projected_bytes,
                ..
            } => {
                info!("  table slots = {}", slots);
                info!("  projected footprint = {} MiB", projected_bytes >> 20);
            }
            CountingPlan::Bucketized {
                layout,
                projected_bytes,
            } => {
                info!(
                    "  buckets = {} ({} prefix bits)",
                    layout.bucket_count(),
                    layout.prefix_bits()
                );
                info!("  projected bucket pass = {} MiB", projected_bytes >> 20);
            }
        }
    }
}

/// Resolve the scheme a run over `paths` would use, without reading them
///
/// `config.expected_distinct` overrides the estimator when set.
///
/// # Errors
/// Fails on invalid configuration, an empty path list, unreadable input
/// metadata, or a budget no scheme fits.
pub fn plan_run(
    config: &CountingConfig,
    paths: &[PathBuf],
    estimator: &dyn DistinctEstimator,
) -> Result<PlanSummary> {
    config.validate()?;
    if paths.is_empty() {
        return Err(EngineError::MissingParameter {
            op: "count",
            what: "at least one sequence file",
        });
    }
    let threads = config.resolved_threads();
    let memory_bytes = config.resolved_memory_bytes();
    let est_total_windows = estimate::guess_total_windows(paths)?;
    let est_distinct = config
        .expected_distinct
        .unwrap_or_else(|| estimator.estimate(config.k, est_total_windows));
    let plan = plan_counting(config.k, memory_bytes, threads, est_total_windows, est_distinct)?;
    Ok(PlanSummary {
        k: config.k,
        orientation: config.orientation,
        threads,
        memory_bytes,
        est_total_windows,
        est_distinct,
        plan,
    })
}

/// Count every oriented window of `paths` into a sorted stream
///
/// # Errors
/// Fails on invalid configuration, unreadable or malformed inputs,
/// non-ACGT bases, and a memory budget no scheme fits.
pub fn count_files(config: &CountingConfig, paths: &[PathBuf]) -> Result<CountStream> {
    let summary = plan_run(config, paths, &ClosedFormEstimator)?;
    config.print();
    summary.print();

    // num_threads == 0 means "all cores" (rayon default)
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_threads)
        .build()
        .map_err(|e| EngineError::InvalidConfig(format!("failed to create thread pool: {e}")))?;
    pool.install(|| count_files_inner(config, paths, &summary))
}

fn count_files_inner(
    config: &CountingConfig,
    paths: &[PathBuf],
    summary: &PlanSummary,
) -> Result<CountStream> {
    let codec = KmerCodec::new(config.k)?;
    match &summary.plan {
        CountingPlan::Simple { slots, .. } => {
            info!("Step 1: Tallying windows in the direct table...");
            let records = simple::count_simple(
                codec,
                config.orientation,
                paths,
                *slots,
                config.batch_bases,
            )?;
            let total: u64 = records.iter().map(|r| r.count).sum();
            info!("  Counted {} windows, {} distinct", total, records.len());
            Ok(CountStream::from_records(records))
        }
        CountingPlan::Bucketized { layout, .. } => {
            info!(
                "Step 1: Sharding windows into {} buckets...",
                layout.bucket_count()
            );
            // the other half of the budget belongs to the bucket pass
            let spill_bytes = usize::try_from(summary.memory_bytes / 2).unwrap_or(usize::MAX);
            let stream = bucketized::count_bucketized(
                codec,
                config.orientation,
                paths,
                *layout,
                config.batch_bases,
                spill_bytes,
                &config.tmp_dirname,
            )?;
            info!("  Sharded {} windows", stream.total_windows());
            info!("Step 2: Sorting and collapsing buckets on demand...");
            Ok(CountStream::Buckets(stream))
        }
    }
}
